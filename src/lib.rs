//! `casm` — augments NASM/GAS-compatible assembly with `if/for/while/func`
//! control flow and a named standard library, then emits plain assembly a
//! real assembler can consume. The library owns the whole pipeline; file I/O
//! and toolchain invocation live only in `src/main.rs`.

pub mod backend;
pub mod checker;
pub mod codegen;
pub mod config;
pub mod error;
pub mod format;
pub mod lex;
pub mod regalloc;
pub mod stdlib;
pub mod token;

pub use config::{Arch, CompileConfig, ProjectConfig, Target};
pub use error::CasmError;
pub use token::{Token, TokenKind};

use std::path::Path;

/// Lex, check, generate, resolve the stdlib closure, and merge — in that
/// order, with no step re-entering an earlier one. `include_base` is the
/// directory `%include` paths are resolved relative to.
pub fn compile(source: &str, config: CompileConfig, include_base: &Path) -> Result<String, CasmError> {
    let tokens = lex::tokenize(source)?;

    let structural_errors = checker::check(&tokens);
    if !structural_errors.is_empty() {
        return Err(CasmError::Structural(structural_errors));
    }

    let mut backend = backend::make_backend(config.arch, config.target, config.effective_bits());
    let target = config.target;
    let arch = config.arch;
    let stdlib_overrides = config.stdlib_overrides.clone();
    let gen_result = codegen::generate(&tokens, backend.as_mut(), config)?;

    let mut catalogue = stdlib::StdlibCatalogue::for_target(target, arch);
    catalogue.apply_overrides(&stdlib_overrides);
    let closure = catalogue.closure(&gen_result.stdlib_used);

    let merged = format::merge_and_format(
        source,
        &gen_result.emissions,
        &closure,
        &gen_result.data_section,
        arch,
        include_base,
    );

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> CompileConfig {
        CompileConfig {
            target: Target::Windows,
            arch: Arch::X86_64,
            bits: 64,
            verbose: false,
            stdlib_overrides: Default::default(),
        }
    }

    #[test]
    fn empty_if_body_compiles_to_a_label_pair() {
        let src = "if rax == 0\nendif\n";
        let out = compile(src, cfg(), Path::new(".")).unwrap();
        assert!(out.contains("cmp rax, 0"));
        assert!(out.contains("jne .L0"));
    }

    #[test]
    fn unclosed_if_is_a_structural_error() {
        let src = "if rax == 0\n";
        let err = compile(src, cfg(), Path::new(".")).unwrap_err();
        matches!(err, CasmError::Structural(_));
    }

    #[test]
    fn compiling_twice_is_idempotent() {
        let src = "for i = 0, 3\ncall print i\nendfor\n";
        let first = compile(src, cfg(), Path::new(".")).unwrap();
        let second = compile(&first, cfg(), Path::new(".")).unwrap();
        assert_eq!(
            second.matches("_print_number:").count(),
            first.matches("_print_number:").count()
        );
    }

    #[test]
    fn call_print_pulls_in_stdlib_function() {
        let src = "call print \"hi\"\n";
        let out = compile(src, cfg(), Path::new(".")).unwrap();
        assert!(out.contains("_print_string:"));
        assert!(out.contains("extern printf"));
    }
}
