//! Error kinds for every compilation phase. The structural
//! checker is the only phase that collects rather than fails fast; every
//! other phase returns at the first fault because downstream output is
//! meaningless once it happens.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub line: u32,
    pub message: String,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for LexError {}

/// One entry per imbalance found by the structural checker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralError {
    pub line: u32,
    pub message: String,
}

impl fmt::Display for StructuralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for StructuralError {}

/// Raised by the code generator on a malformed `if`/`for`/`while`/`func`/
/// `call`/`break`/`continue` construct — bad operator/operand shape in the
/// high-level grammar, or `break`/`continue` outside a loop. These are the
/// same sites that raise Python's builtin `SyntaxError` in
/// `original_source/src/codegen.py`; there is no separate codegen-internal
/// error kind in the original, so there isn't one here either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenError {
    pub line: u32,
    pub message: String,
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for CodegenError {}

/// Top-level error returned by [`crate::compile`]. Each variant corresponds to
/// one compilation phase that can fail.
#[derive(Debug)]
pub enum CasmError {
    Lexical(LexError),
    Structural(Vec<StructuralError>),
    Codegen(CodegenError),
    Io(std::io::Error),
}

impl fmt::Display for CasmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CasmError::Lexical(e) => write!(f, "{e}"),
            CasmError::Structural(errs) => {
                for (i, e) in errs.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{e}")?;
                }
                Ok(())
            }
            CasmError::Codegen(e) => write!(f, "{e}"),
            CasmError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CasmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CasmError::Lexical(e) => Some(e),
            CasmError::Codegen(e) => Some(e),
            CasmError::Io(e) => Some(e),
            CasmError::Structural(_) => None,
        }
    }
}

impl From<LexError> for CasmError {
    fn from(e: LexError) -> Self {
        CasmError::Lexical(e)
    }
}

impl From<CodegenError> for CasmError {
    fn from(e: CodegenError) -> Self {
        CasmError::Codegen(e)
    }
}

impl From<std::io::Error> for CasmError {
    fn from(e: std::io::Error) -> Self {
        CasmError::Io(e)
    }
}
