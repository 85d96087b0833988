//! Architecture-specific assembly emission.
//!
//! `original_source/src/backend.py` dispatches per-operation through an
//! abstract base class (`Backend` / `X86Backend` / `ARM64Backend`). Rust's
//! analogue is a trait with two small implementing structs — static
//! dispatch, no vtable, and the compiler catches a missing operation on
//! either backend at compile time.

use crate::config::{Arch, Target};

/// One architecture-specific assembly emitter. Every method appends to the
/// backend's own output buffer; callers read it back with [`Backend::take_output`].
pub trait Backend {
    fn emit_raw(&mut self, line: impl Into<String>);
    fn label(&mut self, name: &str) {
        self.emit_raw(format!("{name}:"));
    }
    fn prologue(&mut self, name: &str);
    fn epilogue(&mut self);
    fn mov(&mut self, dest: &str, src: &str);
    fn cmp(&mut self, op1: &str, op2: &str);
    fn cond_jump(&mut self, condition: &str, label: &str);
    fn jump(&mut self, label: &str);
    fn call(&mut self, name: &str);
    fn push(&mut self, reg: &str);
    fn pop(&mut self, reg: &str);
    fn inc(&mut self, reg: &str);
    fn load_address(&mut self, dest_reg: &str, label: &str);
    fn emit_string_data(&mut self, label: &str, value: &str) -> String;
    fn emit_extern(&mut self, name: &str) -> String;

    /// Argument-passing registers for this backend/calling-convention, in order.
    fn arg_registers(&self) -> &'static [&'static str];
    /// Callee-saved registers available to the allocator, preference order first.
    fn callee_saved_pool(&self) -> &'static [&'static str];
    fn user_call_label(&self, name: &str) -> String;
    fn stdlib_call_label(&self, name: &str) -> String {
        format!("_{name}")
    }
    fn immediate(&self, value: &str) -> String {
        value.to_string()
    }
}

/// Inverted-condition jump table shared by both backends, keyed by the
/// source comparison operator (`==→jne, !=→je, <→jge, >→jle, <=→jg, >=→jl`).
pub fn inverted_condition(op: &str) -> &'static str {
    match op {
        "==" => "ne",
        "!=" => "e",
        "<" => "ge",
        ">" => "le",
        "<=" => "g",
        ">=" => "l",
        _ => "mp",
    }
}

/// Direct (non-inverted) condition, used by `while` re-entry and other
/// forward-jump-on-true code paths.
pub fn direct_condition(op: &str) -> &'static str {
    match op {
        "==" => "e",
        "!=" => "ne",
        "<" => "l",
        ">" => "g",
        "<=" => "le",
        ">=" => "ge",
        _ => "mp",
    }
}

pub struct X86Backend {
    pub bits: u8,
    pub target: Target,
    output: Vec<String>,
}

impl X86Backend {
    pub fn new(target: Target, bits: u8) -> Self {
        X86Backend {
            bits,
            target,
            output: Vec::new(),
        }
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    fn sp(&self) -> &'static str {
        if self.bits == 64 {
            "rsp"
        } else {
            "esp"
        }
    }

    fn bp(&self) -> &'static str {
        if self.bits == 64 {
            "rbp"
        } else {
            "ebp"
        }
    }
}

impl Backend for X86Backend {
    fn emit_raw(&mut self, line: impl Into<String>) {
        self.output.push(line.into());
    }

    fn prologue(&mut self, name: &str) {
        let label = if self.bits == 32 {
            format!("_{name}")
        } else {
            name.to_string()
        };
        self.output.push(format!("\nglobal {label}"));
        self.output.push(format!("{label}:"));
        self.output.push(format!("    push {}", self.bp()));
        self.output.push(format!("    mov {}, {}", self.bp(), self.sp()));
    }

    fn epilogue(&mut self) {
        self.output.push(format!("    pop {}", self.bp()));
        self.output.push("    ret".to_string());
    }

    fn mov(&mut self, dest: &str, src: &str) {
        self.output.push(format!("    mov {dest}, {src}"));
    }

    fn cmp(&mut self, op1: &str, op2: &str) {
        self.output.push(format!("    cmp {op1}, {op2}"));
    }

    fn cond_jump(&mut self, condition: &str, label: &str) {
        self.output.push(format!("    j{condition} {label}"));
    }

    fn jump(&mut self, label: &str) {
        self.output.push(format!("    jmp {label}"));
    }

    fn call(&mut self, name: &str) {
        self.output.push(format!("    call {name}"));
    }

    fn push(&mut self, reg: &str) {
        self.output.push(format!("    push {reg}"));
    }

    fn pop(&mut self, reg: &str) {
        self.output.push(format!("    pop {reg}"));
    }

    fn inc(&mut self, reg: &str) {
        self.output.push(format!("    inc {reg}"));
    }

    fn load_address(&mut self, dest_reg: &str, label: &str) {
        self.output.push(format!("    lea {dest_reg}, [rel {label}]"));
    }

    fn emit_string_data(&mut self, label: &str, value: &str) -> String {
        let escaped = nasm_backtick_escape(value);
        format!("{label} db `{escaped}`, 0")
    }

    fn emit_extern(&mut self, name: &str) -> String {
        format!("extern {name}")
    }

    fn arg_registers(&self) -> &'static [&'static str] {
        if self.bits == 32 {
            &[]
        } else {
            match self.target {
                Target::Windows => &["rcx", "rdx", "r8", "r9"],
                Target::Linux | Target::Macos => &["rdi", "rsi", "rdx", "rcx", "r8", "r9"],
            }
        }
    }

    fn callee_saved_pool(&self) -> &'static [&'static str] {
        if self.bits == 32 {
            &["ebx", "esi", "edi"]
        } else {
            &["r12", "r13", "r14", "r15", "rbx"]
        }
    }

    fn user_call_label(&self, name: &str) -> String {
        if self.bits == 32 {
            format!("_{name}")
        } else {
            name.to_string()
        }
    }
}

/// NASM backtick string escaping: re-applies NASM's backslash grammar to an
/// already-decoded Rust `String`.
pub fn nasm_backtick_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '`' => out.push_str("\\`"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// GAS `.asciz` escaping: re-applies C-style escapes.
pub fn gas_asciz_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

pub struct Arm64Backend {
    pub target: Target,
    output: Vec<String>,
}

impl Arm64Backend {
    pub fn new(target: Target) -> Self {
        Arm64Backend {
            target,
            output: Vec::new(),
        }
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    fn underscore(&self, name: &str) -> String {
        match self.target {
            Target::Macos => format!("_{name}"),
            Target::Linux | Target::Windows => name.to_string(),
        }
    }
}

impl Backend for Arm64Backend {
    fn emit_raw(&mut self, line: impl Into<String>) {
        self.output.push(line.into());
    }

    fn prologue(&mut self, name: &str) {
        let label = self.underscore(name);
        self.output.push(format!("\n.global {label}"));
        self.output.push(".align 2".to_string());
        self.output.push(format!("{label}:"));
        self.output.push("    stp x29, x30, [sp, #-16]!".to_string());
        self.output.push("    mov x29, sp".to_string());
    }

    fn epilogue(&mut self) {
        self.output.push("    ldp x29, x30, [sp], #16".to_string());
        self.output.push("    ret".to_string());
    }

    fn mov(&mut self, dest: &str, src: &str) {
        if src.chars().all(|c| c.is_ascii_digit()) {
            self.output.push(format!("    mov {dest}, #{src}"));
        } else {
            self.output.push(format!("    mov {dest}, {src}"));
        }
    }

    fn cmp(&mut self, op1: &str, op2: &str) {
        if op2.chars().all(|c| c.is_ascii_digit()) {
            self.output.push(format!("    cmp {op1}, #{op2}"));
        } else {
            self.output.push(format!("    cmp {op1}, {op2}"));
        }
    }

    fn cond_jump(&mut self, condition: &str, label: &str) {
        let cc = match condition {
            "ne" => "ne",
            "e" => "eq",
            "ge" => "ge",
            "le" => "le",
            "g" => "gt",
            "l" => "lt",
            other => other,
        };
        self.output.push(format!("    b.{cc} {label}"));
    }

    fn jump(&mut self, label: &str) {
        self.output.push(format!("    b {label}"));
    }

    fn call(&mut self, name: &str) {
        let label = self.underscore(name);
        self.output.push(format!("    bl {label}"));
    }

    fn push(&mut self, reg: &str) {
        self.output.push(format!("    str {reg}, [sp, #-16]!"));
    }

    fn pop(&mut self, reg: &str) {
        self.output.push(format!("    ldr {reg}, [sp], #16"));
    }

    fn inc(&mut self, reg: &str) {
        self.output.push(format!("    add {reg}, {reg}, #1"));
    }

    fn load_address(&mut self, dest_reg: &str, label: &str) {
        self.output.push(format!("    adrp {dest_reg}, {label}@PAGE"));
        self.output.push(format!("    add {dest_reg}, {dest_reg}, {label}@PAGEOFF"));
    }

    fn emit_string_data(&mut self, label: &str, value: &str) -> String {
        let escaped = gas_asciz_escape(value);
        format!("{label}: .asciz \"{escaped}\"")
    }

    fn emit_extern(&mut self, name: &str) -> String {
        format!(".extern {}", self.underscore(name))
    }

    fn arg_registers(&self) -> &'static [&'static str] {
        &["x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7"]
    }

    fn callee_saved_pool(&self) -> &'static [&'static str] {
        &["x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27", "x28"]
    }

    fn user_call_label(&self, name: &str) -> String {
        self.underscore(name)
    }

    fn stdlib_call_label(&self, name: &str) -> String {
        self.underscore(&format!("_{name}"))
    }

    fn immediate(&self, value: &str) -> String {
        format!("#{value}")
    }
}

/// Build the configured backend. The generator owns exactly one of these for
/// the lifetime of a compilation, realised here as a trait object since both
/// variants share an identical call surface.
pub fn make_backend(arch: Arch, target: Target, bits: u8) -> Box<dyn Backend> {
    match arch {
        Arch::X86_64 => Box::new(X86Backend::new(target, bits)),
        Arch::Arm64 => Box::new(Arm64Backend::new(target)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_condition_table() {
        assert_eq!(inverted_condition("=="), "ne");
        assert_eq!(inverted_condition("!="), "e");
        assert_eq!(inverted_condition("<"), "ge");
        assert_eq!(inverted_condition(">"), "le");
        assert_eq!(inverted_condition("<="), "g");
        assert_eq!(inverted_condition(">="), "l");
    }

    #[test]
    fn x86_prologue_uses_underscore_in_32_bit() {
        let mut b = X86Backend::new(Target::Windows, 32);
        b.prologue("main");
        let out = b.take_output();
        assert!(out.iter().any(|l| l.contains("_main:")));
    }

    #[test]
    fn x86_prologue_no_underscore_in_64_bit() {
        let mut b = X86Backend::new(Target::Windows, 64);
        b.prologue("main");
        let out = b.take_output();
        assert!(out.iter().any(|l| l == "main:"));
    }

    #[test]
    fn arm64_call_gets_underscore_on_macos_only() {
        let mut mac = Arm64Backend::new(Target::Macos);
        mac.call("foo");
        assert_eq!(mac.take_output(), vec!["    bl _foo".to_string()]);

        let mut linux = Arm64Backend::new(Target::Linux);
        linux.call("foo");
        assert_eq!(linux.take_output(), vec!["    bl foo".to_string()]);
    }

    #[test]
    fn escape_helpers_round_trip_common_chars() {
        assert_eq!(nasm_backtick_escape("hi\n"), "hi\\n");
        assert_eq!(gas_asciz_escape("hi\n"), "hi\\n");
        assert_eq!(gas_asciz_escape("a\"b"), "a\\\"b");
    }
}
