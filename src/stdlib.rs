//! Standard library catalogue, grounded in
//! `original_source/libs/stdio.py::StandardLibrary`. Built once per
//! `(target, arch)` pair and handed around by reference.

use crate::config::{Arch, Target};
use std::collections::BTreeSet;

/// One catalogue entry. Owned rather than `&'static str` because the body
/// text depends on the calling convention of the `(target, arch)` pair the
/// catalogue was built for — unlike the rest of the crate's `'static` data,
/// there is no single literal that fits every combination (see `DESIGN.md`).
#[derive(Debug, Clone)]
pub struct StdlibEntry {
    pub name: &'static str,
    pub code: String,
    pub externs: Vec<&'static str>,
    pub data: Vec<String>,
    pub bss: Vec<&'static str>,
    pub requires: Vec<&'static str>,
}

pub struct StdlibCatalogue {
    target: Target,
    arch: Arch,
    entries: Vec<StdlibEntry>,
}

/// Result of resolving the transitive `requires` closure over a used-name set.
#[derive(Debug, Default)]
pub struct StdlibClosure {
    pub code: String,
    pub data: Vec<String>,
    pub bss: Vec<&'static str>,
    pub externs: BTreeSet<&'static str>,
}

struct ArgRegs {
    r: [&'static str; 4],
}

fn arg_regs(target: Target, arch: Arch) -> ArgRegs {
    match (target, arch) {
        (_, Arch::Arm64) => ArgRegs { r: ["x0", "x1", "x2", "x3"] },
        (Target::Windows, Arch::X86_64) => ArgRegs { r: ["rcx", "rdx", "r8", "r9"] },
        (Target::Linux | Target::Macos, Arch::X86_64) => ArgRegs { r: ["rdi", "rsi", "rdx", "rcx"] },
    }
}

fn underscore(arch: Arch, target: Target, name: &str) -> String {
    match (arch, target) {
        (Arch::Arm64, Target::Macos) => format!("_{name}"),
        (Arch::Arm64, _) => name.to_string(),
        (Arch::X86_64, _) => format!("_{name}"),
    }
}

impl StdlibCatalogue {
    pub fn for_target(target: Target, arch: Arch) -> Self {
        let mut entries = Vec::new();
        let a = arg_regs(target, arch);

        entries.push(StdlibEntry {
            name: "initstdio",
            code: init_stdio(target, arch),
            externs: init_stdio_externs(target),
            data: Vec::new(),
            bss: init_stdio_bss(target),
            requires: Vec::new(),
        });

        entries.push(StdlibEntry {
            name: "print",
            code: print_body(target, arch, &a),
            externs: print_externs(target, arch),
            data: print_data(target, arch),
            bss: Vec::new(),
            requires: Vec::new(),
        });

        entries.push(StdlibEntry {
            name: "println",
            code: String::new(),
            externs: Vec::new(),
            data: vec!["_newline_str db 10, 0".to_string()],
            bss: Vec::new(),
            requires: vec!["print"],
        });

        entries.push(StdlibEntry {
            name: "scan",
            code: scan_body(target, arch, &a),
            externs: scan_externs(target),
            data: Vec::new(),
            bss: scan_bss(target),
            requires: vec!["initstdio"],
        });

        entries.push(StdlibEntry {
            name: "scanint",
            code: scanint_body(target, arch, &a),
            externs: vec!["sscanf"],
            data: Vec::new(),
            bss: Vec::new(),
            requires: vec!["scan"],
        });

        entries.push(StdlibEntry {
            name: "strlen",
            code: strlen_body(&a),
            externs: Vec::new(),
            data: Vec::new(),
            bss: Vec::new(),
            requires: Vec::new(),
        });

        entries.push(StdlibEntry {
            name: "strcpy",
            code: strcpy_body(&a),
            externs: Vec::new(),
            data: Vec::new(),
            bss: Vec::new(),
            requires: Vec::new(),
        });

        entries.push(StdlibEntry {
            name: "strcmp",
            code: strcmp_body(&a),
            externs: Vec::new(),
            data: Vec::new(),
            bss: Vec::new(),
            requires: Vec::new(),
        });

        entries.push(StdlibEntry {
            name: "strcat",
            code: strcat_body(&a),
            externs: Vec::new(),
            data: Vec::new(),
            bss: Vec::new(),
            requires: Vec::new(),
        });

        entries.push(StdlibEntry {
            name: "abs",
            code: abs_body(&a),
            externs: Vec::new(),
            data: Vec::new(),
            bss: Vec::new(),
            requires: Vec::new(),
        });

        entries.push(StdlibEntry {
            name: "min",
            code: minmax_body("min", "jle", &a),
            externs: Vec::new(),
            data: Vec::new(),
            bss: Vec::new(),
            requires: Vec::new(),
        });

        entries.push(StdlibEntry {
            name: "max",
            code: minmax_body("max", "jge", &a),
            externs: Vec::new(),
            data: Vec::new(),
            bss: Vec::new(),
            requires: Vec::new(),
        });

        entries.push(StdlibEntry {
            name: "pow",
            code: pow_body(&a),
            externs: Vec::new(),
            data: Vec::new(),
            bss: Vec::new(),
            requires: Vec::new(),
        });

        entries.push(StdlibEntry {
            name: "arraysum",
            code: arraysum_body(&a),
            externs: Vec::new(),
            data: Vec::new(),
            bss: Vec::new(),
            requires: Vec::new(),
        });

        entries.push(StdlibEntry {
            name: "arrayfill",
            code: arrayfill_body(&a),
            externs: Vec::new(),
            data: Vec::new(),
            bss: Vec::new(),
            requires: Vec::new(),
        });

        entries.push(StdlibEntry {
            name: "arraycopy",
            code: arraycopy_body(&a),
            externs: Vec::new(),
            data: Vec::new(),
            bss: Vec::new(),
            requires: Vec::new(),
        });

        entries.push(StdlibEntry {
            name: "memset",
            code: memset_body(&a),
            externs: Vec::new(),
            data: Vec::new(),
            bss: Vec::new(),
            requires: Vec::new(),
        });

        entries.push(StdlibEntry {
            name: "memcpy",
            code: memcpy_body(&a),
            externs: Vec::new(),
            data: Vec::new(),
            bss: Vec::new(),
            requires: Vec::new(),
        });

        entries.push(StdlibEntry {
            name: "rand",
            code: rand_body(target, arch),
            externs: rand_externs(target),
            data: Vec::new(),
            bss: Vec::new(),
            requires: Vec::new(),
        });

        entries.push(StdlibEntry {
            name: "sleep",
            code: sleep_body(target, arch, &a),
            externs: sleep_externs(target),
            data: Vec::new(),
            bss: Vec::new(),
            requires: Vec::new(),
        });

        StdlibCatalogue { target, arch, entries }
    }

    pub fn lookup(&self, name: &str) -> Option<&StdlibEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Replaces an entry's assembly body with a project-supplied override
    /// (`casm.toml`'s `[stdlib_overrides]` table), keyed by helper name.
    /// Unknown names are ignored rather than rejected, since an override
    /// table may intentionally target only the helpers a project actually
    /// pulls in.
    pub fn apply_overrides(&mut self, overrides: &std::collections::HashMap<String, String>) {
        for entry in &mut self.entries {
            if let Some(body) = overrides.get(entry.name) {
                entry.code = body.clone();
            }
        }
    }

    /// Depth-first, visit-once closure over `requires`, grounded in
    /// `StandardLibrary.get_dependencies`.
    pub fn closure(&self, used: &BTreeSet<&str>) -> StdlibClosure {
        let mut out = StdlibClosure::default();
        let mut processed: BTreeSet<&str> = BTreeSet::new();
        let mut code_chunks = Vec::new();

        fn visit<'a>(
            cat: &'a StdlibCatalogue,
            name: &str,
            processed: &mut BTreeSet<&'a str>,
            code_chunks: &mut Vec<String>,
            out: &mut StdlibClosure,
        ) {
            let Some(entry) = cat.lookup(name) else { return };
            if processed.contains(entry.name) {
                return;
            }
            processed.insert(entry.name);
            for req in &entry.requires {
                visit(cat, req, processed, code_chunks, out);
            }
            if !entry.code.is_empty() {
                code_chunks.push(entry.code.clone());
            }
            out.data.extend(entry.data.iter().cloned());
            out.bss.extend(entry.bss.iter().copied());
            out.externs.extend(entry.externs.iter().copied());
        }

        for name in used {
            visit(self, name, &mut processed, &mut code_chunks, &mut out);
        }

        out.code = code_chunks.join("\n\n");
        out
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }
}

fn init_stdio(target: Target, _arch: Arch) -> String {
    match target {
        Target::Windows => "_initstdio:\n    push rbp\n    mov rbp, rsp\n    sub rsp, 32\n    mov rcx, -11\n    call GetStdHandle\n    mov [rel _stdout_handle], rax\n    mov rcx, -10\n    call GetStdHandle\n    mov [rel _stdin_handle], rax\n    add rsp, 32\n    pop rbp\n    ret".to_string(),
        Target::Linux | Target::Macos => "_initstdio:\n    ret".to_string(),
    }
}

fn init_stdio_externs(target: Target) -> Vec<&'static str> {
    match target {
        Target::Windows => vec!["GetStdHandle"],
        Target::Linux | Target::Macos => Vec::new(),
    }
}

fn init_stdio_bss(target: Target) -> Vec<&'static str> {
    match target {
        Target::Windows => vec!["_stdout_handle resq 1", "_stdin_handle resq 1"],
        Target::Linux | Target::Macos => Vec::new(),
    }
}

fn print_body(target: Target, arch: Arch, a: &ArgRegs) -> String {
    match arch {
        Arch::Arm64 => format!(
            "_print_string:\n    sub sp, sp, #32\n    stp x29, x30, [sp, #16]\n    add x29, sp, #16\n    mov x8, {0}\n    mov x9, sp\n    str x8, [x9]\n    adrp x0, _fmt_str@PAGE\n    add x0, x0, _fmt_str@PAGEOFF\n    bl {1}\n    ldp x29, x30, [sp, #16]\n    add sp, sp, #32\n    ret\n\n_print_number:\n    sub sp, sp, #32\n    stp x29, x30, [sp, #16]\n    add x29, sp, #16\n    mov x8, {0}\n    mov x9, sp\n    str x8, [x9]\n    adrp x0, _fmt_num@PAGE\n    add x0, x0, _fmt_num@PAGEOFF\n    bl {1}\n    ldp x29, x30, [sp, #16]\n    add sp, sp, #32\n    ret",
            a.r[0],
            underscore(arch, target, "printf")
        ),
        Arch::X86_64 => match target {
            Target::Windows => "_print_string:\n    push rbp\n    mov rbp, rsp\n    sub rsp, 32\n    mov rdx, rcx\n    lea rcx, [rel .fmt]\n    call printf\n    add rsp, 32\n    pop rbp\n    ret\n.fmt db \"%s\", 0\n\n_print_number:\n    push rbp\n    mov rbp, rsp\n    sub rsp, 32\n    mov rdx, rcx\n    lea rcx, [rel .fmt]\n    call printf\n    add rsp, 32\n    pop rbp\n    ret\n.fmt db \"%lld\", 0".to_string(),
            Target::Linux | Target::Macos => "_print_string:\n    sub rsp, 8\n    mov rsi, rdi\n    lea rdi, [rel .fmt]\n    xor rax, rax\n    call printf\n    add rsp, 8\n    ret\n.fmt db \"%s\", 0\n\n_print_number:\n    sub rsp, 8\n    mov rsi, rdi\n    lea rdi, [rel .fmt]\n    xor rax, rax\n    call printf\n    add rsp, 8\n    ret\n.fmt db \"%lld\", 0".to_string(),
        },
    }
}

fn print_externs(_target: Target, _arch: Arch) -> Vec<&'static str> {
    vec!["printf"]
}

fn print_data(_target: Target, arch: Arch) -> Vec<String> {
    match arch {
        Arch::Arm64 => vec![
            "_fmt_str: .asciz \"%s\"".to_string(),
            "_fmt_num: .asciz \"%lld\"".to_string(),
        ],
        Arch::X86_64 => Vec::new(),
    }
}

fn scan_body(target: Target, arch: Arch, a: &ArgRegs) -> String {
    match (target, arch) {
        (Target::Windows, Arch::X86_64) => "_scan_string:\n    push rbp\n    mov rbp, rsp\n    sub rsp, 64\n    push r12\n    push r13\n    mov r12, rcx\n    mov r13, rdx\n    mov rcx, [rel _stdin_handle]\n    mov rdx, r12\n    mov r8, r13\n    lea r9, [rel _bytes_read]\n    mov qword [rsp+32], 0\n    call ReadConsoleA\n    mov rax, [rel _bytes_read]\n    cmp rax, 0\n    jle .done\n    lea rdi, [r12 + rax - 1]\n.trim:\n    cmp rax, 0\n    jle .done\n    movzx rcx, byte [rdi]\n    cmp cl, 13\n    je .cut\n    cmp cl, 10\n    je .cut\n    jmp .done\n.cut:\n    mov byte [rdi], 0\n    dec rdi\n    dec rax\n    jmp .trim\n.done:\n    mov byte [r12 + rax], 0\n    pop r13\n    pop r12\n    add rsp, 64\n    pop rbp\n    ret".to_string(),
        (_, Arch::X86_64) => format!(
            "_scan_string:\n    push r12\n    push r13\n    mov r12, {0}\n    mov r13, {1}\n    xor rax, rax\n    call fgets\n    mov rdi, r12\n.trim:\n    cmp byte [rdi], 0\n    je .done\n    cmp byte [rdi], 10\n    je .cut\n    inc rdi\n    jmp .trim\n.cut:\n    mov byte [rdi], 0\n.done:\n    mov rax, r12\n    pop r13\n    pop r12\n    ret",
            a.r[0], a.r[1]
        ),
        (_, Arch::Arm64) => format!(
            "_scan_string:\n    stp x29, x30, [sp, #-16]!\n    mov x29, sp\n    bl {0}\n    ldp x29, x30, [sp], #16\n    ret",
            underscore(arch, target, "fgets")
        ),
    }
}

fn scan_externs(target: Target) -> Vec<&'static str> {
    match target {
        Target::Windows => vec!["ReadConsoleA"],
        Target::Linux | Target::Macos => vec!["fgets"],
    }
}

fn scan_bss(target: Target) -> Vec<&'static str> {
    match target {
        Target::Windows => vec!["_bytes_read resd 1"],
        Target::Linux | Target::Macos => Vec::new(),
    }
}

fn scanint_body(target: Target, arch: Arch, a: &ArgRegs) -> String {
    match arch {
        Arch::X86_64 => format!(
            "_scan_int:\n    push rbp\n    mov rbp, rsp\n    sub rsp, 288\n    push r12\n    mov r12, {0}\n    lea {0}, [rsp+32]\n    mov {1}, 256\n    call _scan_string\n    lea {0}, [rsp+32]\n    lea {1}, [rel .fmt]\n    mov {2}, r12\n    call sscanf\n    pop r12\n    add rsp, 288\n    pop rbp\n    ret\n.fmt db \"%lld\", 0",
            a.r[0], a.r[1], a.r[2]
        ),
        Arch::Arm64 => {
            let sscanf = underscore(arch, target, "sscanf");
            format!(
                "_scan_int:\n    stp x29, x30, [sp, #-32]!\n    mov x29, sp\n    str x0, [sp, #16]\n    sub sp, sp, #256\n    mov x0, sp\n    mov x1, #256\n    bl _scan_string\n    mov x1, sp\n    adrp x2, _fmt_num@PAGE\n    add x2, x2, _fmt_num@PAGEOFF\n    ldr x0, [x29, #16]\n    bl {sscanf}\n    add sp, sp, #256\n    ldp x29, x30, [sp], #32\n    ret"
            )
        }
    }
}

fn strlen_body(a: &ArgRegs) -> String {
    format!(
        "_strlen:\n    xor rax, rax\n    mov rdi, {0}\n.loop:\n    cmp byte [rdi], 0\n    je .done\n    inc rax\n    inc rdi\n    jmp .loop\n.done:\n    ret",
        a.r[0]
    )
}

fn strcpy_body(a: &ArgRegs) -> String {
    format!(
        "_strcpy:\n    mov rax, {0}\n.loop:\n    mov dl, [{1}]\n    mov [{0}], dl\n    test dl, dl\n    jz .done\n    inc {0}\n    inc {1}\n    jmp .loop\n.done:\n    ret",
        a.r[0], a.r[1]
    )
}

fn strcmp_body(a: &ArgRegs) -> String {
    format!(
        "_strcmp:\n.loop:\n    mov al, [{0}]\n    mov dl, [{1}]\n    cmp al, dl\n    jne .neq\n    test al, al\n    jz .eq\n    inc {0}\n    inc {1}\n    jmp .loop\n.eq:\n    xor rax, rax\n    ret\n.neq:\n    movzx rax, al\n    movzx rdx, dl\n    sub rax, rdx\n    ret",
        a.r[0], a.r[1]
    )
}

fn strcat_body(a: &ArgRegs) -> String {
    format!(
        "_strcat:\n    push r12\n    push r13\n    mov r12, {0}\n    mov r13, {1}\n.find:\n    cmp byte [{0}], 0\n    je .copy\n    inc {0}\n    jmp .find\n.copy:\n    mov al, [r13]\n    mov [{0}], al\n    test al, al\n    jz .done\n    inc {0}\n    inc r13\n    jmp .copy\n.done:\n    mov rax, r12\n    pop r13\n    pop r12\n    ret",
        a.r[0], a.r[1]
    )
}

fn abs_body(a: &ArgRegs) -> String {
    format!(
        "_abs:\n    mov rax, {0}\n    test rax, rax\n    jns .done\n    neg rax\n.done:\n    ret",
        a.r[0]
    )
}

fn minmax_body(name: &str, keep_op: &str, a: &ArgRegs) -> String {
    format!(
        "_{name}:\n    mov rax, {0}\n    cmp {0}, {1}\n    {keep_op} .done\n    mov rax, {1}\n.done:\n    ret",
        a.r[0], a.r[1]
    )
}

fn pow_body(a: &ArgRegs) -> String {
    format!(
        "_pow:\n    push r12\n    push r13\n    mov r12, {0}\n    mov r13, {1}\n    mov rax, 1\n    test r13, r13\n    jz .done\n.loop:\n    imul rax, r12\n    dec r13\n    jnz .loop\n.done:\n    pop r13\n    pop r12\n    ret",
        a.r[0], a.r[1]
    )
}

fn arraysum_body(a: &ArgRegs) -> String {
    format!(
        "_arraysum:\n    xor rax, rax\n    test {1}, {1}\n    jz .done\n.loop:\n    add rax, [{0}]\n    add {0}, 8\n    dec {1}\n    jnz .loop\n.done:\n    ret",
        a.r[0], a.r[1]
    )
}

fn arrayfill_body(a: &ArgRegs) -> String {
    format!(
        "_arrayfill:\n    test {1}, {1}\n    jz .done\n.loop:\n    mov [{0}], {2}\n    add {0}, 8\n    dec {1}\n    jnz .loop\n.done:\n    ret",
        a.r[0], a.r[1], a.r[2]
    )
}

fn arraycopy_body(a: &ArgRegs) -> String {
    format!(
        "_arraycopy:\n    test {2}, {2}\n    jz .done\n.loop:\n    mov rax, [{1}]\n    mov [{0}], rax\n    add {0}, 8\n    add {1}, 8\n    dec {2}\n    jnz .loop\n.done:\n    ret",
        a.r[0], a.r[1], a.r[2]
    )
}

fn memset_body(a: &ArgRegs) -> String {
    format!(
        "_memset:\n    push r12\n    mov r12, {0}\n    test {2}, {2}\n    jz .done\n.loop:\n    mov [{0}], {1}b\n    inc {0}\n    dec {2}\n    jnz .loop\n.done:\n    mov rax, r12\n    pop r12\n    ret",
        a.r[0], a.r[1], a.r[2]
    )
}

fn memcpy_body(a: &ArgRegs) -> String {
    format!(
        "_memcpy:\n    push r12\n    mov r12, {0}\n    test {2}, {2}\n    jz .done\n.loop:\n    mov al, [{1}]\n    mov [{0}], al\n    inc {0}\n    inc {1}\n    dec {2}\n    jnz .loop\n.done:\n    mov rax, r12\n    pop r12\n    ret",
        a.r[0], a.r[1], a.r[2]
    )
}

fn rand_body(target: Target, arch: Arch) -> String {
    match arch {
        Arch::Arm64 => format!("_rand:\n    bl {}\n    ret", underscore(arch, target, "rand")),
        Arch::X86_64 => "_rand:\n    push rbp\n    mov rbp, rsp\n    sub rsp, 32\n    call rand\n    add rsp, 32\n    pop rbp\n    ret".to_string(),
    }
}

fn rand_externs(_target: Target) -> Vec<&'static str> {
    vec!["rand"]
}

fn sleep_body(target: Target, arch: Arch, a: &ArgRegs) -> String {
    match (target, arch) {
        (Target::Windows, Arch::X86_64) => "_sleep:\n    push rbp\n    mov rbp, rsp\n    sub rsp, 32\n    call Sleep\n    add rsp, 32\n    pop rbp\n    ret".to_string(),
        (_, Arch::X86_64) => format!("_sleep:\n    sub rsp, 8\n    imul {0}, 1000\n    call usleep\n    add rsp, 8\n    ret", a.r[0]),
        (_, Arch::Arm64) => format!(
            "_sleep:\n    mov x1, #1000\n    mul x0, x0, x1\n    bl {}\n    ret",
            underscore(arch, target, "usleep")
        ),
    }
}

fn sleep_externs(target: Target) -> Vec<&'static str> {
    match target {
        Target::Windows => vec!["Sleep"],
        Target::Linux | Target::Macos => vec!["usleep"],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_resolves_println_to_print_transitively() {
        let cat = StdlibCatalogue::for_target(Target::Windows, Arch::X86_64);
        let used: BTreeSet<&str> = ["println"].into_iter().collect();
        let closure = cat.closure(&used);
        assert!(closure.code.contains("_print_string"));
        assert!(closure.data.iter().any(|d| d.contains("_newline_str")));
    }

    #[test]
    fn closure_visits_each_dependency_once() {
        let cat = StdlibCatalogue::for_target(Target::Linux, Arch::X86_64);
        let used: BTreeSet<&str> = ["scanint", "scan"].into_iter().collect();
        let closure = cat.closure(&used);
        assert_eq!(closure.code.matches("_scan_string:").count(), 1);
    }

    #[test]
    fn strcpy_entry_exists_with_no_dependencies() {
        let cat = StdlibCatalogue::for_target(Target::Linux, Arch::X86_64);
        let entry = cat.lookup("strcpy").unwrap();
        assert!(entry.requires.is_empty());
        assert!(entry.code.contains("_strcpy"));
    }

    #[test]
    fn arm64_print_uses_bl_printf() {
        let cat = StdlibCatalogue::for_target(Target::Macos, Arch::Arm64);
        let entry = cat.lookup("print").unwrap();
        assert!(entry.code.contains("bl _printf"));
    }

    #[test]
    fn windows_uses_getstdhandle_extern() {
        let cat = StdlibCatalogue::for_target(Target::Windows, Arch::X86_64);
        let entry = cat.lookup("initstdio").unwrap();
        assert!(entry.externs.contains(&"GetStdHandle"));
    }

    #[test]
    fn apply_overrides_replaces_only_the_named_entry() {
        let mut cat = StdlibCatalogue::for_target(Target::Windows, Arch::X86_64);
        let original_abs = cat.lookup("abs").unwrap().code.clone();
        let mut overrides = std::collections::HashMap::new();
        overrides.insert("print".to_string(), "    ; project override\n".to_string());
        cat.apply_overrides(&overrides);
        assert_eq!(cat.lookup("print").unwrap().code, "    ; project override\n");
        assert_eq!(cat.lookup("abs").unwrap().code, original_abs);
    }

    #[test]
    fn apply_overrides_ignores_unknown_names() {
        let mut cat = StdlibCatalogue::for_target(Target::Windows, Arch::X86_64);
        let mut overrides = std::collections::HashMap::new();
        overrides.insert("not_a_real_helper".to_string(), "whatever".to_string());
        cat.apply_overrides(&overrides);
        assert!(cat.lookup("not_a_real_helper").is_none());
    }
}
