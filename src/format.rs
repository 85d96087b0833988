//! Merge / formatter, grounded in
//! `original_source/utils/formatter.py::format_and_merge`. Strips a prior
//! compile's appended section (if re-fed as input), splices generated
//! blocks back over the original source ranges they replace, then merges
//! sections, strips comments, rewrites macro-local labels, expands
//! `%include` directives, and appends the resolved stdlib closure.

use crate::codegen::Emission;
use crate::config::Arch;
use crate::stdlib::StdlibClosure;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Marks the start of a prior compile's appended helpers/stdlib section so
/// a later compile can find and discard it before re-splicing.
pub const GENERATED_SENTINEL: &str = "; Compiler-generated additions";

/// If `original` is itself a previous compile's output, it carries
/// [`GENERATED_SENTINEL`] ahead of the helpers/stdlib chunks that compile
/// appended; truncate at its first occurrence so those stale chunks aren't
/// treated as part of the author's source on a second pass.
pub fn strip_prior_generation(original: &str) -> String {
    match original.find(GENERATED_SENTINEL) {
        Some(idx) => original[..idx].to_string(),
        None => original.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct SectionedSource {
    pub preamble: Vec<String>,
    pub data: Vec<String>,
    pub bss: Vec<String>,
    pub externs: BTreeSet<String>,
    pub text: Vec<String>,
}

/// Replaces each [`Emission::Block`]'s `[start_line, end_line]` range in the
/// original source with its generated lines, and collects [`Emission::Loose`]
/// content separately as helper lines appended after the text section.
pub fn splice_emissions(original: &str, emissions: &[Emission]) -> (String, Vec<String>) {
    let original_lines: Vec<&str> = original.split('\n').collect();
    let mut inserted: HashMap<u32, Vec<String>> = HashMap::new();
    let mut removed: BTreeSet<u32> = BTreeSet::new();
    let mut helpers = Vec::new();

    for emission in emissions {
        match emission {
            Emission::Block(b) => {
                inserted.insert(b.start_line, b.lines.clone());
                let lo = b.start_line + 1;
                let hi = b.end_line.max(b.start_line);
                for line in lo..=hi {
                    removed.insert(line);
                }
            }
            Emission::Loose(lines) => helpers.extend(lines.iter().cloned()),
        }
    }

    let mut out = Vec::with_capacity(original_lines.len());
    for (idx, line) in original_lines.iter().enumerate() {
        let line_num = (idx + 1) as u32;
        if let Some(gen_lines) = inserted.get(&line_num) {
            out.extend(gen_lines.iter().cloned());
            continue;
        }
        if removed.contains(&line_num) {
            continue;
        }
        out.push((*line).to_string());
    }

    (out.join("\n"), helpers)
}

pub fn strip_comments(lines: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for ln in lines {
        if let (Some(bt), Some(semi)) = (ln.find('`'), ln.find(';')) {
            if bt < semi {
                let trimmed = ln.trim_end();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
                continue;
            }
        }
        let without_comment = match ln.find(';') {
            Some(idx) => &ln[..idx],
            None => ln.as_str(),
        };
        let trimmed = without_comment.trim_end();
        if !trimmed.is_empty() {
            out.push(trimmed.to_string());
        }
    }
    out
}

pub fn collect_sections(original: &str) -> SectionedSource {
    let mut parts = SectionedSource::default();
    let mut cur: Option<&str> = None;
    let mut seen_section = false;

    for ln in original.split('\n') {
        let s = ln.trim();
        let ls = s.to_ascii_lowercase();

        if ls.starts_with("section .data") {
            cur = Some("data");
            seen_section = true;
            continue;
        }
        if ls.starts_with("section .bss") {
            cur = Some("bss");
            seen_section = true;
            continue;
        }
        if ls.starts_with("section .text") || ls == ".text" {
            cur = Some("text");
            seen_section = true;
            continue;
        }
        if ls.starts_with("extern ") {
            parts.externs.insert(s["extern ".len()..].trim().to_string());
            continue;
        }
        if ls.starts_with(".extern ") {
            parts.externs.insert(s[".extern ".len()..].trim().to_string());
            continue;
        }

        if !seen_section {
            parts.preamble.push(ln.to_string());
            continue;
        }

        match cur {
            Some("data") => {
                if !s.is_empty() {
                    parts.data.push(ln.to_string());
                }
            }
            Some("bss") => {
                if !s.is_empty() {
                    parts.bss.push(ln.to_string());
                }
            }
            _ => parts.text.push(ln.to_string()),
        }
    }

    parts
}

pub fn merge_unique(existing: &[String], additions: &[String]) -> Vec<String> {
    let mut seen: BTreeSet<String> = existing.iter().map(|l| l.trim().to_string()).collect();
    let mut out = existing.to_vec();
    for a in additions {
        if a.is_empty() {
            continue;
        }
        let key = a.trim().to_string();
        if !seen.contains(&key) {
            out.push(a.clone());
            seen.insert(key);
        }
    }
    out
}

/// Splits a stdlib code blob into per-function chunks on lines ending in `:`.
pub fn split_functions(code: &str) -> Vec<String> {
    let mut funcs = Vec::new();
    let mut cur: Vec<&str> = Vec::new();
    for ln in code.split('\n') {
        if ln.trim_end().ends_with(':') && !cur.is_empty() {
            funcs.push(cur.join("\n").trim_end().to_string());
            cur = vec![ln];
        } else {
            cur.push(ln);
        }
    }
    if !cur.is_empty() {
        funcs.push(cur.join("\n").trim_end().to_string());
    }
    funcs
}

const DIRECTIVES: &[&str] = &[
    "if", "elif", "else", "endif", "for", "endfor", "while", "endwhile", "func", "endfunc",
];

/// Strips any top-level DSL directive line that leaked outside a spliced
/// block, preserving the interior of `%macro`/`macro` blocks verbatim.
pub fn remove_highlevel_directives(lines: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut in_macro = false;
    for ln in lines {
        let s = ln.trim();
        let low = s.to_ascii_lowercase();

        if low.starts_with("%macro") || low.starts_with("macro") {
            in_macro = true;
            out.push(ln.clone());
            continue;
        }
        if low.starts_with("%endmacro") || low.starts_with("endmacro") {
            in_macro = false;
            out.push(ln.clone());
            continue;
        }
        if in_macro {
            out.push(ln.clone());
            continue;
        }
        if s.is_empty() {
            out.push(ln.clone());
            continue;
        }
        let first = s.split_whitespace().next().unwrap_or("").to_ascii_lowercase();
        if DIRECTIVES.contains(&first.as_str()) {
            continue;
        }
        out.push(ln.clone());
    }
    out
}

/// Rewrites `.L<n>` labels to NASM macro-local `%%L<n>` inside `%macro`/
/// `macro` blocks so generated labels don't collide across expansions.
pub fn convert_labels_in_macros(lines: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut in_macro = false;
    for ln in lines {
        let s = ln.trim();
        let low = s.to_ascii_lowercase();
        if low.starts_with("%macro") || low.starts_with("macro") {
            in_macro = true;
            out.push(ln.clone());
            continue;
        }
        if low.starts_with("%endmacro") || low.starts_with("endmacro") {
            in_macro = false;
            out.push(ln.clone());
            continue;
        }
        if in_macro {
            out.push(rewrite_dot_labels(ln));
        } else {
            out.push(ln.clone());
        }
    }
    out
}

fn rewrite_dot_labels(line: &str) -> String {
    let bytes = line.as_bytes();
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'.' && line[i + 1..].starts_with('L') {
            let mut j = i + 2;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 2 {
                out.push_str("%%L");
                out.push_str(&line[i + 2..j]);
                i = j;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

/// Expands `%include "path"` directives, guarding against recursive
/// inclusion; a missing or unreadable file demotes the directive to a
/// `; WARNING: ...` comment rather than failing the compile.
pub fn inline_includes(lines: &[String], base_dir: &Path, seen: &mut BTreeSet<PathBuf>) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    for ln in lines {
        let s = ln.trim();
        let lower = s.to_ascii_lowercase();
        if !lower.starts_with("%include") && !lower.starts_with("include") {
            out.push(ln.clone());
            continue;
        }
        let rest = s.splitn(2, char::is_whitespace).nth(1).unwrap_or("").trim();
        let path_str = rest.trim_matches(|c| c == '"' || c == '\'');
        let candidate = base_dir.join(path_str);

        if !candidate.exists() {
            out.push(format!("; WARNING: include not found: {path_str}"));
            continue;
        }
        let canon = candidate.canonicalize().unwrap_or(candidate.clone());
        if seen.contains(&canon) {
            out.push(format!("; WARNING: skipping recursive include: {path_str}"));
            continue;
        }
        match std::fs::read_to_string(&candidate) {
            Ok(text) => {
                seen.insert(canon);
                out.extend(text.split('\n').map(|l| l.to_string()));
            }
            Err(e) => {
                out.push(format!("; WARNING: failed to read include {path_str}: {e}"));
            }
        }
    }
    out
}

/// Full merge pass: splices generated blocks over `original`, merges
/// externs/data/bss, strips comments, rewrites macro-local labels, expands
/// includes, and appends the resolved stdlib closure. Output order:
/// preamble; sorted externs; merged `.data`; merged `.bss`; text section
/// with spliced body; loose helpers; stdlib function chunks.
pub fn merge_and_format(
    original: &str,
    emissions: &[Emission],
    closure: &StdlibClosure,
    data_section: &[String],
    arch: Arch,
    include_base: &Path,
) -> String {
    let stripped = strip_prior_generation(original);
    let (spliced, helpers) = splice_emissions(&stripped, emissions);
    let mut parts = collect_sections(&spliced);

    parts.text = convert_labels_in_macros(&parts.text);
    parts.preamble = convert_labels_in_macros(&parts.preamble);

    let mut seen_includes = BTreeSet::new();
    parts.text = inline_includes(&parts.text, include_base, &mut seen_includes);

    let preamble = strip_comments(&parts.preamble);

    let mut externs = parts.externs.clone();
    for e in &closure.externs {
        externs.insert((*e).to_string());
    }

    let mut merged_data = merge_unique(&parts.data, &closure.data);
    merged_data = merge_unique(&merged_data, data_section);
    let merged_bss: Vec<String> = merge_unique(
        &parts.bss,
        &closure.bss.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
    );

    let existing_labels: BTreeSet<String> = spliced
        .split('\n')
        .filter_map(|ln| {
            let s = ln.trim();
            s.strip_suffix(':').map(|l| l.to_string())
        })
        .collect();

    let stdlib_funcs: Vec<String> = split_functions(&closure.code)
        .into_iter()
        .filter(|chunk| {
            chunk
                .lines()
                .next()
                .and_then(|first| first.trim().strip_suffix(':'))
                .map(|label| !existing_labels.contains(label))
                .unwrap_or(true)
        })
        .collect();

    let mut out = Vec::new();
    out.extend(preamble);
    out.push(String::new());

    if !externs.is_empty() {
        for e in &externs {
            if arch == Arch::Arm64 {
                out.push(format!(".extern _{e}"));
            } else {
                out.push(format!("extern {e}"));
            }
        }
        out.push(String::new());
    }

    if !merged_data.is_empty() {
        out.push(if arch == Arch::Arm64 { ".data".to_string() } else { "section .data".to_string() });
        out.extend(strip_comments(&merged_data));
        out.push(String::new());
    }

    if !merged_bss.is_empty() {
        out.push(if arch == Arch::Arm64 { ".bss".to_string() } else { "section .bss".to_string() });
        out.extend(strip_comments(&merged_bss));
        out.push(String::new());
    }

    let text = remove_highlevel_directives(&parts.text);
    let has_text_header = text.iter().any(|l| l.trim().to_ascii_lowercase().starts_with("section .text"))
        || closure.code.lines().any(|l| l.trim().to_ascii_lowercase().starts_with("section .text"));
    if !has_text_header && !text.is_empty() {
        out.push(if arch == Arch::Arm64 { ".text".to_string() } else { "section .text".to_string() });
    }
    out.extend(strip_comments(&text));
    out.push(String::new());

    if !helpers.is_empty() || !stdlib_funcs.is_empty() {
        out.push(GENERATED_SENTINEL.to_string());
        out.push(String::new());
    }

    if !helpers.is_empty() {
        for ln in &helpers {
            if !ln.trim().is_empty() {
                out.push(ln.clone());
            }
        }
        out.push(String::new());
    }

    if !stdlib_funcs.is_empty() {
        out.push(if arch == Arch::Arm64 { ".text".to_string() } else { "section .text".to_string() });
        for f in stdlib_funcs {
            out.push(f);
            out.push(String::new());
        }
    }

    let mut joined = out.join("\n");
    while joined.ends_with('\n') {
        joined.pop();
    }
    joined.push('\n');
    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::GenBlock;

    #[test]
    fn strip_comments_keeps_backtick_strings_with_embedded_semicolons() {
        let lines = vec!["_s db `a;b`, 0".to_string()];
        let out = strip_comments(&lines);
        assert_eq!(out, vec!["_s db `a;b`, 0".to_string()]);
    }

    #[test]
    fn strip_comments_removes_trailing_comment() {
        let lines = vec!["    mov rax, 1 ; comment".to_string()];
        let out = strip_comments(&lines);
        assert_eq!(out, vec!["    mov rax, 1".to_string()]);
    }

    #[test]
    fn splice_replaces_the_block_range() {
        let original = "line1\nif rax == 0\ncall foo\nendif\nline5";
        let block = Emission::Block(GenBlock {
            id: 0,
            start_line: 2,
            end_line: 4,
            lines: vec!["    cmp rax, 0".to_string(), "    jne .L1".to_string()],
        });
        let (spliced, _) = splice_emissions(original, std::slice::from_ref(&block));
        assert!(spliced.contains("cmp rax, 0"));
        assert!(!spliced.contains("endif"));
        assert!(spliced.contains("line5"));
    }

    #[test]
    fn macro_local_labels_are_rewritten_inside_macro_blocks() {
        let lines = vec![
            "%macro foo 0".to_string(),
            "    jmp .L3".to_string(),
            "%endmacro".to_string(),
            "    jmp .L3".to_string(),
        ];
        let out = convert_labels_in_macros(&lines);
        assert_eq!(out[1], "    jmp %%L3");
        assert_eq!(out[3], "    jmp .L3");
    }

    #[test]
    fn split_functions_splits_on_label_lines() {
        let code = "_foo:\n    ret\n_bar:\n    ret";
        let funcs = split_functions(code);
        assert_eq!(funcs.len(), 2);
        assert!(funcs[0].starts_with("_foo:"));
    }

    #[test]
    fn strip_prior_generation_truncates_at_the_sentinel() {
        let prior_output = "_strlen:\n    ret\n\n; Compiler-generated additions\n\n_print_number:\n    ret\n";
        let stripped = strip_prior_generation(prior_output);
        assert_eq!(stripped, "_strlen:\n    ret\n\n");
    }

    #[test]
    fn strip_prior_generation_is_a_no_op_without_the_sentinel() {
        let src = "_strlen:\n    ret\n";
        assert_eq!(strip_prior_generation(src), src);
    }

    #[test]
    fn recompiling_output_does_not_accumulate_stdlib_chunks() {
        let closure = StdlibClosure {
            code: "_print_number:\n    ret".to_string(),
            data: Vec::new(),
            bss: Vec::new(),
            externs: BTreeSet::new(),
        };
        let first = merge_and_format("_start:\n    ret\n", &[], &closure, &[], Arch::X86_64, Path::new("."));
        assert!(first.contains(GENERATED_SENTINEL));
        let second = merge_and_format(&first, &[], &closure, &[], Arch::X86_64, Path::new("."));
        assert_eq!(second.matches("_print_number:").count(), 1);
    }

    #[test]
    fn existing_label_suppresses_duplicate_stdlib_function() {
        let closure = StdlibClosure {
            code: "_strlen:\n    ret".to_string(),
            data: Vec::new(),
            bss: Vec::new(),
            externs: BTreeSet::new(),
        };
        let original = "_strlen:\n    xor rax, rax\n    ret\n";
        let out = merge_and_format(original, &[], &closure, &[], Arch::X86_64, Path::new("."));
        assert_eq!(out.matches("_strlen:").count(), 1);
    }
}
