//! Line-oriented lexer. Each line is classified by its first
//! non-whitespace word before any fine-grained tokenisation; everything not
//! recognised as high-level syntax is preserved verbatim as an `AsmLine`.

use crate::error::LexError;
use crate::token::{Token, TokenKind};
use once_cell::sync::Lazy;
use std::collections::HashMap;

static KEYWORDS: Lazy<HashMap<&'static str, TokenKind>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("if", TokenKind::If);
    m.insert("elif", TokenKind::Elif);
    m.insert("else", TokenKind::Else);
    m.insert("endif", TokenKind::Endif);
    m.insert("for", TokenKind::For);
    m.insert("endfor", TokenKind::Endfor);
    m.insert("while", TokenKind::While);
    m.insert("endwhile", TokenKind::Endwhile);
    m.insert("break", TokenKind::Break);
    m.insert("continue", TokenKind::Continue);
    m.insert("func", TokenKind::Func);
    m.insert("endfunc", TokenKind::Endfunc);
    m.insert("return", TokenKind::Return);
    m.insert("call", TokenKind::Call);
    m
});

/// x86-64 general-purpose registers at every operand size, plus ARM64's
/// general-purpose and special registers, so a loop variable or parameter
/// spelled as a register name is recognised regardless of target arch.
static REGISTERS: Lazy<std::collections::HashSet<&'static str>> = Lazy::new(|| {
    let mut s = std::collections::HashSet::new();
    for r in [
        "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rbp", "rsp", "r8", "r9", "r10", "r11", "r12",
        "r13", "r14", "r15", "eax", "ebx", "ecx", "edx", "esi", "edi", "ebp", "esp", "r8d", "r9d",
        "r10d", "r11d", "r12d", "r13d", "r14d", "r15d", "ax", "bx", "cx", "dx", "si", "di", "bp",
        "sp", "al", "bl", "cl", "dl", "ah", "bh", "ch", "dh",
    ] {
        s.insert(r);
    }
    for i in 0..31 {
        // leaked once at startup; fine for a closed, small set of names
        s.insert(Box::leak(format!("x{i}").into_boxed_str()) as &'static str);
        s.insert(Box::leak(format!("w{i}").into_boxed_str()) as &'static str);
    }
    for r in ["lr", "fp"] {
        s.insert(r);
    }
    s
});

pub struct Lexer<'a> {
    lines: Vec<&'a str>,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            lines: source.split('\n').collect(),
            tokens: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let total = self.lines.len();
        let mut i = 0usize;

        while i < total {
            let line_num = (i + 1) as u32;
            let original_line = self.lines[i];
            let line = original_line.trim();

            if line.is_empty() || line.starts_with(';') {
                self.tokens
                    .push(Token::new(TokenKind::AsmLine, original_line, line_num, 0));
                i += 1;
                continue;
            }

            let lstripped = original_line.trim_start();
            let first_word_raw = lstripped.split_whitespace().next().unwrap_or("");
            let maybe = first_word_raw
                .strip_prefix('%')
                .unwrap_or(first_word_raw)
                .to_ascii_lowercase();

            if maybe == "macro" {
                self.tokens
                    .push(Token::new(TokenKind::AsmLine, original_line, line_num, 0));
                i += 1;
                while i < total {
                    let inner_line = self.lines[i];
                    let inner_lstr = inner_line.trim().to_ascii_lowercase();
                    if inner_lstr.starts_with("endmacro") || inner_lstr.starts_with("%endmacro") {
                        self.tokens
                            .push(Token::new(TokenKind::AsmLine, inner_line, (i + 1) as u32, 0));
                        i += 1;
                        break;
                    }
                    self.tokenize_line(inner_line, (i + 1) as u32)?;
                    i += 1;
                }
                continue;
            }

            let first_word = line.split_whitespace().next().unwrap_or("").to_ascii_lowercase();

            if first_word == "%include" || first_word == "include" {
                let rest = line[first_word.len()..].trim();
                let path = if (rest.starts_with('"') && rest.ends_with('"') && rest.len() >= 2)
                    || (rest.starts_with('\'') && rest.ends_with('\'') && rest.len() >= 2)
                {
                    &rest[1..rest.len() - 1]
                } else {
                    rest.split_whitespace().next().unwrap_or(rest)
                };
                self.tokens
                    .push(Token::new(TokenKind::Include, path, line_num, 0));
                self.tokens.push(Token::newline(line_num));
                i += 1;
                continue;
            }

            if KEYWORDS.contains_key(first_word.as_str()) {
                self.tokenize_line(line, line_num)?;
                i += 1;
            } else {
                self.tokens
                    .push(Token::new(TokenKind::AsmLine, original_line, line_num, 0));
                i += 1;
            }
        }

        self.tokens.push(Token::eof((total + 1) as u32));
        Ok(self.tokens)
    }

    fn tokenize_line(&mut self, line: &str, line_num: u32) -> Result<(), LexError> {
        let chars: Vec<char> = line.chars().collect();
        let len = chars.len();
        let mut i = 0usize;

        while i < len {
            let c = chars[i];

            if c.is_whitespace() {
                i += 1;
                continue;
            }
            if c == ';' {
                break;
            }

            if c == '"' {
                let start = i;
                let mut j = i + 1;
                let mut escaped = false;
                let mut found_close = false;
                while j < len {
                    if escaped {
                        escaped = false;
                        j += 1;
                        continue;
                    }
                    if chars[j] == '\\' {
                        escaped = true;
                        j += 1;
                        continue;
                    }
                    if chars[j] == '"' {
                        found_close = true;
                        break;
                    }
                    j += 1;
                }

                if !found_close {
                    return Err(LexError {
                        line: line_num,
                        message: "Unterminated string".to_string(),
                    });
                }

                let raw: String = chars[start + 1..j].iter().collect();
                let value = unescape(&raw);
                self.tokens
                    .push(Token::new(TokenKind::String, value, line_num, start as u32));
                i = j + 1;
                continue;
            }

            // A leading sign immediately followed by a digit or base prefix
            // (no intervening whitespace) is absorbed into the Number token.
            let signed_start = (c == '+' || c == '-')
                && i + 1 < len
                && (chars[i + 1].is_ascii_digit());
            if c.is_ascii_digit()
                || (c == '0' && i + 1 < len && matches!(chars[i + 1], 'x' | 'X' | 'b' | 'B'))
                || signed_start
            {
                let start = i;
                let mut j = if signed_start { i + 1 } else { i };
                if chars[j] == '0' && j + 1 < len && matches!(chars[j + 1], 'x' | 'X') {
                    j += 2;
                    while j < len && chars[j].is_ascii_hexdigit() {
                        j += 1;
                    }
                } else if chars[j] == '0' && j + 1 < len && matches!(chars[j + 1], 'b' | 'B') {
                    j += 2;
                    while j < len && matches!(chars[j], '0' | '1') {
                        j += 1;
                    }
                } else {
                    while j < len && chars[j].is_ascii_digit() {
                        j += 1;
                    }
                }
                let text: String = chars[start..j].iter().collect();
                self.tokens
                    .push(Token::new(TokenKind::Number, text, line_num, start as u32));
                i = j;
                continue;
            }

            if i + 1 < len {
                let two: String = chars[i..i + 2].iter().collect();
                let kind = match two.as_str() {
                    "==" => Some(TokenKind::Eq),
                    "!=" => Some(TokenKind::Ne),
                    "<=" => Some(TokenKind::Le),
                    ">=" => Some(TokenKind::Ge),
                    _ => None,
                };
                if let Some(k) = kind {
                    self.tokens.push(Token::new(k, two, line_num, i as u32));
                    i += 2;
                    continue;
                }
            }

            let single = match c {
                '<' => Some(TokenKind::Lt),
                '>' => Some(TokenKind::Gt),
                '=' => Some(TokenKind::Assign),
                ',' => Some(TokenKind::Comma),
                '(' => Some(TokenKind::LParen),
                ')' => Some(TokenKind::RParen),
                '[' => Some(TokenKind::LBracket),
                ']' => Some(TokenKind::RBracket),
                '+' => Some(TokenKind::Plus),
                '-' => Some(TokenKind::Minus),
                '*' => Some(TokenKind::Multiply),
                '/' => Some(TokenKind::Divide),
                '%' => Some(TokenKind::Modulo),
                _ => None,
            };
            if let Some(k) = single {
                self.tokens
                    .push(Token::new(k, c.to_string(), line_num, i as u32));
                i += 1;
                continue;
            }

            if c.is_alphabetic() || c == '_' {
                let start = i;
                let mut j = i;
                while j < len && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                let word: String = chars[start..j].iter().collect();
                let word_lower = word.to_ascii_lowercase();

                if let Some(&k) = KEYWORDS.get(word_lower.as_str()) {
                    self.tokens
                        .push(Token::new(k, word_lower, line_num, start as u32));
                } else if REGISTERS.contains(word_lower.as_str()) {
                    self.tokens
                        .push(Token::new(TokenKind::Register, word, line_num, start as u32));
                } else {
                    self.tokens
                        .push(Token::new(TokenKind::Identifier, word, line_num, start as u32));
                }
                i = j;
                continue;
            }

            i += 1;
        }

        self.tokens.push(Token::newline(line_num));
        Ok(())
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Convenience entry point mirroring `Lexer::new(src).tokenize()`.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn blank_and_comment_lines_are_asm() {
        let toks = tokenize("\n; a comment\n").unwrap();
        assert!(toks.iter().all(|t| t.kind == TokenKind::AsmLine || t.kind == TokenKind::Eof));
    }

    #[test]
    fn plain_asm_line_preserved_verbatim() {
        let toks = tokenize("    mov rax, 1 ; comment").unwrap();
        assert_eq!(toks[0].kind, TokenKind::AsmLine);
        assert_eq!(toks[0].value, "    mov rax, 1 ; comment");
    }

    #[test]
    fn if_line_tokenizes_structurally() {
        let k = kinds("if rax == 0");
        assert_eq!(
            k,
            vec![
                TokenKind::If,
                TokenKind::Register,
                TokenKind::Eq,
                TokenKind::Number,
                TokenKind::Newline,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn string_literal_escapes() {
        let toks = tokenize("call print \"hi\\n\"").unwrap();
        let s = toks.iter().find(|t| t.kind == TokenKind::String).unwrap();
        assert_eq!(s.value, "hi\n");
    }

    #[test]
    fn unterminated_string_is_lexical_error() {
        let err = tokenize("call print \"oops").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn leading_sign_is_absorbed_into_the_number() {
        let toks = tokenize("if rax == -5").unwrap();
        let n = toks.iter().find(|t| t.kind == TokenKind::Number).unwrap();
        assert_eq!(n.value, "-5");
        assert!(!toks.iter().any(|t| t.kind == TokenKind::Minus));

        let toks = tokenize("if rax == +0x1F").unwrap();
        let n = toks.iter().find(|t| t.kind == TokenKind::Number).unwrap();
        assert_eq!(n.value, "+0x1F");
    }

    #[test]
    fn minus_followed_by_whitespace_stays_a_separate_token() {
        let k = kinds("if rax == 5 - 3");
        assert!(k.contains(&TokenKind::Minus));
    }

    #[test]
    fn hex_and_binary_numbers() {
        let toks = tokenize("if rax == 0xFF").unwrap();
        let n = toks.iter().find(|t| t.kind == TokenKind::Number).unwrap();
        assert_eq!(n.value, "0xFF");
        let toks = tokenize("if rax == 0b101").unwrap();
        let n = toks.iter().find(|t| t.kind == TokenKind::Number).unwrap();
        assert_eq!(n.value, "0b101");
    }

    #[test]
    fn include_directive() {
        let toks = tokenize("%include \"foo.asm\"").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Include);
        assert_eq!(toks[0].value, "foo.asm");
    }

    #[test]
    fn macro_body_is_tokenized_but_header_footer_are_verbatim() {
        let toks = tokenize("%macro m 0\nif rax == 0\nendif\n%endmacro\n").unwrap();
        assert_eq!(toks[0].kind, TokenKind::AsmLine);
        assert!(toks.iter().any(|t| t.kind == TokenKind::If));
        assert!(toks.iter().any(|t| t.kind == TokenKind::Endif));
        assert!(toks
            .iter()
            .any(|t| t.kind == TokenKind::AsmLine && t.value.to_ascii_lowercase().contains("endmacro")));
    }

    #[test]
    fn register_recognition() {
        let toks = tokenize("if r12 == rax").unwrap();
        assert_eq!(toks[1].kind, TokenKind::Register);
        assert_eq!(toks[3].kind, TokenKind::Register);
    }
}
