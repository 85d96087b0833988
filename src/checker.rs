//! Structural checker: validates balanced
//! `if/endif`, `for/endfor`, `while/endwhile`, `func/endfunc` nesting over the
//! whole token stream and collects every imbalance rather than stopping at
//! the first one.

use crate::error::StructuralError;
use crate::token::{Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Opener {
    If,
    For,
    While,
    Func,
}

impl Opener {
    fn name(self) -> &'static str {
        match self {
            Opener::If => "if",
            Opener::For => "for",
            Opener::While => "while",
            Opener::Func => "func",
        }
    }
}

/// Walk the token stream and return every structural imbalance found. An
/// empty vector means the nesting is sound.
pub fn check(tokens: &[Token]) -> Vec<StructuralError> {
    let mut errors = Vec::new();
    let mut stack: Vec<(Opener, u32)> = Vec::new();

    for token in tokens {
        match token.kind {
            TokenKind::If => stack.push((Opener::If, token.line)),
            TokenKind::For => stack.push((Opener::For, token.line)),
            TokenKind::While => stack.push((Opener::While, token.line)),
            TokenKind::Func => stack.push((Opener::Func, token.line)),

            TokenKind::Elif => {
                if stack.last().map(|(o, _)| *o) != Some(Opener::If) {
                    errors.push(StructuralError {
                        line: token.line,
                        message: "'elif' without matching 'if'".to_string(),
                    });
                }
            }
            TokenKind::Else => {
                if stack.last().map(|(o, _)| *o) != Some(Opener::If) {
                    errors.push(StructuralError {
                        line: token.line,
                        message: "'else' without matching 'if'".to_string(),
                    });
                }
            }
            TokenKind::Endif => pop_matching(&mut stack, Opener::If, token, &mut errors, "endif"),
            TokenKind::Endfor => pop_matching(&mut stack, Opener::For, token, &mut errors, "endfor"),
            TokenKind::Endwhile => {
                pop_matching(&mut stack, Opener::While, token, &mut errors, "endwhile")
            }
            TokenKind::Endfunc => {
                pop_matching(&mut stack, Opener::Func, token, &mut errors, "endfunc")
            }
            TokenKind::Eof => break,
            _ => {}
        }
    }

    for (opener, line) in stack {
        errors.push(StructuralError {
            line,
            message: format!("unclosed '{}'", opener.name()),
        });
    }

    errors
}

fn pop_matching(
    stack: &mut Vec<(Opener, u32)>,
    expected: Opener,
    token: &Token,
    errors: &mut Vec<StructuralError>,
    closer_name: &str,
) {
    if stack.last().map(|(o, _)| *o) == Some(expected) {
        stack.pop();
    } else {
        errors.push(StructuralError {
            line: token.line,
            message: format!("'{closer_name}' without matching '{}'", expected.name()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lex::tokenize;

    #[test]
    fn balanced_nesting_has_no_errors() {
        let toks = tokenize("if rax == 0\nfor i = 0, 3\nendfor\nendif\n").unwrap();
        assert!(check(&toks).is_empty());
    }

    #[test]
    fn unclosed_if_is_reported() {
        let toks = tokenize("if rax == 0\n").unwrap();
        let errs = check(&toks);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("unclosed 'if'"));
    }

    #[test]
    fn mismatched_closer_is_reported() {
        let toks = tokenize("if rax == 0\nendfor\n").unwrap();
        let errs = check(&toks);
        assert!(errs.iter().any(|e| e.message.contains("'endfor' without matching 'for'")));
    }

    #[test]
    fn all_imbalances_collected_in_one_pass() {
        let toks = tokenize("for i == 0\nwhile rax == 1\nendfunc\n").unwrap();
        let errs = check(&toks);
        // 'endfunc' mismatch plus two unclosed openers at EOF.
        assert!(errs.len() >= 2);
    }

    #[test]
    fn elif_without_if_is_reported() {
        let toks = tokenize("elif rax == 0\n").unwrap();
        let errs = check(&toks);
        assert!(errs.iter().any(|e| e.message.contains("'elif' without matching 'if'")));
    }
}
