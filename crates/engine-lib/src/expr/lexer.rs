//! Tokenizer for the policy expression language

use crate::errors::{EngineError, Result};

/// A lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    In,
    Not,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Bang,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

/// Tokenize an expression. A `%` directly following a number is a percent
/// suffix (`50%` lexes as `0.5`); elsewhere it is the modulo operator.
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '0'..='9' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let mut value = literal.parse::<f64>().map_err(|_| {
                    EngineError::InvalidExpression(format!("invalid number {literal:?}"))
                })?;
                if i < chars.len() && chars[i] == '%' {
                    value /= 100.0;
                    i += 1;
                }
                tokens.push(Token::Number(value));
            }
            '"' | '\'' => {
                let quote = c;
                i += 1;
                let start = i;
                while i < chars.len() && chars[i] != quote {
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(EngineError::InvalidExpression(
                        "unterminated string literal".into(),
                    ));
                }
                tokens.push(Token::Str(chars[start..i].iter().collect()));
                i += 1;
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "in" => Token::In,
                    "not" => Token::Not,
                    "and" => Token::AndAnd,
                    "or" => Token::OrOr,
                    _ => Token::Ident(word),
                });
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '=' => {
                if i + 1 < chars.len() && chars[i + 1] == '=' {
                    tokens.push(Token::Eq);
                    i += 2;
                } else {
                    return Err(EngineError::InvalidExpression(
                        "single '=' is not an operator, use '=='".into(),
                    ));
                }
            }
            '!' => {
                if i + 1 < chars.len() && chars[i + 1] == '=' {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '<' => {
                if i + 1 < chars.len() && chars[i + 1] == '=' {
                    tokens.push(Token::LtEq);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if i + 1 < chars.len() && chars[i + 1] == '=' {
                    tokens.push(Token::GtEq);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '&' => {
                if i + 1 < chars.len() && chars[i + 1] == '&' {
                    tokens.push(Token::AndAnd);
                    i += 2;
                } else {
                    return Err(EngineError::InvalidExpression(
                        "single '&' is not an operator, use '&&'".into(),
                    ));
                }
            }
            '|' => {
                if i + 1 < chars.len() && chars[i + 1] == '|' {
                    tokens.push(Token::OrOr);
                    i += 2;
                } else {
                    return Err(EngineError::InvalidExpression(
                        "single '|' is not an operator, use '||'".into(),
                    ));
                }
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            _ => {
                return Err(EngineError::InvalidExpression(format!(
                    "unexpected character {c:?}"
                )));
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_comparison() {
        let tokens = tokenize("workload.cpu.usage > 0.8").unwrap();
        assert_eq!(tokens.len(), 7);
        assert_eq!(tokens[0], Token::Ident("workload".into()));
        assert_eq!(tokens[6], Token::Number(0.8));
    }

    #[test]
    fn test_percent_literal() {
        let tokens = tokenize("workload.cpu.usage < 50%").unwrap();
        assert_eq!(*tokens.last().unwrap(), Token::Number(0.5));
    }

    #[test]
    fn test_modulo_vs_percent() {
        let tokens = tokenize("workload.cpu.limit % 2").unwrap();
        // "limit % 2": percent after an identifier is modulo
        assert!(tokens.contains(&Token::Percent));
    }

    #[test]
    fn test_string_literals() {
        let tokens = tokenize(r#"workload.namespace == "default""#).unwrap();
        assert_eq!(*tokens.last().unwrap(), Token::Str("default".into()));
        let tokens = tokenize("workload.namespace == 'default'").unwrap();
        assert_eq!(*tokens.last().unwrap(), Token::Str("default".into()));
    }

    #[test]
    fn test_word_operators() {
        let tokens = tokenize("workload.status == 'running' and policy.priority > 10").unwrap();
        assert!(tokens.contains(&Token::AndAnd));
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(
            tokenize("workload.name == \"oops"),
            Err(EngineError::InvalidExpression(_))
        ));
    }

    #[test]
    fn test_single_equals_rejected() {
        assert!(tokenize("workload.cpu.usage = 1").is_err());
    }
}
