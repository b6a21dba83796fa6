// Reader: source text to forms.
//
// Tokenizer over `Peekable<Chars>` with one token of lookahead, then a
// recursive parser. Supports lists, vectors, strings with the usual escapes,
// integers, floats, keywords, symbols, `nil`/`true`/`false`, the `'` quote
// shorthand, `;` line comments, and commas as whitespace. Forms nest at most
// `MAX_READ_DEPTH` levels, quotes included.

use std::iter::Peekable;
use std::str::Chars;

use crate::error::ReadError;
use crate::value::{MAX_VALUE_DEPTH, Value};

pub const MAX_READ_DEPTH: usize = MAX_VALUE_DEPTH;

/// Read every top-level form in `input`.
pub fn read_all(input: &str) -> Result<Vec<Value>, ReadError> {
    let mut tokens = Tokenizer::new(input);
    let mut forms = Vec::new();
    while let Some(token) = tokens.next_token()? {
        forms.push(parse(token, &mut tokens, 0)?);
    }
    Ok(forms)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open(char),
    Close(char),
    Quote,
    Str(String),
    Atom(String),
}

/// `depth` counts the collections already open around `token`.
fn parse(token: Token, tokens: &mut Tokenizer, depth: usize) -> Result<Value, ReadError> {
    if matches!(token, Token::Open(_) | Token::Quote) && depth >= MAX_READ_DEPTH {
        return Err(ReadError::TooDeep(MAX_READ_DEPTH));
    }
    match token {
        Token::Open(open) => {
            let close = if open == '(' { ')' } else { ']' };
            let mut items = Vec::new();
            loop {
                match tokens.next_token()? {
                    None => return Err(ReadError::Unbalanced(close)),
                    Some(Token::Close(c)) if c == close => break,
                    Some(Token::Close(c)) => return Err(ReadError::UnexpectedClose(c)),
                    Some(t) => items.push(parse(t, tokens, depth + 1)?),
                }
            }
            Ok(if open == '(' {
                Value::List(items)
            } else {
                Value::Vector(items)
            })
        }
        Token::Close(c) => Err(ReadError::UnexpectedClose(c)),
        Token::Quote => {
            let next = tokens.next_token()?.ok_or(ReadError::DanglingQuote)?;
            let quoted = parse(next, tokens, depth + 1)?;
            Ok(Value::List(vec![Value::Symbol("quote".into()), quoted]))
        }
        Token::Str(s) => Ok(Value::Str(s)),
        Token::Atom(atom) => parse_atom(atom),
    }
}

fn parse_atom(atom: String) -> Result<Value, ReadError> {
    match atom.as_str() {
        "nil" => return Ok(Value::Nil),
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if let Some(keyword) = atom.strip_prefix(':') {
        return Ok(Value::Keyword(keyword.to_string()));
    }
    let unsigned = atom.strip_prefix(['-', '+']).unwrap_or(&atom);
    if unsigned.starts_with(|c: char| c.is_ascii_digit()) {
        if let Ok(n) = atom.parse::<i64>() {
            return Ok(Value::Int(n));
        }
        return atom
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| ReadError::InvalidNumber(atom));
    }
    Ok(Value::Symbol(atom))
}

struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    fn skip_blank(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || c == ',' {
                self.chars.next();
            } else if c == ';' {
                for c in self.chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, ReadError> {
        self.skip_blank();
        let Some(c) = self.chars.next() else {
            return Ok(None);
        };
        let token = match c {
            '(' | '[' => Token::Open(c),
            ')' | ']' => Token::Close(c),
            '\'' => Token::Quote,
            '"' => Token::Str(self.string()?),
            _ => {
                let mut atom = c.to_string();
                while let Some(&nc) = self.chars.peek() {
                    if nc.is_whitespace() || matches!(nc, '(' | ')' | '[' | ']' | '"' | ',' | ';')
                    {
                        break;
                    }
                    atom.push(nc);
                    self.chars.next();
                }
                Token::Atom(atom)
            }
        };
        Ok(Some(token))
    }

    fn string(&mut self) -> Result<String, ReadError> {
        let mut s = String::new();
        while let Some(c) = self.chars.next() {
            match c {
                '"' => return Ok(s),
                '\\' => {
                    let escaped = self.chars.next().ok_or(ReadError::UnterminatedString)?;
                    s.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '"' => '"',
                        '\\' => '\\',
                        other => return Err(ReadError::InvalidEscape(other)),
                    });
                }
                c => s.push(c),
            }
        }
        Err(ReadError::UnterminatedString)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_one(src: &str) -> Value {
        let mut forms = read_all(src).unwrap();
        assert_eq!(forms.len(), 1, "expected one form in {src:?}");
        forms.remove(0)
    }

    #[test]
    fn reads_nested_call() {
        assert_eq!(read_one("(reduce + (range 20))").pr_str(), "(reduce + (range 20))");
    }

    #[test]
    fn reads_numbers_keywords_and_literals() {
        assert_eq!(
            read_one("[1 -2 +3 4.5 :k nil true false sym]").pr_str(),
            "[1 -2 3 4.5 :k nil true false sym]"
        );
    }

    #[test]
    fn minus_alone_is_a_symbol() {
        assert!(matches!(read_one("-"), Value::Symbol(s) if s == "-"));
    }

    #[test]
    fn quote_shorthand_expands() {
        assert_eq!(read_one("'(1 2)").pr_str(), "(quote (1 2))");
    }

    #[test]
    fn comments_and_commas_are_whitespace() {
        let forms = read_all("; leading\n(+ 1, 2) ; trailing\n:x").unwrap();
        assert_eq!(forms.len(), 2);
    }

    #[test]
    fn string_escapes() {
        assert!(matches!(read_one(r#""a\n\"b\"""#), Value::Str(s) if s == "a\n\"b\""));
    }

    #[test]
    fn unbalanced_input_reports_missing_delimiter() {
        assert_eq!(read_all("(+ 1 [2").unwrap_err(), ReadError::Unbalanced(']'));
        assert_eq!(read_all("(+ 1 2))").unwrap_err(), ReadError::UnexpectedClose(')'));
        assert_eq!(read_all("(+ 1 2]").unwrap_err(), ReadError::UnexpectedClose(']'));
    }

    #[test]
    fn bad_number_and_string_errors() {
        assert!(matches!(read_all("12abc"), Err(ReadError::InvalidNumber(_))));
        assert_eq!(read_all("\"open").unwrap_err(), ReadError::UnterminatedString);
        assert_eq!(read_all("'").unwrap_err(), ReadError::DanglingQuote);
    }

    #[test]
    fn nesting_is_capped() {
        let open = "(".repeat(200_000);
        assert_eq!(read_all(&open).unwrap_err(), ReadError::TooDeep(MAX_READ_DEPTH));
        let quotes = "'".repeat(200_000) + "x";
        assert_eq!(read_all(&quotes).unwrap_err(), ReadError::TooDeep(MAX_READ_DEPTH));

        let deepest = "[".repeat(MAX_READ_DEPTH) + &"]".repeat(MAX_READ_DEPTH);
        assert_eq!(read_one(&deepest).depth(), MAX_READ_DEPTH);
        let one_more = "[".repeat(MAX_READ_DEPTH + 1) + &"]".repeat(MAX_READ_DEPTH + 1);
        assert_eq!(read_all(&one_more).unwrap_err(), ReadError::TooDeep(MAX_READ_DEPTH));
    }
}
