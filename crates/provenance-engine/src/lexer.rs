use crate::error::ProvenanceError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    Number(f64),
    String(String),
    Keyword(&'static str),

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Semicolon,
    Colon,
    Question,

    // Operators
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    EqEq,
    NotEq,
    EqEqEq,
    NotEqEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,

    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
    /// A line terminator appeared between the previous token and this one.
    pub newline_before: bool,
}

const KEYWORDS: &[&str] = &[
    "var", "let", "const", "function", "return", "if", "else", "while", "for", "in", "break",
    "continue", "throw", "try", "catch", "true", "false", "null", "undefined", "this", "typeof",
    "new",
];

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    col: usize,
    newline_before: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().peekable(),
            line: 1,
            col: 0,
            newline_before: false,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, ProvenanceError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let done = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.col = 0;
            self.newline_before = true;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn is_ident_start(ch: char) -> bool {
        ch.is_alphabetic() || ch == '_' || ch == '$'
    }

    fn is_ident_continue(ch: char) -> bool {
        ch.is_alphanumeric() || ch == '_' || ch == '$'
    }

    fn skip_trivia(&mut self) -> Result<(), ProvenanceError> {
        loop {
            match self.peek() {
                Some(ch) if ch.is_whitespace() => {
                    self.bump();
                }
                Some('/') => {
                    let mut lookahead = self.chars.clone();
                    lookahead.next();
                    match lookahead.peek() {
                        Some('/') => {
                            while let Some(ch) = self.bump() {
                                if ch == '\n' {
                                    break;
                                }
                            }
                        }
                        Some('*') => {
                            let (line, col) = (self.line, self.col + 1);
                            self.bump();
                            self.bump();
                            loop {
                                match self.bump() {
                                    Some('*') if self.peek() == Some('/') => {
                                        self.bump();
                                        break;
                                    }
                                    Some(_) => {}
                                    None => {
                                        return Err(ProvenanceError::Parse(format!(
                                            "Unterminated comment at {line}:{col}"
                                        )))
                                    }
                                }
                            }
                        }
                        _ => return Ok(()),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn lex_number(
        &mut self,
        first: char,
        line: usize,
        col: usize,
    ) -> Result<TokenKind, ProvenanceError> {
        let mut buf = String::new();
        buf.push(first);
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() || ch == '.' {
                buf.push(ch);
                self.bump();
            } else if (ch == 'e' || ch == 'E') && !buf.contains(['e', 'E']) {
                buf.push(ch);
                self.bump();
                if let Some(sign @ ('+' | '-')) = self.peek() {
                    buf.push(sign);
                    self.bump();
                }
            } else {
                break;
            }
        }
        buf.parse::<f64>().map(TokenKind::Number).map_err(|_| {
            ProvenanceError::Parse(format!("Invalid number literal `{buf}` at {line}:{col}"))
        })
    }

    fn lex_identifier(&mut self, first: char) -> TokenKind {
        let mut buf = String::new();
        buf.push(first);
        while let Some(ch) = self.peek() {
            if Self::is_ident_continue(ch) {
                buf.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        match KEYWORDS.iter().find(|k| **k == buf) {
            Some(keyword) => TokenKind::Keyword(*keyword),
            None => TokenKind::Identifier(buf),
        }
    }

    fn lex_string(
        &mut self,
        quote: char,
        line: usize,
        col: usize,
    ) -> Result<TokenKind, ProvenanceError> {
        let mut buf = String::new();
        loop {
            match self.bump() {
                Some(ch) if ch == quote => return Ok(TokenKind::String(buf)),
                Some('\\') => match self.bump() {
                    Some('n') => buf.push('\n'),
                    Some('t') => buf.push('\t'),
                    Some('r') => buf.push('\r'),
                    Some('0') => buf.push('\0'),
                    Some('u') => buf.push(self.lex_unicode_escape(line, col)?),
                    Some('\n') => {}
                    Some(other) => buf.push(other),
                    None => break,
                },
                Some('\n') | None => break,
                Some(ch) => buf.push(ch),
            }
        }
        Err(ProvenanceError::Parse(format!(
            "Unterminated string literal at {line}:{col}"
        )))
    }

    fn lex_unicode_escape(&mut self, line: usize, col: usize) -> Result<char, ProvenanceError> {
        let mut hex = String::with_capacity(4);
        for _ in 0..4 {
            match self.bump() {
                Some(ch) if ch.is_ascii_hexdigit() => hex.push(ch),
                _ => {
                    return Err(ProvenanceError::Parse(format!(
                        "Invalid unicode escape in string at {line}:{col}"
                    )))
                }
            }
        }
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| {
                ProvenanceError::Parse(format!("Invalid unicode escape `\\u{hex}` at {line}:{col}"))
            })
    }

    pub fn next_token(&mut self) -> Result<Token, ProvenanceError> {
        self.skip_trivia()?;
        let line = self.line;
        let col = self.col + 1;
        let newline_before = std::mem::take(&mut self.newline_before);
        let kind = match self.bump() {
            None => TokenKind::Eof,
            Some(ch) if ch.is_ascii_digit() => self.lex_number(ch, line, col)?,
            Some('.') if self.peek().is_some_and(|c| c.is_ascii_digit()) => {
                self.lex_number('.', line, col)?
            }
            Some(ch) if Self::is_ident_start(ch) => self.lex_identifier(ch),
            Some(quote @ ('"' | '\'')) => self.lex_string(quote, line, col)?,
            Some('(') => TokenKind::LParen,
            Some(')') => TokenKind::RParen,
            Some('{') => TokenKind::LBrace,
            Some('}') => TokenKind::RBrace,
            Some('[') => TokenKind::LBracket,
            Some(']') => TokenKind::RBracket,
            Some(',') => TokenKind::Comma,
            Some('.') => TokenKind::Dot,
            Some(';') => TokenKind::Semicolon,
            Some(':') => TokenKind::Colon,
            Some('?') => TokenKind::Question,
            Some('%') => TokenKind::Percent,
            Some('+') => {
                if self.eat('+') {
                    TokenKind::PlusPlus
                } else if self.eat('=') {
                    TokenKind::PlusAssign
                } else {
                    TokenKind::Plus
                }
            }
            Some('-') => {
                if self.eat('-') {
                    TokenKind::MinusMinus
                } else if self.eat('=') {
                    TokenKind::MinusAssign
                } else {
                    TokenKind::Minus
                }
            }
            Some('*') => {
                if self.eat('=') {
                    TokenKind::StarAssign
                } else {
                    TokenKind::Star
                }
            }
            Some('/') => {
                if self.eat('=') {
                    TokenKind::SlashAssign
                } else {
                    TokenKind::Slash
                }
            }
            Some('=') => {
                if self.eat('=') {
                    if self.eat('=') {
                        TokenKind::EqEqEq
                    } else {
                        TokenKind::EqEq
                    }
                } else {
                    TokenKind::Assign
                }
            }
            Some('!') => {
                if self.eat('=') {
                    if self.eat('=') {
                        TokenKind::NotEqEq
                    } else {
                        TokenKind::NotEq
                    }
                } else {
                    TokenKind::Bang
                }
            }
            Some('<') => {
                if self.eat('=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            Some('>') => {
                if self.eat('=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            Some('&') if self.eat('&') => TokenKind::AndAnd,
            Some('|') if self.eat('|') => TokenKind::OrOr,
            Some(other) => {
                return Err(ProvenanceError::Parse(format!(
                    "Unexpected character `{other}` at {line}:{col}"
                )))
            }
        };
        Ok(Token {
            kind,
            line,
            col,
            newline_before,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_operators_greedily() {
        assert_eq!(
            kinds("a += b === c !== d++"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::PlusAssign,
                TokenKind::Identifier("b".into()),
                TokenKind::EqEqEq,
                TokenKind::Identifier("c".into()),
                TokenKind::NotEqEq,
                TokenKind::Identifier("d".into()),
                TokenKind::PlusPlus,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_support_both_quotes_and_escapes() {
        assert_eq!(
            kinds(r#"'it\'s' "a\nb" "é""#),
            vec![
                TokenKind::String("it's".into()),
                TokenKind::String("a\nb".into()),
                TokenKind::String("é".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped_and_newlines_recorded() {
        let tokens = Lexer::new("x // trailing\n/* block\n */ return").tokenize().unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Keyword("return"));
        assert!(tokens[1].newline_before);
        assert_eq!(tokens[1].line, 3);
        assert!(!tokens[0].newline_before);
    }

    #[test]
    fn reports_position_of_bad_input() {
        let err = Lexer::new("let x = #").tokenize().unwrap_err();
        assert_eq!(err.to_string(), "Parse error: Unexpected character `#` at 1:9");
        assert!(Lexer::new("'abc").tokenize().is_err());
    }
}
