use std::fmt;

/// Longest identifier kept, in bytes (`NAMEDATALEN - 1`).
const MAX_IDENTIFIER_BYTES: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    All,
    And,
    As,
    Asc,
    Between,
    By,
    Call,
    Case,
    Cast,
    Create,
    Default,
    Delete,
    Desc,
    Drop,
    Else,
    End,
    Exists,
    False,
    From,
    Function,
    If,
    In,
    Insert,
    Into,
    Is,
    Key,
    Limit,
    Not,
    Null,
    Or,
    Order,
    Ordinality,
    Primary,
    Procedure,
    Row,
    Rows,
    Select,
    Sequence,
    Set,
    Show,
    Table,
    Then,
    To,
    True,
    Type,
    Update,
    Values,
    When,
    Where,
    With,
}

impl Keyword {
    fn from_ident(ident: &str) -> Option<Self> {
        match ident {
            "all" => Some(Self::All),
            "and" => Some(Self::And),
            "as" => Some(Self::As),
            "asc" => Some(Self::Asc),
            "between" => Some(Self::Between),
            "by" => Some(Self::By),
            "call" => Some(Self::Call),
            "case" => Some(Self::Case),
            "cast" => Some(Self::Cast),
            "create" => Some(Self::Create),
            "default" => Some(Self::Default),
            "delete" => Some(Self::Delete),
            "desc" => Some(Self::Desc),
            "drop" => Some(Self::Drop),
            "else" => Some(Self::Else),
            "end" => Some(Self::End),
            "exists" => Some(Self::Exists),
            "false" => Some(Self::False),
            "from" => Some(Self::From),
            "function" => Some(Self::Function),
            "if" => Some(Self::If),
            "in" => Some(Self::In),
            "insert" => Some(Self::Insert),
            "into" => Some(Self::Into),
            "is" => Some(Self::Is),
            "key" => Some(Self::Key),
            "limit" => Some(Self::Limit),
            "not" => Some(Self::Not),
            "null" => Some(Self::Null),
            "or" => Some(Self::Or),
            "order" => Some(Self::Order),
            "ordinality" => Some(Self::Ordinality),
            "primary" => Some(Self::Primary),
            "procedure" => Some(Self::Procedure),
            "row" => Some(Self::Row),
            "rows" => Some(Self::Rows),
            "select" => Some(Self::Select),
            "sequence" => Some(Self::Sequence),
            "set" => Some(Self::Set),
            "show" => Some(Self::Show),
            "table" => Some(Self::Table),
            "then" => Some(Self::Then),
            "to" => Some(Self::To),
            "true" => Some(Self::True),
            "type" => Some(Self::Type),
            "update" => Some(Self::Update),
            "values" => Some(Self::Values),
            "when" => Some(Self::When),
            "where" => Some(Self::Where),
            "with" => Some(Self::With),
            _ => None,
        }
    }

    /// Keywords that may still be used as column or table names.
    pub fn is_unreserved(self) -> bool {
        matches!(
            self,
            Self::Call
                | Self::Function
                | Self::Key
                | Self::Ordinality
                | Self::Procedure
                | Self::Rows
                | Self::Sequence
                | Self::Set
                | Self::Show
                | Self::Type
                | Self::Values
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::And => "and",
            Self::As => "as",
            Self::Asc => "asc",
            Self::Between => "between",
            Self::By => "by",
            Self::Call => "call",
            Self::Case => "case",
            Self::Cast => "cast",
            Self::Create => "create",
            Self::Default => "default",
            Self::Delete => "delete",
            Self::Desc => "desc",
            Self::Drop => "drop",
            Self::Else => "else",
            Self::End => "end",
            Self::Exists => "exists",
            Self::False => "false",
            Self::From => "from",
            Self::Function => "function",
            Self::If => "if",
            Self::In => "in",
            Self::Insert => "insert",
            Self::Into => "into",
            Self::Is => "is",
            Self::Key => "key",
            Self::Limit => "limit",
            Self::Not => "not",
            Self::Null => "null",
            Self::Or => "or",
            Self::Order => "order",
            Self::Ordinality => "ordinality",
            Self::Primary => "primary",
            Self::Procedure => "procedure",
            Self::Row => "row",
            Self::Rows => "rows",
            Self::Select => "select",
            Self::Sequence => "sequence",
            Self::Set => "set",
            Self::Show => "show",
            Self::Table => "table",
            Self::Then => "then",
            Self::To => "to",
            Self::True => "true",
            Self::Type => "type",
            Self::Update => "update",
            Self::Values => "values",
            Self::When => "when",
            Self::Where => "where",
            Self::With => "with",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Eof,
    Keyword(Keyword),
    Identifier(String),
    String(String),
    Integer(i64),
    Float(String),
    Comma,
    LParen,
    RParen,
    Dot,
    Semicolon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Less,
    Greater,
    Equal,
    Typecast,
    LessEquals,
    GreaterEquals,
    NotEquals,
    Concat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.message, self.position)
    }
}

impl std::error::Error for LexError {}

pub fn lex_sql(input: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(input).lex_all()
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn lex_all(mut self) -> Result<Vec<Token>, LexError> {
        let mut out = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            if self.pos >= self.input.len() {
                out.push(Token {
                    kind: TokenKind::Eof,
                    start: self.pos,
                    end: self.pos,
                });
                break;
            }
            out.push(self.next_token()?);
        }
        Ok(out)
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        let Some(ch) = self.peek_char() else {
            return Ok(self.mk(start, TokenKind::Eof));
        };

        if (ch == 'e' || ch == 'E') && self.peek_nth_char(1) == Some('\'') {
            self.advance_char();
            return self.lex_single_quoted_string(start, true);
        }

        for (text, kind) in [
            ("::", TokenKind::Typecast),
            ("<=", TokenKind::LessEquals),
            (">=", TokenKind::GreaterEquals),
            ("<>", TokenKind::NotEquals),
            ("!=", TokenKind::NotEquals),
            ("||", TokenKind::Concat),
        ] {
            if self.starts_with(text) {
                self.pos += text.len();
                return Ok(self.mk(start, kind));
            }
        }

        let single = match ch {
            ',' => Some(TokenKind::Comma),
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            ';' => Some(TokenKind::Semicolon),
            '+' => Some(TokenKind::Plus),
            '-' => Some(TokenKind::Minus),
            '*' => Some(TokenKind::Star),
            '/' => Some(TokenKind::Slash),
            '%' => Some(TokenKind::Percent),
            '<' => Some(TokenKind::Less),
            '>' => Some(TokenKind::Greater),
            '=' => Some(TokenKind::Equal),
            _ => None,
        };
        if let Some(kind) = single {
            self.pos += 1;
            return Ok(self.mk(start, kind));
        }

        match ch {
            '\'' => self.lex_single_quoted_string(start, false),
            '"' => self.lex_quoted_identifier(start),
            '$' => self.lex_dollar_quoted_string(start),
            '.' if self.peek_nth_char(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.lex_number(start)
            }
            '.' => {
                self.pos += 1;
                Ok(self.mk(start, TokenKind::Dot))
            }
            c if c.is_ascii_digit() => self.lex_number(start),
            c if is_ident_start(c) => self.lex_identifier_or_keyword(start),
            _ => Err(LexError {
                message: format!("syntax error at or near \"{ch}\""),
                position: start,
            }),
        }
    }

    fn mk(&self, start: usize, kind: TokenKind) -> Token {
        Token {
            kind,
            start,
            end: self.pos,
        }
    }

    fn lex_single_quoted_string(
        &mut self,
        start: usize,
        allow_backslash_escapes: bool,
    ) -> Result<Token, LexError> {
        self.advance_char();

        let mut out = String::new();
        loop {
            let Some(c) = self.advance_char() else {
                return Err(LexError {
                    message: "unterminated quoted string".to_string(),
                    position: start,
                });
            };

            if c == '\'' {
                if self.peek_char() == Some('\'') {
                    self.advance_char();
                    out.push('\'');
                    continue;
                }
                break;
            }

            if allow_backslash_escapes && c == '\\' {
                let Some(next) = self.advance_char() else {
                    return Err(LexError {
                        message: "unterminated escape sequence".to_string(),
                        position: self.pos,
                    });
                };
                out.push(match next {
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    other => other,
                });
                continue;
            }

            out.push(c);
        }

        Ok(self.mk(start, TokenKind::String(out)))
    }

    fn lex_quoted_identifier(&mut self, start: usize) -> Result<Token, LexError> {
        self.advance_char();

        let mut out = String::new();
        loop {
            let Some(c) = self.advance_char() else {
                return Err(LexError {
                    message: "unterminated quoted identifier".to_string(),
                    position: start,
                });
            };
            if c == '"' {
                if self.peek_char() == Some('"') {
                    self.advance_char();
                    out.push('"');
                    continue;
                }
                break;
            }
            out.push(c);
        }

        if out.is_empty() {
            return Err(LexError {
                message: "zero-length delimited identifier".to_string(),
                position: start,
            });
        }
        truncate_identifier(&mut out);
        Ok(self.mk(start, TokenKind::Identifier(out)))
    }

    /// `$$ ... $$` or `$tag$ ... $tag$`.
    fn lex_dollar_quoted_string(&mut self, start: usize) -> Result<Token, LexError> {
        self.advance_char();
        let tag_start = self.pos;
        while self
            .peek_char()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.advance_char();
        }
        if self.peek_char() != Some('$') {
            return Err(LexError {
                message: "syntax error at or near \"$\"".to_string(),
                position: start,
            });
        }
        self.advance_char();
        let delimiter = format!("${}$", &self.input[tag_start..self.pos - 1]);
        let body_start = self.pos;
        let Some(offset) = self.input[body_start..].find(&delimiter) else {
            return Err(LexError {
                message: format!("unterminated dollar-quoted string (expected {delimiter})"),
                position: start,
            });
        };
        let body = self.input[body_start..body_start + offset].to_string();
        self.pos = body_start + offset + delimiter.len();
        Ok(self.mk(start, TokenKind::String(body)))
    }

    fn lex_number(&mut self, start: usize) -> Result<Token, LexError> {
        let mut is_float = false;
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.advance_char();
        }
        if self.peek_char() == Some('.') && !self.starts_with("..") {
            is_float = true;
            self.advance_char();
            while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.advance_char();
            }
        }
        if self.peek_char().is_some_and(|c| c == 'e' || c == 'E') {
            is_float = true;
            self.advance_char();
            if self.peek_char().is_some_and(|c| c == '+' || c == '-') {
                self.advance_char();
            }
            let digit_start = self.pos;
            while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.advance_char();
            }
            if digit_start == self.pos {
                return Err(LexError {
                    message: "trailing junk after numeric literal".to_string(),
                    position: self.pos,
                });
            }
        }
        if self.peek_char().is_some_and(is_ident_start) {
            return Err(LexError {
                message: "trailing junk after numeric literal".to_string(),
                position: self.pos,
            });
        }

        let text = &self.input[start..self.pos];
        if is_float {
            return Ok(self.mk(start, TokenKind::Float(text.to_string())));
        }
        // Integers beyond int8 are numeric constants.
        match text.parse::<i64>() {
            Ok(value) => Ok(self.mk(start, TokenKind::Integer(value))),
            Err(_) => Ok(self.mk(start, TokenKind::Float(text.to_string()))),
        }
    }

    fn lex_identifier_or_keyword(&mut self, start: usize) -> Result<Token, LexError> {
        self.advance_char();
        while self.peek_char().is_some_and(is_ident_cont) {
            self.advance_char();
        }
        let raw = &self.input[start..self.pos];
        let mut normalized = raw.to_ascii_lowercase();
        truncate_identifier(&mut normalized);

        if let Some(kw) = Keyword::from_ident(&normalized) {
            return Ok(self.mk(start, TokenKind::Keyword(kw)));
        }
        Ok(self.mk(start, TokenKind::Identifier(normalized)))
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            let mut progressed = false;
            while self.peek_char().is_some_and(is_sql_space) {
                progressed = true;
                self.advance_char();
            }

            if self.starts_with("--") {
                progressed = true;
                while let Some(c) = self.advance_char() {
                    if c == '\n' || c == '\r' {
                        break;
                    }
                }
            } else if self.starts_with("/*") {
                progressed = true;
                self.skip_block_comment(self.pos)?;
            }

            if !progressed {
                return Ok(());
            }
        }
    }

    fn skip_block_comment(&mut self, comment_start: usize) -> Result<(), LexError> {
        self.pos += 2;
        let mut depth = 1usize;
        while self.pos < self.input.len() {
            if self.starts_with("/*") {
                depth += 1;
                self.pos += 2;
                continue;
            }
            if self.starts_with("*/") {
                depth -= 1;
                self.pos += 2;
                if depth == 0 {
                    return Ok(());
                }
                continue;
            }
            self.advance_char();
        }
        Err(LexError {
            message: "unterminated /* comment".to_string(),
            position: comment_start,
        })
    }

    fn starts_with(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_nth_char(&self, n: usize) -> Option<char> {
        self.input[self.pos..].chars().nth(n)
    }

    fn advance_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }
}

fn truncate_identifier(ident: &mut String) {
    if ident.len() <= MAX_IDENTIFIER_BYTES {
        return;
    }
    let mut cut = MAX_IDENTIFIER_BYTES;
    while !ident.is_char_boundary(cut) {
        cut -= 1;
    }
    ident.truncate(cut);
}

fn is_sql_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\u{000b}' | '\u{000c}')
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_ascii_alphabetic() || (!c.is_ascii() && c.is_alphabetic())
}

fn is_ident_cont(c: char) -> bool {
    is_ident_start(c) || c.is_ascii_digit() || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_keywords_identifiers_and_operators() {
        let sql = "SELECT Foo, \"Bar\" AS baz FROM tbl WHERE x >= 10 AND y <> 'a''b';";
        let tokens = lex_sql(sql).expect("lexing should succeed");

        assert!(matches!(tokens[0].kind, TokenKind::Keyword(Keyword::Select)));
        assert_eq!(tokens[1].kind, TokenKind::Identifier("foo".to_string()));
        assert_eq!(tokens[3].kind, TokenKind::Identifier("Bar".to_string()));
        assert!(matches!(tokens[4].kind, TokenKind::Keyword(Keyword::As)));
        assert!(tokens.iter().any(|t| t.kind == TokenKind::GreaterEquals));
        assert!(tokens.iter().any(|t| t.kind == TokenKind::NotEquals));
        assert!(
            tokens
                .iter()
                .any(|t| t.kind == TokenKind::String("a'b".to_string()))
        );
    }

    #[test]
    fn lexes_typed_literals_produced_by_variable_substitution() {
        let tokens = lex_sql("SELECT (-5)::int8 || 'x'::text").expect("lexing should succeed");
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(kinds[1], TokenKind::LParen);
        assert_eq!(kinds[2], TokenKind::Minus);
        assert_eq!(kinds[3], TokenKind::Integer(5));
        assert_eq!(kinds[5], TokenKind::Typecast);
        assert_eq!(kinds[6], TokenKind::Identifier("int8".to_string()));
        assert_eq!(kinds[7], TokenKind::Concat);
    }

    #[test]
    fn lexes_nested_comments_and_dollar_quotes() {
        let tokens =
            lex_sql("SELECT /* a /* b */ c */ $tag$it's$tag$").expect("lexing should succeed");
        assert_eq!(tokens[1].kind, TokenKind::String("it's".to_string()));
    }

    #[test]
    fn oversized_integer_becomes_numeric_text() {
        let tokens = lex_sql("99999999999999999999").expect("lexing should succeed");
        assert_eq!(tokens[0].kind, TokenKind::Float("99999999999999999999".to_string()));
    }

    #[test]
    fn long_identifiers_truncate_on_char_boundary() {
        let ident = format!("{}é_tail", "a".repeat(62));
        let tokens = lex_sql(&ident).expect("lexing should succeed");
        let TokenKind::Identifier(name) = &tokens[0].kind else {
            panic!("expected identifier, got {:?}", tokens[0].kind);
        };
        assert_eq!(name, &"a".repeat(62));
    }

    #[test]
    fn errors_on_unterminated_string() {
        let err = lex_sql("SELECT 'abc").expect_err("lexing should fail");
        assert!(err.message.contains("unterminated quoted string"));
    }
}
