//! Token scanner for the SQL fragments embedded in routine bodies.
//!
//! Modeled after PostgreSQL's scanner wrapper in
//! `postgres/src/pl/plpgsql/src/pl_scanner.c`: the interpreter only needs
//! token boundaries to find variable references inside expression and query
//! text, so literals, comments and dollar quoting are skipped intact and
//! every token keeps its byte span in the original text.

/// Scanner error for embedded SQL text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at byte {position} (line {line}, col {column})")]
pub struct PlPgSqlScanError {
    pub message: String,
    pub position: usize,
    pub line: usize,
    pub column: usize,
}

/// Byte span of a token in the scanned text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlPgSqlSpan {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlPgSqlTokenKind {
    /// Unquoted identifier or keyword, as written.
    Identifier(String),
    /// `"Quoted"` identifier with quotes removed.
    QuotedIdentifier(String),
    StringLiteral(String),
    NumericLiteral(String),
    /// Positional parameter `$n`.
    Param(usize),
    Assign,
    Typecast,
    Semicolon,
    Comma,
    LParen,
    RParen,
    Dot,
    Colon,
    Equals,
    Operator(String),
    Eof,
}

impl PlPgSqlTokenKind {
    /// Lower-cased text of an unquoted identifier.
    pub fn keyword(&self) -> Option<String> {
        match self {
            Self::Identifier(text) => Some(text.to_ascii_lowercase()),
            _ => None,
        }
    }

    pub fn is_keyword(&self, word: &str) -> bool {
        matches!(self, Self::Identifier(text) if text.eq_ignore_ascii_case(word))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlPgSqlToken {
    pub kind: PlPgSqlTokenKind,
    pub span: PlPgSqlSpan,
}

struct Cursor<'a> {
    source: &'a str,
    idx: usize,
    line: usize,
    column: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<char> {
        self.source.get(self.idx..)?.chars().next()
    }

    fn starts_with(&self, text: &str) -> bool {
        self.source
            .get(self.idx..)
            .is_some_and(|rest| rest.starts_with(text))
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.idx += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn bump_while(&mut self, pred: impl Fn(char) -> bool) {
        while let Some(ch) = self.peek() {
            if !pred(ch) {
                break;
            }
            self.bump();
        }
    }

    fn error(
        &self,
        message: &str,
        position: usize,
        line: usize,
        column: usize,
    ) -> PlPgSqlScanError {
        PlPgSqlScanError {
            message: message.to_string(),
            position,
            line,
            column,
        }
    }
}

/// Tokenizes SQL text embedded in a routine body.
pub fn tokenize(source: &str) -> Result<Vec<PlPgSqlToken>, PlPgSqlScanError> {
    let mut tokens = Vec::new();
    let mut cur = Cursor {
        source,
        idx: 0,
        line: 1,
        column: 1,
    };

    while let Some(ch) = cur.peek() {
        if ch.is_whitespace() {
            cur.bump_while(char::is_whitespace);
            continue;
        }

        if cur.starts_with("--") {
            cur.bump_while(|c| c != '\n');
            continue;
        }

        let start = cur.idx;
        let (line, column) = (cur.line, cur.column);

        if cur.starts_with("/*") {
            cur.bump();
            cur.bump();
            let mut depth = 1usize;
            while depth > 0 {
                if cur.starts_with("/*") {
                    cur.bump();
                    cur.bump();
                    depth += 1;
                } else if cur.starts_with("*/") {
                    cur.bump();
                    cur.bump();
                    depth -= 1;
                } else if cur.bump().is_none() {
                    return Err(cur.error("unterminated block comment", start, line, column));
                }
            }
            continue;
        }

        let kind = if is_ident_start(ch) {
            // E'...' escape strings keep their prefix in the span.
            if (ch == 'e' || ch == 'E') && source[start + 1..].starts_with('\'') {
                cur.bump();
                scan_quoted(&mut cur, '\'', start, line, column)?;
                PlPgSqlTokenKind::StringLiteral(source[start..cur.idx].to_string())
            } else {
                cur.bump_while(is_ident_part);
                PlPgSqlTokenKind::Identifier(source[start..cur.idx].to_string())
            }
        } else if ch.is_ascii_digit() {
            cur.bump_while(|c| c.is_ascii_digit());
            // `1..10` is a range, not a fraction.
            if cur.starts_with(".") && !cur.starts_with("..") {
                cur.bump();
                cur.bump_while(|c| c.is_ascii_digit());
            }
            if cur.peek().is_some_and(|c| c == 'e' || c == 'E') {
                let save = (cur.idx, cur.line, cur.column);
                cur.bump();
                if cur.peek().is_some_and(|c| c == '+' || c == '-') {
                    cur.bump();
                }
                if cur.peek().is_some_and(|c| c.is_ascii_digit()) {
                    cur.bump_while(|c| c.is_ascii_digit());
                } else {
                    (cur.idx, cur.line, cur.column) = save;
                }
            }
            PlPgSqlTokenKind::NumericLiteral(source[start..cur.idx].to_string())
        } else if ch == '\'' {
            scan_quoted(&mut cur, '\'', start, line, column)?;
            PlPgSqlTokenKind::StringLiteral(source[start..cur.idx].to_string())
        } else if ch == '"' {
            scan_quoted(&mut cur, '"', start, line, column)?;
            let inner = &source[start + 1..cur.idx - 1];
            PlPgSqlTokenKind::QuotedIdentifier(inner.replace("\"\"", "\""))
        } else if ch == '$' {
            if let Some(end) = scan_dollar_quoted(source, start) {
                while cur.idx < end {
                    cur.bump();
                }
                PlPgSqlTokenKind::StringLiteral(source[start..cur.idx].to_string())
            } else {
                cur.bump();
                let digits_start = cur.idx;
                cur.bump_while(|c| c.is_ascii_digit());
                let digits = &source[digits_start..cur.idx];
                match digits.parse::<usize>() {
                    Ok(n) => PlPgSqlTokenKind::Param(n),
                    Err(_) => PlPgSqlTokenKind::Operator("$".to_string()),
                }
            }
        } else if cur.starts_with("::") {
            cur.bump();
            cur.bump();
            PlPgSqlTokenKind::Typecast
        } else if cur.starts_with(":=") {
            cur.bump();
            cur.bump();
            PlPgSqlTokenKind::Assign
        } else {
            cur.bump();
            match ch {
                ';' => PlPgSqlTokenKind::Semicolon,
                ',' => PlPgSqlTokenKind::Comma,
                '(' => PlPgSqlTokenKind::LParen,
                ')' => PlPgSqlTokenKind::RParen,
                '.' => PlPgSqlTokenKind::Dot,
                ':' => PlPgSqlTokenKind::Colon,
                '=' if !cur.peek().is_some_and(is_operator_char) => PlPgSqlTokenKind::Equals,
                c if is_operator_char(c) => {
                    while cur.peek().is_some_and(is_operator_char)
                        && !cur.starts_with("--")
                        && !cur.starts_with("/*")
                    {
                        cur.bump();
                    }
                    PlPgSqlTokenKind::Operator(source[start..cur.idx].to_string())
                }
                _ => PlPgSqlTokenKind::Operator(source[start..cur.idx].to_string()),
            }
        };

        tokens.push(PlPgSqlToken {
            kind,
            span: PlPgSqlSpan {
                start,
                end: cur.idx,
                line,
                column,
            },
        });
    }

    tokens.push(PlPgSqlToken {
        kind: PlPgSqlTokenKind::Eof,
        span: PlPgSqlSpan {
            start: source.len(),
            end: source.len(),
            line: cur.line,
            column: cur.column,
        },
    });
    Ok(tokens)
}

fn scan_quoted(
    cur: &mut Cursor<'_>,
    quote: char,
    start: usize,
    line: usize,
    column: usize,
) -> Result<(), PlPgSqlScanError> {
    cur.bump();
    loop {
        match cur.bump() {
            Some(c) if c == quote => {
                if cur.peek() == Some(quote) {
                    cur.bump();
                } else {
                    return Ok(());
                }
            }
            Some(_) => {}
            None => {
                let message = if quote == '"' {
                    "unterminated quoted identifier"
                } else {
                    "unterminated string literal"
                };
                return Err(cur.error(message, start, line, column));
            }
        }
    }
}

/// Extracts SQL expression text from token `start_idx` up to the next `;`
/// at parenthesis depth zero, or to the end of input.
pub fn extract_sql_expression(
    tokens: &[PlPgSqlToken],
    source: &str,
    start_idx: usize,
) -> Result<(String, usize), PlPgSqlScanError> {
    let Some(first) = tokens.get(start_idx) else {
        return Err(PlPgSqlScanError {
            message: "expression start is out of range".to_string(),
            position: source.len(),
            line: 0,
            column: 0,
        });
    };

    let mut depth = 0usize;
    for (idx, token) in tokens.iter().enumerate().skip(start_idx) {
        match token.kind {
            PlPgSqlTokenKind::LParen => depth += 1,
            PlPgSqlTokenKind::RParen => depth = depth.saturating_sub(1),
            PlPgSqlTokenKind::Semicolon | PlPgSqlTokenKind::Eof if depth == 0 => {
                let expr = source[first.span.start..token.span.start].trim().to_string();
                return Ok((expr, idx));
            }
            _ => {}
        }
    }

    Err(PlPgSqlScanError {
        message: "unterminated SQL expression (unbalanced parentheses)".to_string(),
        position: first.span.start,
        line: first.span.line,
        column: first.span.column,
    })
}

fn is_ident_start(ch: char) -> bool {
    ch == '_' || ch.is_alphabetic()
}

fn is_ident_part(ch: char) -> bool {
    ch == '_' || ch == '$' || ch.is_alphanumeric()
}

fn is_operator_char(ch: char) -> bool {
    matches!(
        ch,
        '+'
            | '-'
            | '*'
            | '/'
            | '%'
            | '<'
            | '>'
            | '='
            | '!'
            | '|'
            | '~'
            | '@'
            | '#'
            | '^'
            | '&'
            | '?'
    )
}

fn scan_dollar_quoted(source: &str, start: usize) -> Option<usize> {
    let rest = source.get(start + 1..)?;
    let tag_len = rest.find('$')?;
    let tag = &rest[..tag_len];
    if tag.chars().next().is_some_and(|c| c.is_ascii_digit()) || !tag.chars().all(is_ident_part) {
        return None;
    }
    let delim_end = start + 1 + tag_len + 1;
    let delim = &source[start..delim_end];
    let rel = source[delim_end..].find(delim)?;
    Some(delim_end + rel + delim.len())
}
