use std::fmt;

use crate::catalog::routine::RoutineKind;
use crate::parser::ast::{
    Assignment, BinaryOp, CallStatement, ColumnDefinition, CreateSequenceStatement,
    CreateTableStatement, CreateTypeStatement, DeleteStatement, DropRoutineStatement,
    DropTableStatement, Expr, FromItem, InsertSource, InsertStatement, OrderByExpr, SelectItem,
    SelectStatement, SetStatement, ShowStatement, Statement, UnaryOp, UpdateStatement,
};
use crate::parser::lexer::{Keyword, LexError, Token, TokenKind, lex_sql};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.message, self.position)
    }
}

impl std::error::Error for ParseError {}

pub fn parse_statement(sql: &str) -> Result<Statement, ParseError> {
    let tokens = lex_sql(sql).map_err(ParseError::from)?;
    let mut parser = Parser::new(tokens);
    let stmt = parser.parse_top_level_statement()?;
    while parser.consume_if(|k| matches!(k, TokenKind::Semicolon)) {}
    parser.expect_eof()?;
    Ok(stmt)
}

impl From<LexError> for ParseError {
    fn from(value: LexError) -> Self {
        Self {
            message: value.message,
            position: value.position,
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    idx: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, idx: 0 }
    }

    fn parse_top_level_statement(&mut self) -> Result<Statement, ParseError> {
        if self.consume_keyword(Keyword::Select) {
            return Ok(Statement::Query(self.parse_select_after_select_keyword()?));
        }
        if self.consume_keyword(Keyword::Insert) {
            return self.parse_insert_statement();
        }
        if self.consume_keyword(Keyword::Update) {
            return self.parse_update_statement();
        }
        if self.consume_keyword(Keyword::Delete) {
            return self.parse_delete_statement();
        }
        if self.consume_keyword(Keyword::Create) {
            return self.parse_create_statement();
        }
        if self.consume_keyword(Keyword::Drop) {
            return self.parse_drop_statement();
        }
        if self.consume_keyword(Keyword::Call) {
            let name = self.parse_qualified_name()?;
            let args = self.parse_call_args()?;
            return Ok(Statement::Call(CallStatement { name, args }));
        }
        if self.consume_keyword(Keyword::Set) {
            return self.parse_set_statement();
        }
        if self.consume_keyword(Keyword::Show) {
            let name = self.parse_setting_name()?;
            return Ok(Statement::Show(ShowStatement { name }));
        }
        Err(self.error_at_current("syntax error at or near statement start"))
    }

    fn parse_create_statement(&mut self) -> Result<Statement, ParseError> {
        if self.consume_keyword(Keyword::Table) {
            let if_not_exists = self.parse_if_not_exists()?;
            let name = self.parse_qualified_name()?;
            self.expect_token(|k| matches!(k, TokenKind::LParen), "expected '(' after table name")?;
            let mut columns = Vec::new();
            let mut table_key: Vec<String> = Vec::new();
            loop {
                if self.consume_keyword(Keyword::Primary) {
                    self.expect_keyword(Keyword::Key, "expected KEY after PRIMARY")?;
                    table_key = self.parse_identifier_list_in_parens()?;
                } else {
                    columns.push(self.parse_column_definition()?);
                }
                if !self.consume_if(|k| matches!(k, TokenKind::Comma)) {
                    break;
                }
            }
            self.expect_token(
                |k| matches!(k, TokenKind::RParen),
                "expected ')' after column list",
            )?;
            for column in &mut columns {
                if table_key.iter().any(|key| key == &column.name) {
                    column.primary_key = true;
                    column.not_null = true;
                }
            }
            return Ok(Statement::CreateTable(CreateTableStatement {
                name,
                columns,
                if_not_exists,
            }));
        }
        if self.consume_keyword(Keyword::Sequence) {
            let if_not_exists = self.parse_if_not_exists()?;
            let name = self.parse_qualified_name()?;
            let mut start = None;
            let mut increment = None;
            loop {
                if self.consume_ident("start") {
                    self.consume_keyword(Keyword::With);
                    start = Some(self.parse_signed_integer_literal()?);
                } else if self.consume_ident("increment") {
                    self.consume_keyword(Keyword::By);
                    increment = Some(self.parse_signed_integer_literal()?);
                } else {
                    break;
                }
            }
            return Ok(Statement::CreateSequence(CreateSequenceStatement {
                name,
                start,
                increment,
                if_not_exists,
            }));
        }
        if self.consume_keyword(Keyword::Type) {
            let name = self.parse_qualified_name()?;
            self.expect_keyword(Keyword::As, "expected AS after type name")?;
            self.expect_token(|k| matches!(k, TokenKind::LParen), "expected '(' after AS")?;
            let mut fields = Vec::new();
            loop {
                let field = self.parse_identifier()?;
                let type_name = self.parse_type_name()?;
                fields.push((field, type_name));
                if !self.consume_if(|k| matches!(k, TokenKind::Comma)) {
                    break;
                }
            }
            self.expect_token(
                |k| matches!(k, TokenKind::RParen),
                "expected ')' after type fields",
            )?;
            return Ok(Statement::CreateType(CreateTypeStatement { name, fields }));
        }
        Err(self.error_at_current("expected TABLE, SEQUENCE or TYPE after CREATE"))
    }

    fn parse_column_definition(&mut self) -> Result<ColumnDefinition, ParseError> {
        let name = self.parse_identifier()?;
        let type_name = self.parse_type_name()?;
        let serial = matches!(
            type_name.as_str(),
            "serial" | "serial4" | "bigserial" | "serial8"
        );
        let mut column = ColumnDefinition {
            name,
            type_name,
            serial,
            primary_key: false,
            not_null: serial,
            default: None,
        };
        loop {
            if self.consume_keyword(Keyword::Primary) {
                self.expect_keyword(Keyword::Key, "expected KEY after PRIMARY")?;
                column.primary_key = true;
                column.not_null = true;
            } else if self.consume_keyword(Keyword::Not) {
                self.expect_keyword(Keyword::Null, "expected NULL after NOT")?;
                column.not_null = true;
            } else if self.consume_keyword(Keyword::Null) {
                column.not_null = false;
            } else if self.consume_keyword(Keyword::Default) {
                column.default = Some(self.parse_expr_bp(7)?);
            } else {
                break;
            }
        }
        Ok(column)
    }

    fn parse_drop_statement(&mut self) -> Result<Statement, ParseError> {
        if self.consume_keyword(Keyword::Table) {
            let if_exists = self.parse_if_exists()?;
            let mut names = vec![self.parse_qualified_name()?];
            while self.consume_if(|k| matches!(k, TokenKind::Comma)) {
                names.push(self.parse_qualified_name()?);
            }
            return Ok(Statement::DropTable(DropTableStatement { names, if_exists }));
        }
        let kind = if self.consume_keyword(Keyword::Function) {
            RoutineKind::Function
        } else if self.consume_keyword(Keyword::Procedure) {
            RoutineKind::Procedure
        } else {
            return Err(self.error_at_current("expected TABLE, FUNCTION or PROCEDURE after DROP"));
        };
        let if_exists = self.parse_if_exists()?;
        let name = self.parse_qualified_name()?;
        let arg_types = if self.consume_if(|k| matches!(k, TokenKind::LParen)) {
            let mut types = Vec::new();
            if !self.consume_if(|k| matches!(k, TokenKind::RParen)) {
                loop {
                    types.push(self.parse_type_name()?);
                    if !self.consume_if(|k| matches!(k, TokenKind::Comma)) {
                        break;
                    }
                }
                self.expect_token(
                    |k| matches!(k, TokenKind::RParen),
                    "expected ')' after argument types",
                )?;
            }
            Some(types)
        } else {
            None
        };
        Ok(Statement::DropRoutine(DropRoutineStatement {
            kind,
            if_exists,
            name,
            arg_types,
        }))
    }

    fn parse_insert_statement(&mut self) -> Result<Statement, ParseError> {
        self.expect_keyword(Keyword::Into, "expected INTO after INSERT")?;
        let table_name = self.parse_qualified_name()?;
        let columns = if self.peek_kind(|k| matches!(k, TokenKind::LParen)) {
            self.parse_identifier_list_in_parens()?
        } else {
            Vec::new()
        };
        let source = if self.consume_keyword(Keyword::Values) {
            let mut rows = Vec::new();
            loop {
                self.expect_token(
                    |k| matches!(k, TokenKind::LParen),
                    "expected '(' before VALUES row",
                )?;
                rows.push(self.parse_expr_list()?);
                self.expect_token(
                    |k| matches!(k, TokenKind::RParen),
                    "expected ')' after VALUES row",
                )?;
                if !self.consume_if(|k| matches!(k, TokenKind::Comma)) {
                    break;
                }
            }
            InsertSource::Values(rows)
        } else if self.consume_keyword(Keyword::Select) {
            InsertSource::Query(Box::new(self.parse_select_after_select_keyword()?))
        } else {
            return Err(self.error_at_current("expected VALUES or SELECT in INSERT"));
        };
        Ok(Statement::Insert(InsertStatement {
            table_name,
            columns,
            source,
        }))
    }

    fn parse_update_statement(&mut self) -> Result<Statement, ParseError> {
        let table_name = self.parse_qualified_name()?;
        let alias = self.parse_optional_alias()?;
        self.expect_keyword(Keyword::Set, "expected SET in UPDATE")?;
        let mut assignments = Vec::new();
        loop {
            let column = self.parse_identifier()?;
            self.expect_token(|k| matches!(k, TokenKind::Equal), "expected '=' in SET clause")?;
            let value = self.parse_expr()?;
            assignments.push(Assignment { column, value });
            if !self.consume_if(|k| matches!(k, TokenKind::Comma)) {
                break;
            }
        }
        let where_clause = self.parse_optional_where()?;
        Ok(Statement::Update(UpdateStatement {
            table_name,
            alias,
            assignments,
            where_clause,
        }))
    }

    fn parse_delete_statement(&mut self) -> Result<Statement, ParseError> {
        self.expect_keyword(Keyword::From, "expected FROM after DELETE")?;
        let table_name = self.parse_qualified_name()?;
        let alias = self.parse_optional_alias()?;
        let where_clause = self.parse_optional_where()?;
        Ok(Statement::Delete(DeleteStatement {
            table_name,
            alias,
            where_clause,
        }))
    }

    fn parse_set_statement(&mut self) -> Result<Statement, ParseError> {
        let name = self.parse_setting_name()?;
        if !self.consume_keyword(Keyword::To) {
            self.expect_token(
                |k| matches!(k, TokenKind::Equal),
                "expected TO or '=' after SET name",
            )?;
        }
        let mut parts = Vec::new();
        loop {
            let part = match self.current_kind() {
                TokenKind::Identifier(value) | TokenKind::String(value) => value.clone(),
                TokenKind::Integer(value) => value.to_string(),
                TokenKind::Float(value) => value.clone(),
                TokenKind::Keyword(kw) => kw.as_str().to_string(),
                _ => return Err(self.error_at_current("expected setting value")),
            };
            self.advance();
            parts.push(part);
            if !self.consume_if(|k| matches!(k, TokenKind::Comma)) {
                break;
            }
        }
        Ok(Statement::Set(SetStatement {
            name,
            value: parts.join(", "),
        }))
    }

    /// `name` or `prefix.name`, as custom GUCs are spelled.
    fn parse_setting_name(&mut self) -> Result<String, ParseError> {
        let mut name = self.parse_identifier()?;
        while self.consume_if(|k| matches!(k, TokenKind::Dot)) {
            name.push('.');
            name.push_str(&self.parse_identifier()?);
        }
        Ok(name)
    }

    fn parse_select_after_select_keyword(&mut self) -> Result<SelectStatement, ParseError> {
        let targets = self.parse_target_list()?;
        let from = if self.consume_keyword(Keyword::From) {
            Some(self.parse_from_item()?)
        } else {
            None
        };
        let where_clause = self.parse_optional_where()?;
        let order_by = if self.consume_keyword(Keyword::Order) {
            self.expect_keyword(Keyword::By, "expected BY after ORDER")?;
            self.parse_order_by_list()?
        } else {
            Vec::new()
        };
        let limit = if self.consume_keyword(Keyword::Limit) {
            if self.consume_keyword(Keyword::All) {
                None
            } else {
                Some(self.parse_expr()?)
            }
        } else {
            None
        };
        Ok(SelectStatement {
            targets,
            from,
            where_clause,
            order_by,
            limit,
        })
    }

    fn parse_target_list(&mut self) -> Result<Vec<SelectItem>, ParseError> {
        let mut targets = vec![self.parse_target_item()?];
        while self.consume_if(|k| matches!(k, TokenKind::Comma)) {
            targets.push(self.parse_target_item()?);
        }
        Ok(targets)
    }

    fn parse_target_item(&mut self) -> Result<SelectItem, ParseError> {
        let expr = self.parse_expr()?;
        let alias = self.parse_optional_alias()?;
        Ok(SelectItem { expr, alias })
    }

    fn parse_from_item(&mut self) -> Result<FromItem, ParseError> {
        if self.consume_keyword(Keyword::Rows) {
            self.expect_keyword(Keyword::From, "expected FROM after ROWS")?;
            self.expect_token(|k| matches!(k, TokenKind::LParen), "expected '(' after ROWS FROM")?;
            let mut calls = Vec::new();
            loop {
                let name = self.parse_qualified_name()?;
                let args = self.parse_call_args()?;
                calls.push((name, args));
                if !self.consume_if(|k| matches!(k, TokenKind::Comma)) {
                    break;
                }
            }
            self.expect_token(
                |k| matches!(k, TokenKind::RParen),
                "expected ')' after ROWS FROM list",
            )?;
            let with_ordinality = self.parse_with_ordinality()?;
            let alias = self.parse_optional_alias()?;
            return Ok(FromItem::RowsFrom {
                calls,
                with_ordinality,
                alias,
            });
        }

        let name = self.parse_qualified_name()?;
        if self.peek_kind(|k| matches!(k, TokenKind::LParen)) {
            let args = self.parse_call_args()?;
            if self.parse_with_ordinality()? {
                let alias = self.parse_optional_alias()?;
                return Ok(FromItem::RowsFrom {
                    calls: vec![(name, args)],
                    with_ordinality: true,
                    alias,
                });
            }
            let alias = self.parse_optional_alias()?;
            return Ok(FromItem::Function { name, args, alias });
        }
        let alias = self.parse_optional_alias()?;
        Ok(FromItem::Relation { name, alias })
    }

    fn parse_with_ordinality(&mut self) -> Result<bool, ParseError> {
        if !self.consume_keyword(Keyword::With) {
            return Ok(false);
        }
        self.expect_keyword(Keyword::Ordinality, "expected ORDINALITY after WITH")?;
        Ok(true)
    }

    fn parse_optional_alias(&mut self) -> Result<Option<String>, ParseError> {
        if self.consume_keyword(Keyword::As) {
            return Ok(Some(self.parse_identifier()?));
        }
        if let TokenKind::Identifier(value) = self.current_kind() {
            let alias = value.clone();
            self.advance();
            return Ok(Some(alias));
        }
        Ok(None)
    }

    fn parse_optional_where(&mut self) -> Result<Option<Expr>, ParseError> {
        if self.consume_keyword(Keyword::Where) {
            return Ok(Some(self.parse_expr()?));
        }
        Ok(None)
    }

    fn parse_order_by_list(&mut self) -> Result<Vec<OrderByExpr>, ParseError> {
        let mut out = Vec::new();
        loop {
            let expr = self.parse_expr()?;
            let ascending = if self.consume_keyword(Keyword::Asc) {
                Some(true)
            } else if self.consume_keyword(Keyword::Desc) {
                Some(false)
            } else {
                None
            };
            out.push(OrderByExpr { expr, ascending });
            if !self.consume_if(|k| matches!(k, TokenKind::Comma)) {
                return Ok(out);
            }
        }
    }

    fn parse_identifier_list_in_parens(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect_token(|k| matches!(k, TokenKind::LParen), "expected '('")?;
        let mut out = vec![self.parse_identifier()?];
        while self.consume_if(|k| matches!(k, TokenKind::Comma)) {
            out.push(self.parse_identifier()?);
        }
        self.expect_token(|k| matches!(k, TokenKind::RParen), "expected ')'")?;
        Ok(out)
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect_token(|k| matches!(k, TokenKind::LParen), "expected '(' before arguments")?;
        if self.consume_if(|k| matches!(k, TokenKind::RParen)) {
            return Ok(Vec::new());
        }
        let args = self.parse_expr_list()?;
        self.expect_token(|k| matches!(k, TokenKind::RParen), "expected ')' after arguments")?;
        Ok(args)
    }

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut out = vec![self.parse_expr()?];
        while self.consume_if(|k| matches!(k, TokenKind::Comma)) {
            out.push(self.parse_expr()?);
        }
        Ok(out)
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_expr_bp(0)
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_prefix_expr()?;

        loop {
            if self.peek_kind(|k| matches!(k, TokenKind::Typecast)) {
                if 13 < min_bp {
                    break;
                }
                self.advance();
                let type_name = self.parse_type_name()?;
                lhs = Expr::Cast {
                    expr: Box::new(lhs),
                    type_name,
                };
                continue;
            }
            let negated_predicate = self.peek_keyword(Keyword::Not)
                && (self.peek_nth_keyword(1, Keyword::In)
                    || self.peek_nth_keyword(1, Keyword::Between));
            if negated_predicate
                || self.peek_keyword(Keyword::In)
                || self.peek_keyword(Keyword::Between)
            {
                if 5 < min_bp {
                    break;
                }
                let negated = self.consume_keyword(Keyword::Not);
                lhs = if self.consume_keyword(Keyword::In) {
                    self.parse_in_expr(lhs, negated)?
                } else {
                    self.expect_keyword(Keyword::Between, "expected BETWEEN")?;
                    self.parse_between_expr(lhs, negated)?
                };
                continue;
            }
            if self.peek_keyword(Keyword::Is) {
                if 5 < min_bp {
                    break;
                }
                self.advance();
                let negated = self.consume_keyword(Keyword::Not);
                self.expect_keyword(Keyword::Null, "expected NULL after IS")?;
                lhs = Expr::IsNull {
                    expr: Box::new(lhs),
                    negated,
                };
                continue;
            }

            let Some((op, l_bp, r_bp)) = self.current_binary_op() else {
                break;
            };
            if l_bp < min_bp {
                break;
            }
            self.advance();
            let rhs = self.parse_expr_bp(r_bp)?;
            lhs = Expr::Binary {
                left: Box::new(lhs),
                op,
                right: Box::new(rhs),
            };
        }

        Ok(lhs)
    }

    fn parse_prefix_expr(&mut self) -> Result<Expr, ParseError> {
        if self.consume_keyword(Keyword::Cast) {
            self.expect_token(|k| matches!(k, TokenKind::LParen), "expected '(' after CAST")?;
            let expr = self.parse_expr()?;
            self.expect_keyword(Keyword::As, "expected AS in CAST expression")?;
            let type_name = self.parse_type_name()?;
            self.expect_token(
                |k| matches!(k, TokenKind::RParen),
                "expected ')' to close CAST expression",
            )?;
            return Ok(Expr::Cast {
                expr: Box::new(expr),
                type_name,
            });
        }
        if self.consume_keyword(Keyword::Case) {
            return self.parse_case_expr();
        }
        if self.consume_keyword(Keyword::Row) {
            return Ok(Expr::Row(self.parse_call_args()?));
        }
        if self.consume_keyword(Keyword::Not) {
            let expr = self.parse_expr_bp(4)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        if self.consume_if(|k| matches!(k, TokenKind::Plus)) {
            let expr = self.parse_expr_bp(11)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Plus,
                expr: Box::new(expr),
            });
        }
        if self.consume_if(|k| matches!(k, TokenKind::Minus)) {
            let expr = self.parse_expr_bp(11)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Minus,
                expr: Box::new(expr),
            });
        }
        if self.consume_if(|k| matches!(k, TokenKind::LParen)) {
            let first = self.parse_expr()?;
            if self.consume_if(|k| matches!(k, TokenKind::Comma)) {
                let mut items = vec![first];
                items.extend(self.parse_expr_list()?);
                self.expect_token(|k| matches!(k, TokenKind::RParen), "expected ')' to close row")?;
                return Ok(Expr::Row(items));
            }
            self.expect_token(
                |k| matches!(k, TokenKind::RParen),
                "expected ')' to close expression",
            )?;
            return Ok(first);
        }

        match self.current_kind() {
            TokenKind::Integer(v) => {
                let value = *v;
                self.advance();
                Ok(Expr::Integer(value))
            }
            TokenKind::Float(v) => {
                let value = v.clone();
                self.advance();
                Ok(Expr::Float(value))
            }
            TokenKind::String(v) => {
                let value = v.clone();
                self.advance();
                Ok(Expr::String(value))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr::Boolean(true))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr::Boolean(false))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Ok(Expr::Null)
            }
            TokenKind::Star => {
                self.advance();
                Ok(Expr::Wildcard)
            }
            TokenKind::Identifier(_) => self.parse_identifier_expr(),
            TokenKind::Keyword(kw) if kw.is_unreserved() => self.parse_identifier_expr(),
            _ => Err(self.error_at_current("syntax error: expected expression")),
        }
    }

    fn parse_identifier_expr(&mut self) -> Result<Expr, ParseError> {
        let mut name = vec![self.parse_identifier()?];
        while self.consume_if(|k| matches!(k, TokenKind::Dot)) {
            if self.consume_if(|k| matches!(k, TokenKind::Star)) {
                return Ok(Expr::QualifiedWildcard(name));
            }
            name.push(self.parse_identifier()?);
        }

        if self.consume_if(|k| matches!(k, TokenKind::LParen)) {
            if self.consume_if(|k| matches!(k, TokenKind::Star)) {
                self.expect_token(|k| matches!(k, TokenKind::RParen), "expected ')' after '*'")?;
                return Ok(Expr::FunctionCall {
                    name,
                    args: Vec::new(),
                    star: true,
                });
            }
            let args = if self.consume_if(|k| matches!(k, TokenKind::RParen)) {
                Vec::new()
            } else {
                let args = self.parse_expr_list()?;
                self.expect_token(
                    |k| matches!(k, TokenKind::RParen),
                    "expected ')' after function arguments",
                )?;
                args
            };
            return Ok(Expr::FunctionCall {
                name,
                args,
                star: false,
            });
        }
        Ok(Expr::Identifier(name))
    }

    fn parse_case_expr(&mut self) -> Result<Expr, ParseError> {
        let operand = if self.peek_keyword(Keyword::When) {
            None
        } else {
            Some(self.parse_expr()?)
        };

        let mut when_then = Vec::new();
        loop {
            self.expect_keyword(Keyword::When, "expected WHEN in CASE expression")?;
            let when_expr = self.parse_expr()?;
            self.expect_keyword(Keyword::Then, "expected THEN in CASE expression")?;
            let then_expr = self.parse_expr()?;
            when_then.push((when_expr, then_expr));
            if !self.peek_keyword(Keyword::When) {
                break;
            }
        }
        let else_expr = if self.consume_keyword(Keyword::Else) {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        self.expect_keyword(Keyword::End, "expected END to close CASE expression")?;

        Ok(match operand {
            Some(operand) => Expr::CaseSimple {
                operand: Box::new(operand),
                when_then,
                else_expr,
            },
            None => Expr::CaseSearched {
                when_then,
                else_expr,
            },
        })
    }

    /// Type names as written: `int4`, `double precision`, `numeric(10,2)`,
    /// `app.pair`. Modifiers are accepted and dropped.
    fn parse_type_name(&mut self) -> Result<String, ParseError> {
        let mut name = self.parse_identifier()?;
        match name.as_str() {
            "double" if self.consume_ident("precision") => name.push_str(" precision"),
            "character" if self.consume_ident("varying") => name.push_str(" varying"),
            _ => {}
        }
        while self.consume_if(|k| matches!(k, TokenKind::Dot)) {
            name.push('.');
            name.push_str(&self.parse_identifier()?);
        }
        if self.consume_if(|k| matches!(k, TokenKind::LParen)) {
            loop {
                self.expect_token(
                    |k| matches!(k, TokenKind::Integer(_)),
                    "expected integer type modifier",
                )?;
                if !self.consume_if(|k| matches!(k, TokenKind::Comma)) {
                    break;
                }
            }
            self.expect_token(
                |k| matches!(k, TokenKind::RParen),
                "expected ')' after type modifier",
            )?;
        }
        Ok(name)
    }

    fn parse_in_expr(&mut self, lhs: Expr, negated: bool) -> Result<Expr, ParseError> {
        self.expect_token(|k| matches!(k, TokenKind::LParen), "expected '(' after IN")?;
        let list = self.parse_expr_list()?;
        self.expect_token(
            |k| matches!(k, TokenKind::RParen),
            "expected ')' after IN value list",
        )?;
        Ok(Expr::InList {
            expr: Box::new(lhs),
            list,
            negated,
        })
    }

    fn parse_between_expr(&mut self, lhs: Expr, negated: bool) -> Result<Expr, ParseError> {
        let low = self.parse_expr_bp(6)?;
        self.expect_keyword(Keyword::And, "expected AND in BETWEEN predicate")?;
        let high = self.parse_expr_bp(6)?;
        Ok(Expr::Between {
            expr: Box::new(lhs),
            low: Box::new(low),
            high: Box::new(high),
            negated,
        })
    }

    fn parse_if_exists(&mut self) -> Result<bool, ParseError> {
        if !self.consume_keyword(Keyword::If) {
            return Ok(false);
        }
        self.expect_keyword(Keyword::Exists, "expected EXISTS after IF")?;
        Ok(true)
    }

    fn parse_if_not_exists(&mut self) -> Result<bool, ParseError> {
        if !self.consume_keyword(Keyword::If) {
            return Ok(false);
        }
        self.expect_keyword(Keyword::Not, "expected NOT after IF")?;
        self.expect_keyword(Keyword::Exists, "expected EXISTS after IF NOT")?;
        Ok(true)
    }

    fn parse_signed_integer_literal(&mut self) -> Result<i64, ParseError> {
        let negative = self.consume_if(|k| matches!(k, TokenKind::Minus));
        match self.current_kind() {
            TokenKind::Integer(value) => {
                let value = *value;
                self.advance();
                Ok(if negative { -value } else { value })
            }
            _ => Err(self.error_at_current("expected integer literal")),
        }
    }

    fn parse_qualified_name(&mut self) -> Result<Vec<String>, ParseError> {
        let mut out = vec![self.parse_identifier()?];
        while self.consume_if(|k| matches!(k, TokenKind::Dot)) {
            out.push(self.parse_identifier()?);
        }
        Ok(out)
    }

    fn parse_identifier(&mut self) -> Result<String, ParseError> {
        match self.current_kind() {
            TokenKind::Identifier(value) => {
                let out = value.clone();
                self.advance();
                Ok(out)
            }
            TokenKind::Keyword(kw) if kw.is_unreserved() => {
                let out = kw.as_str().to_string();
                self.advance();
                Ok(out)
            }
            _ => Err(self.error_at_current("expected identifier")),
        }
    }

    fn current_binary_op(&self) -> Option<(BinaryOp, u8, u8)> {
        match self.current_kind() {
            TokenKind::Keyword(Keyword::Or) => Some((BinaryOp::Or, 1, 2)),
            TokenKind::Keyword(Keyword::And) => Some((BinaryOp::And, 3, 4)),
            TokenKind::Equal => Some((BinaryOp::Eq, 5, 6)),
            TokenKind::NotEquals => Some((BinaryOp::NotEq, 5, 6)),
            TokenKind::Less => Some((BinaryOp::Lt, 5, 6)),
            TokenKind::LessEquals => Some((BinaryOp::Lte, 5, 6)),
            TokenKind::Greater => Some((BinaryOp::Gt, 5, 6)),
            TokenKind::GreaterEquals => Some((BinaryOp::Gte, 5, 6)),
            TokenKind::Concat => Some((BinaryOp::Concat, 7, 8)),
            TokenKind::Plus => Some((BinaryOp::Add, 7, 8)),
            TokenKind::Minus => Some((BinaryOp::Sub, 7, 8)),
            TokenKind::Star => Some((BinaryOp::Mul, 9, 10)),
            TokenKind::Slash => Some((BinaryOp::Div, 9, 10)),
            TokenKind::Percent => Some((BinaryOp::Mod, 9, 10)),
            _ => None,
        }
    }

    fn expect_keyword(
        &mut self,
        keyword: Keyword,
        message: &'static str,
    ) -> Result<(), ParseError> {
        if self.consume_keyword(keyword) {
            return Ok(());
        }
        Err(self.error_at_current(message))
    }

    fn expect_token<F>(&mut self, predicate: F, message: &'static str) -> Result<(), ParseError>
    where
        F: Fn(&TokenKind) -> bool,
    {
        if self.consume_if(predicate) {
            return Ok(());
        }
        Err(self.error_at_current(message))
    }

    fn expect_eof(&self) -> Result<(), ParseError> {
        if matches!(self.current_kind(), TokenKind::Eof) {
            return Ok(());
        }
        Err(self.error_at_current("syntax error: unexpected token after end of statement"))
    }

    fn consume_keyword(&mut self, keyword: Keyword) -> bool {
        self.consume_if(|k| matches!(k, TokenKind::Keyword(kv) if *kv == keyword))
    }

    fn peek_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.current_kind(), TokenKind::Keyword(kv) if *kv == keyword)
    }

    fn consume_ident(&mut self, value: &str) -> bool {
        self.consume_if(
            |k| matches!(k, TokenKind::Identifier(ident) if ident.eq_ignore_ascii_case(value)),
        )
    }

    fn peek_kind<F>(&self, predicate: F) -> bool
    where
        F: Fn(&TokenKind) -> bool,
    {
        predicate(self.current_kind())
    }

    fn consume_if<F>(&mut self, predicate: F) -> bool
    where
        F: Fn(&TokenKind) -> bool,
    {
        if predicate(self.current_kind()) {
            self.advance();
            return true;
        }
        false
    }

    fn current_kind(&self) -> &TokenKind {
        &self.tokens[self.idx].kind
    }

    fn peek_nth_keyword(&self, n: usize, keyword: Keyword) -> bool {
        matches!(
            self.tokens.get(self.idx + n).map(|token| &token.kind),
            Some(TokenKind::Keyword(kv)) if *kv == keyword
        )
    }

    fn advance(&mut self) {
        if self.idx + 1 < self.tokens.len() {
            self.idx += 1;
        }
    }

    fn error_at_current(&self, message: &str) -> ParseError {
        ParseError {
            message: message.to_string(),
            position: self.tokens[self.idx].start,
        }
    }
}
