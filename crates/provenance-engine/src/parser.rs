use std::rc::Rc;

use crate::ast::{
    nesting_depth, AssignOp, BinaryOp, DeclKind, Expr, ExprKind, FunctionDef, LogicalOp,
    MemberProperty, ObjectProperty, Program, PropertyValue, SourceLocation, Stmt, UnaryOp,
    UpdateOp, VarDeclarator, MAX_NESTING_DEPTH,
};
use crate::error::{ProvenanceError, ProvenanceResult};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::value::format_number;

/// Parse source text of the supported scripting subset into a [`Program`].
pub fn parse_program(source: &str) -> ProvenanceResult<Program> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = ParserImpl::new(tokens);
    let mut body = Vec::new();
    while !parser.at(&TokenKind::Eof) {
        body.push(parser.parse_statement()?);
    }
    // Left-associative chains are built in a loop, so the tree can end up deeper than the
    // parser's own recursion.
    if nesting_depth(&body) > MAX_NESTING_DEPTH {
        return Err(ProvenanceError::Parse(nesting_message()));
    }
    Ok(Program { body })
}

fn nesting_message() -> String {
    format!("Nesting exceeds the {MAX_NESTING_DEPTH}-level limit")
}

struct ParserImpl {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl ParserImpl {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Count one more level of nesting. Callers undo it with [`Self::leave`] on success; an
    /// error aborts the whole parse.
    fn enter(&mut self) -> ProvenanceResult<()> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.error(nesting_message()));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self, levels: usize) {
        self.depth = self.depth.saturating_sub(levels);
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> ProvenanceResult<T>,
    ) -> ProvenanceResult<T> {
        self.enter()?;
        let result = parse(self)?;
        self.leave(1);
        Ok(result)
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        // The lexer always terminates the stream with `Eof`.
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn next(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek().kind, TokenKind::Keyword(k) if k == keyword)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.next();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.next();
            true
        } else {
            false
        }
    }

    fn loc(&self) -> Option<SourceLocation> {
        let tok = self.peek();
        Some(SourceLocation::new(tok.line, tok.col))
    }

    fn error(&self, message: impl std::fmt::Display) -> ProvenanceError {
        let tok = self.peek();
        ProvenanceError::Parse(format!("{message} at {}:{}", tok.line, tok.col))
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> ProvenanceResult<Token> {
        if self.at(&kind) {
            Ok(self.next())
        } else {
            Err(self.error(format!("Expected {what}, found {}", describe(&self.peek().kind))))
        }
    }

    fn expect_identifier(&mut self) -> ProvenanceResult<String> {
        match &self.peek().kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.next();
                Ok(name)
            }
            other => Err(self.error(format!("Expected identifier, found {}", describe(other)))),
        }
    }

    /// Automatic semicolon insertion, restricted to the cases scripts actually rely on.
    fn consume_semicolon(&mut self) -> ProvenanceResult<()> {
        if self.eat(&TokenKind::Semicolon)
            || self.at(&TokenKind::RBrace)
            || self.at(&TokenKind::Eof)
            || self.peek().newline_before
        {
            return Ok(());
        }
        Err(self.error(format!("Expected `;`, found {}", describe(&self.peek().kind))))
    }

    // ---- statements -------------------------------------------------------------------

    fn parse_statement(&mut self) -> ProvenanceResult<Stmt> {
        self.nested(Self::parse_statement_inner)
    }

    fn parse_statement_inner(&mut self) -> ProvenanceResult<Stmt> {
        let loc = self.loc();
        match self.peek().kind.clone() {
            TokenKind::LBrace => Ok(Stmt::Block(self.parse_block()?)),
            TokenKind::Semicolon => {
                self.next();
                Ok(Stmt::Empty)
            }
            TokenKind::Keyword(keyword) => match keyword {
                "var" | "let" | "const" => {
                    let stmt = self.parse_var_decl()?;
                    self.consume_semicolon()?;
                    Ok(stmt)
                }
                "function" => {
                    self.next();
                    let name = self.expect_identifier()?;
                    let def = self.parse_function_rest(Some(name), loc)?;
                    Ok(Stmt::FunctionDecl(Rc::new(def)))
                }
                "return" => {
                    self.next();
                    let argument = if self.at(&TokenKind::Semicolon)
                        || self.at(&TokenKind::RBrace)
                        || self.at(&TokenKind::Eof)
                        || self.peek().newline_before
                    {
                        None
                    } else {
                        Some(self.parse_expression()?)
                    };
                    self.consume_semicolon()?;
                    Ok(Stmt::Return { argument, loc })
                }
                "if" => self.parse_if(),
                "while" => {
                    self.next();
                    self.expect(TokenKind::LParen, "`(`")?;
                    let test = self.parse_expression()?;
                    self.expect(TokenKind::RParen, "`)`")?;
                    let body = Box::new(self.parse_statement()?);
                    Ok(Stmt::While { test, body })
                }
                "for" => self.parse_for(),
                "break" => {
                    self.next();
                    self.consume_semicolon()?;
                    Ok(Stmt::Break)
                }
                "continue" => {
                    self.next();
                    self.consume_semicolon()?;
                    Ok(Stmt::Continue)
                }
                "throw" => {
                    self.next();
                    if self.peek().newline_before {
                        return Err(self.error("Illegal newline after throw"));
                    }
                    let argument = self.parse_expression()?;
                    self.consume_semicolon()?;
                    Ok(Stmt::Throw(argument))
                }
                "try" => self.parse_try(),
                _ => self.parse_expression_statement(),
            },
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_expression_statement(&mut self) -> ProvenanceResult<Stmt> {
        let expr = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(Stmt::Expr(expr))
    }

    fn parse_block(&mut self) -> ProvenanceResult<Vec<Stmt>> {
        self.expect(TokenKind::LBrace, "`{`")?;
        let mut body = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            if self.at(&TokenKind::Eof) {
                return Err(self.error("Unterminated block"));
            }
            body.push(self.parse_statement()?);
        }
        self.next();
        Ok(body)
    }

    fn parse_decl_kind(&mut self) -> Option<DeclKind> {
        let kind = match self.peek().kind {
            TokenKind::Keyword("var") => DeclKind::Var,
            TokenKind::Keyword("let") => DeclKind::Let,
            TokenKind::Keyword("const") => DeclKind::Const,
            _ => return None,
        };
        self.next();
        Some(kind)
    }

    fn parse_var_decl(&mut self) -> ProvenanceResult<Stmt> {
        let Some(kind) = self.parse_decl_kind() else {
            return Err(self.error("Expected declaration"));
        };
        let first_loc = self.loc();
        let first = self.expect_identifier()?;
        self.parse_declarators(kind, first, first_loc)
    }

    fn parse_declarators(
        &mut self,
        kind: DeclKind,
        first: String,
        first_loc: Option<SourceLocation>,
    ) -> ProvenanceResult<Stmt> {
        let mut declarations = Vec::new();
        let mut name = first;
        let mut loc = first_loc;
        loop {
            let init = if self.eat(&TokenKind::Assign) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            if kind == DeclKind::Const && init.is_none() {
                return Err(
                    self.error(format!("Missing initializer in const declaration `{name}`"))
                );
            }
            declarations.push(VarDeclarator {
                name,
                init,
                track_init: false,
                loc,
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            loc = self.loc();
            name = self.expect_identifier()?;
        }
        Ok(Stmt::VarDecl { kind, declarations })
    }

    fn parse_if(&mut self) -> ProvenanceResult<Stmt> {
        self.next();
        self.expect(TokenKind::LParen, "`(`")?;
        let test = self.parse_expression()?;
        self.expect(TokenKind::RParen, "`)`")?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.eat_keyword("else") {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            test,
            consequent,
            alternate,
        })
    }

    fn parse_for(&mut self) -> ProvenanceResult<Stmt> {
        self.next();
        self.expect(TokenKind::LParen, "`(`")?;

        let init = if self.at(&TokenKind::Semicolon) {
            None
        } else if let Some(kind) = self.parse_decl_kind() {
            let loc = self.loc();
            let name = self.expect_identifier()?;
            if self.eat_keyword("in") {
                return self.parse_for_in_rest(Some(kind), name);
            }
            Some(Box::new(self.parse_declarators(kind, name, loc)?))
        } else if matches!(self.peek().kind, TokenKind::Identifier(_))
            && matches!(self.peek_at(1).kind, TokenKind::Keyword("in"))
        {
            let name = self.expect_identifier()?;
            self.next();
            return self.parse_for_in_rest(None, name);
        } else {
            Some(Box::new(Stmt::Expr(self.parse_expression()?)))
        };
        self.expect(TokenKind::Semicolon, "`;`")?;

        let test = if self.at(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::Semicolon, "`;`")?;

        let update = if self.at(&TokenKind::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::RParen, "`)`")?;

        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn parse_for_in_rest(
        &mut self,
        kind: Option<DeclKind>,
        binding: String,
    ) -> ProvenanceResult<Stmt> {
        let object = self.parse_expression()?;
        self.expect(TokenKind::RParen, "`)`")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::ForIn {
            kind,
            binding,
            object,
            body,
        })
    }

    fn parse_try(&mut self) -> ProvenanceResult<Stmt> {
        self.next();
        let block = self.parse_block()?;
        if !self.eat_keyword("catch") {
            return Err(self.error("Expected `catch` after try block"));
        }
        let param = if self.eat(&TokenKind::LParen) {
            let name = self.expect_identifier()?;
            self.expect(TokenKind::RParen, "`)`")?;
            Some(name)
        } else {
            None
        };
        let handler = self.parse_block()?;
        Ok(Stmt::Try {
            block,
            param,
            handler,
        })
    }

    fn parse_function_rest(
        &mut self,
        name: Option<String>,
        loc: Option<SourceLocation>,
    ) -> ProvenanceResult<FunctionDef> {
        self.expect(TokenKind::LParen, "`(`")?;
        let mut params = Vec::new();
        while !self.at(&TokenKind::RParen) {
            params.push(self.expect_identifier()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "`)`")?;
        let body = self.parse_block()?;
        Ok(FunctionDef {
            name,
            params,
            body,
            loc,
        })
    }

    // ---- expressions ------------------------------------------------------------------

    fn parse_expression(&mut self) -> ProvenanceResult<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> ProvenanceResult<Expr> {
        self.nested(Self::parse_assignment_inner)
    }

    fn parse_assignment_inner(&mut self) -> ProvenanceResult<Expr> {
        let target = self.parse_conditional()?;
        let op = match self.peek().kind {
            TokenKind::Assign => AssignOp::Assign,
            TokenKind::PlusAssign => AssignOp::AddAssign,
            TokenKind::MinusAssign => AssignOp::SubAssign,
            TokenKind::StarAssign => AssignOp::MulAssign,
            TokenKind::SlashAssign => AssignOp::DivAssign,
            _ => return Ok(target),
        };
        if !matches!(target.kind, ExprKind::Identifier(_) | ExprKind::Member { .. }) {
            return Err(self.error("Invalid assignment target"));
        }
        self.next();
        let value = self.parse_assignment()?;
        let loc = target.loc;
        Ok(Expr::new(
            ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            loc,
        ))
    }

    fn parse_conditional(&mut self) -> ProvenanceResult<Expr> {
        let test = self.parse_logical_or()?;
        if !self.eat(&TokenKind::Question) {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect(TokenKind::Colon, "`:`")?;
        let alternate = self.parse_assignment()?;
        let loc = test.loc;
        Ok(Expr::new(
            ExprKind::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
            loc,
        ))
    }

    fn parse_logical_or(&mut self) -> ProvenanceResult<Expr> {
        self.parse_logical_level(LogicalOp::Or, TokenKind::OrOr, Self::parse_logical_and)
    }

    fn parse_logical_and(&mut self) -> ProvenanceResult<Expr> {
        self.parse_logical_level(LogicalOp::And, TokenKind::AndAnd, Self::parse_equality)
    }

    fn parse_logical_level(
        &mut self,
        op: LogicalOp,
        token: TokenKind,
        next_level: fn(&mut Self) -> ProvenanceResult<Expr>,
    ) -> ProvenanceResult<Expr> {
        let mut left = next_level(self)?;
        let mut chain = 0;
        while self.eat(&token) {
            self.enter()?;
            chain += 1;
            let right = next_level(self)?;
            let loc = left.loc;
            left = Expr::new(
                ExprKind::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                loc,
            );
        }
        self.leave(chain);
        Ok(left)
    }

    fn parse_binary_level(
        &mut self,
        ops: &[(TokenKind, BinaryOp)],
        next_level: fn(&mut Self) -> ProvenanceResult<Expr>,
    ) -> ProvenanceResult<Expr> {
        let mut left = next_level(self)?;
        let mut chain = 0;
        loop {
            let Some(op) = ops
                .iter()
                .find(|(tok, _)| self.at(tok))
                .map(|(_, op)| *op)
            else {
                break;
            };
            self.next();
            self.enter()?;
            chain += 1;
            let right = next_level(self)?;
            let loc = left.loc;
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                loc,
            );
        }
        self.leave(chain);
        Ok(left)
    }

    fn parse_equality(&mut self) -> ProvenanceResult<Expr> {
        self.parse_binary_level(
            &[
                (TokenKind::EqEqEq, BinaryOp::StrictEq),
                (TokenKind::NotEqEq, BinaryOp::StrictNe),
                (TokenKind::EqEq, BinaryOp::Eq),
                (TokenKind::NotEq, BinaryOp::Ne),
            ],
            Self::parse_relational,
        )
    }

    fn parse_relational(&mut self) -> ProvenanceResult<Expr> {
        self.parse_binary_level(
            &[
                (TokenKind::Lt, BinaryOp::Lt),
                (TokenKind::Le, BinaryOp::Le),
                (TokenKind::Gt, BinaryOp::Gt),
                (TokenKind::Ge, BinaryOp::Ge),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> ProvenanceResult<Expr> {
        self.parse_binary_level(
            &[(TokenKind::Plus, BinaryOp::Add), (TokenKind::Minus, BinaryOp::Sub)],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> ProvenanceResult<Expr> {
        self.parse_binary_level(
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Mod),
            ],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> ProvenanceResult<Expr> {
        let loc = self.loc();
        let op = match self.peek().kind {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Minus,
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Keyword("typeof") => UnaryOp::Typeof,
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let op = if self.next().kind == TokenKind::PlusPlus {
                    UpdateOp::Increment
                } else {
                    UpdateOp::Decrement
                };
                let argument = self.nested(Self::parse_unary)?;
                return self.make_update(op, true, argument, loc);
            }
            _ => return self.parse_postfix(),
        };
        self.next();
        let argument = self.nested(Self::parse_unary)?;
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                argument: Box::new(argument),
            },
            loc,
        ))
    }

    fn parse_postfix(&mut self) -> ProvenanceResult<Expr> {
        let expr = self.parse_call_member()?;
        if self.peek().newline_before {
            return Ok(expr);
        }
        let op = match self.peek().kind {
            TokenKind::PlusPlus => UpdateOp::Increment,
            TokenKind::MinusMinus => UpdateOp::Decrement,
            _ => return Ok(expr),
        };
        self.next();
        let loc = expr.loc;
        self.make_update(op, false, expr, loc)
    }

    fn make_update(
        &self,
        op: UpdateOp,
        prefix: bool,
        argument: Expr,
        loc: Option<SourceLocation>,
    ) -> ProvenanceResult<Expr> {
        if !matches!(argument.kind, ExprKind::Identifier(_) | ExprKind::Member { .. }) {
            return Err(self.error("Invalid update target"));
        }
        Ok(Expr::new(
            ExprKind::Update {
                op,
                prefix,
                argument: Box::new(argument),
            },
            loc,
        ))
    }

    fn parse_call_member(&mut self) -> ProvenanceResult<Expr> {
        let mut expr = self.parse_primary()?;
        let mut chain = 0;
        loop {
            let loc = expr.loc;
            if matches!(
                self.peek().kind,
                TokenKind::Dot | TokenKind::LBracket | TokenKind::LParen
            ) {
                self.enter()?;
                chain += 1;
            }
            match self.peek().kind {
                TokenKind::Dot => {
                    self.next();
                    let name = match self.next().kind {
                        TokenKind::Identifier(name) => name,
                        TokenKind::Keyword(keyword) => keyword.to_string(),
                        other => {
                            return Err(self.error(format!(
                                "Expected property name, found {}",
                                describe(&other)
                            )))
                        }
                    };
                    expr = Expr::new(
                        ExprKind::Member {
                            object: Box::new(expr),
                            property: MemberProperty::Named(name),
                        },
                        loc,
                    );
                }
                TokenKind::LBracket => {
                    self.next();
                    let property = self.parse_expression()?;
                    self.expect(TokenKind::RBracket, "`]`")?;
                    expr = Expr::new(
                        ExprKind::Member {
                            object: Box::new(expr),
                            property: MemberProperty::Computed(Box::new(property)),
                        },
                        loc,
                    );
                }
                TokenKind::LParen => {
                    self.next();
                    let arguments = self.parse_list(TokenKind::RParen, Self::parse_assignment)?;
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            arguments,
                        },
                        loc,
                    );
                }
                _ => {
                    self.leave(chain);
                    return Ok(expr);
                }
            }
        }
    }

    /// Comma separated items up to and including `close`; a trailing comma is allowed.
    fn parse_list<T>(
        &mut self,
        close: TokenKind,
        mut item: impl FnMut(&mut Self) -> ProvenanceResult<T>,
    ) -> ProvenanceResult<Vec<T>> {
        let mut items = Vec::new();
        while !self.at(&close) {
            items.push(item(self)?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(close, "closing delimiter")?;
        Ok(items)
    }

    fn parse_primary(&mut self) -> ProvenanceResult<Expr> {
        let loc = self.loc();
        let tok = self.next();
        let kind = match tok.kind {
            TokenKind::Number(n) => ExprKind::Number(n),
            TokenKind::String(s) => ExprKind::String(s),
            TokenKind::Identifier(name) => ExprKind::Identifier(name),
            TokenKind::Keyword("true") => ExprKind::Bool(true),
            TokenKind::Keyword("false") => ExprKind::Bool(false),
            TokenKind::Keyword("null") => ExprKind::Null,
            TokenKind::Keyword("undefined") => ExprKind::Undefined,
            TokenKind::Keyword("this") => ExprKind::This,
            TokenKind::Keyword("function") => {
                let name = match &self.peek().kind {
                    TokenKind::Identifier(_) => Some(self.expect_identifier()?),
                    _ => None,
                };
                ExprKind::Function(Rc::new(self.parse_function_rest(name, loc)?))
            }
            TokenKind::LParen => {
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RParen, "`)`")?;
                return Ok(inner);
            }
            TokenKind::LBracket => {
                ExprKind::Array(self.parse_list(TokenKind::RBracket, Self::parse_assignment)?)
            }
            TokenKind::LBrace => {
                ExprKind::Object(self.parse_list(TokenKind::RBrace, Self::parse_object_property)?)
            }
            TokenKind::Keyword("new") => {
                return Err(ProvenanceError::Parse(format!(
                    "`new` expressions are not supported at {}:{}",
                    tok.line, tok.col
                )))
            }
            other => {
                return Err(ProvenanceError::Parse(format!(
                    "Unexpected {} at {}:{}",
                    describe(&other),
                    tok.line,
                    tok.col
                )))
            }
        };
        Ok(Expr::new(kind, loc))
    }

    fn parse_property_key(&mut self) -> ProvenanceResult<(String, bool)> {
        let tok = self.next();
        match tok.kind {
            TokenKind::Identifier(name) => Ok((name, true)),
            TokenKind::Keyword(keyword) => Ok((keyword.to_string(), false)),
            TokenKind::String(s) => Ok((s, false)),
            TokenKind::Number(n) => Ok((format_number(n), false)),
            other => Err(ProvenanceError::Parse(format!(
                "Expected property key, found {} at {}:{}",
                describe(&other),
                tok.line,
                tok.col
            ))),
        }
    }

    fn parse_object_property(&mut self) -> ProvenanceResult<ObjectProperty> {
        let loc = self.loc();
        let (key, is_identifier) = self.parse_property_key()?;

        let is_accessor_prefix = is_identifier
            && (key == "get" || key == "set")
            && !matches!(
                self.peek().kind,
                TokenKind::Colon | TokenKind::LParen | TokenKind::Comma | TokenKind::RBrace
            );
        if is_accessor_prefix {
            let (name, _) = self.parse_property_key()?;
            let def = Rc::new(self.parse_function_rest(Some(name.clone()), loc)?);
            let value = if key == "get" {
                PropertyValue::Getter(def)
            } else {
                PropertyValue::Setter(def)
            };
            return Ok(ObjectProperty {
                key: name,
                value,
                loc,
            });
        }

        let value = match self.peek().kind {
            TokenKind::Colon => {
                self.next();
                PropertyValue::Init(self.parse_assignment()?)
            }
            TokenKind::LParen => {
                PropertyValue::Method(Rc::new(self.parse_function_rest(Some(key.clone()), loc)?))
            }
            TokenKind::Comma | TokenKind::RBrace if is_identifier => {
                PropertyValue::Init(Expr::new(ExprKind::Identifier(key.clone()), loc))
            }
            _ => {
                return Err(self.error(format!(
                    "Expected `:` after property key, found {}",
                    describe(&self.peek().kind)
                )))
            }
        };
        Ok(ObjectProperty { key, value, loc })
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Identifier(name) => format!("identifier `{name}`"),
        TokenKind::Number(n) => format!("number `{}`", format_number(*n)),
        TokenKind::String(s) => format!("string {s:?}"),
        TokenKind::Keyword(k) => format!("`{k}`"),
        TokenKind::Eof => "end of input".to_string(),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn expr(src: &str) -> Expr {
        let program = parse_program(src).unwrap();
        match program.body.into_iter().next() {
            Some(Stmt::Expr(e)) => e,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn binary_precedence_and_associativity() {
        let e = expr("1 - 2 - 3 * 4");
        let ExprKind::Binary { op, left, right } = e.kind else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Sub);
        assert!(matches!(left.kind, ExprKind::Binary { op: BinaryOp::Sub, .. }));
        assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn member_call_chains() {
        let e = expr("a.b[c](1, 2).d");
        let ExprKind::Member { object, property } = e.kind else {
            panic!("expected member");
        };
        assert_eq!(property, MemberProperty::Named("d".into()));
        let ExprKind::Call { callee, arguments } = object.kind else {
            panic!("expected call");
        };
        assert_eq!(arguments.len(), 2);
        assert!(matches!(
            callee.kind,
            ExprKind::Member { property: MemberProperty::Computed(_), .. }
        ));
    }

    #[test]
    fn object_literal_property_forms() {
        let e = expr("({a: 1, 'b c': 2, d, get e() { return 1 }, set e(v) {}, f() {}, get: 3})");
        let ExprKind::Object(props) = e.kind else {
            panic!("expected object");
        };
        let kinds: Vec<(&str, &str)> = props
            .iter()
            .map(|p| (p.key.as_str(), p.value.kind_str()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("a", "init"),
                ("b c", "init"),
                ("d", "init"),
                ("e", "get"),
                ("e", "set"),
                ("f", "method"),
                ("get", "init"),
            ]
        );
    }

    #[test]
    fn return_stops_at_newline() {
        let program = parse_program("function f() {\n  return\n  1\n}").unwrap();
        let Stmt::FunctionDecl(def) = &program.body[0] else {
            panic!("expected function");
        };
        assert_eq!(def.body.len(), 2);
        assert!(matches!(def.body[0], Stmt::Return { argument: None, .. }));
    }

    #[test]
    fn for_loops_and_for_in() {
        let program = parse_program(
            "for (var i = 0; i < 3; i++) {}\nfor (const k in obj) {}\nfor (k in obj) {}\nfor (;;) break;",
        )
        .unwrap();
        assert!(matches!(program.body[0], Stmt::For { init: Some(_), .. }));
        assert!(matches!(program.body[1], Stmt::ForIn { kind: Some(DeclKind::Const), .. }));
        assert!(matches!(program.body[2], Stmt::ForIn { kind: None, .. }));
        assert!(matches!(
            program.body[3],
            Stmt::For { init: None, test: None, update: None, .. }
        ));
    }

    #[test]
    fn records_source_locations() {
        let program = parse_program("var x = 1;\n  x = 'a' + x").unwrap();
        let Stmt::Expr(e) = &program.body[1] else {
            panic!("expected expression");
        };
        assert_eq!(e.loc, Some(SourceLocation::new(2, 3)));
    }

    #[test]
    fn rejects_invalid_input() {
        for src in ["1 = 2", "var", "a +", "{", "new Foo()", "const x;", "x y"] {
            assert!(
                matches!(parse_program(src), Err(ProvenanceError::Parse(_))),
                "expected parse error for {src:?}"
            );
        }
    }

    #[test]
    fn nesting_is_limited() {
        let chain = format!("var s = 'a'{};", " + 'a'".repeat(1000));
        let err = parse_program(&chain).unwrap_err();
        assert!(
            err.to_string().contains("Nesting exceeds the 64-level limit"),
            "{err}"
        );

        let parens = format!("{}1{};", "(".repeat(1000), ")".repeat(1000));
        assert!(matches!(parse_program(&parens), Err(ProvenanceError::Parse(_))));
        let negations = format!("{}x;", "!".repeat(1000));
        assert!(matches!(parse_program(&negations), Err(ProvenanceError::Parse(_))));
        let members = format!("o{};", ".p".repeat(1000));
        assert!(matches!(parse_program(&members), Err(ProvenanceError::Parse(_))));

        let short = format!("var s = 'a'{};", " + 'a'".repeat(40));
        assert!(parse_program(&short).is_ok());
    }
}
