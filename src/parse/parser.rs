//! Parser: token stream → AST
//!
//! Recursive descent with Pratt-style precedence climbing for
//! expressions. Binary precedence, low to high:
//! `|>`, `||`, `&&`, `??`, `== !=`, `< <= > >=`, `+ -`, `* / %`, `..`;
//! unary `! -` bind tighter than any binary, and the postfix chain
//! (member, index, call, and their `?.` variants) tighter still.

use crate::diagnostics::{Code, Diagnostic, Span};
use crate::parse::ast::*;
use crate::parse::tokens::{Keyword, Token, TokenKind};

/// Parse a token stream into a program
pub fn parse(tokens: Vec<Token>, path: Option<&str>) -> Result<Program, Diagnostic> {
    let mut parser = Parser { tokens, pos: 0, path };
    let program = parser.parse_program()?;
    log::debug!(
        "parsed program: {} import(s), {} top-level declaration(s)",
        program.imports.len(),
        program.body.len()
    );
    Ok(program)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    path: Option<&'a str>,
}

impl<'a> Parser<'a> {
    // --- cursor helpers ---

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].kind
    }

    fn span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    fn prev_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].span
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn at_kw(&self, kw: Keyword) -> bool {
        matches!(self.peek(), TokenKind::Keyword(k) if *k == kw)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        if self.at_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> Diagnostic {
        let mut d = Diagnostic::error(
            Code::ParseError,
            format!("expected {}, found {}", expected, self.peek().describe()),
            self.span(),
        );
        if let Some(p) = self.path {
            d = d.with_path(p);
        }
        d
    }

    fn expect(&mut self, kind: &TokenKind, expected: &str) -> Result<Token, Diagnostic> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_kw(&mut self, kw: Keyword, expected: &str) -> Result<(), Diagnostic> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_ident(&mut self, expected: &str) -> Result<String, Diagnostic> {
        match self.peek() {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn expect_str(&mut self, expected: &str) -> Result<String, Diagnostic> {
        match self.peek() {
            TokenKind::Str(text) => {
                let text = text.clone();
                self.advance();
                Ok(text)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn at_ident(&self, name: &str) -> bool {
        matches!(self.peek(), TokenKind::Ident(n) if n == name)
    }

    // --- program structure ---

    fn parse_program(&mut self) -> Result<Program, Diagnostic> {
        let mut imports = Vec::new();
        while self.at_kw(Keyword::Import) {
            imports.push(self.parse_import()?);
        }
        let mut body = Vec::new();
        while !self.at(&TokenKind::Eof) {
            body.push(self.parse_top_decl()?);
        }
        Ok(Program { imports, body })
    }

    fn parse_import(&mut self) -> Result<ImportDecl, Diagnostic> {
        let start = self.span();
        self.expect_kw(Keyword::Import, "`import`")?;
        self.expect(&TokenKind::LBrace, "`{` after `import`")?;
        let mut names = Vec::new();
        loop {
            let name = self.expect_ident("imported name")?;
            let alias = if self.eat_kw(Keyword::As) {
                Some(self.expect_ident("alias after `as`")?)
            } else {
                None
            };
            names.push((name, alias));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace, "`}` after import list")?;
        self.expect_kw(Keyword::From, "`from`")?;
        let from = self.expect_str("module path string")?;
        self.expect(&TokenKind::Semi, "`;` after import")?;
        Ok(ImportDecl { names, from, span: start.join(self.prev_span()) })
    }

    fn parse_top_decl(&mut self) -> Result<TopDecl, Diagnostic> {
        let start = self.span();
        let exported = self.eat_kw(Keyword::Export);
        let kind = if self.at_kw(Keyword::Fn) {
            TopDeclKind::Fn(self.parse_fn_decl()?)
        } else if self.at_kw(Keyword::Const) {
            self.advance();
            let target = self.parse_decl_target()?;
            self.expect(&TokenKind::Assign, "`=` in const declaration")?;
            let init = self.parse_expr()?;
            self.expect(&TokenKind::Semi, "`;` after declaration")?;
            TopDeclKind::Const(ConstDecl { target, init })
        } else if self.at_kw(Keyword::Type) {
            self.advance();
            let name = self.expect_ident("type alias name")?;
            self.expect(&TokenKind::Assign, "`=` in type alias")?;
            let aliased = self.parse_type_expr()?;
            self.expect(&TokenKind::Semi, "`;` after type alias")?;
            TopDeclKind::TypeAlias(TypeAliasDecl { name, aliased })
        } else if self.at_kw(Keyword::Enum) {
            self.advance();
            let name = self.expect_ident("enum name")?;
            self.expect(&TokenKind::LBrace, "`{` after enum name")?;
            let mut variants = Vec::new();
            while !self.at(&TokenKind::RBrace) {
                let vname = self.expect_ident("enum variant")?;
                let value = if self.eat(&TokenKind::Assign) {
                    match self.peek().clone() {
                        TokenKind::Int(v) => {
                            self.advance();
                            Some(v)
                        }
                        _ => return Err(self.unexpected("integer variant value")),
                    }
                } else {
                    None
                };
                variants.push((vname, value));
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RBrace, "`}` after enum variants")?;
            TopDeclKind::Enum(EnumDecl { name, variants })
        } else {
            return Err(self.unexpected("a top-level declaration (`fn`, `const`, `type`, `enum`)"));
        };
        Ok(TopDecl { kind, exported, span: start.join(self.prev_span()) })
    }

    fn parse_fn_decl(&mut self) -> Result<FnDecl, Diagnostic> {
        self.expect_kw(Keyword::Fn, "`fn`")?;
        let name = self.expect_ident("function name")?;
        self.expect(&TokenKind::LParen, "`(` after function name")?;
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        Ok(FnDecl { name, params, body })
    }

    /// Parameter list after `(`, consuming the closing `)`
    fn parse_params(&mut self) -> Result<Vec<Param>, Diagnostic> {
        let mut params = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok(params);
        }
        loop {
            let span = self.span();
            let name = self.expect_ident("parameter name")?;
            let default = if self.eat(&TokenKind::Assign) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            params.push(Param { name, default, span });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "`)` after parameters")?;
        Ok(params)
    }

    fn parse_decl_target(&mut self) -> Result<DeclTarget, Diagnostic> {
        if self.eat(&TokenKind::LParen) {
            let mut elements = Vec::new();
            let mut rest = None;
            loop {
                if self.eat(&TokenKind::Ellipsis) {
                    rest = Some(self.expect_ident("rest binding name")?);
                    // a rest pattern must close the tuple
                    if self.at(&TokenKind::Comma) {
                        return Err(self
                            .unexpected("`)` after rest binding")
                            .with_help("`...rest` must be the last element of the pattern"));
                    }
                    break;
                }
                elements.push(self.expect_ident("binding name")?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen, "`)` after destructuring pattern")?;
            Ok(DeclTarget::Tuple { elements, rest })
        } else {
            Ok(DeclTarget::Name(self.expect_ident("binding name")?))
        }
    }

    fn parse_type_expr(&mut self) -> Result<TypeExpr, Diagnostic> {
        let mut parts = vec![self.parse_type_atom()?];
        while self.eat(&TokenKind::Bar) {
            parts.push(self.parse_type_atom()?);
        }
        if parts.len() == 1 {
            Ok(parts.pop().expect("nonempty"))
        } else {
            Ok(TypeExpr::Union(parts))
        }
    }

    fn parse_type_atom(&mut self) -> Result<TypeExpr, Diagnostic> {
        let mut atom = if self.eat(&TokenKind::LParen) {
            let mut items = vec![self.parse_type_expr()?];
            while self.eat(&TokenKind::Comma) {
                items.push(self.parse_type_expr()?);
            }
            self.expect(&TokenKind::RParen, "`)` in type expression")?;
            if items.len() == 1 {
                items.pop().expect("nonempty")
            } else {
                TypeExpr::Tuple(items)
            }
        } else {
            TypeExpr::Name(self.expect_ident("type name")?)
        };
        while self.eat(&TokenKind::LBracket) {
            self.expect(&TokenKind::RBracket, "`]` in array type")?;
            atom = TypeExpr::Array(Box::new(atom));
        }
        Ok(atom)
    }

    // --- statements ---

    fn parse_block(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        self.expect(&TokenKind::LBrace, "`{`")?;
        let mut stmts = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            if self.at(&TokenKind::Eof) {
                return Err(self.unexpected("`}`"));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.advance();
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.span();
        if self.at_kw(Keyword::Const) || self.at_kw(Keyword::Let) {
            let mutable = self.at_kw(Keyword::Let);
            self.advance();
            let target = self.parse_decl_target()?;
            self.expect(&TokenKind::Assign, "`=` in declaration")?;
            let init = self.parse_expr()?;
            self.expect(&TokenKind::Semi, "`;` after declaration")?;
            return Ok(Stmt::new(
                StmtKind::Decl { mutable, target, init },
                start.join(self.prev_span()),
            ));
        }
        if self.at_kw(Keyword::If) {
            return self.parse_if(start);
        }
        if self.at_kw(Keyword::For) {
            self.advance();
            let parens = self.eat(&TokenKind::LParen);
            let var = self.expect_ident("loop variable")?;
            self.expect_kw(Keyword::In, "`in`")?;
            let iterable = self.parse_expr()?;
            if parens {
                self.expect(&TokenKind::RParen, "`)` after loop header")?;
            }
            let body = self.parse_block()?;
            return Ok(Stmt::new(
                StmtKind::ForIn { var, iterable, body },
                start.join(self.prev_span()),
            ));
        }
        if self.at_kw(Keyword::While) {
            self.advance();
            let cond = self.parse_expr()?;
            let body = self.parse_block()?;
            return Ok(Stmt::new(StmtKind::While { cond, body }, start.join(self.prev_span())));
        }
        if self.at_kw(Keyword::Return) {
            self.advance();
            let value = if self.at(&TokenKind::Semi) {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.expect(&TokenKind::Semi, "`;` after return")?;
            return Ok(Stmt::new(StmtKind::Return(value), start.join(self.prev_span())));
        }
        if self.at_kw(Keyword::Break) {
            self.advance();
            self.expect(&TokenKind::Semi, "`;` after break")?;
            return Ok(Stmt::new(StmtKind::Break, start.join(self.prev_span())));
        }
        if self.at_kw(Keyword::Continue) {
            self.advance();
            self.expect(&TokenKind::Semi, "`;` after continue")?;
            return Ok(Stmt::new(StmtKind::Continue, start.join(self.prev_span())));
        }

        // `triplet(n){…}` / `tuplet(n, inTime){…}` open a tuplet context;
        // recognized by the block after the argument list
        if (self.at_ident("triplet") || self.at_ident("tuplet")) && self.tuplet_block_ahead() {
            return self.parse_tuplet(start);
        }

        let expr = self.parse_expr()?;
        if self.eat(&TokenKind::Assign) {
            match expr.kind {
                ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::Index { .. } => {}
                _ => {
                    return Err(Diagnostic::error(
                        Code::ParseError,
                        "invalid assignment target",
                        expr.span,
                    )
                    .with_help("only a name, member, or index can be assigned to"));
                }
            }
            let value = self.parse_expr()?;
            self.expect(&TokenKind::Semi, "`;` after assignment")?;
            return Ok(Stmt::new(
                StmtKind::Assign { target: expr, value },
                start.join(self.prev_span()),
            ));
        }
        self.expect(&TokenKind::Semi, "`;` after expression")?;
        Ok(Stmt::new(StmtKind::Expr(expr), start.join(self.prev_span())))
    }

    fn parse_if(&mut self, start: Span) -> Result<Stmt, Diagnostic> {
        self.expect_kw(Keyword::If, "`if`")?;
        let cond = self.parse_expr()?;
        let then_block = self.parse_block()?;
        let else_block = if self.eat_kw(Keyword::Else) {
            if self.at_kw(Keyword::If) {
                let nested_start = self.span();
                Some(vec![self.parse_if(nested_start)?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::new(
            StmtKind::If { cond, then_block, else_block },
            start.join(self.prev_span()),
        ))
    }

    /// After `triplet`/`tuplet`, does a `(`…`)` argument list followed by
    /// `{` lie ahead?
    fn tuplet_block_ahead(&self) -> bool {
        if *self.peek_at(1) != TokenKind::LParen {
            return false;
        }
        let mut depth = 0usize;
        let mut offset = 1;
        loop {
            match self.peek_at(offset) {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return *self.peek_at(offset + 1) == TokenKind::LBrace;
                    }
                }
                TokenKind::Eof => return false,
                _ => {}
            }
            offset += 1;
        }
    }

    fn parse_tuplet(&mut self, start: Span) -> Result<Stmt, Diagnostic> {
        self.advance(); // `triplet` or `tuplet`
        self.expect(&TokenKind::LParen, "`(`")?;
        let actual = self.parse_expr()?;
        let in_time = if self.eat(&TokenKind::Comma) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect(&TokenKind::RParen, "`)` after tuplet arguments")?;
        let body = self.parse_block()?;
        Ok(Stmt::new(
            StmtKind::Tuplet { actual, in_time, body },
            start.join(self.prev_span()),
        ))
    }

    // --- expressions ---

    fn parse_expr(&mut self) -> Result<Expr, Diagnostic> {
        if let Some(expr) = self.try_parse_arrow()? {
            return Ok(expr);
        }
        let start = self.span();
        let cond = self.parse_binary(0)?;
        if self.eat(&TokenKind::Question) {
            let then = self.parse_expr()?;
            self.expect(&TokenKind::Colon, "`:` in conditional expression")?;
            let otherwise = self.parse_expr()?;
            return Ok(Expr::new(
                ExprKind::Conditional {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    otherwise: Box::new(otherwise),
                },
                start.join(self.prev_span()),
            ));
        }
        Ok(cond)
    }

    /// Arrow functions need lookahead: `x => …` or `(a, b = 1) => …`
    fn try_parse_arrow(&mut self) -> Result<Option<Expr>, Diagnostic> {
        let start = self.span();
        let is_arrow = match self.peek() {
            TokenKind::Ident(_) => *self.peek_at(1) == TokenKind::FatArrow,
            TokenKind::LParen => {
                let mut depth = 0usize;
                let mut offset = 0;
                loop {
                    match self.peek_at(offset) {
                        TokenKind::LParen => depth += 1,
                        TokenKind::RParen => {
                            depth -= 1;
                            if depth == 0 {
                                break *self.peek_at(offset + 1) == TokenKind::FatArrow;
                            }
                        }
                        TokenKind::Eof => break false,
                        _ => {}
                    }
                    offset += 1;
                }
            }
            _ => false,
        };
        if !is_arrow {
            return Ok(None);
        }

        let params = if self.at(&TokenKind::LParen) {
            self.advance();
            self.parse_params()?
        } else {
            let span = self.span();
            let name = self.expect_ident("parameter name")?;
            vec![Param { name, default: None, span }]
        };
        self.expect(&TokenKind::FatArrow, "`=>`")?;
        let body = if self.at(&TokenKind::LBrace) {
            ArrowBody::Block(self.parse_block()?)
        } else {
            ArrowBody::Expr(Box::new(self.parse_expr()?))
        };
        Ok(Some(Expr::new(
            ExprKind::Arrow { params, body },
            start.join(self.prev_span()),
        )))
    }

    fn parse_binary(&mut self, min_bp: u8) -> Result<Expr, Diagnostic> {
        let start = self.span();
        let mut lhs = self.parse_unary()?;
        loop {
            let (op, bp) = match self.peek() {
                TokenKind::Pipe => (BinaryOp::Pipe, 1),
                TokenKind::OrOr => (BinaryOp::Or, 2),
                TokenKind::AndAnd => (BinaryOp::And, 3),
                TokenKind::Coalesce => (BinaryOp::Coalesce, 4),
                TokenKind::EqEq => (BinaryOp::Eq, 5),
                TokenKind::NotEq => (BinaryOp::Ne, 5),
                TokenKind::Lt => (BinaryOp::Lt, 6),
                TokenKind::Le => (BinaryOp::Le, 6),
                TokenKind::Gt => (BinaryOp::Gt, 6),
                TokenKind::Ge => (BinaryOp::Ge, 6),
                TokenKind::Plus => (BinaryOp::Add, 7),
                TokenKind::Minus => (BinaryOp::Sub, 7),
                TokenKind::Star => (BinaryOp::Mul, 8),
                TokenKind::Slash => (BinaryOp::Div, 8),
                TokenKind::Percent => (BinaryOp::Rem, 8),
                TokenKind::DotDot => (BinaryOp::Range, 9),
                _ => break,
            };
            if bp < min_bp {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(bp + 1)?;
            lhs = Expr::new(
                ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                start.join(self.prev_span()),
            );
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        let start = self.span();
        if self.eat(&TokenKind::Bang) {
            let operand = self.parse_unary()?;
            return Ok(Expr::new(
                ExprKind::Unary { op: UnaryOp::Not, operand: Box::new(operand) },
                start.join(self.prev_span()),
            ));
        }
        if self.eat(&TokenKind::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::new(
                ExprKind::Unary { op: UnaryOp::Neg, operand: Box::new(operand) },
                start.join(self.prev_span()),
            ));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, Diagnostic> {
        let start = self.span();
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&TokenKind::Dot) {
                let name = self.expect_ident("member name after `.`")?;
                expr = Expr::new(
                    ExprKind::Member { recv: Box::new(expr), name, optional: false },
                    start.join(self.prev_span()),
                );
            } else if self.eat(&TokenKind::QuestionDot) {
                if self.eat(&TokenKind::LBracket) {
                    let index = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket, "`]` after index")?;
                    expr = Expr::new(
                        ExprKind::Index {
                            recv: Box::new(expr),
                            index: Box::new(index),
                            optional: true,
                        },
                        start.join(self.prev_span()),
                    );
                } else {
                    let name = self.expect_ident("member name after `?.`")?;
                    expr = Expr::new(
                        ExprKind::Member { recv: Box::new(expr), name, optional: true },
                        start.join(self.prev_span()),
                    );
                }
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.parse_expr()?;
                self.expect(&TokenKind::RBracket, "`]` after index")?;
                expr = Expr::new(
                    ExprKind::Index {
                        recv: Box::new(expr),
                        index: Box::new(index),
                        optional: false,
                    },
                    start.join(self.prev_span()),
                );
            } else if self.eat(&TokenKind::LParen) {
                let mut args = Vec::new();
                if !self.at(&TokenKind::RParen) {
                    loop {
                        args.push(self.parse_expr()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen, "`)` after arguments")?;
                expr = Expr::new(
                    ExprKind::Call { callee: Box::new(expr), args },
                    start.join(self.prev_span()),
                );
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let start = self.span();
        let kind = match self.peek().clone() {
            TokenKind::Int(v) => {
                self.advance();
                ExprKind::Int(v)
            }
            TokenKind::Float(v) => {
                self.advance();
                ExprKind::Float(v)
            }
            TokenKind::Bpm(v) => {
                self.advance();
                ExprKind::Bpm(v)
            }
            TokenKind::Str(s) => {
                self.advance();
                ExprKind::Str(s)
            }
            TokenKind::Pitch(key) => {
                self.advance();
                ExprKind::Pitch(key)
            }
            TokenKind::Dur { den, dots } => {
                self.advance();
                ExprKind::Dur { num: 1, den, dots }
            }
            TokenKind::PosRef { bar, beat } => {
                self.advance();
                ExprKind::PosRef { bar, beat }
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                ExprKind::Null
            }
            TokenKind::Ident(name) => {
                self.advance();
                ExprKind::Ident(name)
            }
            TokenKind::TemplateHead(head) => {
                self.advance();
                return self.parse_template(start, head);
            }
            TokenKind::LParen => {
                self.advance();
                let first = self.parse_expr()?;
                if self.eat(&TokenKind::Comma) {
                    let mut items = vec![first];
                    if !self.at(&TokenKind::RParen) {
                        loop {
                            items.push(self.parse_expr()?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(&TokenKind::RParen, "`)` after tuple elements")?;
                    ExprKind::Tuple(items)
                } else {
                    self.expect(&TokenKind::RParen, "`)` after expression")?;
                    return Ok(first);
                }
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.at(&TokenKind::RBracket) {
                    if self.eat(&TokenKind::Ellipsis) {
                        items.push(ArrayItem::Spread(self.parse_expr()?));
                    } else {
                        items.push(ArrayItem::Item(self.parse_expr()?));
                    }
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket, "`]` after array elements")?;
                ExprKind::Array(items)
            }
            TokenKind::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                while !self.at(&TokenKind::RBrace) {
                    if self.eat(&TokenKind::Ellipsis) {
                        entries.push(ObjectEntry::Spread(self.parse_expr()?));
                    } else {
                        let key = match self.peek().clone() {
                            TokenKind::Ident(name) => {
                                self.advance();
                                name
                            }
                            TokenKind::Str(text) => {
                                self.advance();
                                text
                            }
                            _ => return Err(self.unexpected("object key")),
                        };
                        self.expect(&TokenKind::Colon, "`:` after object key")?;
                        let value = self.parse_expr()?;
                        entries.push(ObjectEntry::Field { key, value });
                    }
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBrace, "`}` after object entries")?;
                ExprKind::Object(entries)
            }
            TokenKind::Keyword(Keyword::Match) => {
                self.advance();
                return self.parse_match(start);
            }
            TokenKind::Keyword(Keyword::Score) => {
                self.advance();
                self.expect(&TokenKind::LBrace, "`{` after `score`")?;
                let mut items = Vec::new();
                while !self.at(&TokenKind::RBrace) {
                    if self.at(&TokenKind::Eof) {
                        return Err(self.unexpected("`}` closing the score block"));
                    }
                    items.push(self.parse_score_item()?);
                }
                self.advance();
                ExprKind::Score(items)
            }
            TokenKind::Keyword(Keyword::Clip) => {
                self.advance();
                let body = self.parse_block()?;
                ExprKind::Clip(body)
            }
            _ => return Err(self.unexpected("expression")),
        };
        Ok(Expr::new(kind, start.join(self.prev_span())))
    }

    fn parse_template(&mut self, start: Span, head: String) -> Result<Expr, Diagnostic> {
        let mut parts = vec![TemplatePart::Text(head)];
        loop {
            parts.push(TemplatePart::Expr(self.parse_expr()?));
            match self.peek().clone() {
                TokenKind::TemplateMiddle(text) => {
                    self.advance();
                    parts.push(TemplatePart::Text(text));
                }
                TokenKind::TemplateTail(text) => {
                    self.advance();
                    parts.push(TemplatePart::Text(text));
                    break;
                }
                _ => return Err(self.unexpected("`}` continuing the template literal")),
            }
        }
        Ok(Expr::new(ExprKind::Template(parts), start.join(self.prev_span())))
    }

    fn parse_match(&mut self, start: Span) -> Result<Expr, Diagnostic> {
        self.expect(&TokenKind::LParen, "`(` after `match`")?;
        let scrutinee = self.parse_expr()?;
        self.expect(&TokenKind::RParen, "`)` after match scrutinee")?;
        self.expect(&TokenKind::LBrace, "`{` opening match arms")?;
        let mut arms = Vec::new();
        let mut default = None;
        while !self.at(&TokenKind::RBrace) {
            if self.eat_kw(Keyword::Else) {
                self.expect(&TokenKind::Arrow, "`->` after `else`")?;
                default = Some(Box::new(self.parse_expr()?));
                self.eat(&TokenKind::Semi);
                continue;
            }
            let arm_start = self.span();
            let pattern = self.parse_pattern()?;
            let guard = if self.eat_kw(Keyword::If) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            self.expect(&TokenKind::Arrow, "`->` after match pattern")?;
            let value = self.parse_expr()?;
            self.eat(&TokenKind::Semi);
            arms.push(MatchArm { pattern, guard, value, span: arm_start.join(self.prev_span()) });
        }
        self.advance();
        Ok(Expr::new(
            ExprKind::Match { scrutinee: Box::new(scrutinee), arms, default },
            start.join(self.prev_span()),
        ))
    }

    fn parse_pattern(&mut self) -> Result<Pattern, Diagnostic> {
        let pattern = match self.peek().clone() {
            TokenKind::Int(v) => {
                self.advance();
                Pattern::Int(v)
            }
            TokenKind::Float(v) => {
                self.advance();
                Pattern::Float(v)
            }
            TokenKind::Minus => {
                self.advance();
                match self.peek().clone() {
                    TokenKind::Int(v) => {
                        self.advance();
                        Pattern::Int(-v)
                    }
                    TokenKind::Float(v) => {
                        self.advance();
                        Pattern::Float(-v)
                    }
                    _ => return Err(self.unexpected("number after `-` in pattern")),
                }
            }
            TokenKind::Str(s) => {
                self.advance();
                Pattern::Str(s)
            }
            TokenKind::Pitch(key) => {
                self.advance();
                Pattern::Pitch(key)
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Pattern::Bool(true)
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Pattern::Bool(false)
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Pattern::Null
            }
            TokenKind::Ident(name) => {
                self.advance();
                if name == "_" {
                    Pattern::Wildcard
                } else {
                    Pattern::Binding(name)
                }
            }
            TokenKind::LParen => {
                self.advance();
                let mut items = vec![self.parse_pattern()?];
                while self.eat(&TokenKind::Comma) {
                    items.push(self.parse_pattern()?);
                }
                self.expect(&TokenKind::RParen, "`)` after tuple pattern")?;
                Pattern::Tuple(items)
            }
            _ => return Err(self.unexpected("pattern")),
        };
        Ok(pattern)
    }

    // --- score blocks ---

    fn parse_score_item(&mut self) -> Result<ScoreItem, Diagnostic> {
        let start = self.span();
        let kind = if self.eat_kw(Keyword::Meta) {
            ScoreItemKind::Meta(self.parse_field_block()?)
        } else if self.eat_kw(Keyword::Tempo) {
            self.expect(&TokenKind::LBrace, "`{` after `tempo`")?;
            let mut specs = Vec::new();
            while !self.at(&TokenKind::RBrace) {
                specs.push(self.parse_tempo_spec()?);
            }
            self.advance();
            ScoreItemKind::Tempo(specs)
        } else if self.eat_kw(Keyword::Meter) {
            self.expect(&TokenKind::LBrace, "`{` after `meter`")?;
            let mut specs = Vec::new();
            while !self.at(&TokenKind::RBrace) {
                specs.push(self.parse_meter_spec()?);
            }
            self.advance();
            ScoreItemKind::Meter(specs)
        } else if self.eat_kw(Keyword::Sound) {
            let id = self.expect_str("sound id string")?;
            self.expect_kw(Keyword::Kind, "`kind`")?;
            let kind_name = self.expect_ident("sound kind")?;
            let fields = self.parse_field_block()?;
            ScoreItemKind::Sound { id, kind: kind_name, fields }
        } else if self.eat_kw(Keyword::Track) {
            let name = self.expect_str("track name string")?;
            self.expect_kw(Keyword::Role, "`role`")?;
            let role = self.expect_ident("track role")?;
            self.expect_kw(Keyword::Sound, "`sound`")?;
            let sound = self.expect_str("sound id string")?;
            self.expect(&TokenKind::LBrace, "`{` opening the track body")?;
            let mut body = Vec::new();
            while !self.at(&TokenKind::RBrace) {
                if self.at(&TokenKind::Eof) {
                    return Err(self.unexpected("`}` closing the track body"));
                }
                if self.at_kw(Keyword::Place) {
                    let item_start = self.span();
                    self.advance();
                    let at = self.parse_expr()?;
                    self.eat(&TokenKind::Comma);
                    let clip = self.parse_expr()?;
                    self.expect(&TokenKind::Semi, "`;` after place")?;
                    body.push(TrackItem::Place { at, clip, span: item_start.join(self.prev_span()) });
                } else {
                    body.push(TrackItem::Stmt(self.parse_stmt()?));
                }
            }
            self.advance();
            ScoreItemKind::Track { name, role, sound, body }
        } else if self.at_ident("marker") {
            self.advance();
            self.expect(&TokenKind::LParen, "`(` after `marker`")?;
            let mut args = Vec::new();
            if !self.at(&TokenKind::RParen) {
                loop {
                    args.push(self.parse_expr()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RParen, "`)` after marker arguments")?;
            self.expect(&TokenKind::Semi, "`;` after marker")?;
            ScoreItemKind::Marker { args }
        } else {
            return Err(self.unexpected(
                "a score item (`meta`, `tempo`, `meter`, `sound`, `track`, or `marker`)",
            ));
        };
        Ok(ScoreItem { kind, span: start.join(self.prev_span()) })
    }

    /// `{ key: expr; … }` blocks used by `meta` and `sound`
    fn parse_field_block(&mut self) -> Result<Vec<(String, Expr)>, Diagnostic> {
        self.expect(&TokenKind::LBrace, "`{`")?;
        let mut fields = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let key = match self.peek().clone() {
                TokenKind::Ident(name) => {
                    self.advance();
                    name
                }
                TokenKind::Str(text) => {
                    self.advance();
                    text
                }
                _ => return Err(self.unexpected("field name")),
            };
            self.expect(&TokenKind::Colon, "`:` after field name")?;
            let value = self.parse_expr()?;
            if !self.eat(&TokenKind::Semi) && !self.eat(&TokenKind::Comma) {
                return Err(self.unexpected("`;` after field"));
            }
            fields.push((key, value));
        }
        self.advance();
        Ok(fields)
    }

    fn parse_tempo_spec(&mut self) -> Result<TempoSpec, Diagnostic> {
        let start = self.span();
        let at = self.parse_expr()?;
        self.expect(&TokenKind::Arrow, "`->` in tempo entry")?;
        let first = self.parse_expr()?;
        let target = if self.at_ident("ramp") || self.at_ident("ease") {
            let curve = if self.at_ident("ramp") {
                RampCurve::Ramp
            } else {
                RampCurve::Ease
            };
            self.advance();
            let bpm = self.parse_expr()?;
            TempoTarget::Ramp { end: first, curve, bpm }
        } else {
            let unit = if self.at_ident("at") {
                self.advance();
                Some(self.parse_expr()?)
            } else {
                None
            };
            TempoTarget::Set { bpm: first, unit }
        };
        self.expect(&TokenKind::Semi, "`;` after tempo entry")?;
        Ok(TempoSpec { at, target, span: start.join(self.prev_span()) })
    }

    fn parse_meter_spec(&mut self) -> Result<MeterSpec, Diagnostic> {
        let start = self.span();
        let at = self.parse_expr()?;
        self.expect(&TokenKind::Arrow, "`->` in meter entry")?;
        let numerator = match self.peek().clone() {
            TokenKind::Int(v) if v > 0 => {
                self.advance();
                v as u32
            }
            _ => return Err(self.unexpected("meter numerator")),
        };
        self.expect(&TokenKind::Slash, "`/` in meter fraction")?;
        let denominator = match self.peek().clone() {
            TokenKind::Int(v) if v > 0 => {
                self.advance();
                v as u32
            }
            _ => return Err(self.unexpected("meter denominator")),
        };
        self.expect(&TokenKind::Semi, "`;` after meter entry")?;
        Ok(MeterSpec { at, numerator, denominator, span: start.join(self.prev_span()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::lexer::tokenize;

    fn parse_source(source: &str) -> Program {
        let (tokens, _) = tokenize(source, None).unwrap();
        parse(tokens, None).unwrap()
    }

    fn parse_err(source: &str) -> Diagnostic {
        let (tokens, _) = tokenize(source, None).unwrap();
        parse(tokens, None).unwrap_err()
    }

    fn first_const_init(program: &Program) -> &Expr {
        match &program.body[0].kind {
            TopDeclKind::Const(decl) => &decl.init,
            other => panic!("expected const, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let program = parse_source("const a = 1 + 2 * 3;");
        let init = first_const_init(&program);
        match &init.kind {
            ExprKind::Binary { op: BinaryOp::Add, rhs, .. } => {
                assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("expected +, got {:?}", other),
        }
    }

    #[test]
    fn test_range_binds_tighter_than_mul() {
        let program = parse_source("const a = 2 * 1..4;");
        let init = first_const_init(&program);
        match &init.kind {
            ExprKind::Binary { op: BinaryOp::Mul, rhs, .. } => {
                assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Range, .. }));
            }
            other => panic!("expected *, got {:?}", other),
        }
    }

    #[test]
    fn test_pipe_is_loosest() {
        let program = parse_source("const a = 1 + 2 |> f;");
        let init = first_const_init(&program);
        assert!(matches!(init.kind, ExprKind::Binary { op: BinaryOp::Pipe, .. }));
    }

    #[test]
    fn test_postfix_chain_and_optional() {
        let program = parse_source("const a = obj?.items[0](1, 2);");
        let init = first_const_init(&program);
        match &init.kind {
            ExprKind::Call { callee, args } => {
                assert_eq!(args.len(), 2);
                assert!(matches!(callee.kind, ExprKind::Index { .. }));
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_tuple_vs_group() {
        let program = parse_source("const a = (1, 2, 3);");
        assert!(matches!(first_const_init(&program).kind, ExprKind::Tuple(ref items) if items.len() == 3));
        let program = parse_source("const a = (1);");
        assert!(matches!(first_const_init(&program).kind, ExprKind::Int(1)));
    }

    #[test]
    fn test_array_spread() {
        let program = parse_source("const a = [1, ...rest, 2];");
        match &first_const_init(&program).kind {
            ExprKind::Array(items) => {
                assert!(matches!(items[1], ArrayItem::Spread(_)));
            }
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn test_object_literal_keys() {
        let program = parse_source(r#"const a = {vel: 100, "with space": 1, ...base};"#);
        match &first_const_init(&program).kind {
            ExprKind::Object(entries) => {
                assert_eq!(entries.len(), 3);
                assert!(matches!(entries[2], ObjectEntry::Spread(_)));
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn test_arrow_functions() {
        let program = parse_source("const f = n => n * 2;");
        assert!(matches!(first_const_init(&program).kind, ExprKind::Arrow { .. }));
        let program = parse_source("const f = (a, b = 3) => { return a + b; };");
        match &first_const_init(&program).kind {
            ExprKind::Arrow { params, body } => {
                assert_eq!(params.len(), 2);
                assert!(params[1].default.is_some());
                assert!(matches!(body, ArrowBody::Block(_)));
            }
            other => panic!("expected arrow, got {:?}", other),
        }
    }

    #[test]
    fn test_match_expression() {
        let program = parse_source(
            "const a = match(n) { 0 -> \"zero\"; m if m < 0 -> \"neg\"; else -> \"pos\"; };",
        );
        match &first_const_init(&program).kind {
            ExprKind::Match { arms, default, .. } => {
                assert_eq!(arms.len(), 2);
                assert!(matches!(arms[0].pattern, Pattern::Int(0)));
                assert!(arms[1].guard.is_some());
                assert!(default.is_some());
            }
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[test]
    fn test_template_expression() {
        let program = parse_source("const a = `n=${n}!`;");
        match &first_const_init(&program).kind {
            ExprKind::Template(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected template, got {:?}", other),
        }
    }

    #[test]
    fn test_destructuring_with_rest() {
        let program = parse_source("const (a, b, ...rest) = items;");
        match &program.body[0].kind {
            TopDeclKind::Const(decl) => match &decl.target {
                DeclTarget::Tuple { elements, rest } => {
                    assert_eq!(elements.len(), 2);
                    assert_eq!(rest.as_deref(), Some("rest"));
                }
                other => panic!("expected tuple target, got {:?}", other),
            },
            other => panic!("expected const, got {:?}", other),
        }
    }

    #[test]
    fn test_rest_must_be_last() {
        let err = parse_err("const (...rest, a) = items;");
        assert_eq!(err.code, Code::ParseError);
    }

    #[test]
    fn test_fn_and_control_flow() {
        let program = parse_source(
            "fn f(n) { let acc = 0; for i in 0..n { if i % 2 == 0 { acc = acc + i; } else { continue; } } return acc; }",
        );
        match &program.body[0].kind {
            TopDeclKind::Fn(decl) => {
                assert_eq!(decl.name, "f");
                assert_eq!(decl.body.len(), 3);
            }
            other => panic!("expected fn, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_assignment_target() {
        let err = parse_err("fn f() { 1 + 2 = 3; }");
        assert!(err.message.contains("assignment target"));
    }

    #[test]
    fn test_enum_and_type_alias() {
        let program = parse_source("type Id = int | string; enum Dir { Up, Down = 5 }");
        assert!(matches!(program.body[0].kind, TopDeclKind::TypeAlias(_)));
        match &program.body[1].kind {
            TopDeclKind::Enum(decl) => {
                assert_eq!(decl.variants[1], ("Down".to_string(), Some(5)));
            }
            other => panic!("expected enum, got {:?}", other),
        }
    }

    #[test]
    fn test_import() {
        let program = parse_source(r#"import { riff, bass as low } from "lib/patterns"; const a = 1;"#);
        assert_eq!(program.imports.len(), 1);
        assert_eq!(program.imports[0].names[1].1.as_deref(), Some("low"));
    }

    #[test]
    fn test_score_block() {
        let program = parse_source(
            r#"const song = score {
                meta { title: "Demo"; ppq: 480; }
                tempo { 1:1 -> 120bpm; 5:1 -> 9:1 ramp 90bpm; }
                meter { 1:1 -> 4/4; 9:1 -> 3/4; }
                sound "piano" kind synth { program: 0; }
                track "lead" role melody sound "piano" {
                    place 1:1, intro;
                }
                marker(1:1, "section", "A");
            };"#,
        );
        match &first_const_init(&program).kind {
            ExprKind::Score(items) => {
                assert_eq!(items.len(), 6);
                assert!(matches!(items[0].kind, ScoreItemKind::Meta(_)));
                match &items[1].kind {
                    ScoreItemKind::Tempo(specs) => {
                        assert_eq!(specs.len(), 2);
                        assert!(matches!(specs[1].target, TempoTarget::Ramp { .. }));
                    }
                    other => panic!("expected tempo, got {:?}", other),
                }
                match &items[4].kind {
                    ScoreItemKind::Track { name, role, body, .. } => {
                        assert_eq!(name, "lead");
                        assert_eq!(role, "melody");
                        assert!(matches!(body[0], TrackItem::Place { .. }));
                    }
                    other => panic!("expected track, got {:?}", other),
                }
            }
            other => panic!("expected score, got {:?}", other),
        }
    }

    #[test]
    fn test_clip_block_with_tuplet() {
        let program = parse_source(
            "const intro = clip {
                at(1:1);
                note(C4, q);
                triplet(3) { note(D4, q); note(E4, q); note(F4, q); }
                chord([C4, E4, G4], h);
            };",
        );
        match &first_const_init(&program).kind {
            ExprKind::Clip(stmts) => {
                assert_eq!(stmts.len(), 4);
                assert!(matches!(stmts[2].kind, StmtKind::Tuplet { .. }));
            }
            other => panic!("expected clip, got {:?}", other),
        }
    }

    #[test]
    fn test_conditional_expression() {
        let program = parse_source("const a = x > 0 ? 1 : 2;");
        assert!(matches!(first_const_init(&program).kind, ExprKind::Conditional { .. }));
    }

    #[test]
    fn test_tempo_unit_suffix() {
        let program = parse_source("const s = score { tempo { 1:1 -> 60bpm at h; } };");
        match &first_const_init(&program).kind {
            ExprKind::Score(items) => match &items[0].kind {
                ScoreItemKind::Tempo(specs) => match &specs[0].target {
                    TempoTarget::Set { unit, .. } => assert!(unit.is_some()),
                    other => panic!("expected set, got {:?}", other),
                },
                other => panic!("expected tempo, got {:?}", other),
            },
            other => panic!("expected score, got {:?}", other),
        }
    }
}
