//! Recursive-descent parser for Puppet manifests
//!
//! Handles the subset of the language the compiler evaluates:
//! ```text
//! class apache($port = 80) inherits apache::params {
//!   package { 'httpd': ensure => installed }
//!   -> file { '/etc/httpd/conf/httpd.conf': content => "Listen ${port}\n" }
//!   ~> service { 'httpd': ensure => running }
//! }
//! node 'web1.example.com' { include apache }
//! ```

use crate::ast::{
    Arrow, BinaryOp, Call, CaseArm, ChainOperand, Definition, DefinitionKind, Expr, ExprKind,
    NodeDef, NodeName, Param, ParamDecl, Program, ResourceBody, ResourceDecl, Statement,
    StatementKind, StringPart,
};
use crate::error::{Error, Result};
use crate::lexer::{self, Keyword, Segment, Spanned, Token};
use catalog::{Origin, normalize_name};
use std::path::Path;
use std::sync::Arc;

/// Functions that may be called without parentheses in statement position
pub const STATEMENT_CALLS: &[&str] = &[
    "include", "require", "contain", "realize", "tag", "notice", "warning", "info", "debug",
    "err", "fail",
];

/// Parse a manifest from a file path
pub fn parse_file(path: &Path) -> Result<Program> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let label = path.display().to_string();
    parse_str(&content, Some(&label))
}

/// Parse a manifest from a string; `file` labels locations in errors and
/// resources
pub fn parse_str(source: &str, file: Option<&str>) -> Result<Program> {
    let tokens = lexer::tokenize(source, file)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        file,
    };
    let statements = parser.statements_until(&Token::Eof)?;
    Ok(Program {
        file: file.map(str::to_string),
        statements,
    })
}

struct Parser<'a> {
    tokens: Vec<Spanned>,
    pos: usize,
    file: Option<&'a str>,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .or_else(|| self.tokens.last())
            .map_or(&Token::Eof, |s| &s.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |s| s.line)
    }

    fn previous_line(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map_or(1, |s| s.line)
    }

    fn advance(&mut self) -> Spanned {
        let spanned = self.tokens.get(self.pos).cloned().unwrap_or(Spanned {
            token: Token::Eof,
            line: self.line(),
        });
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        spanned
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}, found {}", self.peek().describe())))
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::parse(self.file, self.line(), message)
    }

    fn unexpected(&self) -> Error {
        self.error(format!("unexpected {}", self.peek().describe()))
    }

    fn owned_file(&self) -> Option<String> {
        self.file.map(str::to_string)
    }

    fn statements_until(&mut self, end: &Token) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();
        loop {
            while self.eat(&Token::Semi) {}
            if self.check(end) {
                return Ok(statements);
            }
            if self.check(&Token::Eof) {
                return Err(self.error(format!("expected '}}', found {}", self.peek().describe())));
            }
            statements.push(self.statement()?);
        }
    }

    fn block(&mut self) -> Result<Vec<Statement>> {
        self.expect(&Token::LBrace, "'{'")?;
        let body = self.statements_until(&Token::RBrace)?;
        self.expect(&Token::RBrace, "'}'")?;
        Ok(body)
    }

    fn statement(&mut self) -> Result<Statement> {
        let line = self.line();
        let next = self.peek_at(1).clone();
        let kind = match self.peek().clone() {
            Token::Keyword(Keyword::Class) if next != Token::LBrace => {
                self.definition(DefinitionKind::Class)?
            }
            Token::Keyword(Keyword::Define) => self.definition(DefinitionKind::Define)?,
            Token::Keyword(Keyword::Application) => self.definition(DefinitionKind::Application)?,
            Token::Keyword(Keyword::Node) => self.node()?,
            Token::Keyword(Keyword::Site) => {
                self.advance();
                StatementKind::Site(self.block()?)
            }
            Token::Keyword(Keyword::If) => self.conditional(false)?,
            Token::Keyword(Keyword::Unless) => self.conditional(true)?,
            Token::Keyword(Keyword::Case) => self.case()?,
            Token::Variable(name) if next == Token::Assign => {
                self.pos += 2;
                let value = self.expression()?;
                StatementKind::Assign { name, value }
            }
            Token::ClassRef(type_name) if next == Token::LBrace => {
                self.pos += 2;
                let params = self.params()?;
                self.expect(&Token::RBrace, "'}'")?;
                StatementKind::Defaults {
                    type_name: normalize_name(&type_name),
                    params,
                }
            }
            Token::Name(name) if next == Token::LParen => {
                self.advance();
                let args = self.call_args()?;
                StatementKind::Call(Call { name, args })
            }
            Token::Name(name)
                if STATEMENT_CALLS.contains(&name.as_str()) && next != Token::LBrace =>
            {
                self.advance();
                let mut args = vec![self.expression()?];
                while self.eat(&Token::Comma) {
                    args.push(self.expression()?);
                }
                StatementKind::Call(Call { name, args })
            }
            _ => self.chain()?,
        };
        Ok(Statement { kind, line })
    }

    fn chain(&mut self) -> Result<StatementKind> {
        let mut operands = vec![self.chain_operand()?];
        let mut arrows = Vec::new();
        while let Some(arrow) = self.arrow() {
            self.advance();
            arrows.push(arrow);
            operands.push(self.chain_operand()?);
        }
        if !arrows.is_empty() {
            return Ok(StatementKind::Chain { operands, arrows });
        }
        match operands.pop() {
            Some(ChainOperand::Resource(decl)) => Ok(StatementKind::Resource(decl)),
            Some(ChainOperand::Expr(expr)) => Ok(StatementKind::Expression(expr)),
            None => Err(self.unexpected()),
        }
    }

    fn arrow(&self) -> Option<Arrow> {
        let (notification, right2left) = match self.peek() {
            Token::InEdge => (false, false),
            Token::InEdgeSub => (true, false),
            Token::OutEdge => (false, true),
            Token::OutEdgeSub => (true, true),
            _ => return None,
        };
        Some(Arrow {
            notification,
            right2left,
        })
    }

    fn chain_operand(&mut self) -> Result<ChainOperand> {
        let opens_body = self.peek_at(1) == &Token::LBrace;
        match self.peek() {
            Token::At | Token::AtAt => Ok(ChainOperand::Resource(self.resource()?)),
            Token::Name(_) | Token::Keyword(Keyword::Class) if opens_body => {
                Ok(ChainOperand::Resource(self.resource()?))
            }
            _ => Ok(ChainOperand::Expr(self.expression()?)),
        }
    }

    fn resource(&mut self) -> Result<ResourceDecl> {
        let origin = if self.eat(&Token::AtAt) {
            Origin::Exported
        } else if self.eat(&Token::At) {
            Origin::Virtual
        } else {
            Origin::Here
        };
        let type_name = match self.advance().token {
            Token::Name(name) => normalize_name(&name),
            Token::Keyword(Keyword::Class) => "class".to_string(),
            other => {
                return Err(self.error(format!(
                    "expected a resource type, found {}",
                    other.describe()
                )));
            }
        };
        self.expect(&Token::LBrace, "'{'")?;
        let mut bodies = Vec::new();
        loop {
            if self.eat(&Token::RBrace) {
                break;
            }
            let line = self.line();
            let title = self.expression()?;
            self.expect(&Token::Colon, "':' after resource title")?;
            let params = self.params()?;
            bodies.push(ResourceBody {
                title,
                params,
                line,
            });
            if self.eat(&Token::Semi) {
                continue;
            }
            self.expect(&Token::RBrace, "'}'")?;
            break;
        }
        Ok(ResourceDecl {
            type_name,
            origin,
            bodies,
        })
    }

    /// `name => value, ...` up to a `;` or `}`
    fn params(&mut self) -> Result<Vec<Param>> {
        let mut params = Vec::new();
        while !matches!(self.peek(), Token::RBrace | Token::Semi) {
            let line = self.line();
            let name = match self.advance().token {
                Token::Name(name) => name,
                Token::Keyword(keyword) => keyword.as_str().to_string(),
                other => {
                    return Err(Error::parse(
                        self.file,
                        line,
                        format!("expected a parameter name, found {}", other.describe()),
                    ));
                }
            };
            self.expect(&Token::FatArrow, "'=>'")?;
            let value = self.expression()?;
            params.push(Param { name, value, line });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn definition(&mut self, kind: DefinitionKind) -> Result<StatementKind> {
        let line = self.line();
        self.advance();
        let name = match self.advance().token {
            Token::Name(name) => normalize_name(&name),
            other => {
                return Err(self.error(format!(
                    "expected a name after '{}', found {}",
                    kind.as_str(),
                    other.describe()
                )));
            }
        };
        let params = if self.check(&Token::LParen) {
            self.param_decls()?
        } else {
            Vec::new()
        };
        let parent = if kind == DefinitionKind::Class && self.eat(&Token::Keyword(Keyword::Inherits))
        {
            match self.advance().token {
                Token::Name(parent) => Some(normalize_name(&parent)),
                other => {
                    return Err(self.error(format!(
                        "expected a class name after 'inherits', found {}",
                        other.describe()
                    )));
                }
            }
        } else {
            None
        };
        let body = self.block()?;
        Ok(StatementKind::Definition(Arc::new(Definition {
            kind,
            name,
            params,
            parent,
            body,
            file: self.owned_file(),
            line,
        })))
    }

    fn param_decls(&mut self) -> Result<Vec<ParamDecl>> {
        self.expect(&Token::LParen, "'('")?;
        let mut params = Vec::new();
        loop {
            if self.eat(&Token::RParen) {
                break;
            }
            self.skip_type()?;
            let name = match self.advance().token {
                Token::Variable(name) => name,
                other => {
                    return Err(self.error(format!(
                        "expected a parameter, found {}",
                        other.describe()
                    )));
                }
            };
            let default = if self.eat(&Token::Assign) {
                Some(self.expression()?)
            } else {
                None
            };
            params.push(ParamDecl { name, default });
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RParen, "')'")?;
                break;
            }
        }
        Ok(params)
    }

    /// Parameter types (`String $x`, `Optional[Integer] $y`) are accepted
    /// and ignored
    fn skip_type(&mut self) -> Result<()> {
        if !matches!(self.peek(), Token::ClassRef(_)) {
            return Ok(());
        }
        self.advance();
        if self.check(&Token::LBrack) {
            let mut depth = 0usize;
            loop {
                match self.advance().token {
                    Token::LBrack => depth += 1,
                    Token::RBrack => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    Token::Eof => return Err(self.error("unterminated parameter type")),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn node(&mut self) -> Result<StatementKind> {
        let line = self.line();
        self.advance();
        let mut names = Vec::new();
        loop {
            let name = match self.advance().token {
                Token::Str(name) | Token::Name(name) => NodeName::Name(name),
                Token::Interpolated(segments) => match segments.as_slice() {
                    [Segment::Literal(name)] => NodeName::Name(name.clone()),
                    _ => return Err(self.error("node names may not be interpolated")),
                },
                Token::Keyword(Keyword::Default) => NodeName::Default,
                other => {
                    return Err(self.error(format!(
                        "expected a node name, found {}",
                        other.describe()
                    )));
                }
            };
            names.push(name);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        let body = self.block()?;
        Ok(StatementKind::Node(Arc::new(NodeDef {
            names,
            body,
            file: self.owned_file(),
            line,
        })))
    }

    fn conditional(&mut self, negate: bool) -> Result<StatementKind> {
        self.advance();
        let mut condition = self.expression()?;
        if negate {
            let line = condition.line;
            condition = Expr::new(ExprKind::Not(Box::new(condition)), line);
        }
        let mut branches = vec![(condition, self.block()?)];
        let mut otherwise = Vec::new();
        loop {
            if !negate && self.eat(&Token::Keyword(Keyword::Elsif)) {
                let condition = self.expression()?;
                branches.push((condition, self.block()?));
            } else if self.eat(&Token::Keyword(Keyword::Else)) {
                otherwise = self.block()?;
                break;
            } else {
                break;
            }
        }
        Ok(StatementKind::If {
            branches,
            otherwise,
        })
    }

    fn case(&mut self) -> Result<StatementKind> {
        self.advance();
        let subject = self.expression()?;
        self.expect(&Token::LBrace, "'{'")?;
        let mut arms = Vec::new();
        while !self.eat(&Token::RBrace) {
            let mut matches = vec![self.expression()?];
            while self.eat(&Token::Comma) {
                matches.push(self.expression()?);
            }
            self.expect(&Token::Colon, "':'")?;
            let body = self.block()?;
            arms.push(CaseArm { matches, body });
        }
        Ok(StatementKind::Case { subject, arms })
    }

    fn call_args(&mut self) -> Result<Vec<Expr>> {
        self.expect(&Token::LParen, "'('")?;
        self.list_until(&Token::RParen)
    }

    /// Comma separated expressions up to `end`, trailing comma allowed
    fn list_until(&mut self, end: &Token) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        loop {
            if self.eat(end) {
                return Ok(items);
            }
            items.push(self.expression()?);
            if !self.eat(&Token::Comma) {
                self.expect(end, &format!("'{}'", end.describe().trim_matches('\'')))?;
                return Ok(items);
            }
        }
    }

    pub(crate) fn expression(&mut self) -> Result<Expr> {
        self.or()
    }

    fn binary_level(
        &mut self,
        operators: &[(Token, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr>,
    ) -> Result<Expr> {
        let mut lhs = next(self)?;
        loop {
            let Some(op) = operators
                .iter()
                .find(|(token, _)| self.check(token))
                .map(|(_, op)| *op)
            else {
                return Ok(lhs);
            };
            self.advance();
            let rhs = next(self)?;
            let line = lhs.line;
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                line,
            );
        }
    }

    fn or(&mut self) -> Result<Expr> {
        self.binary_level(&[(Token::Keyword(Keyword::Or), BinaryOp::Or)], Self::and)
    }

    fn and(&mut self) -> Result<Expr> {
        self.binary_level(&[(Token::Keyword(Keyword::And), BinaryOp::And)], Self::equality)
    }

    fn equality(&mut self) -> Result<Expr> {
        self.binary_level(
            &[(Token::Eq, BinaryOp::Eq), (Token::Ne, BinaryOp::Ne)],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> Result<Expr> {
        self.binary_level(
            &[
                (Token::Lt, BinaryOp::Lt),
                (Token::Le, BinaryOp::Le),
                (Token::Gt, BinaryOp::Gt),
                (Token::Ge, BinaryOp::Ge),
            ],
            Self::membership,
        )
    }

    fn membership(&mut self) -> Result<Expr> {
        self.binary_level(&[(Token::Keyword(Keyword::In), BinaryOp::In)], Self::additive)
    }

    fn additive(&mut self) -> Result<Expr> {
        self.binary_level(
            &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        self.binary_level(
            &[
                (Token::Times, BinaryOp::Mul),
                (Token::Div, BinaryOp::Div),
                (Token::Mod, BinaryOp::Mod),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr> {
        let line = self.line();
        if self.eat(&Token::Not) {
            let operand = self.unary()?;
            return Ok(Expr::new(ExprKind::Not(Box::new(operand)), line));
        }
        if self.eat(&Token::Minus) {
            if self.eat(&Token::MinMagnitude) {
                return Ok(Expr::new(ExprKind::Integer(i64::MIN), line));
            }
            let operand = self.unary()?;
            return Ok(Expr::new(ExprKind::Negate(Box::new(operand)), line));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            // `[` on a new line starts an array, not an index
            if self.check(&Token::LBrack) && self.line() == self.previous_line() {
                self.advance();
                let index = self.expression()?;
                self.expect(&Token::RBrack, "']'")?;
                let line = expr.line;
                expr = Expr::new(
                    ExprKind::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    },
                    line,
                );
            } else if self.check(&Token::Question) {
                self.advance();
                self.expect(&Token::LBrace, "'{' after '?'")?;
                let mut cases = Vec::new();
                while !self.eat(&Token::RBrace) {
                    let key = self.expression()?;
                    self.expect(&Token::FatArrow, "'=>'")?;
                    let value = self.expression()?;
                    cases.push((key, value));
                    if !self.eat(&Token::Comma) {
                        self.expect(&Token::RBrace, "'}'")?;
                        break;
                    }
                }
                let line = expr.line;
                expr = Expr::new(
                    ExprKind::Selector {
                        subject: Box::new(expr),
                        cases,
                    },
                    line,
                );
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let line = self.line();
        let kind = match self.peek().clone() {
            Token::Integer(i) => {
                self.advance();
                ExprKind::Integer(i)
            }
            Token::Float(x) => {
                self.advance();
                ExprKind::Float(x)
            }
            Token::Bool(b) => {
                self.advance();
                ExprKind::Bool(b)
            }
            Token::Undef => {
                self.advance();
                ExprKind::Undef
            }
            Token::Keyword(Keyword::Default) => {
                self.advance();
                ExprKind::Default
            }
            Token::Str(s) => {
                self.advance();
                ExprKind::Str(s)
            }
            Token::Interpolated(segments) => {
                self.advance();
                self.interpolation(segments)?
            }
            Token::Variable(name) => {
                self.advance();
                ExprKind::Variable(name)
            }
            Token::Name(name) => {
                self.advance();
                if self.check(&Token::LParen) {
                    let args = self.call_args()?;
                    ExprKind::Call(Call { name, args })
                } else {
                    ExprKind::Str(name)
                }
            }
            Token::ClassRef(name) => {
                self.advance();
                if self.check(&Token::LBrack) && self.line() == line {
                    self.advance();
                    let titles = self.list_until(&Token::RBrack)?;
                    ExprKind::Reference {
                        type_name: normalize_name(&name),
                        titles,
                    }
                } else {
                    ExprKind::TypeName(name)
                }
            }
            Token::LBrack => {
                self.advance();
                ExprKind::Array(self.list_until(&Token::RBrack)?)
            }
            Token::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                while !self.eat(&Token::RBrace) {
                    let key = self.expression()?;
                    self.expect(&Token::FatArrow, "'=>'")?;
                    let value = self.expression()?;
                    entries.push((key, value));
                    if !self.eat(&Token::Comma) {
                        self.expect(&Token::RBrace, "'}'")?;
                        break;
                    }
                }
                ExprKind::Hash(entries)
            }
            Token::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(&Token::RParen, "')'")?;
                return Ok(inner);
            }
            Token::MinMagnitude => {
                return Err(self.error(format!("invalid number {}", self.peek().describe())));
            }
            _ => return Err(self.unexpected()),
        };
        Ok(Expr::new(kind, line))
    }

    fn interpolation(&self, segments: Vec<Segment>) -> Result<ExprKind> {
        let line = self.previous_line();
        let mut parts = Vec::new();
        for segment in segments {
            match segment {
                Segment::Literal(text) => parts.push(StringPart::Literal(text)),
                Segment::Variable(name) => {
                    parts.push(StringPart::Expr(Expr::new(ExprKind::Variable(name), line)));
                }
                Segment::Expr { source, line } => {
                    parts.push(StringPart::Expr(self.embedded(&source, line)?));
                }
            }
        }
        match parts.as_slice() {
            [] => Ok(ExprKind::Str(String::new())),
            [StringPart::Literal(text)] => Ok(ExprKind::Str(text.clone())),
            _ => Ok(ExprKind::Interpolated(parts)),
        }
    }

    /// Parse the inside of `${...}`; a leading bare name is a variable
    /// unless it is called
    fn embedded(&self, source: &str, line: usize) -> Result<Expr> {
        let mut tokens = lexer::tokenize_at(source, self.file, line)?;
        let called = tokens.get(1).is_some_and(|s| s.token == Token::LParen);
        if let Some(first) = tokens.first_mut()
            && let Token::Name(name) = &first.token
            && !called
        {
            first.token = Token::Variable(name.clone());
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            file: self.file,
        };
        let expr = parser.expression()?;
        if !parser.check(&Token::Eof) {
            return Err(parser.unexpected());
        }
        Ok(expr)
    }
}
