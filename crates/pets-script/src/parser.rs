//! Recursive-descent parser producing [`Stmt`] trees
//!
//! ```text
//! module     = { statement }
//! statement  = def | if | for | simple NEWLINE
//! simple     = return [exprs] | pass | break | continue | load | assign | exprs
//! assign     = exprs ("=" | "+=" | "-=") exprs
//! expr       = or
//! or         = and { "or" and }
//! and        = not { "and" not }
//! not        = "not" not | comparison
//! comparison = arith [ ("==" | "!=" | "<" | "<=" | ">" | ">=" | "in" | "not in") arith ]
//! arith      = term { ("+" | "-") term }
//! term       = unary { ("*" | "/" | "//" | "%") unary }
//! unary      = "-" unary | postfix
//! postfix    = primary { call | "[" expr "]" | "." IDENT }
//! ```

use crate::ast::*;
use crate::error::{ErrorKind, Result, ScriptError};
use crate::lexer::{Spanned, Tok, Token, tokenize};
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

/// Deepest allowed nesting of expressions and blocks
const MAX_NESTING: usize = 64;

/// Parse a whole Petsfile.
pub fn parse_module(source: &str, file: &Arc<Path>) -> Result<Vec<Stmt>> {
    let tokens = tokenize(source, file)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        file,
        function_depth: 0,
        loop_depth: 0,
        nesting: 0,
    };
    parser.module()
}

struct Parser<'a, 'f> {
    tokens: Vec<Spanned<'a>>,
    pos: usize,
    file: &'f Arc<Path>,
    function_depth: usize,
    loop_depth: usize,
    nesting: usize,
}

fn describe(tok: &Tok<'_>) -> String {
    match tok {
        Tok::Lexeme(Token::Ident(name)) => format!("identifier {name:?}"),
        Tok::Lexeme(Token::Str(s)) => format!("string {s:?}"),
        Tok::Lexeme(Token::Int(i)) => format!("integer {i}"),
        Tok::Lexeme(token) => format!("{token:?}"),
        Tok::Newline => "newline".to_string(),
        Tok::Indent => "indent".to_string(),
        Tok::Dedent => "dedent".to_string(),
        Tok::Eof => "end of file".to_string(),
    }
}

impl<'a> Parser<'a, '_> {
    fn peek(&self) -> &Tok<'a> {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn peek_at(&self, n: usize) -> &Tok<'a> {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].tok
    }

    fn loc(&self) -> Loc {
        self.tokens[self.pos.min(self.tokens.len() - 1)].loc
    }

    fn advance(&mut self) -> Tok<'a> {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, token: &Token<'_>) -> bool {
        matches!(self.peek(), Tok::Lexeme(t) if t == token)
    }

    fn eat(&mut self, token: &Token<'_>) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_at(&self, loc: Loc, message: impl Into<String>) -> ScriptError {
        ScriptError::new(ErrorKind::Syntax, message).at_loc(self.file, loc)
    }

    /// Run `parse` one nesting level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.nesting >= MAX_NESTING {
            return Err(self.error_at(self.loc(), "expression nested too deeply"));
        }
        self.nesting += 1;
        let result = parse(self);
        self.nesting -= 1;
        result
    }

    fn unexpected(&self, expected: &str) -> ScriptError {
        self.error_at(
            self.loc(),
            format!("expected {expected}, found {}", describe(self.peek())),
        )
    }

    fn expect(&mut self, token: &Token<'_>, expected: &str) -> Result<Loc> {
        let loc = self.loc();
        if self.eat(token) {
            Ok(loc)
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_newline(&mut self) -> Result<()> {
        match self.peek() {
            Tok::Newline => {
                self.advance();
                Ok(())
            }
            Tok::Eof => Ok(()),
            _ => Err(self.unexpected("newline")),
        }
    }

    fn ident(&mut self, expected: &str) -> Result<String> {
        match self.peek() {
            Tok::Lexeme(Token::Ident(name)) => {
                let name = name.to_string();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    // ===== Statements =====

    fn module(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                Tok::Eof => return Ok(stmts),
                Tok::Newline => {
                    self.advance();
                }
                _ => stmts.extend(self.statement(true)?),
            }
        }
    }

    /// One statement, or several when simple statements share a line.
    fn statement(&mut self, top_level: bool) -> Result<Vec<Stmt>> {
        match self.peek() {
            Tok::Lexeme(Token::Def) => Ok(vec![self.def_stmt()?]),
            Tok::Lexeme(Token::If) => Ok(vec![self.if_stmt()?]),
            Tok::Lexeme(Token::For) => Ok(vec![self.for_stmt()?]),
            Tok::Indent => Err(self.error_at(self.loc(), "unexpected indent")),
            _ => {
                let stmt = self.simple_stmt(top_level)?;
                self.expect_newline()?;
                Ok(vec![stmt])
            }
        }
    }

    /// `":" NEWLINE INDENT statements DEDENT`, or a single simple statement
    /// on the same line as the colon.
    fn block(&mut self) -> Result<Vec<Stmt>> {
        self.nested(Self::block_body)
    }

    fn block_body(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&Token::Colon, "':'")?;
        if !matches!(self.peek(), Tok::Newline) {
            let stmt = self.simple_stmt(false)?;
            self.expect_newline()?;
            return Ok(vec![stmt]);
        }
        self.advance();

        if !matches!(self.peek(), Tok::Indent) {
            return Err(self.unexpected("an indented block"));
        }
        self.advance();

        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Dedent => {
                    self.advance();
                    return Ok(body);
                }
                Tok::Eof => return Ok(body),
                Tok::Newline => {
                    self.advance();
                }
                _ => body.extend(self.statement(false)?),
            }
        }
    }

    fn def_stmt(&mut self) -> Result<Stmt> {
        let loc = self.expect(&Token::Def, "'def'")?;
        let name = self.ident("function name")?;
        self.expect(&Token::LParen, "'('")?;

        let mut params: Vec<Param> = Vec::new();
        while !self.check(&Token::RParen) {
            let param_loc = self.loc();
            let param = self.ident("parameter name")?;
            if params.iter().any(|p| p.name == param) {
                return Err(self.error_at(param_loc, format!("duplicate parameter {param:?}")));
            }
            let default = if self.eat(&Token::Assign) {
                Some(self.expr()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return Err(self.error_at(
                        param_loc,
                        format!("parameter {param:?} without a default follows one with a default"),
                    ));
                }
                None
            };
            params.push(Param {
                name: param,
                default,
            });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "')'")?;

        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        self.function_depth += 1;
        let body = self.block();
        self.function_depth -= 1;
        self.loop_depth = saved_loops;

        Ok(Stmt {
            kind: StmtKind::Def(Rc::new(FunctionDef {
                name,
                params,
                body: body?,
                loc,
            })),
            loc,
        })
    }

    fn if_stmt(&mut self) -> Result<Stmt> {
        let loc = self.expect(&Token::If, "'if'")?;
        let mut branches = Vec::new();
        let cond = self.expr()?;
        branches.push((cond, self.block()?));

        let mut else_body = None;
        loop {
            if self.eat(&Token::Elif) {
                let cond = self.expr()?;
                branches.push((cond, self.block()?));
            } else if self.eat(&Token::Else) {
                else_body = Some(self.block()?);
                break;
            } else {
                break;
            }
        }

        Ok(Stmt {
            kind: StmtKind::If {
                branches,
                else_body,
            },
            loc,
        })
    }

    fn for_stmt(&mut self) -> Result<Stmt> {
        let loc = self.expect(&Token::For, "'for'")?;

        let mut names = vec![Target::Name(self.ident("loop variable")?)];
        while self.eat(&Token::Comma) {
            names.push(Target::Name(self.ident("loop variable")?));
        }
        let target = if names.len() == 1 {
            names.remove(0)
        } else {
            Target::Tuple(names)
        };

        self.expect(&Token::In, "'in'")?;
        let iter = self.expr_list()?;

        self.loop_depth += 1;
        let body = self.block();
        self.loop_depth -= 1;

        Ok(Stmt {
            kind: StmtKind::For {
                target,
                iter,
                body: body?,
            },
            loc,
        })
    }

    fn simple_stmt(&mut self, top_level: bool) -> Result<Stmt> {
        let loc = self.loc();
        let kind = match self.peek() {
            Tok::Lexeme(Token::Return) => {
                if self.function_depth == 0 {
                    return Err(self.error_at(loc, "return outside function"));
                }
                self.advance();
                if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.expr_list()?))
                }
            }
            Tok::Lexeme(Token::Pass) => {
                self.advance();
                StmtKind::Pass
            }
            Tok::Lexeme(Token::Break) | Tok::Lexeme(Token::Continue) => {
                if self.loop_depth == 0 {
                    return Err(self.error_at(loc, "break or continue outside loop"));
                }
                match self.advance() {
                    Tok::Lexeme(Token::Break) => StmtKind::Break,
                    _ => StmtKind::Continue,
                }
            }
            Tok::Lexeme(Token::Load) => {
                if !top_level {
                    return Err(self.error_at(loc, "load() is only allowed at the top level"));
                }
                self.load_stmt()?
            }
            _ => {
                let expr = self.expr_list()?;
                let op = match self.peek() {
                    Tok::Lexeme(Token::Assign) => Some(AssignOp::Set),
                    Tok::Lexeme(Token::PlusAssign) => Some(AssignOp::Add),
                    Tok::Lexeme(Token::MinusAssign) => Some(AssignOp::Sub),
                    _ => None,
                };
                match op {
                    Some(op) => {
                        self.advance();
                        let target = self.to_target(expr, op)?;
                        let value = self.expr_list()?;
                        StmtKind::Assign { target, op, value }
                    }
                    None => StmtKind::Expr(expr),
                }
            }
        };
        Ok(Stmt { kind, loc })
    }

    fn to_target(&self, expr: Expr, op: AssignOp) -> Result<Target> {
        match expr.kind {
            ExprKind::Name(name) => Ok(Target::Name(name)),
            ExprKind::Index { object, index } => Ok(Target::Index {
                object: *object,
                index: *index,
            }),
            ExprKind::Tuple(items) | ExprKind::List(items) if op == AssignOp::Set => items
                .into_iter()
                .map(|item| self.to_target(item, op))
                .collect::<Result<Vec<_>>>()
                .map(Target::Tuple),
            _ => Err(self.error_at(expr.loc, "cannot assign to this expression")),
        }
    }

    fn load_stmt(&mut self) -> Result<StmtKind> {
        self.expect(&Token::Load, "'load'")?;
        self.expect(&Token::LParen, "'('")?;
        let locator = match self.advance() {
            Tok::Lexeme(Token::Str(s)) => s,
            _ => return Err(self.error_at(self.loc(), "load() expects a module string first")),
        };

        let mut symbols = Vec::new();
        while self.eat(&Token::Comma) {
            if self.check(&Token::RParen) {
                break;
            }
            let sym_loc = self.loc();
            match self.advance() {
                Tok::Lexeme(Token::Str(name)) => symbols.push((name.clone(), name)),
                Tok::Lexeme(Token::Ident(alias)) => {
                    self.expect(&Token::Assign, "'='")?;
                    match self.advance() {
                        Tok::Lexeme(Token::Str(name)) => symbols.push((alias.to_string(), name)),
                        _ => {
                            return Err(self.error_at(sym_loc, "load() aliases must name a string"));
                        }
                    }
                }
                other => {
                    return Err(self.error_at(
                        sym_loc,
                        format!("expected a symbol to load, found {}", describe(&other)),
                    ));
                }
            }
        }
        self.expect(&Token::RParen, "')'")?;

        if symbols.is_empty() {
            return Err(self.error_at(self.loc(), "load() requires at least one symbol"));
        }
        Ok(StmtKind::Load { locator, symbols })
    }

    // ===== Expressions =====

    fn at_list_end(&self) -> bool {
        matches!(
            self.peek(),
            Tok::Newline
                | Tok::Eof
                | Tok::Lexeme(
                    Token::Assign
                        | Token::PlusAssign
                        | Token::MinusAssign
                        | Token::RParen
                        | Token::RBracket
                        | Token::RBrace
                        | Token::Colon
                )
        )
    }

    /// Comma-separated expressions; more than one makes a tuple.
    fn expr_list(&mut self) -> Result<Expr> {
        let first = self.expr()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let loc = first.loc;
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if self.at_list_end() {
                break;
            }
            items.push(self.expr()?);
        }
        Ok(Expr {
            kind: ExprKind::Tuple(items),
            loc,
        })
    }

    fn expr(&mut self) -> Result<Expr> {
        self.nested(Self::or_expr)
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::Or) {
            let right = self.and_expr()?;
            left = logical(LogicalOp::Or, left, right);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.not_expr()?;
        while self.eat(&Token::And) {
            let right = self.not_expr()?;
            left = logical(LogicalOp::And, left, right);
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        let loc = self.loc();
        if self.eat(&Token::Not) {
            let operand = self.nested(Self::not_expr)?;
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                loc,
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.arith()?;
        let op = match self.peek() {
            Tok::Lexeme(Token::Eq) => BinOp::Eq,
            Tok::Lexeme(Token::NotEq) => BinOp::NotEq,
            Tok::Lexeme(Token::Less) => BinOp::Less,
            Tok::Lexeme(Token::LessEq) => BinOp::LessEq,
            Tok::Lexeme(Token::Greater) => BinOp::Greater,
            Tok::Lexeme(Token::GreaterEq) => BinOp::GreaterEq,
            Tok::Lexeme(Token::In) => BinOp::In,
            Tok::Lexeme(Token::Not) if matches!(self.peek_at(1), Tok::Lexeme(Token::In)) => {
                self.advance();
                BinOp::NotIn
            }
            _ => return Ok(left),
        };
        self.advance();
        let right = self.arith()?;
        Ok(binary(op, left, right))
    }

    fn arith(&mut self) -> Result<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Lexeme(Token::Plus) => BinOp::Add,
                Tok::Lexeme(Token::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.term()?;
            left = binary(op, left, right);
        }
    }

    fn term(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Tok::Lexeme(Token::Star) => BinOp::Mul,
                Tok::Lexeme(Token::Slash) => BinOp::Div,
                Tok::Lexeme(Token::SlashSlash) => BinOp::FloorDiv,
                Tok::Lexeme(Token::Percent) => BinOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = binary(op, left, right);
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        let loc = self.loc();
        if self.eat(&Token::Minus) {
            let operand = self.nested(Self::unary)?;
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
                loc,
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            let loc = expr.loc;
            if self.eat(&Token::LParen) {
                let args = self.call_args()?;
                expr = Expr {
                    kind: ExprKind::Call {
                        func: Box::new(expr),
                        args,
                    },
                    loc,
                };
            } else if self.eat(&Token::LBracket) {
                let index = self.expr()?;
                self.expect(&Token::RBracket, "']'")?;
                expr = Expr {
                    kind: ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    loc,
                };
            } else if self.eat(&Token::Dot) {
                let name = self.ident("attribute name")?;
                expr = Expr {
                    kind: ExprKind::Attr {
                        object: Box::new(expr),
                        name,
                    },
                    loc,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Arguments after the opening parenthesis, through the closing one.
    fn call_args(&mut self) -> Result<Vec<Arg>> {
        let mut args: Vec<Arg> = Vec::new();
        while !self.check(&Token::RParen) {
            let loc = self.loc();
            let keyword = match (self.peek(), self.peek_at(1)) {
                (Tok::Lexeme(Token::Ident(name)), Tok::Lexeme(Token::Assign)) => {
                    Some(name.to_string())
                }
                _ => None,
            };
            let arg = match keyword {
                Some(name) => {
                    self.advance();
                    self.advance();
                    if args.iter().any(|a| a.name.as_deref() == Some(name.as_str())) {
                        return Err(self.error_at(loc, format!("keyword argument {name:?} repeated")));
                    }
                    Arg {
                        name: Some(name),
                        value: self.expr()?,
                    }
                }
                None => {
                    if args.iter().any(|a| a.name.is_some()) {
                        return Err(
                            self.error_at(loc, "positional argument follows keyword argument")
                        );
                    }
                    Arg {
                        name: None,
                        value: self.expr()?,
                    }
                }
            };
            args.push(arg);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "')'")?;
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr> {
        let loc = self.loc();
        let kind = match self.advance() {
            Tok::Lexeme(Token::Int(i)) => ExprKind::Int(i),
            Tok::Lexeme(Token::Str(s)) => ExprKind::Str(s),
            Tok::Lexeme(Token::True) => ExprKind::Bool(true),
            Tok::Lexeme(Token::False) => ExprKind::Bool(false),
            Tok::Lexeme(Token::None) => ExprKind::None,
            Tok::Lexeme(Token::Ident(name)) => ExprKind::Name(name.to_string()),
            Tok::Lexeme(Token::LParen) => {
                if self.eat(&Token::RParen) {
                    ExprKind::Tuple(Vec::new())
                } else {
                    let first = self.expr()?;
                    if self.check(&Token::Comma) {
                        let mut items = vec![first];
                        while self.eat(&Token::Comma) {
                            if self.check(&Token::RParen) {
                                break;
                            }
                            items.push(self.expr()?);
                        }
                        self.expect(&Token::RParen, "')'")?;
                        ExprKind::Tuple(items)
                    } else {
                        self.expect(&Token::RParen, "')'")?;
                        return Ok(first);
                    }
                }
            }
            Tok::Lexeme(Token::LBracket) => {
                let mut items = Vec::new();
                while !self.check(&Token::RBracket) {
                    items.push(self.expr()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBracket, "']'")?;
                ExprKind::List(items)
            }
            Tok::Lexeme(Token::LBrace) => {
                let mut entries = Vec::new();
                while !self.check(&Token::RBrace) {
                    let key = self.expr()?;
                    self.expect(&Token::Colon, "':'")?;
                    let value = self.expr()?;
                    entries.push((key, value));
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBrace, "'}'")?;
                ExprKind::Dict(entries)
            }
            other => {
                return Err(self.error_at(
                    loc,
                    format!("expected an expression, found {}", describe(&other)),
                ));
            }
        };
        Ok(Expr { kind, loc })
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    let loc = left.loc;
    Expr {
        kind: ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        loc,
    }
}

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    let loc = left.loc;
    Expr {
        kind: ExprKind::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        loc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Result<Vec<Stmt>> {
        let file: Arc<Path> = Arc::from(Path::new("Petsfile"));
        parse_module(source, &file)
    }

    #[test]
    fn test_deep_nesting_is_a_syntax_error() {
        let depth = 20_000;
        let parens = format!("x = {}1{}\n", "(".repeat(depth), ")".repeat(depth));
        let negations = format!("x = {}1\n", "-".repeat(depth));
        let nots = format!("x = {}True\n", "not ".repeat(depth));
        let lists = format!("x = {}{}\n", "[".repeat(depth), "]".repeat(depth));
        for source in [parens, negations, nots, lists] {
            let err = parse(&source).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Syntax);
            assert!(err.to_string().contains("nested too deeply"), "{err}");
        }
    }

    #[test]
    fn test_deep_blocks_are_a_syntax_error() {
        let mut source = String::new();
        for level in 0..200 {
            source.push_str(&" ".repeat(level));
            source.push_str("if True:\n");
        }
        source.push_str(&" ".repeat(200));
        source.push_str("pass\n");
        let err = parse(&source).unwrap_err();
        assert!(err.to_string().contains("nested too deeply"), "{err}");
    }

    #[test]
    fn test_moderate_nesting_parses() {
        let source = format!("x = {}1{}\n", "(".repeat(30), ")".repeat(30));
        assert!(parse(&source).is_ok());
    }

    #[test]
    fn test_function_with_defaults() {
        let stmts = parse("def f(a, b=1):\n  return a + b\n").unwrap();
        assert_eq!(stmts.len(), 1);
        let StmtKind::Def(def) = &stmts[0].kind else {
            panic!("expected def");
        };
        assert_eq!(def.name, "f");
        assert_eq!(def.params.len(), 2);
        assert_eq!(def.required_params(), 1);
        assert!(matches!(def.body[0].kind, StmtKind::Return(Some(_))));
    }

    #[test]
    fn test_precedence() {
        let stmts = parse("x = 1 + 2 * 3\n").unwrap();
        let StmtKind::Assign { value, .. } = &stmts[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::Binary { op, right, .. } = &value.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(right.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_not_in() {
        let stmts = parse("x = 1 not in [2]\n").unwrap();
        let StmtKind::Assign { value, .. } = &stmts[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, ExprKind::Binary { op: BinOp::NotIn, .. }));
    }

    #[test]
    fn test_if_elif_else() {
        let source = "if a:\n  pass\nelif b:\n  pass\nelse:\n  pass\n";
        let stmts = parse(source).unwrap();
        let StmtKind::If {
            branches,
            else_body,
        } = &stmts[0].kind
        else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 2);
        assert!(else_body.is_some());
    }

    #[test]
    fn test_for_with_tuple_target() {
        let stmts = parse("for k, v in d.items():\n  print(k)\n").unwrap();
        assert!(matches!(
            &stmts[0].kind,
            StmtKind::For {
                target: Target::Tuple(_),
                ..
            }
        ));
    }

    #[test]
    fn test_load_with_alias() {
        let stmts = parse("load(\"inner\", \"a\", b=\"c\")\n").unwrap();
        let StmtKind::Load { locator, symbols } = &stmts[0].kind else {
            panic!("expected load");
        };
        assert_eq!(locator, "inner");
        assert_eq!(
            symbols,
            &vec![
                ("a".to_string(), "a".to_string()),
                ("b".to_string(), "c".to_string())
            ]
        );
    }

    #[test]
    fn test_load_inside_function_is_rejected() {
        let err = parse("def f():\n  load(\"x\", \"y\")\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
    }

    #[test]
    fn test_keyword_arguments() {
        let stmts = parse("register(\"a\", \"local\", f, deps=[\"db\"])\n").unwrap();
        let StmtKind::Expr(Expr {
            kind: ExprKind::Call { args, .. },
            ..
        }) = &stmts[0].kind
        else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 4);
        assert_eq!(args[3].name.as_deref(), Some("deps"));
    }

    #[test]
    fn test_positional_after_keyword_is_rejected() {
        assert!(parse("f(a=1, 2)\n").is_err());
    }

    #[test]
    fn test_tuple_assignment_and_augmented() {
        let stmts = parse("a, b = 1, 2\na += 1\nx[0] = 3\n").unwrap();
        assert!(matches!(
            stmts[0].kind,
            StmtKind::Assign {
                target: Target::Tuple(_),
                op: AssignOp::Set,
                ..
            }
        ));
        assert!(matches!(
            stmts[1].kind,
            StmtKind::Assign {
                op: AssignOp::Add,
                ..
            }
        ));
        assert!(matches!(
            stmts[2].kind,
            StmtKind::Assign {
                target: Target::Index { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_one_line_block() {
        let stmts = parse("if x: y = 1\n").unwrap();
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn test_return_outside_function() {
        let err = parse("return 1\n").unwrap_err();
        assert!(err.to_string().contains("return outside function"));
    }

    #[test]
    fn test_break_outside_loop() {
        assert!(parse("def f():\n  break\n").is_err());
        assert!(parse("for x in y:\n  break\n").is_ok());
    }

    #[test]
    fn test_unexpected_indent() {
        let err = parse("x = 1\n  y = 2\n").unwrap_err();
        assert!(err.to_string().contains("Petsfile:2:3: unexpected indent"), "{err}");
    }

    #[test]
    fn test_call_location_is_start_of_call() {
        let stmts = parse("\n\nregister(\"a\", \"b\", f)\n").unwrap();
        assert_eq!(stmts[0].loc, Loc { line: 3, col: 1 });
    }

    #[test]
    fn test_dict_and_empty_tuple() {
        let stmts = parse("d = {\"a\": 1, \"b\": (),}\n").unwrap();
        let StmtKind::Assign { value, .. } = &stmts[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::Dict(entries) = &value.kind else {
            panic!("expected dict");
        };
        assert_eq!(entries.len(), 2);
    }
}
