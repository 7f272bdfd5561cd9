//! Recursive-descent parser for strategy scripts.

use super::ast::{
    BinOp, BoolOp, CmpOp, Expr, FunctionDef, Literal, Module, Param, Stmt, StmtKind, UnaryOp,
};
use super::lexer::{tokenize, Token, TokenKind};
use super::ParseError;

/// Reserved words of the strategy language.
pub const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

/// Keywords recognised by the grammar but whose statements are not part of the language.
const UNSUPPORTED_STATEMENTS: &[&str] = &[
    "assert", "async", "await", "class", "del", "except", "finally", "from", "global", "lambda",
    "nonlocal", "raise", "try", "with", "yield",
];

/// Deepest bracket or block nesting the parser will follow.
const MAX_NESTING: usize = 64;

/// Deepest expression tree accepted, counting every operator and call.
const MAX_EXPRESSION_DEPTH: usize = 256;

/// Operator and call nodes allowed in one top-level expression. Checked while the tree is built,
/// so no tree ever grows tall enough to exhaust the stack when it is walked or dropped.
const MAX_EXPRESSION_LINKS: usize = 4096;

pub fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

/// Parses a whole source text into a [`Module`].
pub fn parse(source: &str) -> Result<Module, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        in_expression: false,
        links: 0,
    };
    parser.module()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    in_expression: bool,
    links: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // tokenize always terminates the stream with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_kind_at(&self, offset: usize) -> &TokenKind {
        let index = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[index].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek_kind(), TokenKind::Name(name) if name == keyword)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.peek_kind() == &kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("expected {kind}")))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected '{keyword}'")))
        }
    }

    /// Identifier that is not a reserved word.
    fn expect_identifier(&mut self, what: &str) -> Result<String, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Name(name) if !is_keyword(&name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(&format!("expected {what}"))),
        }
    }

    fn unexpected(&self, context: &str) -> ParseError {
        let token = self.peek();
        ParseError::new(
            format!("{context}, found {}", token.kind),
            token.line,
            token.column,
        )
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING {
            let token = self.peek();
            return Err(ParseError::new(
                format!("nesting exceeds the limit of {MAX_NESTING} levels"),
                token.line,
                token.column,
            ));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn module(&mut self) -> Result<Module, ParseError> {
        let mut body = vec![];
        while self.peek_kind() != &TokenKind::Eof {
            if self.eat(&TokenKind::Newline) {
                continue;
            }
            body.push(self.statement(true)?);
        }
        Ok(Module { body })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.nested(Self::suite)
    }

    fn suite(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokenKind::Colon)?;
        if !matches!(self.peek_kind(), TokenKind::Newline) {
            // single-line suite: `if x: return "Defect"`
            return Ok(vec![self.simple_statement()?]);
        }
        self.expect(TokenKind::Newline)?;
        self.expect(TokenKind::Indent)?;
        let mut body = vec![];
        while !matches!(self.peek_kind(), TokenKind::Dedent | TokenKind::Eof) {
            body.push(self.statement(false)?);
        }
        self.eat(&TokenKind::Dedent);
        Ok(body)
    }

    fn statement(&mut self, top_level: bool) -> Result<Stmt, ParseError> {
        let token = self.peek().clone();
        let keyword = match &token.kind {
            TokenKind::Name(name) => name.as_str(),
            TokenKind::Indent => return Err(self.unexpected("unexpected indent")),
            _ => return self.simple_statement(),
        };

        match keyword {
            "def" => {
                if !top_level {
                    return Err(ParseError::new(
                        "nested function definitions are not supported",
                        token.line,
                        token.column,
                    ));
                }
                let def = self.function_def()?;
                Ok(Stmt {
                    kind: StmtKind::FunctionDef(def),
                    line: token.line,
                })
            }
            "if" => self.if_statement(),
            "for" => {
                self.advance();
                let target = self.assignment_target()?;
                self.expect_keyword("in")?;
                let iter = self.expression()?;
                let body = self.block()?;
                Ok(Stmt {
                    kind: StmtKind::For { target, iter, body },
                    line: token.line,
                })
            }
            "while" => {
                self.advance();
                let cond = self.expression()?;
                let body = self.block()?;
                Ok(Stmt {
                    kind: StmtKind::While { cond, body },
                    line: token.line,
                })
            }
            "elif" | "else" => Err(self.unexpected(&format!("'{keyword}' without matching 'if'"))),
            kw if UNSUPPORTED_STATEMENTS.contains(&kw) => Err(ParseError::new(
                format!("'{kw}' is not supported in strategy code"),
                token.line,
                token.column,
            )),
            _ => self.simple_statement(),
        }
    }

    fn function_def(&mut self) -> Result<FunctionDef, ParseError> {
        let line = self.peek().line;
        self.expect_keyword("def")?;
        let name = self.expect_identifier("function name")?;
        self.expect(TokenKind::LParen)?;
        let mut params: Vec<Param> = vec![];
        while self.peek_kind() != &TokenKind::RParen {
            let (param_line, param_column) = (self.peek().line, self.peek().column);
            let param = self.expect_identifier("parameter name")?;
            if params.iter().any(|p| p.name == param) {
                return Err(ParseError::new(
                    format!("duplicate parameter '{param}'"),
                    param_line,
                    param_column,
                ));
            }
            let default = if self.eat(&TokenKind::Assign) {
                Some(self.expression()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return Err(ParseError::new(
                        "parameter without a default follows parameter with a default",
                        param_line,
                        param_column,
                    ));
                }
                None
            };
            params.push(Param {
                name: param,
                default,
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        let body = self.block()?;
        Ok(FunctionDef {
            name,
            params,
            body,
            line,
        })
    }

    fn if_statement(&mut self) -> Result<Stmt, ParseError> {
        let line = self.peek().line;
        self.expect_keyword("if")?;
        let mut branches = vec![];
        let cond = self.expression()?;
        branches.push((cond, self.block()?));
        let mut orelse = vec![];
        loop {
            if self.eat_keyword("elif") {
                let cond = self.expression()?;
                branches.push((cond, self.block()?));
            } else if self.eat_keyword("else") {
                orelse = self.block()?;
                break;
            } else {
                break;
            }
        }
        Ok(Stmt {
            kind: StmtKind::If { branches, orelse },
            line,
        })
    }

    /// Statement that fits on one logical line.
    fn simple_statement(&mut self) -> Result<Stmt, ParseError> {
        let token = self.peek().clone();
        let line = token.line;
        let kind = match &token.kind {
            TokenKind::Name(kw) if kw == "return" => {
                self.advance();
                if matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Eof) {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.expression()?))
                }
            }
            TokenKind::Name(kw) if kw == "pass" => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::Name(kw) if kw == "break" => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::Name(kw) if kw == "continue" => {
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Name(kw) if kw == "import" => {
                self.advance();
                let mut names = vec![self.dotted_name()?];
                while self.eat(&TokenKind::Comma) {
                    names.push(self.dotted_name()?);
                }
                StmtKind::Import(names)
            }
            TokenKind::Name(kw)
                if matches!(
                    kw.as_str(),
                    "def" | "if" | "elif" | "else" | "for" | "while"
                ) =>
            {
                return Err(self.unexpected("compound statement is not allowed here"));
            }
            TokenKind::Name(target) if self.is_assignment_ahead() => {
                let target = target.clone();
                self.advance();
                let op = self.advance();
                let value = self.expression()?;
                match op.kind {
                    TokenKind::Assign => StmtKind::Assign { target, value },
                    TokenKind::PlusAssign => StmtKind::AugAssign {
                        target,
                        op: BinOp::Add,
                        value,
                    },
                    TokenKind::MinusAssign => StmtKind::AugAssign {
                        target,
                        op: BinOp::Sub,
                        value,
                    },
                    _ => StmtKind::AugAssign {
                        target,
                        op: BinOp::Mul,
                        value,
                    },
                }
            }
            _ => {
                let expr = self.expression()?;
                if matches!(
                    self.peek_kind(),
                    TokenKind::Assign
                        | TokenKind::PlusAssign
                        | TokenKind::MinusAssign
                        | TokenKind::StarAssign
                ) {
                    return Err(self.unexpected("only plain names can be assigned to"));
                }
                StmtKind::Expr(expr)
            }
        };

        if !matches!(
            self.peek_kind(),
            TokenKind::Newline | TokenKind::Eof | TokenKind::Dedent
        ) {
            return Err(self.unexpected("expected end of statement"));
        }
        self.eat(&TokenKind::Newline);
        Ok(Stmt { kind, line })
    }

    /// Assignment targets are any single name, reserved words included, so that the validator can
    /// report a shadowed keyword rather than a bare syntax error.
    fn is_assignment_ahead(&self) -> bool {
        matches!(
            self.peek_kind_at(1),
            TokenKind::Assign | TokenKind::PlusAssign | TokenKind::MinusAssign | TokenKind::StarAssign
        )
    }

    fn assignment_target(&mut self) -> Result<String, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Name(name) if name != "in" => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("expected loop variable")),
        }
    }

    fn dotted_name(&mut self) -> Result<String, ParseError> {
        let mut name = self.expect_identifier("module name")?;
        while self.eat(&TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.expect_identifier("module name")?);
        }
        Ok(name)
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        if self.in_expression {
            return self.nested(Self::or_expr);
        }
        let start = self.peek().clone();
        self.in_expression = true;
        self.links = 0;
        let expr = self.nested(Self::or_expr);
        self.in_expression = false;
        let expr = expr?;
        if expression_depth(&expr) > MAX_EXPRESSION_DEPTH {
            return Err(ParseError::new(
                format!("expression is nested deeper than {MAX_EXPRESSION_DEPTH} levels"),
                start.line,
                start.column,
            ));
        }
        Ok(expr)
    }

    /// Accounts for one more node wrapping an existing subtree.
    fn link(&mut self) -> Result<(), ParseError> {
        self.links += 1;
        if self.links > MAX_EXPRESSION_LINKS {
            return Err(self.unexpected(&format!(
                "expression has more than {MAX_EXPRESSION_LINKS} operators"
            )));
        }
        Ok(())
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("or") {
            self.link()?;
            let right = self.and_expr()?;
            left = Expr::Bool {
                op: BoolOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.not_expr()?;
        while self.eat_keyword("and") {
            self.link()?;
            let right = self.not_expr()?;
            left = Expr::Bool {
                op: BoolOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ParseError> {
        let mut count = 0;
        while self.eat_keyword("not") {
            self.link()?;
            count += 1;
        }
        let mut expr = self.comparison()?;
        for _ in 0..count {
            expr = Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(expr),
            };
        }
        Ok(expr)
    }

    fn comparison_operator(&mut self) -> Option<CmpOp> {
        let op = match self.peek_kind().clone() {
            TokenKind::EqEq => CmpOp::Eq,
            TokenKind::NotEq => CmpOp::NotEq,
            TokenKind::Lt => CmpOp::Lt,
            TokenKind::Le => CmpOp::Le,
            TokenKind::Gt => CmpOp::Gt,
            TokenKind::Ge => CmpOp::Ge,
            TokenKind::Name(kw) if kw == "in" => CmpOp::In,
            TokenKind::Name(kw) if kw == "not" => {
                if !matches!(self.peek_kind_at(1), TokenKind::Name(next) if next == "in") {
                    return None;
                }
                self.advance();
                CmpOp::NotIn
            }
            TokenKind::Name(kw) if kw == "is" => {
                self.advance();
                if self.eat_keyword("not") {
                    return Some(CmpOp::IsNot);
                }
                return Some(CmpOp::Is);
            }
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.arith()?;
        let mut rest = vec![];
        while let Some(op) = self.comparison_operator() {
            self.link()?;
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                rest,
            })
        }
    }

    fn arith(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            self.link()?;
            let right = self.term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::DoubleSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            self.link()?;
            let right = self.factor()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        let mut ops = vec![];
        loop {
            match self.peek_kind() {
                TokenKind::Minus => ops.push(UnaryOp::Neg),
                TokenKind::Plus => ops.push(UnaryOp::Pos),
                _ => break,
            }
            self.advance();
            self.link()?;
        }
        let mut expr = self.postfix()?;
        for op in ops.into_iter().rev() {
            expr = Expr::Unary {
                op,
                operand: Box::new(expr),
            };
        }
        Ok(expr)
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.atom()?;
        loop {
            if matches!(
                self.peek_kind(),
                TokenKind::LParen | TokenKind::Dot | TokenKind::LBracket
            ) {
                self.link()?;
            }
            match self.peek_kind() {
                TokenKind::LParen => {
                    self.advance();
                    let args = self.comma_separated(TokenKind::RParen)?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                    };
                }
                TokenKind::Dot => {
                    self.advance();
                    let attr = self.expect_identifier("attribute name")?;
                    expr = Expr::Attribute {
                        value: Box::new(expr),
                        attr,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    expr = self.subscript(expr)?;
                }
                _ => return Ok(expr),
            }
        }
    }

    fn subscript(&mut self, value: Expr) -> Result<Expr, ParseError> {
        let lower = if self.peek_kind() == &TokenKind::Colon {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        if self.eat(&TokenKind::Colon) {
            let upper = if self.peek_kind() == &TokenKind::RBracket {
                None
            } else {
                Some(Box::new(self.expression()?))
            };
            self.expect(TokenKind::RBracket)?;
            return Ok(Expr::Slice {
                value: Box::new(value),
                lower,
                upper,
            });
        }
        self.expect(TokenKind::RBracket)?;
        match lower {
            Some(index) => Ok(Expr::Subscript {
                value: Box::new(value),
                index,
            }),
            None => Err(self.unexpected("expected index")),
        }
    }

    fn comma_separated(&mut self, close: TokenKind) -> Result<Vec<Expr>, ParseError> {
        let mut items = vec![];
        while self.peek_kind() != &close {
            items.push(self.expression()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(close)?;
        Ok(items)
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        let expr = match token.kind {
            TokenKind::Int(v) => Expr::Literal(Literal::Int(v)),
            TokenKind::Float(v) => Expr::Literal(Literal::Float(v)),
            TokenKind::Str(mut s) => {
                // adjacent string literals concatenate
                self.advance();
                while let TokenKind::Str(next) = self.peek_kind() {
                    s.push_str(next);
                    self.advance();
                }
                return Ok(Expr::Literal(Literal::Str(s)));
            }
            TokenKind::Name(ref name) => match name.as_str() {
                "True" => Expr::Literal(Literal::Bool(true)),
                "False" => Expr::Literal(Literal::Bool(false)),
                "None" => Expr::Literal(Literal::None),
                kw if is_keyword(kw) => {
                    return Err(self.unexpected("expected expression"));
                }
                _ => Expr::Name(name.clone()),
            },
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(TokenKind::RParen)?;
                return Ok(inner);
            }
            TokenKind::LBracket => {
                self.advance();
                return Ok(Expr::List(self.comma_separated(TokenKind::RBracket)?));
            }
            _ => return Err(self.unexpected("expected expression")),
        };
        self.advance();
        Ok(expr)
    }
}

/// Height of an expression tree, measured without recursion.
fn expression_depth<'a>(expr: &'a Expr) -> usize {
    let mut deepest = 0;
    let mut pending = vec![(expr, 1)];
    while let Some((expr, depth)) = pending.pop() {
        deepest = deepest.max(depth);
        let mut push = |child: &'a Expr| pending.push((child, depth + 1));
        match expr {
            Expr::Literal(_) | Expr::Name(_) => {}
            Expr::List(items) => items.iter().for_each(&mut push),
            Expr::Unary { operand, .. } => push(operand),
            Expr::Binary { left, right, .. } | Expr::Bool { left, right, .. } => {
                push(left);
                push(right);
            }
            Expr::Compare { left, rest } => {
                push(left);
                rest.iter().for_each(|(_, right)| push(right));
            }
            Expr::Call { func, args } => {
                push(func);
                args.iter().for_each(&mut push);
            }
            Expr::Attribute { value, .. } => push(value),
            Expr::Subscript { value, index } => {
                push(value);
                push(index);
            }
            Expr::Slice {
                value,
                lower,
                upper,
            } => {
                push(value);
                lower.iter().chain(upper).for_each(|bound| push(bound));
            }
        }
    }
    deepest
}
