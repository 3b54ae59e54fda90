use crate::ast::{Chain, ChainHead, Literal, MethodCall, NodeDecl, Program, Statement, VarDecl};
use crate::lambda::{BinaryOp, Expr, UnaryOp};
use crate::{Result, ScriptError};
use weir_common::types::TaskType;

/// Parses a script into its AST.
///
/// This is the seam to the script language front end: everything past this
/// function works on the AST only.
pub fn parse(source: &str) -> Result<Program> {
    let tokens = lex(source)?;
    Parser { tokens, pos: 0 }.program()
}

/// Parses a lambda expression body on its own, as supplied in lambda-typed
/// var values.
pub fn parse_lambda(source: &str) -> Result<Expr> {
    let source = source.trim();
    let source = source.strip_prefix("lambda:").unwrap_or(source);
    let tokens = lex(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr(0)?;
    match parser.peek() {
        Tok::Eof => Ok(expr),
        got => Err(err(parser.line(), format!("trailing input after expression: {got:?}"))),
    }
}

/// Parses a bare duration literal such as `10s` or `1h30m` (single unit).
pub fn parse_duration(source: &str) -> Option<i64> {
    let tokens = lex(source.trim()).ok()?;
    match tokens.first().map(|t| &t.tok) {
        Some(Tok::Duration(ns)) if tokens.len() == 2 => Some(*ns),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    // 'single quoted' string literal
    Str(String),
    // "double quoted" field/tag reference
    Ref(String),
    Int(i64),
    Float(f64),
    Duration(i64),
    Regex(String),
    Pipe,
    Dot,
    At,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Assign,
    Lt,
    Lte,
    Gt,
    Gte,
    EqEq,
    Neq,
    Plus,
    Minus,
    Star,
    Slash,
    Bang,
    RegexMatch,
    RegexNotMatch,
    Colon,
    Eof,
}

struct Token {
    tok: Tok,
    line: usize,
}

fn err(line: usize, msg: impl Into<String>) -> ScriptError {
    ScriptError::Parse {
        line,
        msg: msg.into(),
    }
}

fn lex(source: &str) -> Result<Vec<Token>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 1;
    // Regex literals are only legal where a value can start; track the last
    // significant token to disambiguate `/` from division.
    let mut regex_ok = true;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            '\n' => {
                line += 1;
                i += 1;
            }
            ' ' | '\t' | '\r' => i += 1,
            '/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            '/' if regex_ok => {
                let start = i + 1;
                let mut j = start;
                while j < bytes.len() && bytes[j] != b'/' {
                    if bytes[j] == b'\\' {
                        j += 1;
                    }
                    j += 1;
                }
                if j >= bytes.len() {
                    return Err(err(line, "unterminated regex literal"));
                }
                tokens.push(Token {
                    tok: Tok::Regex(source[start..j].to_string()),
                    line,
                });
                regex_ok = false;
                i = j + 1;
            }
            '\'' | '"' => {
                let quote = c as u8;
                let mut j = i + 1;
                while j < bytes.len() && bytes[j] != quote {
                    if bytes[j] == b'\\' && j + 1 < bytes.len() {
                        j += 1;
                    }
                    if bytes[j] == b'\n' {
                        line += 1;
                    }
                    j += 1;
                }
                if j >= bytes.len() {
                    return Err(err(line, "unterminated string literal"));
                }
                let mut out = String::new();
                let mut chars = source[i + 1..j].chars();
                while let Some(ch) = chars.next() {
                    if ch == '\\' {
                        if let Some(next) = chars.next() {
                            out.push(next);
                        }
                    } else {
                        out.push(ch);
                    }
                }
                tokens.push(Token {
                    tok: if quote == b'\'' {
                        Tok::Str(out)
                    } else {
                        Tok::Ref(out)
                    },
                    line,
                });
                regex_ok = false;
                i = j + 1;
            }
            '0'..='9' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let mut is_float = false;
                if i < bytes.len() && bytes[i] == b'.' && i + 1 < bytes.len()
                    && bytes[i + 1].is_ascii_digit()
                {
                    is_float = true;
                    i += 1;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let num = &source[start..i];
                // A trailing unit makes this a duration literal.
                let unit_start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphabetic() || source[i..].starts_with('µ'))
                {
                    i += source[i..].chars().next().map(char::len_utf8).unwrap_or(1);
                }
                let unit = &source[unit_start..i];
                let tok = if unit.is_empty() {
                    if is_float {
                        Tok::Float(num.parse().map_err(|e| err(line, format!("bad float: {e}")))?)
                    } else {
                        Tok::Int(num.parse().map_err(|e| err(line, format!("bad int: {e}")))?)
                    }
                } else {
                    let scale: i64 = match unit {
                        "ns" => 1,
                        "u" | "us" | "µs" => 1_000,
                        "ms" => 1_000_000,
                        "s" => 1_000_000_000,
                        "m" => 60 * 1_000_000_000,
                        "h" => 3_600 * 1_000_000_000,
                        "d" => 86_400 * 1_000_000_000,
                        "w" => 7 * 86_400 * 1_000_000_000,
                        _ => return Err(err(line, format!("unknown duration unit {unit:?}"))),
                    };
                    let value: f64 = num.parse().map_err(|e| err(line, format!("bad number: {e}")))?;
                    Tok::Duration((value * scale as f64) as i64)
                };
                tokens.push(Token { tok, line });
                regex_ok = false;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                for (off, ch) in source[start..].char_indices() {
                    if ch.is_alphanumeric() || ch == '_' {
                        i = start + off + ch.len_utf8();
                    } else {
                        break;
                    }
                }
                let word = &source[start..i];
                tokens.push(Token {
                    tok: Tok::Ident(word.to_string()),
                    line,
                });
                regex_ok = false;
            }
            _ => {
                let (tok, len) = match (c, bytes.get(i + 1).map(|b| *b as char)) {
                    ('|', _) => (Tok::Pipe, 1),
                    ('.', _) => (Tok::Dot, 1),
                    ('@', _) => (Tok::At, 1),
                    ('(', _) => (Tok::LParen, 1),
                    (')', _) => (Tok::RParen, 1),
                    ('[', _) => (Tok::LBracket, 1),
                    (']', _) => (Tok::RBracket, 1),
                    (',', _) => (Tok::Comma, 1),
                    (':', _) => (Tok::Colon, 1),
                    ('=', Some('=')) => (Tok::EqEq, 2),
                    ('=', Some('~')) => (Tok::RegexMatch, 2),
                    ('=', _) => (Tok::Assign, 1),
                    ('!', Some('=')) => (Tok::Neq, 2),
                    ('!', Some('~')) => (Tok::RegexNotMatch, 2),
                    ('!', _) => (Tok::Bang, 1),
                    ('<', Some('=')) => (Tok::Lte, 2),
                    ('<', _) => (Tok::Lt, 1),
                    ('>', Some('=')) => (Tok::Gte, 2),
                    ('>', _) => (Tok::Gt, 1),
                    ('+', _) => (Tok::Plus, 1),
                    ('-', _) => (Tok::Minus, 1),
                    ('*', _) => (Tok::Star, 1),
                    ('/', _) => (Tok::Slash, 1),
                    _ => return Err(err(line, format!("unexpected character {c:?}"))),
                };
                // After ) ] or a value, `/` would be division; everywhere
                // else a value may start.
                regex_ok = !matches!(tok, Tok::RParen | Tok::RBracket);
                tokens.push(Token { tok, line });
                i += len;
            }
        }
    }
    tokens.push(Token {
        tok: Tok::Eof,
        line,
    });
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].tok
    }

    fn line(&self) -> usize {
        self.tokens[self.pos].line
    }

    fn next(&mut self) -> Tok {
        let tok = self.tokens[self.pos].tok.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: Tok, what: &str) -> Result<()> {
        let line = self.line();
        let got = self.next();
        if got == want {
            Ok(())
        } else {
            Err(err(line, format!("expected {what}, found {got:?}")))
        }
    }

    fn ident(&mut self, what: &str) -> Result<String> {
        let line = self.line();
        match self.next() {
            Tok::Ident(s) => Ok(s),
            got => Err(err(line, format!("expected {what}, found {got:?}"))),
        }
    }

    fn program(&mut self) -> Result<Program> {
        let mut statements = Vec::new();
        while *self.peek() != Tok::Eof {
            statements.push(self.statement()?);
        }
        if statements.is_empty() {
            return Err(err(self.line(), "empty script"));
        }
        Ok(Program { statements })
    }

    fn statement(&mut self) -> Result<Statement> {
        match self.peek() {
            Tok::Ident(word) if word == "var" => {
                self.next();
                let name = self.ident("var name")?;
                if *self.peek() == Tok::Assign {
                    self.next();
                    // Chain binding or literal default.
                    if let Tok::Ident(word) = self.peek() {
                        if word == "stream" || word == "batch" {
                            let chain = self.chain()?;
                            return Ok(Statement::Var(VarDecl::Chain { name, chain }));
                        }
                        // Identifier followed by a pipe is a chain ref.
                        if matches!(self.tokens.get(self.pos + 1).map(|t| &t.tok), Some(Tok::Pipe | Tok::At)) {
                            let chain = self.chain()?;
                            return Ok(Statement::Var(VarDecl::Chain { name, chain }));
                        }
                    }
                    let value = self.literal()?;
                    Ok(Statement::Var(VarDecl::Literal { name, value }))
                } else {
                    let var_type = self.ident("var type")?;
                    Ok(Statement::Var(VarDecl::Typed { name, var_type }))
                }
            }
            _ => Ok(Statement::Chain(self.chain()?)),
        }
    }

    fn chain(&mut self) -> Result<Chain> {
        let line = self.line();
        let head = match self.next() {
            Tok::Ident(word) if word == "stream" => ChainHead::Source(TaskType::Stream),
            Tok::Ident(word) if word == "batch" => ChainHead::Source(TaskType::Batch),
            Tok::Ident(name) => ChainHead::Ref(name),
            got => return Err(err(line, format!("expected chain source, found {got:?}"))),
        };
        let mut nodes = Vec::new();
        loop {
            match self.peek() {
                Tok::Pipe => {
                    self.next();
                    nodes.push(self.node(false)?);
                }
                Tok::At => {
                    self.next();
                    nodes.push(self.node(true)?);
                }
                _ => break,
            }
        }
        Ok(Chain { head, nodes })
    }

    fn node(&mut self, udf: bool) -> Result<NodeDecl> {
        let name = self.ident("node name")?;
        let args = if *self.peek() == Tok::LParen {
            self.arg_list()?
        } else if udf {
            Vec::new()
        } else {
            return Err(err(self.line(), format!("expected '(' after node {name:?}")));
        };
        let mut props = Vec::new();
        while *self.peek() == Tok::Dot {
            self.next();
            let prop = self.ident("property name")?;
            let prop_args = self.arg_list()?;
            props.push(MethodCall {
                name: prop,
                args: prop_args,
            });
        }
        Ok(NodeDecl {
            name,
            args,
            props,
            udf,
        })
    }

    fn arg_list(&mut self) -> Result<Vec<Literal>> {
        self.expect(Tok::LParen, "'('")?;
        let mut args = Vec::new();
        if *self.peek() == Tok::RParen {
            self.next();
            return Ok(args);
        }
        loop {
            args.push(self.literal()?);
            match self.next() {
                Tok::Comma => continue,
                Tok::RParen => break,
                got => return Err(err(self.line(), format!("expected ',' or ')', found {got:?}"))),
            }
        }
        Ok(args)
    }

    fn literal(&mut self) -> Result<Literal> {
        let line = self.line();
        match self.peek().clone() {
            Tok::Ident(word) if word == "lambda" => {
                self.next();
                self.expect(Tok::Colon, "':' after lambda")?;
                let expr = self.expr(0)?;
                Ok(Literal::Lambda(expr))
            }
            Tok::Ident(word) if word == "TRUE" => {
                self.next();
                Ok(Literal::Bool(true))
            }
            Tok::Ident(word) if word == "FALSE" => {
                self.next();
                Ok(Literal::Bool(false))
            }
            Tok::Ident(name) => {
                self.next();
                Ok(Literal::Var(name))
            }
            Tok::Str(s) => {
                self.next();
                Ok(Literal::Str(s))
            }
            Tok::Int(i) => {
                self.next();
                Ok(Literal::Int(i))
            }
            Tok::Float(f) => {
                self.next();
                Ok(Literal::Float(f))
            }
            Tok::Duration(ns) => {
                self.next();
                Ok(Literal::Duration(ns))
            }
            Tok::Regex(p) => {
                self.next();
                Ok(Literal::Regex(p))
            }
            Tok::Star => {
                self.next();
                Ok(Literal::Star)
            }
            Tok::Minus => {
                self.next();
                match self.next() {
                    Tok::Int(i) => Ok(Literal::Int(-i)),
                    Tok::Float(f) => Ok(Literal::Float(-f)),
                    Tok::Duration(ns) => Ok(Literal::Duration(-ns)),
                    got => Err(err(line, format!("expected number after '-', found {got:?}"))),
                }
            }
            Tok::LBracket => {
                self.next();
                let mut items = Vec::new();
                if *self.peek() == Tok::RBracket {
                    self.next();
                    return Ok(Literal::List(items));
                }
                loop {
                    items.push(self.literal()?);
                    match self.next() {
                        Tok::Comma => continue,
                        Tok::RBracket => break,
                        got => {
                            return Err(err(line, format!("expected ',' or ']', found {got:?}")))
                        }
                    }
                }
                Ok(Literal::List(items))
            }
            got => Err(err(line, format!("expected value, found {got:?}"))),
        }
    }

    // Precedence-climbing expression parser for lambda bodies.
    // 0: OR, 1: AND, 2: comparison, 3: +/-, 4: */slash, 5: unary.
    fn expr(&mut self, min_prec: u8) -> Result<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let (op, prec) = match self.peek() {
                Tok::Ident(word) if word == "OR" => (BinaryOp::Or, 0),
                Tok::Ident(word) if word == "AND" => (BinaryOp::And, 1),
                Tok::EqEq => (BinaryOp::Eq, 2),
                Tok::Neq => (BinaryOp::Neq, 2),
                Tok::Lt => (BinaryOp::Lt, 2),
                Tok::Lte => (BinaryOp::Lte, 2),
                Tok::Gt => (BinaryOp::Gt, 2),
                Tok::Gte => (BinaryOp::Gte, 2),
                Tok::RegexMatch => (BinaryOp::RegexMatch, 2),
                Tok::RegexNotMatch => (BinaryOp::RegexNotMatch, 2),
                Tok::Plus => (BinaryOp::Add, 3),
                Tok::Minus => (BinaryOp::Sub, 3),
                Tok::Star => (BinaryOp::Mul, 4),
                Tok::Slash => (BinaryOp::Div, 4),
                _ => break,
            };
            if prec < min_prec {
                break;
            }
            self.next();
            let rhs = self.expr(prec + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        let line = self.line();
        match self.peek().clone() {
            Tok::Bang => {
                self.next();
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)))
            }
            Tok::Minus => {
                self.next();
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            Tok::LParen => {
                self.next();
                let inner = self.expr(0)?;
                self.expect(Tok::RParen, "')'")?;
                Ok(inner)
            }
            Tok::Ref(name) => {
                self.next();
                Ok(Expr::Ref(name))
            }
            Tok::Str(s) => {
                self.next();
                Ok(Expr::Str(s))
            }
            Tok::Int(i) => {
                self.next();
                Ok(Expr::Int(i))
            }
            Tok::Float(f) => {
                self.next();
                Ok(Expr::Float(f))
            }
            Tok::Duration(ns) => {
                self.next();
                Ok(Expr::Duration(ns))
            }
            Tok::Regex(p) => {
                self.next();
                Ok(Expr::Regex(p))
            }
            Tok::Ident(word) if word == "TRUE" => {
                self.next();
                Ok(Expr::Bool(true))
            }
            Tok::Ident(word) if word == "FALSE" => {
                self.next();
                Ok(Expr::Bool(false))
            }
            got => Err(err(line, format!("expected expression, found {got:?}"))),
        }
    }
}
