//! Script grammar: a line-oriented command language over the capability
//! surface.
//!
//! Very small grammar on purpose; keep it predictable. A program is a single
//! `main:` block closed by `end`:
//!
//! ```text
//! main:
//!     let spot = find_block block="oak_log" range=32
//!     if spot.found:
//!         go_to x=spot.position.x y=spot.position.y z=spot.position.z
//!         collect_block block="oak_log"
//!     else:
//!         chat message="no trees nearby"
//!     end
//!     repeat 2:
//!         jump
//!     end
//!     return "done"
//! end
//! ```
//!
//! Operation names resolve against the closed [`ScriptOp`] list at parse
//! time, so a program that names anything outside the capability surface is
//! rejected before a single call runs.

use serde_json::Value;

use super::api::ScriptOp;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let {
        name: String,
        value: Expr,
        line: usize,
    },
    Call {
        call: Call,
        line: usize,
    },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
        line: usize,
    },
    Repeat {
        count: u32,
        body: Vec<Stmt>,
        line: usize,
    },
    Return {
        value: Option<Expr>,
        line: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub op: ScriptOp,
    /// Named arguments in source order, script-side keys.
    pub args: Vec<(String, Expr)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Dotted variable path: `spot.position.x`.
    Path(Vec<String>),
    Not(Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Call(Box<Call>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

fn err(line: usize, message: impl Into<String>) -> ParseError {
    ParseError {
        line,
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(f64),
    Assign,
    EqEq,
    NotEq,
    Colon,
}

fn lex_line(line: &str, lineno: usize) -> Result<Vec<Tok>, ParseError> {
    let mut toks = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '#' => break,
            ':' => {
                chars.next();
                toks.push(Tok::Colon);
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    toks.push(Tok::EqEq);
                } else {
                    toks.push(Tok::Assign);
                }
            }
            '!' => {
                chars.next();
                if chars.next() == Some('=') {
                    toks.push(Tok::NotEq);
                } else {
                    return Err(err(lineno, "expected '=' after '!'"));
                }
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some('"') => s.push('"'),
                            Some('\\') => s.push('\\'),
                            Some('n') => s.push('\n'),
                            other => {
                                return Err(err(
                                    lineno,
                                    format!("bad escape {:?} in string", other),
                                ));
                            }
                        },
                        other => s.push(other),
                    }
                }
                if !closed {
                    return Err(err(lineno, "unterminated string"));
                }
                toks.push(Tok::Str(s));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut s = String::new();
                s.push(c);
                chars.next();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n: f64 = s
                    .parse()
                    .map_err(|_| err(lineno, format!("bad number '{s}'")))?;
                toks.push(Tok::Num(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                toks.push(Tok::Ident(s));
            }
            other => return Err(err(lineno, format!("unexpected character '{other}'"))),
        }
    }

    Ok(toks)
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

fn atom(toks: &[Tok], pos: &mut usize, lineno: usize) -> Result<Expr, ParseError> {
    let tok = toks
        .get(*pos)
        .ok_or_else(|| err(lineno, "expected a value"))?;
    *pos += 1;
    match tok {
        Tok::Str(s) => Ok(Expr::Literal(Value::String(s.clone()))),
        Tok::Num(n) => Ok(Expr::Literal(number(*n))),
        Tok::Ident(name) => match name.as_str() {
            "true" => Ok(Expr::Literal(Value::Bool(true))),
            "false" => Ok(Expr::Literal(Value::Bool(false))),
            "null" => Ok(Expr::Literal(Value::Null)),
            _ => {
                let segments: Vec<String> = name.split('.').map(str::to_string).collect();
                if segments.iter().any(|s| s.is_empty()) {
                    return Err(err(lineno, format!("malformed path '{name}'")));
                }
                Ok(Expr::Path(segments))
            }
        },
        other => Err(err(lineno, format!("expected a value, got {other:?}"))),
    }
}

fn unary(toks: &[Tok], pos: &mut usize, lineno: usize) -> Result<Expr, ParseError> {
    if let Some(Tok::Ident(name)) = toks.get(*pos)
        && name == "not"
    {
        *pos += 1;
        return Ok(Expr::Not(Box::new(unary(toks, pos, lineno)?)));
    }
    atom(toks, pos, lineno)
}

/// `expr := unary (('==' | '!=') unary)?`
fn expr(toks: &[Tok], pos: &mut usize, lineno: usize) -> Result<Expr, ParseError> {
    let lhs = unary(toks, pos, lineno)?;
    match toks.get(*pos) {
        Some(Tok::EqEq) => {
            *pos += 1;
            let rhs = unary(toks, pos, lineno)?;
            Ok(Expr::Eq(Box::new(lhs), Box::new(rhs)))
        }
        Some(Tok::NotEq) => {
            *pos += 1;
            let rhs = unary(toks, pos, lineno)?;
            Ok(Expr::Ne(Box::new(lhs), Box::new(rhs)))
        }
        _ => Ok(lhs),
    }
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

fn parse_call(op_name: &str, toks: &[Tok], pos: &mut usize, lineno: usize) -> Result<Call, ParseError> {
    let Some(op) = ScriptOp::parse(op_name) else {
        return Err(err(lineno, format!("unknown operation '{op_name}'")));
    };

    let mut args: Vec<(String, Expr)> = Vec::new();
    while *pos < toks.len() {
        let Some(Tok::Ident(key)) = toks.get(*pos) else {
            return Err(err(lineno, format!("expected key=value argument for '{op_name}'")));
        };
        let key = key.clone();
        *pos += 1;
        if toks.get(*pos) != Some(&Tok::Assign) {
            return Err(err(lineno, format!("expected '=' after argument '{key}'")));
        }
        *pos += 1;
        let value = atom(toks, pos, lineno)?;
        if args.iter().any(|(k, _)| *k == key) {
            return Err(err(lineno, format!("duplicate argument '{key}'")));
        }
        args.push((key, value));
    }

    // Static argument validation: required keys present, unknown keys out.
    for spec in op.arg_specs() {
        if spec.required && !args.iter().any(|(k, _)| k == spec.key) {
            return Err(err(
                lineno,
                format!("'{}' requires argument '{}'", op.name(), spec.key),
            ));
        }
    }
    if !op.allows_extra_args() {
        for (key, _) in &args {
            if !op.arg_specs().iter().any(|s| s.key == key) {
                return Err(err(
                    lineno,
                    format!("'{}' does not take argument '{key}'", op.name()),
                ));
            }
        }
    }

    Ok(Call { op, args })
}

// ---------------------------------------------------------------------------
// Program parser
// ---------------------------------------------------------------------------

enum Frame {
    Main {
        body: Vec<Stmt>,
    },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
        in_else: bool,
        line: usize,
    },
    Repeat {
        count: u32,
        body: Vec<Stmt>,
        line: usize,
    },
}

impl Program {
    pub fn parse(source: &str) -> Result<Program, ParseError> {
        let mut stack: Vec<Frame> = Vec::new();
        let mut finished: Option<Vec<Stmt>> = None;

        for (idx, raw_line) in source.lines().enumerate() {
            let lineno = idx + 1;
            let toks = lex_line(raw_line, lineno)?;
            if toks.is_empty() {
                continue;
            }

            if finished.is_some() {
                return Err(err(lineno, "statements after final 'end'"));
            }

            if stack.is_empty() {
                if toks == [Tok::Ident("main".to_string()), Tok::Colon] {
                    stack.push(Frame::Main { body: Vec::new() });
                    continue;
                }
                return Err(err(lineno, "program must start with 'main:'"));
            }

            let Some(Tok::Ident(head)) = toks.first() else {
                return Err(err(lineno, "expected a statement"));
            };
            let head = head.clone();
            let mut pos = 1;

            match head.as_str() {
                "main" => return Err(err(lineno, "nested 'main:' block")),
                "end" => {
                    if pos != toks.len() {
                        return Err(err(lineno, "'end' takes nothing else"));
                    }
                    match stack.pop() {
                        Some(Frame::Main { body }) => finished = Some(body),
                        Some(Frame::If {
                            cond,
                            then_body,
                            else_body,
                            line,
                            ..
                        }) => push_stmt(
                            &mut stack,
                            Stmt::If {
                                cond,
                                then_body,
                                else_body,
                                line,
                            },
                        ),
                        Some(Frame::Repeat { count, body, line }) => {
                            push_stmt(&mut stack, Stmt::Repeat { count, body, line })
                        }
                        None => return Err(err(lineno, "'end' without an open block")),
                    }
                }
                "else" => {
                    if toks.get(pos) != Some(&Tok::Colon) || pos + 1 != toks.len() {
                        return Err(err(lineno, "expected 'else:'"));
                    }
                    match stack.last_mut() {
                        Some(Frame::If { in_else, .. }) if !*in_else => *in_else = true,
                        Some(Frame::If { .. }) => {
                            return Err(err(lineno, "second 'else:' in one 'if'"));
                        }
                        _ => return Err(err(lineno, "'else:' outside an 'if' block")),
                    }
                }
                "if" => {
                    let cond = expr(&toks, &mut pos, lineno)?;
                    if toks.get(pos) != Some(&Tok::Colon) || pos + 1 != toks.len() {
                        return Err(err(lineno, "expected ':' to close the 'if' line"));
                    }
                    stack.push(Frame::If {
                        cond,
                        then_body: Vec::new(),
                        else_body: Vec::new(),
                        in_else: false,
                        line: lineno,
                    });
                }
                "repeat" => {
                    let Some(Tok::Num(n)) = toks.get(pos) else {
                        return Err(err(lineno, "expected a count after 'repeat'"));
                    };
                    if n.fract() != 0.0 || *n < 0.0 {
                        return Err(err(lineno, "repeat count must be a non-negative integer"));
                    }
                    let count = *n as u32;
                    pos += 1;
                    if toks.get(pos) != Some(&Tok::Colon) || pos + 1 != toks.len() {
                        return Err(err(lineno, "expected ':' after the repeat count"));
                    }
                    stack.push(Frame::Repeat {
                        count,
                        body: Vec::new(),
                        line: lineno,
                    });
                }
                "let" => {
                    let Some(Tok::Ident(name)) = toks.get(pos) else {
                        return Err(err(lineno, "expected a variable name after 'let'"));
                    };
                    let name = name.clone();
                    if name.contains('.') {
                        return Err(err(lineno, "variable names cannot contain '.'"));
                    }
                    pos += 1;
                    if toks.get(pos) != Some(&Tok::Assign) {
                        return Err(err(lineno, "expected '=' in 'let'"));
                    }
                    pos += 1;
                    let value = parse_let_value(&toks, &mut pos, lineno)?;
                    if pos != toks.len() {
                        return Err(err(lineno, "trailing tokens after 'let' value"));
                    }
                    push_stmt(&mut stack, Stmt::Let {
                        name,
                        value,
                        line: lineno,
                    });
                }
                "return" => {
                    let value = if pos == toks.len() {
                        None
                    } else {
                        let v = expr(&toks, &mut pos, lineno)?;
                        if pos != toks.len() {
                            return Err(err(lineno, "trailing tokens after 'return'"));
                        }
                        Some(v)
                    };
                    push_stmt(&mut stack, Stmt::Return {
                        value,
                        line: lineno,
                    });
                }
                _ => {
                    let call = parse_call(&head, &toks, &mut pos, lineno)?;
                    push_stmt(&mut stack, Stmt::Call {
                        call,
                        line: lineno,
                    });
                }
            }
        }

        match finished {
            Some(body) => Ok(Program { body }),
            None => {
                if stack.is_empty() {
                    Err(err(0, "empty program; expected a 'main:' block"))
                } else {
                    Err(err(0, "unclosed block; missing 'end'"))
                }
            }
        }
    }
}

/// A `let` right-hand side is either a capability call or a plain
/// expression; a leading identifier that names an op makes it a call.
fn parse_let_value(toks: &[Tok], pos: &mut usize, lineno: usize) -> Result<Expr, ParseError> {
    if let Some(Tok::Ident(name)) = toks.get(*pos)
        && ScriptOp::parse(name).is_some()
    {
        let name = name.clone();
        *pos += 1;
        let call = parse_call(&name, toks, pos, lineno)?;
        return Ok(Expr::Call(Box::new(call)));
    }
    expr(toks, pos, lineno)
}

fn push_stmt(stack: &mut [Frame], stmt: Stmt) {
    match stack.last_mut() {
        Some(Frame::Main { body }) | Some(Frame::Repeat { body, .. }) => body.push(stmt),
        Some(Frame::If {
            then_body,
            else_body,
            in_else,
            ..
        }) => {
            if *in_else {
                else_body.push(stmt)
            } else {
                then_body.push(stmt)
            }
        }
        None => unreachable!("statement outside any block"),
    }
}
