//! Tree-walking evaluator for strategy functions.
//!
//! Name lookup sees only the function's locals and the [`Builtin`] table; the only source of
//! randomness is the generator handed to [`Interpreter::new`]. Every statement and loop iteration
//! consumes one step of the budget, and sequence-producing operations consume one step per
//! element, so a runaway strategy ends in a [`RuntimeError`] instead of a hung worker.

use std::collections::HashMap;

use rand::Rng;

use super::ast::{BinOp, BoolOp, CmpOp, Expr, FunctionDef, Literal, Stmt, StmtKind, UnaryOp};
use super::value::{Builtin, Number, Value};
use super::RuntimeError;

/// Longest list or string a strategy may build.
pub const MAX_SEQUENCE_LEN: usize = 100_000;

type Env = HashMap<String, Value>;

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

pub struct Interpreter<'r, R: Rng> {
    rng: &'r mut R,
    budget: u64,
    steps: u64,
    line: usize,
}

impl<'r, R: Rng> Interpreter<'r, R> {
    pub fn new(rng: &'r mut R, budget: u64) -> Self {
        Self {
            rng,
            budget,
            steps: 0,
            line: 0,
        }
    }

    /// Calls `def` with positional `args`; missing trailing arguments take their defaults.
    pub fn call(&mut self, def: &FunctionDef, args: Vec<Value>) -> Result<Value, RuntimeError> {
        self.call_with(def, args.into_iter().map(Some).collect())
    }

    /// Like [`call`](Self::call), but a `None` argument also falls back to the parameter's
    /// default.
    pub fn call_with(
        &mut self,
        def: &FunctionDef,
        args: Vec<Option<Value>>,
    ) -> Result<Value, RuntimeError> {
        self.line = def.line;
        if args.len() > def.params.len() {
            return Err(self.error(format!(
                "{}() takes {} positional arguments but {} were given",
                def.name,
                def.params.len(),
                args.len()
            )));
        }

        let mut env = Env::new();
        let mut args = args.into_iter();
        for param in &def.params {
            let value = match (args.next().flatten(), &param.default) {
                (Some(value), _) => value,
                (None, Some(default)) => self.eval(default, &mut Env::new())?,
                (None, None) => {
                    return Err(self.error(format!(
                        "{}() missing required argument '{}'",
                        def.name, param.name
                    )))
                }
            };
            env.insert(param.name.clone(), value);
        }

        match self.exec_block(&def.body, &mut env)? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn error(&self, message: impl Into<String>) -> RuntimeError {
        RuntimeError::new(message, self.line)
    }

    fn charge(&mut self, steps: u64) -> Result<(), RuntimeError> {
        self.steps = self.steps.saturating_add(steps);
        if self.steps > self.budget {
            return Err(self.error(format!("step budget of {} exhausted", self.budget)));
        }
        Ok(())
    }

    fn check_len(&mut self, len: usize) -> Result<(), RuntimeError> {
        if len > MAX_SEQUENCE_LEN {
            return Err(self.error(format!(
                "sequence of length {len} exceeds the limit of {MAX_SEQUENCE_LEN}"
            )));
        }
        self.charge(len as u64)
    }

    fn exec_block(&mut self, body: &[Stmt], env: &mut Env) -> Result<Flow, RuntimeError> {
        for stmt in body {
            match self.exec(stmt, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, env: &mut Env) -> Result<Flow, RuntimeError> {
        self.line = stmt.line;
        self.charge(1)?;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, env)?;
            }
            StmtKind::Assign { target, value } => {
                let value = self.eval(value, env)?;
                env.insert(target.clone(), value);
            }
            StmtKind::AugAssign { target, op, value } => {
                let Some(current) = env.get(target).cloned() else {
                    return Err(self.error(format!(
                        "local variable '{target}' referenced before assignment"
                    )));
                };
                let value = self.eval(value, env)?;
                self.line = stmt.line;
                let result = self.binary(*op, current, value)?;
                env.insert(target.clone(), result);
            }
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval(cond, env)?.is_truthy() {
                        return self.exec_block(body, env);
                    }
                }
                return self.exec_block(orelse, env);
            }
            StmtKind::For { target, iter, body } => {
                let items = match self.eval(iter, env)? {
                    Value::List(items) => items,
                    Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
                    other => {
                        return Err(self.error(format!(
                            "'{}' object is not iterable",
                            other.type_name()
                        )))
                    }
                };
                for item in items {
                    self.charge(1)?;
                    env.insert(target.clone(), item);
                    match self.exec_block(body, env)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::While { cond, body } => loop {
                self.line = stmt.line;
                self.charge(1)?;
                if !self.eval(cond, env)?.is_truthy() {
                    break;
                }
                match self.exec_block(body, env)? {
                    Flow::Break => break,
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Import(names) => {
                for name in names {
                    if name != "random" {
                        return Err(self.error(format!("import of '{name}' is not permitted")));
                    }
                    env.insert(name.clone(), Value::Module("random"));
                }
            }
            StmtKind::FunctionDef(def) => {
                return Err(self.error(format!(
                    "cannot define function '{}' inside a strategy",
                    def.name
                )))
            }
        }
        Ok(Flow::Normal)
    }

    fn eval(&mut self, expr: &Expr, env: &mut Env) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::Str(s.clone()),
                Literal::Bool(b) => Value::Bool(*b),
                Literal::None => Value::None,
            }),
            Expr::Name(name) => env
                .get(name)
                .cloned()
                .or_else(|| Builtin::lookup(name))
                .ok_or_else(|| self.error(format!("name '{name}' is not defined"))),
            Expr::List(items) => {
                self.check_len(items.len())?;
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, env)?);
                }
                Ok(Value::List(values))
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, env)?;
                self.unary(*op, value)
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                self.binary(*op, left, right)
            }
            Expr::Bool { op, left, right } => {
                let left = self.eval(left, env)?;
                match (op, left.is_truthy()) {
                    (BoolOp::And, false) | (BoolOp::Or, true) => Ok(left),
                    _ => self.eval(right, env),
                }
            }
            Expr::Compare { left, rest } => {
                let mut left = self.eval(left, env)?;
                for (op, right) in rest {
                    let right = self.eval(right, env)?;
                    if !self.compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::Call { func, args } => self.eval_call(func, args, env),
            Expr::Attribute { value, attr } => match self.eval(value, env)? {
                Value::Module(_) => Builtin::random_attribute(attr)
                    .map(Value::Builtin)
                    .ok_or_else(|| {
                        self.error(format!("module 'random' has no attribute '{attr}'"))
                    }),
                other => Err(self.error(format!(
                    "'{}' attribute '{attr}' can only be called",
                    other.type_name()
                ))),
            },
            Expr::Subscript { value, index } => {
                let value = self.eval(value, env)?;
                let index = self.eval(index, env)?;
                self.subscript(value, index)
            }
            Expr::Slice {
                value,
                lower,
                upper,
            } => {
                let value = self.eval(value, env)?;
                let lower = match lower {
                    Some(expr) => Some(self.eval(expr, env)?),
                    None => None,
                };
                let upper = match upper {
                    Some(expr) => Some(self.eval(expr, env)?),
                    None => None,
                };
                self.slice(value, lower, upper)
            }
        }
    }

    fn eval_args(&mut self, args: &[Expr], env: &mut Env) -> Result<Vec<Value>, RuntimeError> {
        args.iter().map(|arg| self.eval(arg, env)).collect()
    }

    fn eval_call(
        &mut self,
        func: &Expr,
        args: &[Expr],
        env: &mut Env,
    ) -> Result<Value, RuntimeError> {
        if let Expr::Attribute { value, attr } = func {
            let receiver = self.eval(value, env)?;
            let args = self.eval_args(args, env)?;
            if let Value::Module(_) = receiver {
                let Some(builtin) = Builtin::random_attribute(attr) else {
                    return Err(self.error(format!("module 'random' has no attribute '{attr}'")));
                };
                return self.call_builtin(builtin, args);
            }
            if attr == "append" {
                return self.append(value, receiver, args, env);
            }
            return self.call_method(receiver, attr, args);
        }

        let callee = self.eval(func, env)?;
        let args = self.eval_args(args, env)?;
        match callee {
            Value::Builtin(builtin) => self.call_builtin(builtin, args),
            other => Err(self.error(format!("'{}' object is not callable", other.type_name()))),
        }
    }

    /// `list.append` is the only mutating method; it writes through to the named local.
    fn append(
        &mut self,
        target: &Expr,
        receiver: Value,
        mut args: Vec<Value>,
        env: &mut Env,
    ) -> Result<Value, RuntimeError> {
        let Value::List(items) = &receiver else {
            return Err(self.error(format!(
                "'{}' object has no attribute 'append'",
                receiver.type_name()
            )));
        };
        if args.len() != 1 {
            return Err(self.error(format!(
                "append() takes exactly one argument ({} given)",
                args.len()
            )));
        }
        self.check_len(items.len() + 1)?;
        let Expr::Name(name) = target else {
            return Err(self.error("append is only supported on local names".to_string()));
        };
        match env.get_mut(name) {
            Some(Value::List(items)) => {
                items.extend(args.pop());
                Ok(Value::None)
            }
            _ => Err(self.error("append is only supported on local names".to_string())),
        }
    }

    fn call_method(
        &mut self,
        receiver: Value,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        match (&receiver, method, args.as_slice()) {
            (Value::Str(s), "lower", []) => Ok(Value::Str(s.to_lowercase())),
            (Value::Str(s), "upper", []) => Ok(Value::Str(s.to_uppercase())),
            (Value::Str(s), "strip", []) => Ok(Value::Str(s.trim().to_string())),
            (Value::List(items), "count", [needle]) => {
                self.charge(items.len() as u64)?;
                Ok(Value::Int(
                    items.iter().filter(|item| item.loose_eq(needle)).count() as i64,
                ))
            }
            (Value::List(items), "index", [needle]) => {
                self.charge(items.len() as u64)?;
                items
                    .iter()
                    .position(|item| item.loose_eq(needle))
                    .map(|i| Value::Int(i as i64))
                    .ok_or_else(|| self.error(format!("{} is not in list", needle.repr())))
            }
            (Value::Str(s), "count", [Value::Str(needle)]) if !needle.is_empty() => {
                Ok(Value::Int(s.matches(needle.as_str()).count() as i64))
            }
            (Value::Str(_), "lower" | "upper" | "strip" | "count", _)
            | (Value::List(_), "count" | "index", _) => Err(self.error(format!(
                "{method}() got {} argument(s) of the wrong shape",
                args.len()
            ))),
            _ => Err(self.error(format!(
                "'{}' object has no attribute '{method}'",
                receiver.type_name()
            ))),
        }
    }

    fn expect_arity(
        &self,
        builtin: Builtin,
        args: &[Value],
        min: usize,
        max: usize,
    ) -> Result<(), RuntimeError> {
        if args.len() < min || args.len() > max {
            let expected = if min == max {
                format!("{min}")
            } else {
                format!("{min} to {max}")
            };
            return Err(self.error(format!(
                "{}() takes {expected} argument(s) ({} given)",
                builtin.name(),
                args.len()
            )));
        }
        Ok(())
    }

    fn int_arg(&self, builtin: Builtin, value: &Value) -> Result<i64, RuntimeError> {
        value.as_index().ok_or_else(|| {
            self.error(format!(
                "{}() expected an integer, got '{}'",
                builtin.name(),
                value.type_name()
            ))
        })
    }

    fn items_of(&self, builtin: Builtin, value: Value) -> Result<Vec<Value>, RuntimeError> {
        match value {
            Value::List(items) => Ok(items),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            other => Err(self.error(format!(
                "{}() argument '{}' object is not iterable",
                builtin.name(),
                other.type_name()
            ))),
        }
    }

    fn call_builtin(&mut self, builtin: Builtin, args: Vec<Value>) -> Result<Value, RuntimeError> {
        match builtin {
            Builtin::Len => {
                self.expect_arity(builtin, &args, 1, 1)?;
                match &args[0] {
                    Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                    Value::List(items) => Ok(Value::Int(items.len() as i64)),
                    other => Err(self.error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    ))),
                }
            }
            Builtin::Range => {
                self.expect_arity(builtin, &args, 1, 3)?;
                let ints = args
                    .iter()
                    .map(|arg| self.int_arg(builtin, arg))
                    .collect::<Result<Vec<_>, _>>()?;
                let (start, stop, step) = match ints.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => unreachable!("arity checked above"),
                };
                if step == 0 {
                    return Err(self.error("range() arg 3 must not be zero"));
                }
                let span = if step > 0 {
                    (stop as i128 - start as i128).max(0)
                } else {
                    (start as i128 - stop as i128).max(0)
                };
                let len = (span + step.unsigned_abs() as i128 - 1) / step.unsigned_abs() as i128;
                self.check_len(usize::try_from(len).unwrap_or(usize::MAX))?;
                Ok(Value::List(
                    (0..len)
                        .map(|i| Value::Int((start as i128 + i * step as i128) as i64))
                        .collect(),
                ))
            }
            Builtin::Sum => {
                self.expect_arity(builtin, &args, 1, 2)?;
                let mut args = args.into_iter();
                let items = self.items_of(builtin, args.next().unwrap_or(Value::None))?;
                let mut total = args.next().unwrap_or(Value::Int(0));
                self.charge(items.len() as u64)?;
                for item in items {
                    total = self.binary(BinOp::Add, total, item)?;
                }
                Ok(total)
            }
            Builtin::Min | Builtin::Max => {
                if args.is_empty() {
                    return Err(self.error(format!(
                        "{}() expected at least 1 argument, got 0",
                        builtin.name()
                    )));
                }
                let items = if args.len() == 1 {
                    let mut args = args;
                    self.items_of(builtin, args.remove(0))?
                } else {
                    args
                };
                self.charge(items.len() as u64)?;
                let mut items = items.into_iter();
                let Some(mut best) = items.next() else {
                    return Err(self.error(format!(
                        "{}() arg is an empty sequence",
                        builtin.name()
                    )));
                };
                for item in items {
                    let better = if builtin == Builtin::Min {
                        self.compare(CmpOp::Lt, &item, &best)?
                    } else {
                        self.compare(CmpOp::Gt, &item, &best)?
                    };
                    if better {
                        best = item;
                    }
                }
                Ok(best)
            }
            Builtin::Abs => {
                self.expect_arity(builtin, &args, 1, 1)?;
                match args[0].as_number() {
                    Some(Number::Int(i)) => i
                        .checked_abs()
                        .map(Value::Int)
                        .ok_or_else(|| self.error("integer overflow")),
                    Some(Number::Float(f)) => Ok(Value::Float(f.abs())),
                    None => Err(self.error(format!(
                        "bad operand type for abs(): '{}'",
                        args[0].type_name()
                    ))),
                }
            }
            Builtin::Int => {
                self.expect_arity(builtin, &args, 0, 1)?;
                match args.first() {
                    None => Ok(Value::Int(0)),
                    Some(Value::Str(s)) => s
                        .trim()
                        .parse::<i64>()
                        .map(Value::Int)
                        .map_err(|_| {
                            self.error(format!("invalid literal for int(): {}", Value::Str(s.clone()).repr()))
                        }),
                    Some(value) => match value.as_number() {
                        Some(Number::Int(i)) => Ok(Value::Int(i)),
                        Some(Number::Float(f)) if f.is_finite() && f.abs() < 9.2e18 => {
                            Ok(Value::Int(f.trunc() as i64))
                        }
                        Some(Number::Float(_)) => {
                            Err(self.error("cannot convert float to integer"))
                        }
                        None => Err(self.error(format!(
                            "int() argument must be a string or a number, not '{}'",
                            value.type_name()
                        ))),
                    },
                }
            }
            Builtin::Float => {
                self.expect_arity(builtin, &args, 0, 1)?;
                match args.first() {
                    None => Ok(Value::Float(0.0)),
                    Some(Value::Str(s)) => s
                        .trim()
                        .parse::<f64>()
                        .map(Value::Float)
                        .map_err(|_| self.error(format!("could not convert string to float: {}", Value::Str(s.clone()).repr()))),
                    Some(value) => value
                        .as_number()
                        .map(|n| Value::Float(n.as_f64()))
                        .ok_or_else(|| {
                            self.error(format!(
                                "float() argument must be a string or a number, not '{}'",
                                value.type_name()
                            ))
                        }),
                }
            }
            Builtin::Str => {
                self.expect_arity(builtin, &args, 0, 1)?;
                Ok(Value::Str(
                    args.first().map(Value::to_string).unwrap_or_default(),
                ))
            }
            Builtin::Bool => {
                self.expect_arity(builtin, &args, 0, 1)?;
                Ok(Value::Bool(args.first().is_some_and(Value::is_truthy)))
            }
            Builtin::List => {
                self.expect_arity(builtin, &args, 0, 1)?;
                match args.into_iter().next() {
                    None => Ok(Value::List(vec![])),
                    Some(value) => {
                        let items = self.items_of(builtin, value)?;
                        self.check_len(items.len())?;
                        Ok(Value::List(items))
                    }
                }
            }
            Builtin::RandomRandom => {
                self.expect_arity(builtin, &args, 0, 0)?;
                Ok(Value::Float(self.rng.gen::<f64>()))
            }
            Builtin::RandomRandint => {
                self.expect_arity(builtin, &args, 2, 2)?;
                let low = self.int_arg(builtin, &args[0])?;
                let high = self.int_arg(builtin, &args[1])?;
                if low > high {
                    return Err(self.error(format!("empty range for randint({low}, {high})")));
                }
                Ok(Value::Int(self.rng.gen_range(low..=high)))
            }
            Builtin::RandomChoice => {
                self.expect_arity(builtin, &args, 1, 1)?;
                let items = self.items_of(builtin, args.into_iter().next().unwrap_or(Value::None))?;
                if items.is_empty() {
                    return Err(self.error("cannot choose from an empty sequence"));
                }
                let index = self.rng.gen_range(0..items.len());
                Ok(items.into_iter().nth(index).unwrap_or(Value::None))
            }
        }
    }

    fn unary(&mut self, op: UnaryOp, value: Value) -> Result<Value, RuntimeError> {
        match op {
            UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
            UnaryOp::Neg | UnaryOp::Pos => {
                let symbol = if op == UnaryOp::Neg { "-" } else { "+" };
                let Some(number) = value.as_number() else {
                    return Err(self.error(format!(
                        "bad operand type for unary {symbol}: '{}'",
                        value.type_name()
                    )));
                };
                match (op, number) {
                    (UnaryOp::Neg, Number::Int(i)) => i
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| self.error("integer overflow")),
                    (UnaryOp::Neg, Number::Float(f)) => Ok(Value::Float(-f)),
                    (_, n) => Ok(n.into()),
                }
            }
        }
    }

    fn binary(&mut self, op: BinOp, left: Value, right: Value) -> Result<Value, RuntimeError> {
        let is_sequence = |v: &Value| matches!(v, Value::Str(_) | Value::List(_));
        if op == BinOp::Mul && (is_sequence(&left) || is_sequence(&right)) {
            return self.repeat(left, right);
        }
        match (op, &left, &right) {
            (BinOp::Add, Value::Str(a), Value::Str(b)) => {
                self.check_len(a.len() + b.len())?;
                return Ok(Value::Str(format!("{a}{b}")));
            }
            (BinOp::Add, Value::List(a), Value::List(b)) => {
                self.check_len(a.len() + b.len())?;
                let mut items = a.clone();
                items.extend(b.iter().cloned());
                return Ok(Value::List(items));
            }
            _ => {}
        }

        let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
            return Err(self.error(format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                op_symbol(op),
                left.type_name(),
                right.type_name()
            )));
        };

        let overflow = || self.error("integer overflow");
        match (a, b) {
            (Number::Int(x), Number::Int(y)) => match op {
                BinOp::Add => x.checked_add(y).map(Value::Int).ok_or_else(overflow),
                BinOp::Sub => x.checked_sub(y).map(Value::Int).ok_or_else(overflow),
                BinOp::Mul => x.checked_mul(y).map(Value::Int).ok_or_else(overflow),
                BinOp::Div => {
                    if y == 0 {
                        return Err(self.error("division by zero"));
                    }
                    Ok(Value::Float(x as f64 / y as f64))
                }
                BinOp::FloorDiv => {
                    if y == 0 {
                        return Err(self.error("integer division or modulo by zero"));
                    }
                    let q = x.checked_div(y).ok_or_else(overflow)?;
                    let adjust = x % y != 0 && ((x < 0) != (y < 0));
                    Ok(Value::Int(if adjust { q - 1 } else { q }))
                }
                BinOp::Mod => {
                    if y == 0 {
                        return Err(self.error("integer division or modulo by zero"));
                    }
                    let r = x.checked_rem(y).ok_or_else(overflow)?;
                    let adjust = r != 0 && ((r < 0) != (y < 0));
                    Ok(Value::Int(if adjust { r + y } else { r }))
                }
            },
            (a, b) => {
                let (x, y) = (a.as_f64(), b.as_f64());
                let result = match op {
                    BinOp::Add => x + y,
                    BinOp::Sub => x - y,
                    BinOp::Mul => x * y,
                    BinOp::Div | BinOp::FloorDiv | BinOp::Mod if y == 0.0 => {
                        return Err(self.error("float division by zero"));
                    }
                    BinOp::Div => x / y,
                    BinOp::FloorDiv => (x / y).floor(),
                    BinOp::Mod => x - y * (x / y).floor(),
                };
                Ok(Value::Float(result))
            }
        }
    }

    fn repeat(&mut self, left: Value, right: Value) -> Result<Value, RuntimeError> {
        let (sequence, count) = match (&left, &right) {
            (Value::Str(_) | Value::List(_), other) => (left.clone(), other),
            (other, _) => (right.clone(), other),
        };
        let Some(count) = count.as_index() else {
            return Err(self.error(format!(
                "can't multiply sequence by non-int of type '{}'",
                count.type_name()
            )));
        };
        let count = usize::try_from(count.max(0)).unwrap_or(usize::MAX);
        match sequence {
            Value::Str(s) => {
                self.check_len(s.len().saturating_mul(count))?;
                Ok(Value::Str(s.repeat(count)))
            }
            Value::List(items) => {
                self.check_len(items.len().saturating_mul(count))?;
                let mut repeated = Vec::with_capacity(items.len() * count);
                for _ in 0..count {
                    repeated.extend(items.iter().cloned());
                }
                Ok(Value::List(repeated))
            }
            _ => unreachable!("repeat called without a sequence operand"),
        }
    }

    fn compare(&mut self, op: CmpOp, left: &Value, right: &Value) -> Result<bool, RuntimeError> {
        match op {
            CmpOp::Eq => Ok(left.loose_eq(right)),
            CmpOp::NotEq => Ok(!left.loose_eq(right)),
            CmpOp::Is => Ok(left.type_name() == right.type_name() && left.loose_eq(right)),
            CmpOp::IsNot => Ok(!(left.type_name() == right.type_name() && left.loose_eq(right))),
            CmpOp::In | CmpOp::NotIn => {
                let found = match right {
                    Value::List(items) => {
                        self.charge(items.len() as u64)?;
                        items.iter().any(|item| item.loose_eq(left))
                    }
                    Value::Str(haystack) => match left {
                        Value::Str(needle) => haystack.contains(needle.as_str()),
                        other => {
                            return Err(self.error(format!(
                                "'in <string>' requires string as left operand, not {}",
                                other.type_name()
                            )))
                        }
                    },
                    other => {
                        return Err(self.error(format!(
                            "argument of type '{}' is not iterable",
                            other.type_name()
                        )))
                    }
                };
                Ok(if op == CmpOp::In { found } else { !found })
            }
            CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
                let ordering = match (left.as_number(), right.as_number(), left, right) {
                    (Some(Number::Int(a)), Some(Number::Int(b)), _, _) => a.partial_cmp(&b),
                    (Some(a), Some(b), _, _) => a.as_f64().partial_cmp(&b.as_f64()),
                    (_, _, Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
                    _ => {
                        return Err(self.error(format!(
                            "'{}' not supported between instances of '{}' and '{}'",
                            cmp_symbol(op),
                            left.type_name(),
                            right.type_name()
                        )))
                    }
                };
                let Some(ordering) = ordering else {
                    // NaN compares false with everything
                    return Ok(false);
                };
                Ok(match op {
                    CmpOp::Lt => ordering.is_lt(),
                    CmpOp::Le => ordering.is_le(),
                    CmpOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                })
            }
        }
    }

    fn resolve_index(&self, index: &Value, len: usize, kind: &str) -> Result<usize, RuntimeError> {
        let Some(i) = index.as_index() else {
            return Err(self.error(format!(
                "{kind} indices must be integers, not '{}'",
                index.type_name()
            )));
        };
        let len = len as i64;
        let resolved = if i < 0 { i + len } else { i };
        if resolved < 0 || resolved >= len {
            return Err(self.error(format!("{kind} index out of range")));
        }
        Ok(resolved as usize)
    }

    fn subscript(&mut self, value: Value, index: Value) -> Result<Value, RuntimeError> {
        match value {
            Value::List(mut items) => {
                let i = self.resolve_index(&index, items.len(), "list")?;
                Ok(items.swap_remove(i))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = self.resolve_index(&index, chars.len(), "string")?;
                Ok(Value::Str(chars[i].to_string()))
            }
            other => Err(self.error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn slice_bound(&self, bound: Option<Value>, len: usize, default: i64) -> Result<usize, RuntimeError> {
        let len = len as i64;
        let raw = match bound {
            None | Some(Value::None) => default,
            Some(value) => value.as_index().ok_or_else(|| {
                self.error(format!(
                    "slice indices must be integers or None, not '{}'",
                    value.type_name()
                ))
            })?,
        };
        let resolved = if raw < 0 { raw + len } else { raw };
        Ok(resolved.clamp(0, len) as usize)
    }

    fn slice(
        &mut self,
        value: Value,
        lower: Option<Value>,
        upper: Option<Value>,
    ) -> Result<Value, RuntimeError> {
        match value {
            Value::List(items) => {
                let start = self.slice_bound(lower, items.len(), 0)?;
                let end = self.slice_bound(upper, items.len(), items.len() as i64)?;
                Ok(Value::List(if start < end {
                    items[start..end].to_vec()
                } else {
                    vec![]
                }))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let start = self.slice_bound(lower, chars.len(), 0)?;
                let end = self.slice_bound(upper, chars.len(), chars.len() as i64)?;
                Ok(Value::Str(if start < end {
                    chars[start..end].iter().collect()
                } else {
                    String::new()
                }))
            }
            other => Err(self.error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }
}

fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
    }
}

fn cmp_symbol(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Lt => "<",
        CmpOp::Le => "<=",
        CmpOp::Gt => ">",
        CmpOp::Ge => ">=",
        _ => "==",
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::script::parse;

    fn run(source: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
        run_with_budget(source, args, 10_000)
    }

    fn run_with_budget(source: &str, args: Vec<Value>, budget: u64) -> Result<Value, RuntimeError> {
        let module = parse(source).unwrap();
        let def = module.functions().next().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        Interpreter::new(&mut rng, budget).call(def, args)
    }

    fn history(moves: &[&str]) -> Value {
        Value::List(moves.iter().map(|m| Value::Str(m.to_string())).collect())
    }

    #[test]
    fn test_tit_for_tat_logic() {
        let source = "def tft(moves):\n    if not moves:\n        return 'Cooperate'\n    return moves[-1]\n";
        assert_eq!(run(source, vec![history(&[])]).unwrap(), Value::Str("Cooperate".into()));
        assert_eq!(
            run(source, vec![history(&["Cooperate", "Defect"])]).unwrap(),
            Value::Str("Defect".into())
        );
    }

    #[test]
    fn test_loops_and_counters() {
        let source = "\
def majority(moves):
    count = 0
    for m in moves:
        if m == 'Defect':
            count += 1
        else:
            continue
    while count > 10:
        break
    if count * 2 > len(moves):
        return 'Defect'
    return 'Cooperate'
";
        assert_eq!(
            run(source, vec![history(&["Defect", "Defect", "Cooperate"])]).unwrap(),
            Value::Str("Defect".into())
        );
        assert_eq!(
            run(source, vec![history(&["Defect", "Cooperate"])]).unwrap(),
            Value::Str("Cooperate".into())
        );
    }

    #[test]
    fn test_arithmetic_semantics() {
        let source = "def f(moves):\n    return [7 // -2, -7 % 3, 7 / 2, 1 + 2.5, 'ab' * 2, [0] * 3]\n";
        assert_eq!(
            run(source, vec![Value::None]).unwrap(),
            Value::List(vec![
                Value::Int(-4),
                Value::Int(2),
                Value::Float(3.5),
                Value::Float(3.5),
                Value::Str("abab".into()),
                Value::List(vec![Value::Int(0); 3]),
            ])
        );
    }

    #[test]
    fn test_builtins_and_methods() {
        let source = "\
def f(moves):
    recent = moves[-2:]
    seen = []
    seen.append(recent.count('Defect'))
    seen.append(sum(range(4)))
    seen.append(max(3, 9, 4))
    seen.append(min([5, 2]))
    seen.append('Defect' in moves)
    seen.append(str(3) + 'x')
    seen.append('  DeFect '.strip().lower())
    return seen
";
        assert_eq!(
            run(source, vec![history(&["Defect", "Cooperate", "Defect"])]).unwrap(),
            Value::List(vec![
                Value::Int(1),
                Value::Int(6),
                Value::Int(9),
                Value::Int(2),
                Value::Bool(true),
                Value::Str("3x".into()),
                Value::Str("defect".into()),
            ])
        );
    }

    #[test]
    fn test_default_parameters() {
        let source = "def f(moves=[], threshold=2):\n    return len(moves) + threshold\n";
        assert_eq!(run(source, vec![]).unwrap(), Value::Int(2));
        assert_eq!(run(source, vec![history(&["Defect"])]).unwrap(), Value::Int(3));
        assert!(run(source, vec![Value::None, Value::None, Value::None]).is_err());
    }

    #[test]
    fn test_random_module_is_seeded() {
        let source = "def f(moves):\n    return [random.random(), random.randint(1, 6), random.choice(['Cooperate', 'Defect'])]\n";
        let first = run(source, vec![Value::None]).unwrap();
        let second = run(source, vec![Value::None]).unwrap();
        assert_eq!(first, second);
        let Value::List(items) = first else {
            panic!("expected a list");
        };
        assert!(matches!(items[0], Value::Float(f) if (0.0..1.0).contains(&f)));
        assert!(matches!(items[1], Value::Int(i) if (1..=6).contains(&i)));
    }

    #[test]
    fn test_runtime_errors() {
        let cases = [
            ("def f(moves):\n    return moves[5]\n", "index out of range"),
            ("def f(moves):\n    return 1 / 0\n", "division by zero"),
            ("def f(moves):\n    return undefined\n", "name 'undefined' is not defined"),
            ("def f(moves):\n    return len(3)\n", "has no len()"),
            ("def f(moves):\n    x += 1\n", "referenced before assignment"),
            ("def f(moves):\n    return open('x')\n", "name 'open' is not defined"),
            ("def f(moves):\n    import os\n", "import of 'os' is not permitted"),
            ("def f(moves):\n    return random.seed\n", "no attribute 'seed'"),
        ];
        for (source, expected) in cases {
            let err = run(source, vec![history(&[])]).unwrap_err();
            assert!(
                err.message.contains(expected),
                "{source:?}: got {:?}",
                err.message
            );
            assert_eq!(err.line, 2);
        }
    }

    #[test]
    fn test_step_budget_stops_infinite_loop() {
        let source = "def f(moves):\n    while True:\n        pass\n";
        let err = run_with_budget(source, vec![Value::None], 500).unwrap_err();
        assert!(err.message.contains("step budget of 500 exhausted"));
    }

    #[test]
    fn test_sequence_limit() {
        let source = "def f(moves):\n    return range(1000000000)\n";
        let err = run_with_budget(source, vec![Value::None], u64::MAX).unwrap_err();
        assert!(err.message.contains("exceeds the limit"));
    }

    #[test]
    fn test_append_needs_a_local_name() {
        let source = "def f(moves):\n    grid = [[]]\n    grid[0].append(1)\n    return grid\n";
        let err = run(source, vec![history(&[])]).unwrap_err();
        assert!(err.message.contains("append is only supported on local names"));
        assert_eq!(err.line, 3);

        let source = "def f(moves):\n    row = []\n    row.append(1)\n    return row\n";
        assert_eq!(
            run(source, vec![history(&[])]).unwrap(),
            Value::List(vec![Value::Int(1)])
        );
    }
}
