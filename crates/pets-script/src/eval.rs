//! Tree-walking evaluator
//!
//! An [`Eval`] runs statements for one execution context: the service key
//! being started (global while a file is loaded) and the file whose code is
//! currently running. Calling a function defined in another file switches
//! the current file for the duration of the call, so builtins such as `run`
//! resolve paths against the file that contains the call.

use crate::ast::*;
use crate::builtins::{self, Host};
use crate::error::{ErrorKind, Position, Result, ScriptError};
use crate::loader::Loader;
use crate::value::{BoundMethod, Builtin, Dict, Function, Value, method_names};
use pets_core::{School, ServiceKey};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

/// Deepest allowed nesting of function calls
const MAX_CALL_DEPTH: usize = 40;

/// Deepest allowed nesting of statements and expressions being evaluated,
/// across all active calls
const MAX_NESTING: usize = 120;

pub type Env = Rc<RefCell<Scope>>;

/// Variables of one module or function call
#[derive(Default)]
pub struct Scope {
    vars: HashMap<String, Value>,
    parent: Option<Env>,
}

impl Scope {
    pub fn new_env(parent: Option<Env>) -> Env {
        Rc::new(RefCell::new(Scope {
            vars: HashMap::new(),
            parent,
        }))
    }

    /// Look `name` up here, then in enclosing scopes.
    pub fn get(env: &Env, name: &str) -> Option<Value> {
        let scope = env.borrow();
        match scope.vars.get(name) {
            Some(value) => Some(value.clone()),
            None => scope.parent.as_ref().and_then(|parent| Scope::get(parent, name)),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn vars(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }
}

/// State only available while a file is being loaded
pub(crate) struct Loading<'a> {
    pub loader: &'a mut Loader,
    pub school: &'a mut School,
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

pub(crate) struct Eval<'a> {
    pub(crate) host: Rc<Host>,
    pub(crate) loading: Option<Loading<'a>>,
    pub(crate) key: ServiceKey,
    pub(crate) file: Arc<Path>,
    depth: usize,
    nesting: usize,
}

impl<'a> Eval<'a> {
    pub(crate) fn new(
        host: Rc<Host>,
        loading: Option<Loading<'a>>,
        key: ServiceKey,
        file: Arc<Path>,
    ) -> Self {
        Self {
            host,
            loading,
            key,
            file,
            depth: 0,
            nesting: 0,
        }
    }

    fn error_at(&self, err: ScriptError, loc: Loc) -> ScriptError {
        err.at_loc(&self.file, loc)
    }

    /// Run the top-level statements of a module.
    pub(crate) fn exec_module(&mut self, stmts: &[Stmt], env: &Env) -> Result<()> {
        for stmt in stmts {
            self.exec(stmt, env)?;
        }
        Ok(())
    }

    fn exec_block(&mut self, stmts: &[Stmt], env: &Env) -> Result<Flow> {
        for stmt in stmts {
            match self.exec(stmt, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, env: &Env) -> Result<Flow> {
        self.enter().map_err(|e| self.error_at(e, stmt.loc))?;
        let result = self.exec_kind(stmt, env);
        self.nesting -= 1;
        result.map_err(|e| self.error_at(e, stmt.loc))
    }

    fn enter(&mut self) -> Result<()> {
        if self.nesting >= MAX_NESTING {
            return Err(ScriptError::usage("maximum nesting depth exceeded"));
        }
        self.nesting += 1;
        Ok(())
    }

    fn exec_kind(&mut self, stmt: &Stmt, env: &Env) -> Result<Flow> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, env)?;
            }
            StmtKind::Assign { target, op, value } => {
                let value = self.eval(value, env)?;
                match op {
                    AssignOp::Set => self.assign(target, value, env)?,
                    AssignOp::Add | AssignOp::Sub => self.augmented(target, *op, value, env)?,
                }
            }
            StmtKind::If {
                branches,
                else_body,
            } => {
                for (cond, body) in branches {
                    if self.eval(cond, env)?.truthy() {
                        return self.exec_block(body, env);
                    }
                }
                if let Some(body) = else_body {
                    return self.exec_block(body, env);
                }
            }
            StmtKind::For { target, iter, body } => {
                let items = self.eval(iter, env)?.iterate()?;
                for item in items {
                    self.assign(target, item, env)?;
                    match self.exec_block(body, env)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
            }
            StmtKind::Def(def) => {
                let defaults = def
                    .params
                    .iter()
                    .map(|param| param.default.as_ref().map(|d| self.eval(d, env)).transpose())
                    .collect::<Result<Vec<_>>>()?;
                let function = Function {
                    def: Rc::clone(def),
                    defaults,
                    env: Rc::clone(env),
                    file: Arc::clone(&self.file),
                };
                env.borrow_mut()
                    .set(def.name.clone(), Value::Function(Rc::new(function)));
            }
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
            StmtKind::Load { locator, symbols } => self.load(locator, symbols, env)?,
        }
        Ok(Flow::Normal)
    }

    fn load(&mut self, locator: &str, symbols: &[(String, String)], env: &Env) -> Result<()> {
        let Some(loading) = self.loading.as_mut() else {
            return Err(ScriptError::usage(
                "load() is only available while a file is being loaded",
            ));
        };
        let bindings = loading
            .loader
            .load(&self.host, &mut *loading.school, &self.file, locator)?;

        let mut scope = env.borrow_mut();
        for (local, exported) in symbols {
            let value = bindings.get(exported).ok_or_else(|| {
                ScriptError::new(
                    ErrorKind::Load,
                    format!("load: module {locator:?} has no symbol {exported:?}"),
                )
            })?;
            scope.set(local.clone(), value.clone());
        }
        Ok(())
    }

    fn assign(&mut self, target: &Target, value: Value, env: &Env) -> Result<()> {
        match target {
            Target::Name(name) => {
                env.borrow_mut().set(name.clone(), value);
                Ok(())
            }
            Target::Index { object, index } => {
                let object = self.eval(object, env)?;
                let index = self.eval(index, env)?;
                set_index(&object, index, value)
            }
            Target::Tuple(targets) => {
                let items = value.iterate()?;
                if items.len() != targets.len() {
                    return Err(ScriptError::type_error(format!(
                        "cannot unpack {} values into {} targets",
                        items.len(),
                        targets.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, env)?;
                }
                Ok(())
            }
        }
    }

    fn augmented(&mut self, target: &Target, op: AssignOp, rhs: Value, env: &Env) -> Result<()> {
        let bin = match op {
            AssignOp::Sub => BinOp::Sub,
            _ => BinOp::Add,
        };
        match target {
            Target::Name(name) => {
                let current = Scope::get(env, name)
                    .ok_or_else(|| undefined(name))?;
                if let (Value::List(list), BinOp::Add) = (&current, bin) {
                    let extra = rhs.iterate()?;
                    list.borrow_mut().extend(extra);
                    return Ok(());
                }
                let updated = binary_op(bin, &current, &rhs)?;
                env.borrow_mut().set(name.clone(), updated);
                Ok(())
            }
            Target::Index { object, index } => {
                let object = self.eval(object, env)?;
                let index = self.eval(index, env)?;
                let current = get_index(&object, &index)?;
                let updated = binary_op(bin, &current, &rhs)?;
                set_index(&object, index, updated)
            }
            Target::Tuple(_) => Err(ScriptError::type_error(
                "augmented assignment to a tuple is not supported",
            )),
        }
    }

    pub(crate) fn eval(&mut self, expr: &Expr, env: &Env) -> Result<Value> {
        self.enter().map_err(|e| self.error_at(e, expr.loc))?;
        let result = self.eval_kind(expr, env);
        self.nesting -= 1;
        result.map_err(|e| self.error_at(e, expr.loc))
    }

    fn eval_kind(&mut self, expr: &Expr, env: &Env) -> Result<Value> {
        match &expr.kind {
            ExprKind::None => Ok(Value::None),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Int(i) => Ok(Value::Int(*i)),
            ExprKind::Str(s) => Ok(Value::str(s)),
            ExprKind::Name(name) => Scope::get(env, name)
                .or_else(|| Builtin::lookup(name).map(Value::Builtin))
                .ok_or_else(|| undefined(name)),
            ExprKind::List(items) => {
                let items = self.eval_all(items, env)?;
                Ok(Value::list(items))
            }
            ExprKind::Tuple(items) => {
                let items = self.eval_all(items, env)?;
                Ok(Value::tuple(items))
            }
            ExprKind::Dict(entries) => {
                let mut dict = Dict::new();
                for (key, value) in entries {
                    let key = self.eval(key, env)?;
                    let value = self.eval(value, env)?;
                    dict.insert(key, value)?;
                }
                Ok(Value::dict(dict))
            }
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand, env)?;
                match (op, value) {
                    (UnaryOp::Not, value) => Ok(Value::Bool(!value.truthy())),
                    (UnaryOp::Neg, Value::Int(i)) => i
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| ScriptError::type_error("integer overflow")),
                    (UnaryOp::Neg, other) => Err(ScriptError::type_error(format!(
                        "unsupported operand for -: {}",
                        other.type_name()
                    ))),
                }
            }
            ExprKind::Binary { op, left, right } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                binary_op(*op, &left, &right)
            }
            ExprKind::Logical { op, left, right } => {
                let left = self.eval(left, env)?;
                match (op, left.truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval(right, env),
                }
            }
            ExprKind::Call { func, args } => {
                let func = self.eval(func, env)?;
                let mut positional = Vec::new();
                let mut keywords = Vec::new();
                for arg in args {
                    let value = self.eval(&arg.value, env)?;
                    match &arg.name {
                        Some(name) => keywords.push((name.clone(), value)),
                        None => positional.push(value),
                    }
                }
                self.call(&func, positional, keywords, expr.loc)
            }
            ExprKind::Index { object, index } => {
                let object = self.eval(object, env)?;
                let index = self.eval(index, env)?;
                get_index(&object, &index)
            }
            ExprKind::Attr { object, name } => {
                let object = self.eval(object, env)?;
                get_attr(object, name)
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr], env: &Env) -> Result<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e, env)).collect()
    }

    fn call(
        &mut self,
        func: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        loc: Loc,
    ) -> Result<Value> {
        match func {
            Value::Function(function) => self.call_function(function, args, kwargs, loc),
            Value::Builtin(builtin) => builtins::call(self, *builtin, args, kwargs, loc),
            Value::Method(method) => call_method(method, args, kwargs),
            other => Err(ScriptError::type_error(format!(
                "{} is not callable",
                other.type_name()
            ))),
        }
    }

    /// Call a script function. `call_loc` is the call site in the current file.
    pub(crate) fn call_function(
        &mut self,
        function: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        call_loc: Loc,
    ) -> Result<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(ScriptError::usage(format!(
                "maximum call depth exceeded calling {}",
                function.name()
            )));
        }

        let locals = Scope::new_env(Some(Rc::clone(&function.env)));
        bind_params(function, args, kwargs, &mut locals.borrow_mut())?;

        let caller_file = std::mem::replace(&mut self.file, Arc::clone(&function.file));
        self.depth += 1;
        let result = self.exec_block(&function.def.body, &locals);
        self.depth -= 1;
        self.file = caller_file;

        match result {
            Ok(Flow::Return(value)) => Ok(value),
            Ok(_) => Ok(Value::None),
            Err(e) => Err(e.with_frame(function.name(), Position::new(&self.file, call_loc))),
        }
    }
}

fn undefined(name: &str) -> ScriptError {
    ScriptError::new(ErrorKind::Undefined, format!("undefined: {name}"))
}

fn bind_params(
    function: &Function,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    scope: &mut Scope,
) -> Result<()> {
    let params = &function.def.params;
    if args.len() > params.len() {
        return Err(ScriptError::usage(format!(
            "{}() takes {} argument(s) but {} were given",
            function.name(),
            params.len(),
            args.len()
        )));
    }

    let mut bound: Vec<Option<Value>> = vec![None; params.len()];
    for (slot, value) in bound.iter_mut().zip(args) {
        *slot = Some(value);
    }
    for (name, value) in kwargs {
        let Some(index) = params.iter().position(|p| p.name == name) else {
            return Err(ScriptError::usage(format!(
                "{}() got an unexpected keyword argument {name:?}",
                function.name()
            )));
        };
        if bound[index].is_some() {
            return Err(ScriptError::usage(format!(
                "{}() got multiple values for argument {name:?}",
                function.name()
            )));
        }
        bound[index] = Some(value);
    }

    for ((param, value), default) in params.iter().zip(bound).zip(&function.defaults) {
        let value = match (value, default) {
            (Some(value), _) => value,
            (None, Some(default)) => default.clone(),
            (None, None) => {
                return Err(ScriptError::usage(format!(
                    "{}() missing argument {:?}",
                    function.name(),
                    param.name
                )));
            }
        };
        scope.set(param.name.clone(), value);
    }
    Ok(())
}

fn unsupported(op: BinOp, left: &Value, right: &Value) -> ScriptError {
    ScriptError::type_error(format!(
        "unsupported operation: {} {} {}",
        left.type_name(),
        op.symbol(),
        right.type_name()
    ))
}

fn overflow() -> ScriptError {
    ScriptError::type_error("integer overflow")
}

fn repeat<T: Clone>(items: &[T], times: i64) -> Vec<T> {
    let times = usize::try_from(times).unwrap_or(0);
    let mut out = Vec::with_capacity(items.len().saturating_mul(times));
    for _ in 0..times {
        out.extend_from_slice(items);
    }
    out
}

fn floor_div(a: i64, b: i64) -> Result<i64> {
    if b == 0 {
        return Err(ScriptError::type_error("integer division by zero"));
    }
    let q = a.checked_div(b).ok_or_else(overflow)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

fn floor_mod(a: i64, b: i64) -> Result<i64> {
    if b == 0 {
        return Err(ScriptError::type_error("integer modulo by zero"));
    }
    let r = a.checked_rem(b).ok_or_else(overflow)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

pub(crate) fn binary_op(op: BinOp, left: &Value, right: &Value) -> Result<Value> {
    use Value::*;
    match op {
        BinOp::Add => match (left, right) {
            (Int(a), Int(b)) => a.checked_add(*b).map(Int).ok_or_else(overflow),
            (Str(a), Str(b)) => Ok(Value::str(&format!("{a}{b}"))),
            (List(a), List(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                Ok(Value::list(items))
            }
            (Tuple(a), Tuple(b)) => Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect())),
            _ => Err(unsupported(op, left, right)),
        },
        BinOp::Sub => match (left, right) {
            (Int(a), Int(b)) => a.checked_sub(*b).map(Int).ok_or_else(overflow),
            _ => Err(unsupported(op, left, right)),
        },
        BinOp::Mul => match (left, right) {
            (Int(a), Int(b)) => a.checked_mul(*b).map(Int).ok_or_else(overflow),
            (Str(s), Int(n)) | (Int(n), Str(s)) => {
                Ok(Value::str(&s.repeat(usize::try_from(*n).unwrap_or(0))))
            }
            (List(items), Int(n)) | (Int(n), List(items)) => {
                Ok(Value::list(repeat(items.borrow().as_slice(), *n)))
            }
            (Tuple(items), Int(n)) | (Int(n), Tuple(items)) => Ok(Value::tuple(repeat(&items[..], *n))),
            _ => Err(unsupported(op, left, right)),
        },
        BinOp::Div => match (left, right) {
            (Int(_), Int(_)) => Err(ScriptError::type_error(
                "floating-point division is not supported; use //",
            )),
            _ => Err(unsupported(op, left, right)),
        },
        BinOp::FloorDiv => match (left, right) {
            (Int(a), Int(b)) => floor_div(*a, *b).map(Int),
            _ => Err(unsupported(op, left, right)),
        },
        BinOp::Mod => match (left, right) {
            (Int(a), Int(b)) => floor_mod(*a, *b).map(Int),
            _ => Err(unsupported(op, left, right)),
        },
        BinOp::Eq => Ok(Bool(left == right)),
        BinOp::NotEq => Ok(Bool(left != right)),
        BinOp::Less => compare(op, left, right).map(|o| Bool(o == Ordering::Less)),
        BinOp::LessEq => compare(op, left, right).map(|o| Bool(o != Ordering::Greater)),
        BinOp::Greater => compare(op, left, right).map(|o| Bool(o == Ordering::Greater)),
        BinOp::GreaterEq => compare(op, left, right).map(|o| Bool(o != Ordering::Less)),
        BinOp::In => contains(right, left).map(Bool),
        BinOp::NotIn => contains(right, left).map(|found| Bool(!found)),
    }
}

fn compare(op: BinOp, left: &Value, right: &Value) -> Result<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
        (Value::List(a), Value::List(b)) => compare_seq(op, &a.borrow(), &b.borrow()),
        (Value::Tuple(a), Value::Tuple(b)) => compare_seq(op, a, b),
        _ => Err(unsupported(op, left, right)),
    }
}

fn compare_seq(op: BinOp, a: &[Value], b: &[Value]) -> Result<Ordering> {
    for (x, y) in a.iter().zip(b) {
        if x != y {
            return compare(op, x, y);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

fn contains(container: &Value, item: &Value) -> Result<bool> {
    match container {
        Value::List(items) => Ok(items.borrow().contains(item)),
        Value::Tuple(items) => Ok(items.contains(item)),
        Value::Dict(dict) => Ok(dict.borrow().get(item).is_some()),
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(&**needle)),
            other => Err(ScriptError::type_error(format!(
                "'in <string>' requires a string, not {}",
                other.type_name()
            ))),
        },
        other => Err(ScriptError::type_error(format!(
            "'in' is not supported by {}",
            other.type_name()
        ))),
    }
}

fn seq_index(len: usize, index: &Value) -> Result<usize> {
    let Value::Int(i) = index else {
        return Err(ScriptError::type_error(format!(
            "indices must be integers, not {}",
            index.type_name()
        )));
    };
    let len = i64::try_from(len).map_err(|_| overflow())?;
    let resolved = if *i < 0 { len + i } else { *i };
    if resolved < 0 || resolved >= len {
        return Err(ScriptError::type_error(format!("index {i} out of range")));
    }
    usize::try_from(resolved).map_err(|_| overflow())
}

pub(crate) fn get_index(object: &Value, index: &Value) -> Result<Value> {
    match object {
        Value::List(items) => {
            let items = items.borrow();
            Ok(items[seq_index(items.len(), index)?].clone())
        }
        Value::Tuple(items) => Ok(items[seq_index(items.len(), index)?].clone()),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let c = chars[seq_index(chars.len(), index)?];
            Ok(Value::str(c.encode_utf8(&mut [0; 4])))
        }
        Value::Dict(dict) => dict
            .borrow()
            .get(index)
            .cloned()
            .ok_or_else(|| ScriptError::type_error(format!("key {index} not found"))),
        Value::Process(handle) => match index {
            Value::Str(name) => handle
                .attr(name)
                .ok_or_else(|| ScriptError::type_error(format!("key {index} not found"))),
            _ => Err(ScriptError::type_error(format!(
                "process keys must be strings, not {}",
                index.type_name()
            ))),
        },
        other => Err(ScriptError::type_error(format!(
            "{} is not indexable",
            other.type_name()
        ))),
    }
}

fn set_index(object: &Value, index: Value, value: Value) -> Result<()> {
    match object {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let i = seq_index(items.len(), &index)?;
            items[i] = value;
            Ok(())
        }
        Value::Dict(dict) => dict.borrow_mut().insert(index, value),
        other => Err(ScriptError::type_error(format!(
            "{} does not support item assignment",
            other.type_name()
        ))),
    }
}

fn get_attr(object: Value, name: &str) -> Result<Value> {
    if let Value::Process(handle) = &object {
        return handle.attr(name).ok_or_else(|| {
            ScriptError::type_error(format!("process has no attribute {name:?}"))
        });
    }
    match method_names(&object).iter().find(|m| **m == name).copied() {
        Some(method) => Ok(Value::Method(Rc::new(BoundMethod {
            receiver: object,
            name: method,
        }))),
        None => Err(ScriptError::type_error(format!(
            "{} has no attribute {name:?}",
            object.type_name()
        ))),
    }
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{min} to {max}")
        };
        return Err(ScriptError::usage(format!(
            "{name}() takes {expected} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}

fn call_method(
    method: &BoundMethod,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value> {
    let name = method.name;
    if name != "format" && !kwargs.is_empty() {
        return Err(ScriptError::usage(format!(
            "{name}() does not accept keyword arguments"
        )));
    }

    match (&method.receiver, name) {
        (Value::List(items), "append") => {
            arity(name, &args, 1, 1)?;
            items.borrow_mut().extend(args);
            Ok(Value::None)
        }
        (Value::List(items), "extend") => {
            arity(name, &args, 1, 1)?;
            let extra = args[0].iterate()?;
            items.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        (Value::Dict(dict), "get") => {
            arity(name, &args, 1, 2)?;
            let dict = dict.borrow();
            Ok(dict
                .get(&args[0])
                .cloned()
                .or_else(|| args.get(1).cloned())
                .unwrap_or(Value::None))
        }
        (Value::Dict(dict), "keys") => {
            arity(name, &args, 0, 0)?;
            Ok(Value::list(dict.borrow().keys().cloned().collect()))
        }
        (Value::Dict(dict), "values") => {
            arity(name, &args, 0, 0)?;
            Ok(Value::list(dict.borrow().iter().map(|(_, v)| v.clone()).collect()))
        }
        (Value::Dict(dict), "items") => {
            arity(name, &args, 0, 0)?;
            Ok(Value::list(
                dict.borrow()
                    .iter()
                    .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            ))
        }
        (Value::Str(s), "format") => format_str(s, &args, &kwargs).map(|out| Value::str(&out)),
        (Value::Str(s), "startswith" | "endswith") => {
            arity(name, &args, 1, 1)?;
            let Value::Str(affix) = &args[0] else {
                return Err(ScriptError::type_error(format!(
                    "{name}() expects a string, got {}",
                    args[0].type_name()
                )));
            };
            let found = if name == "startswith" {
                s.starts_with(&**affix)
            } else {
                s.ends_with(&**affix)
            };
            Ok(Value::Bool(found))
        }
        (Value::Str(s), "strip") => {
            arity(name, &args, 0, 0)?;
            Ok(Value::str(s.trim()))
        }
        (receiver, _) => Err(ScriptError::type_error(format!(
            "{} has no method {name:?}",
            receiver.type_name()
        ))),
    }
}

/// `"{} on {port}".format(...)`: `{}` takes the next positional argument,
/// `{0}` a positional one by index, `{name}` a keyword one.
fn format_str(template: &str, args: &[Value], kwargs: &[(String, Value)]) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut next_auto = 0;

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => {
                            return Err(ScriptError::usage("format: unclosed '{' in template"));
                        }
                    }
                }
                let value = if field.is_empty() {
                    let value = args.get(next_auto);
                    next_auto += 1;
                    value
                } else if let Ok(index) = field.parse::<usize>() {
                    args.get(index)
                } else {
                    kwargs.iter().find(|(k, _)| *k == field).map(|(_, v)| v)
                };
                let value = value.ok_or_else(|| {
                    ScriptError::usage(format!("format: no argument for {{{field}}}"))
                })?;
                out.push_str(&value.to_str());
            }
            '}' => return Err(ScriptError::usage("format: single '}' in template")),
            c => out.push(c),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    #[test]
    fn test_floor_division_and_modulo_round_down() {
        assert_eq!(binary_op(BinOp::FloorDiv, &int(7), &int(2)).unwrap(), int(3));
        assert_eq!(binary_op(BinOp::FloorDiv, &int(-7), &int(2)).unwrap(), int(-4));
        assert_eq!(binary_op(BinOp::Mod, &int(-7), &int(2)).unwrap(), int(1));
        assert_eq!(binary_op(BinOp::Mod, &int(7), &int(-2)).unwrap(), int(-1));
        assert!(binary_op(BinOp::FloorDiv, &int(1), &int(0)).is_err());
    }

    #[test]
    fn test_overflow_is_an_error() {
        let err = binary_op(BinOp::Add, &int(i64::MAX), &int(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }

    #[test]
    fn test_mixed_types_are_rejected() {
        let err = binary_op(BinOp::Add, &int(1), &Value::str("a")).unwrap_err();
        assert_eq!(err.message(), "unsupported operation: int + string");
    }

    #[test]
    fn test_repetition_and_concatenation() {
        assert_eq!(
            binary_op(BinOp::Mul, &Value::str("ab"), &int(2)).unwrap(),
            Value::str("abab")
        );
        let joined = binary_op(
            BinOp::Add,
            &Value::list(vec![int(1)]),
            &Value::list(vec![int(2)]),
        )
        .unwrap();
        assert_eq!(joined, Value::list(vec![int(1), int(2)]));
    }

    #[test]
    fn test_membership() {
        let list = Value::list(vec![int(1), int(2)]);
        assert_eq!(binary_op(BinOp::In, &int(2), &list).unwrap(), Value::Bool(true));
        assert_eq!(
            binary_op(BinOp::NotIn, &Value::str("x"), &Value::str("abc")).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_sequence_comparison() {
        let a = Value::tuple(vec![int(1), int(2)]);
        let b = Value::tuple(vec![int(1), int(3)]);
        assert_eq!(binary_op(BinOp::Less, &a, &b).unwrap(), Value::Bool(true));
        assert!(binary_op(BinOp::Less, &int(1), &Value::None).is_err());
    }

    #[test]
    fn test_negative_indexing() {
        let list = Value::list(vec![int(1), int(2), int(3)]);
        assert_eq!(get_index(&list, &int(-1)).unwrap(), int(3));
        assert!(get_index(&list, &int(3)).is_err());
        assert_eq!(get_index(&Value::str("abc"), &int(1)).unwrap(), Value::str("b"));
    }

    #[test]
    fn test_format() {
        let out = format_str(
            "{}:{port} {{x}} {0}",
            &[Value::str("localhost")],
            &[("port".to_string(), int(8080))],
        )
        .unwrap();
        assert_eq!(out, "localhost:8080 {x} localhost");
        assert!(format_str("{missing}", &[], &[]).is_err());
    }

    #[test]
    fn test_scope_lookup_walks_parents() {
        let globals = Scope::new_env(None);
        globals.borrow_mut().set("a", int(1));
        let locals = Scope::new_env(Some(Rc::clone(&globals)));
        locals.borrow_mut().set("b", int(2));
        assert_eq!(Scope::get(&locals, "a"), Some(int(1)));
        assert_eq!(Scope::get(&locals, "b"), Some(int(2)));
        assert_eq!(Scope::get(&globals, "b"), None);
    }
}
