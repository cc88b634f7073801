//! Runtime values of the Petsfile language

use crate::ast::FunctionDef;
use crate::error::{Result, ScriptError};
use crate::eval::Env;
use pets_core::ProcessRecord;
use std::cell::RefCell;
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    Dict(Rc<RefCell<Dict>>),
    Function(Rc<Function>),
    Builtin(Builtin),
    /// A method looked up on a value, e.g. `deps.append`
    Method(Rc<BoundMethod>),
    Process(ProcessHandle),
}

/// A function defined with `def`.
pub struct Function {
    pub def: Rc<FunctionDef>,
    /// Evaluated default for each parameter, `None` where there is none
    pub defaults: Vec<Option<Value>>,
    /// Scope the function was defined in
    pub env: Env,
    /// File the function was defined in
    pub file: Arc<Path>,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn required_params(&self) -> usize {
        self.def.required_params()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Run,
    Start,
    Service,
    Register,
    Print,
    Fail,
    Len,
    Str,
    Range,
}

impl Builtin {
    pub const ALL: [Builtin; 9] = [
        Builtin::Run,
        Builtin::Start,
        Builtin::Service,
        Builtin::Register,
        Builtin::Print,
        Builtin::Fail,
        Builtin::Len,
        Builtin::Str,
        Builtin::Range,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Run => "run",
            Builtin::Start => "start",
            Builtin::Service => "service",
            Builtin::Register => "register",
            Builtin::Print => "print",
            Builtin::Fail => "fail",
            Builtin::Len => "len",
            Builtin::Str => "str",
            Builtin::Range => "range",
        }
    }

    pub fn lookup(name: &str) -> Option<Builtin> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }
}

pub struct BoundMethod {
    pub receiver: Value,
    pub name: &'static str,
}

/// Methods available on each type, by name.
pub fn method_names(value: &Value) -> &'static [&'static str] {
    match value {
        Value::List(_) => &["append", "extend"],
        Value::Dict(_) => &["get", "keys", "values", "items"],
        Value::Str(_) => &["format", "startswith", "endswith", "strip"],
        _ => &[],
    }
}

/// Insertion-ordered mapping with hashable keys
#[derive(Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| matches!(k, Value::Str(s) if &**s == key))
            .map(|(_, v)| v)
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<()> {
        if !key.is_hashable() {
            return Err(ScriptError::type_error(format!(
                "unhashable type: {}",
                key.type_name()
            )));
        }
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }
}

/// A started process as seen by scripts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessHandle {
    pub pid: u32,
    pub hostname: String,
    pub port: u16,
}

impl ProcessHandle {
    pub fn from_record(record: &ProcessRecord) -> Self {
        Self {
            pid: record.pid,
            hostname: record.hostname.clone(),
            port: record.port,
        }
    }

    /// Interpret a script value as a process handle. Accepts handles and
    /// dicts carrying an int `pid` (plus optional `hostname` and `port`).
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Process(handle) => Ok(handle.clone()),
            Value::Dict(dict) => {
                let dict = dict.borrow();
                let pid = match dict.get_str("pid") {
                    Some(Value::Int(pid)) => u32::try_from(*pid)
                        .map_err(|_| ScriptError::usage(format!("invalid pid {pid}")))?,
                    Some(other) => {
                        return Err(ScriptError::usage(format!(
                            "process pid must be an int, got {}",
                            other.type_name()
                        )));
                    }
                    None => return Err(ScriptError::usage("process dict has no \"pid\"")),
                };
                let hostname = match dict.get_str("hostname") {
                    Some(Value::Str(s)) => s.to_string(),
                    None | Some(Value::None) => String::new(),
                    Some(other) => {
                        return Err(ScriptError::usage(format!(
                            "process hostname must be a string, got {}",
                            other.type_name()
                        )));
                    }
                };
                let port = match dict.get_str("port") {
                    Some(Value::Int(port)) => u16::try_from(*port)
                        .map_err(|_| ScriptError::usage(format!("invalid port {port}")))?,
                    None | Some(Value::None) => 0,
                    Some(other) => {
                        return Err(ScriptError::usage(format!(
                            "process port must be an int, got {}",
                            other.type_name()
                        )));
                    }
                };
                Ok(Self {
                    pid,
                    hostname,
                    port,
                })
            }
            other => Err(ScriptError::usage(format!(
                "expected a process, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn is_exposed(&self) -> bool {
        !self.hostname.is_empty() && self.port != 0
    }

    /// `host:port` for dialing, if exposed.
    pub fn host(&self) -> Option<String> {
        if !self.is_exposed() {
            return None;
        }
        if self.hostname.contains(':') {
            Some(format!("[{}]:{}", self.hostname, self.port))
        } else {
            Some(format!("{}:{}", self.hostname, self.port))
        }
    }

    /// Attribute lookup shared by `h.pid` and `h["pid"]`.
    pub fn attr(&self, name: &str) -> Option<Value> {
        match name {
            "pid" => Some(Value::Int(i64::from(self.pid))),
            "hostname" => Some(Value::str(&self.hostname)),
            "port" => Some(Value::Int(i64::from(self.port))),
            "host" => Some(self.host().map_or(Value::None, |h| Value::str(&h))),
            _ => None,
        }
    }
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::from(items))
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Function(_) => "function",
            Value::Builtin(_) | Value::Method(_) => "builtin_function_or_method",
            Value::Process(_) => "process",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(dict) => !dict.borrow().is_empty(),
            Value::Function(_) | Value::Builtin(_) | Value::Method(_) | Value::Process(_) => true,
        }
    }

    pub fn is_hashable(&self) -> bool {
        match self {
            Value::None | Value::Bool(_) | Value::Int(_) | Value::Str(_) | Value::Process(_) => {
                true
            }
            Value::Tuple(items) => items.iter().all(Value::is_hashable),
            _ => false,
        }
    }

    /// The string for `str(x)` and `print(x)`: strings are not quoted.
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            other => other.to_string(),
        }
    }

    /// Elements of an iterable value, snapshotted.
    pub fn iterate(&self) -> Result<Vec<Value>> {
        match self {
            Value::List(items) => Ok(items.borrow().clone()),
            Value::Tuple(items) => Ok(items.to_vec()),
            Value::Dict(dict) => Ok(dict.borrow().keys().cloned().collect()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.encode_utf8(&mut [0; 4]))).collect()),
            other => Err(ScriptError::type_error(format!(
                "{} is not iterable",
                other.type_name()
            ))),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Method(a), Value::Method(b)) => Rc::ptr_eq(a, b),
            (Value::Process(a), Value::Process(b)) => a == b,
            _ => false,
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// The repr form: strings are quoted.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{:?}", &**s),
            Value::List(items) => {
                f.write_str("[")?;
                write_seq(f, &items.borrow())?;
                f.write_str("]")
            }
            Value::Tuple(items) => {
                f.write_str("(")?;
                write_seq(f, items)?;
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Value::Dict(dict) => {
                f.write_str("{")?;
                for (i, (k, v)) in dict.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Value::Function(func) => write!(f, "<function {}>", func.name()),
            Value::Builtin(b) => write!(f, "<built-in function {}>", b.name()),
            Value::Method(m) => write!(f, "<built-in method {} of {}>", m.name, m.receiver.type_name()),
            Value::Process(handle) => match handle.host() {
                Some(host) => write!(f, "process(pid={}, host={host:?})", handle.pid),
                None => write!(f, "process(pid={})", handle.pid),
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_dict(entries: Vec<(&str, Value)>) -> Value {
        let mut dict = Dict::new();
        for (k, v) in entries {
            dict.insert(Value::str(k), v).unwrap();
        }
        Value::dict(dict)
    }

    #[test]
    fn test_repr() {
        let list = Value::list(vec![Value::Int(1), Value::str("a"), Value::None]);
        assert_eq!(list.to_string(), r#"[1, "a", None]"#);
        assert_eq!(Value::tuple(vec![Value::Int(1)]).to_string(), "(1,)");
        assert_eq!(Value::str("a").to_str(), "a");
    }

    #[test]
    fn test_process_repr_contains_pid() {
        let handle = ProcessHandle {
            pid: 42,
            hostname: String::new(),
            port: 0,
        };
        assert_eq!(Value::Process(handle.clone()).to_string(), "process(pid=42)");
        let exposed = ProcessHandle {
            hostname: "localhost".into(),
            port: 8080,
            ..handle
        };
        assert_eq!(
            Value::Process(exposed).to_string(),
            r#"process(pid=42, host="localhost:8080")"#
        );
    }

    #[test]
    fn test_dict_insert_replaces_and_keeps_order() {
        let mut dict = Dict::new();
        dict.insert(Value::str("b"), Value::Int(1)).unwrap();
        dict.insert(Value::str("a"), Value::Int(2)).unwrap();
        dict.insert(Value::str("b"), Value::Int(3)).unwrap();
        let keys: Vec<String> = dict.keys().map(Value::to_str).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(dict.get_str("b"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_dict_rejects_unhashable_keys() {
        let mut dict = Dict::new();
        let err = dict.insert(Value::list(vec![]), Value::None).unwrap_err();
        assert!(err.message().contains("unhashable"));
    }

    #[test]
    fn test_handle_from_dict() {
        let value = handle_dict(vec![
            ("pid", Value::Int(7)),
            ("hostname", Value::str("::1")),
            ("port", Value::Int(9000)),
        ]);
        let handle = ProcessHandle::from_value(&value).unwrap();
        assert_eq!(handle.pid, 7);
        assert_eq!(handle.host().as_deref(), Some("[::1]:9000"));
    }

    #[test]
    fn test_handle_from_bad_values() {
        assert!(ProcessHandle::from_value(&Value::Int(1)).is_err());
        assert!(ProcessHandle::from_value(&handle_dict(vec![("pid", Value::str("1"))])).is_err());
        assert!(ProcessHandle::from_value(&handle_dict(vec![("port", Value::Int(1))])).is_err());
        assert!(ProcessHandle::from_value(&handle_dict(vec![("pid", Value::Int(-1))])).is_err());
    }

    #[test]
    fn test_handle_attributes() {
        let handle = ProcessHandle {
            pid: 1,
            hostname: String::new(),
            port: 0,
        };
        assert_eq!(handle.attr("host"), Some(Value::None));
        assert_eq!(handle.attr("pid"), Some(Value::Int(1)));
        assert!(handle.attr("nope").is_none());
    }

    #[test]
    fn test_equality() {
        assert_eq!(
            Value::list(vec![Value::Int(1)]),
            Value::list(vec![Value::Int(1)])
        );
        assert_ne!(Value::Int(1), Value::str("1"));
        assert!(!Value::list(vec![]).truthy());
        assert!(Value::tuple(vec![Value::None]).truthy());
    }
}
