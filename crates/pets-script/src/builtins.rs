//! Functions predeclared in every Petsfile

use crate::ast::Loc;
use crate::error::{ErrorKind, Result, ScriptError};
use crate::eval::Eval;
use crate::provider::ScriptProvider;
use crate::value::{Builtin, ProcessHandle, Value};
use pets_core::runner::shell_command;
use pets_core::{Registry, Runner, ServiceKey, ServiceName};
use std::cell::RefCell;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, info};

/// What builtins act on: the runner and the execution's output streams.
pub(crate) struct Host {
    pub(crate) runner: Runner,
    pub(crate) stdout: RefCell<Box<dyn Write + Send>>,
    pub(crate) stderr: RefCell<Box<dyn Write + Send>>,
}

impl Host {
    pub(crate) fn registry(&self) -> &Registry {
        self.runner.registry()
    }
}

/// Match positional and keyword arguments to named parameters. The first
/// `required` parameters must be present.
fn bind(
    name: &str,
    params: &[&str],
    required: usize,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Vec<Option<Value>>> {
    if args.len() > params.len() {
        return Err(ScriptError::usage(format!(
            "{name}() takes at most {} argument(s), got {}",
            params.len(),
            args.len()
        )));
    }
    let mut bound: Vec<Option<Value>> = vec![None; params.len()];
    for (slot, value) in bound.iter_mut().zip(args) {
        *slot = Some(value);
    }
    for (key, value) in kwargs {
        let Some(index) = params.iter().position(|p| *p == key) else {
            return Err(ScriptError::usage(format!(
                "{name}() got an unexpected keyword argument {key:?}"
            )));
        };
        if bound[index].is_some() {
            return Err(ScriptError::usage(format!(
                "{name}() got multiple values for argument {key:?}"
            )));
        }
        bound[index] = Some(value);
    }
    if let Some(missing) = bound[..required].iter().position(Option::is_none) {
        return Err(ScriptError::usage(format!(
            "{name}() missing argument {:?}",
            params[missing]
        )));
    }
    Ok(bound)
}

/// Take a bound argument that `bind` already checked is present.
fn take(bound: &mut [Option<Value>], index: usize) -> Value {
    bound[index].take().unwrap_or(Value::None)
}

fn expect_str(func: &str, param: &str, value: &Value) -> Result<String> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(ScriptError::usage(format!(
            "{func}: {param} must be a string, got {}",
            other.type_name()
        ))),
    }
}

fn expect_int(func: &str, param: &str, value: &Value) -> Result<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(ScriptError::usage(format!(
            "{func}: {param} must be an int, got {}",
            other.type_name()
        ))),
    }
}

fn no_kwargs(name: &str, kwargs: &[(String, Value)]) -> Result<()> {
    match kwargs.first() {
        Some((key, _)) => Err(ScriptError::usage(format!(
            "{name}() got an unexpected keyword argument {key:?}"
        ))),
        None => Ok(()),
    }
}

/// Directory `run` and `start` execute in: that of the running file.
fn working_dir(file: &Path) -> &Path {
    file.parent().unwrap_or_else(|| Path::new("."))
}

pub(crate) fn call(
    eval: &mut Eval<'_>,
    builtin: Builtin,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    loc: Loc,
) -> Result<Value> {
    let name = builtin.name();
    match builtin {
        Builtin::Run => {
            let mut bound = bind(name, &["cmd"], 1, args, kwargs)?;
            let cmd = expect_str(name, "cmd", &take(&mut bound, 0))?;
            run(eval, &cmd)
        }
        Builtin::Start => {
            let mut bound = bind(name, &["cmd"], 1, args, kwargs)?;
            let cmd = expect_str(name, "cmd", &take(&mut bound, 0))?;
            start(eval, &cmd)
        }
        Builtin::Service => {
            let mut bound = bind(name, &["server", "host", "port"], 3, args, kwargs)?;
            let handle = ProcessHandle::from_value(&take(&mut bound, 0))?;
            let host = expect_str(name, "host", &take(&mut bound, 1))?;
            let port = expect_int(name, "port", &take(&mut bound, 2))?;
            service(eval, handle, host, port)
        }
        Builtin::Register => {
            let mut bound = bind(name, &["name", "tier", "provider", "deps"], 3, args, kwargs)?;
            let service = expect_str(name, "name", &take(&mut bound, 0))?;
            let tier = expect_str(name, "tier", &take(&mut bound, 1))?;
            let provider = take(&mut bound, 2);
            let deps = bound[3].take().unwrap_or_else(|| Value::list(Vec::new()));
            register(eval, &service, &tier, provider, deps, loc)
        }
        Builtin::Print => {
            no_kwargs(name, &kwargs)?;
            let line = args.iter().map(Value::to_str).collect::<Vec<_>>().join(" ");
            let mut out = eval.host.stdout.borrow_mut();
            writeln!(out, "{line}").map_err(ScriptError::host)?;
            Ok(Value::None)
        }
        Builtin::Fail => {
            no_kwargs(name, &kwargs)?;
            let message = args.iter().map(Value::to_str).collect::<Vec<_>>().join(" ");
            Err(ScriptError::new(ErrorKind::Fail, message))
        }
        Builtin::Len => {
            let mut bound = bind(name, &["x"], 1, args, kwargs)?;
            let len = match take(&mut bound, 0) {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.borrow().len(),
                Value::Tuple(items) => items.len(),
                Value::Dict(dict) => dict.borrow().len(),
                other => {
                    return Err(ScriptError::type_error(format!(
                        "{} has no len()",
                        other.type_name()
                    )));
                }
            };
            i64::try_from(len)
                .map(Value::Int)
                .map_err(|_| ScriptError::type_error("length out of range"))
        }
        Builtin::Str => {
            let mut bound = bind(name, &["x"], 1, args, kwargs)?;
            Ok(Value::str(&take(&mut bound, 0).to_str()))
        }
        Builtin::Range => {
            no_kwargs(name, &kwargs)?;
            let ints = args
                .iter()
                .map(|v| expect_int(name, "argument", v))
                .collect::<Result<Vec<_>>>()?;
            let (start, stop, step) = match ints[..] {
                [stop] => (0, stop, 1),
                [start, stop] => (start, stop, 1),
                [start, stop, step] => (start, stop, step),
                _ => {
                    return Err(ScriptError::usage(format!(
                        "range() takes 1 to 3 arguments, got {}",
                        ints.len()
                    )));
                }
            };
            if step == 0 {
                return Err(ScriptError::usage("range() step must not be zero"));
            }
            let mut items = Vec::new();
            let mut i = start;
            while (step > 0 && i < stop) || (step < 0 && i > stop) {
                items.push(Value::Int(i));
                i = match i.checked_add(step) {
                    Some(next) => next,
                    None => break,
                };
            }
            Ok(Value::list(items))
        }
    }
}

fn run(eval: &mut Eval<'_>, cmd: &str) -> Result<Value> {
    let cwd = working_dir(&eval.file);
    debug!(%cmd, cwd = %cwd.display(), "run");
    let host = &eval.host;
    let mut stdout = host.stdout.borrow_mut();
    let mut stderr = host.stderr.borrow_mut();
    host.runner
        .run_with_io(&shell_command(cmd), cwd, &mut **stdout, &mut **stderr)
        .map_err(ScriptError::host)?;
    Ok(Value::None)
}

fn start(eval: &mut Eval<'_>, cmd: &str) -> Result<Value> {
    let cwd = working_dir(&eval.file);
    let started = eval
        .host
        .runner
        .start_with_logs(&shell_command(cmd), cwd, &eval.key)
        .map_err(ScriptError::host)?;
    Ok(Value::Process(ProcessHandle::from_record(&started.record)))
}

fn service(eval: &mut Eval<'_>, handle: ProcessHandle, host: String, port: i64) -> Result<Value> {
    if host.is_empty() {
        return Err(ScriptError::usage("service: host must not be empty"));
    }
    let port = u16::try_from(port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| ScriptError::usage(format!("service: invalid port {port}")))?;

    let registry = eval.host.registry();
    let record = registry
        .get(handle.pid)
        .map_err(ScriptError::host)?
        .ok_or_else(|| {
            ScriptError::new(
                ErrorKind::Host,
                format!("service: no pets process with pid {}", handle.pid),
            )
        })?;

    let exposed = record.with_exposed_host(host, port);
    registry.modify(exposed.clone()).map_err(ScriptError::host)?;
    info!(pid = exposed.pid, host = ?exposed.host(), "exposed process");
    Ok(Value::Process(ProcessHandle::from_record(&exposed)))
}

fn register(
    eval: &mut Eval<'_>,
    name: &str,
    tier: &str,
    provider: Value,
    deps: Value,
    loc: Loc,
) -> Result<Value> {
    let key = ServiceKey::new(name, tier)
        .map_err(|e| ScriptError::usage(format!("register: {e}")).with_source(e))?;

    let Value::Function(function) = provider else {
        return Err(ScriptError::usage(format!(
            "register: provider must be a function, got {}",
            provider.type_name()
        )));
    };

    let deps = match &deps {
        Value::List(_) | Value::Tuple(_) => deps.iterate()?,
        other => {
            return Err(ScriptError::usage(format!(
                "register: deps must be a list, got {}",
                other.type_name()
            )));
        }
    };
    let deps = deps
        .iter()
        .map(|dep| {
            let dep = expect_str("register", "each dep", dep)?;
            ServiceName::new(dep)
                .map_err(|e| ScriptError::usage(format!("register: {e}")).with_source(e))
        })
        .collect::<Result<Vec<_>>>()?;

    if deps.len() < function.required_params() {
        return Err(ScriptError::usage(format!(
            "register: provider {}() takes {} argument(s) but only {} dependencies are declared",
            function.name(),
            function.required_params(),
            deps.len()
        )));
    }

    let Some(loading) = eval.loading.as_mut() else {
        return Err(ScriptError::usage(
            "register() cannot be called while a service is starting",
        ));
    };

    let position = format!("{}:{}", eval.file.display(), loc.line);
    info!(%key, %position, "register");
    let provider = ScriptProvider::new(function, Rc::clone(&eval.host));
    loading
        .school
        .add_provider(key, deps, Box::new(provider), position)
        .map_err(ScriptError::host)?;
    Ok(Value::None)
}
