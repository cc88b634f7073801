//! Script functions as service providers

use crate::builtins::Host;
use crate::error::{ErrorKind, ScriptError};
use crate::eval::Eval;
use crate::value::{Function, ProcessHandle, Value};
use pets_core::{BoxError, ProcessRecord, Provider, ServiceKey};
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

/// A function passed to `register()`.
///
/// The function receives the handles of its dependencies as positional
/// arguments (as many as it declares parameters) and must return the handle
/// of the process it started, normally the result of `service()`.
pub struct ScriptProvider {
    function: Rc<Function>,
    host: Rc<Host>,
}

impl ScriptProvider {
    pub(crate) fn new(function: Rc<Function>, host: Rc<Host>) -> Self {
        Self { function, host }
    }
}

impl Provider for ScriptProvider {
    fn provide(&self, key: &ServiceKey, deps: &[ProcessRecord]) -> Result<ProcessRecord, BoxError> {
        let args = deps
            .iter()
            .take(self.function.def.params.len())
            .map(|record| Value::Process(ProcessHandle::from_record(record)))
            .collect();

        debug!(%key, function = self.function.name(), "calling provider");
        let mut eval = Eval::new(
            Rc::clone(&self.host),
            None,
            key.clone(),
            Arc::clone(&self.function.file),
        );
        let result = eval.call_function(&self.function, args, Vec::new(), self.function.def.loc)?;

        let handle = ProcessHandle::from_value(&result).map_err(|e| {
            ScriptError::usage(format!(
                "provider {}() must return a process: {}",
                self.function.name(),
                e.message()
            ))
        })?;
        let record = self.host.registry().get(handle.pid)?.ok_or_else(|| {
            ScriptError::new(
                ErrorKind::Host,
                format!(
                    "provider {}() returned pid {}, which is not a running pets process",
                    self.function.name(),
                    handle.pid
                ),
            )
        })?;
        Ok(record)
    }
}
