//! Petsfile interpreter
//!
//! A Petsfile is written in a small Starlark-style language. Top-level code
//! runs commands (`run`), starts background processes (`start`), exposes them
//! as network services (`service`) and declares providers for the dependency
//! resolver (`register`). Files pull in other files with `load`.
//!
//! ```text
//! load("../db", "start_db")
//!
//! def start_api(db):
//!     server = start("./api --db " + db.host)
//!     return service(server, "localhost", 8081)
//!
//! register("api", "local", start_api, deps=["db"])
//! ```
//!
//! [`Petsitter`] executes files; providers registered along the way run
//! later, when the [`School`] brings their services up.

mod ast;
mod builtins;
mod error;
mod eval;
mod lexer;
mod loader;
mod parser;
mod provider;
mod value;

pub use error::{ErrorKind, Position, Result, ScriptError};
pub use loader::ModuleFetcher;
pub use provider::ScriptProvider;
pub use value::{ProcessHandle, Value};

use builtins::Host;
use loader::Loader;
use pets_core::config::Config;
use pets_core::{Registry, Runner, School};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;

/// Names a module exports, including the synthetic `dir`
pub type Bindings = BTreeMap<String, Value>;

/// Default name of the file loaded from a directory
pub const DEFAULT_FILE_NAME: &str = "Petsfile";

/// Executes Petsfiles against one runner, caching every file it loads.
pub struct Petsitter {
    host: Rc<Host>,
    loader: Loader,
}

impl Petsitter {
    pub fn new(runner: Runner, stdout: Box<dyn Write + Send>, stderr: Box<dyn Write + Send>) -> Self {
        Self {
            host: Rc::new(Host {
                runner,
                stdout: RefCell::new(stdout),
                stderr: RefCell::new(stderr),
            }),
            loader: Loader::new(DEFAULT_FILE_NAME.to_string()),
        }
    }

    /// Resolve remote `load()` locators through `fetcher`.
    pub fn with_fetcher(mut self, fetcher: impl ModuleFetcher + 'static) -> Self {
        self.loader.set_fetcher(Box::new(fetcher));
        self
    }

    /// File looked for when `load()` names a directory.
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.loader.set_file_name(file_name.into());
        self
    }

    pub fn with_config(self, config: &Config) -> Self {
        self.with_file_name(config.script.file_name.clone())
    }

    pub fn registry(&self) -> &Registry {
        self.host.registry()
    }

    /// Execute the file at `path`, registering its providers with `school`.
    ///
    /// Executing the same file again returns the first outcome without
    /// running it twice.
    pub fn exec_file(&mut self, path: impl AsRef<Path>, school: &mut School) -> Result<Bindings> {
        self.loader.exec_file(&self.host, school, path.as_ref())
    }
}
