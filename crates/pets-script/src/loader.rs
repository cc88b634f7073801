//! Finding, executing and caching Petsfiles
//!
//! Each resolved file runs at most once per [`Loader`]; later loads get the
//! cached bindings or the cached error. A file that is still executing when
//! it is loaded again is a cycle.

use crate::Bindings;
use crate::builtins::Host;
use crate::error::{ErrorKind, Result, ScriptError};
use crate::eval::{Eval, Loading, Scope};
use crate::parser::parse_module;
use crate::value::Value;
use pets_core::{BoxError, School, ServiceKey};
use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Turns a remote module locator (for example `go-get://github.com/org/repo`)
/// into a local directory.
pub trait ModuleFetcher {
    fn fetch(&self, locator: &Url) -> std::result::Result<PathBuf, BoxError>;
}

impl<F> ModuleFetcher for F
where
    F: Fn(&Url) -> std::result::Result<PathBuf, BoxError>,
{
    fn fetch(&self, locator: &Url) -> std::result::Result<PathBuf, BoxError> {
        self(locator)
    }
}

enum CacheEntry {
    Loading,
    Done(Result<Bindings>),
}

pub(crate) struct Loader {
    cache: HashMap<PathBuf, CacheEntry>,
    fetcher: Option<Box<dyn ModuleFetcher>>,
    file_name: String,
}

/// Lexically resolve `.` and `..` so that every spelling of a path maps to
/// the same cache entry.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn load_error(message: String, source: io::Error) -> ScriptError {
    ScriptError::new(ErrorKind::Load, message).with_source(source)
}

impl Loader {
    pub(crate) fn new(file_name: String) -> Self {
        Self {
            cache: HashMap::new(),
            fetcher: None,
            file_name,
        }
    }

    pub(crate) fn set_fetcher(&mut self, fetcher: Box<dyn ModuleFetcher>) {
        self.fetcher = Some(fetcher);
    }

    pub(crate) fn set_file_name(&mut self, file_name: String) {
        self.file_name = file_name;
    }

    /// Execute a file given directly by the caller.
    pub(crate) fn exec_file(
        &mut self,
        host: &Rc<Host>,
        school: &mut School,
        path: &Path,
    ) -> Result<Bindings> {
        let file = std::path::absolute(path)
            .map(|p| normalize(&p))
            .map_err(|e| load_error(format!("cannot resolve {}: {e}", path.display()), e))?;

        match self.cache.get(&file) {
            Some(CacheEntry::Loading) => {
                return Err(ScriptError::new(
                    ErrorKind::Cycle,
                    format!("Pets already executing file: {}", file.display()),
                ));
            }
            Some(CacheEntry::Done(result)) => return result.clone(),
            None => {}
        }

        let meta = std::fs::metadata(&file)
            .map_err(|e| load_error(format!("cannot load {}: {e}", file.display()), e))?;
        if !meta.is_file() {
            return Err(ScriptError::new(
                ErrorKind::Load,
                format!("{} should be a plain-text {}", file.display(), self.file_name),
            ));
        }
        self.execute(host, school, &file)
    }

    /// Resolve a `load()` locator relative to the file `from` and return the
    /// module's bindings, executing it if needed.
    pub(crate) fn load(
        &mut self,
        host: &Rc<Host>,
        school: &mut School,
        from: &Path,
        locator: &str,
    ) -> Result<Bindings> {
        match Url::parse(locator) {
            Ok(url) => {
                if url.query().is_some() || url.fragment().is_some() {
                    return Err(ScriptError::usage(format!(
                        "load: remote locator {locator:?} may not contain query or fragment info"
                    )));
                }
                let Some(fetcher) = &self.fetcher else {
                    return Err(ScriptError::usage(format!(
                        "load: no fetcher is configured for remote locator {locator:?}"
                    )));
                };
                let dir = fetcher.fetch(&url).map_err(|e| {
                    ScriptError::new(ErrorKind::Load, format!("load: {locator}: {e}"))
                        .with_boxed_source(e)
                })?;
                debug!(%locator, dir = %dir.display(), "fetched remote module");
                self.load_at(host, school, normalize(&dir), true)
            }
            Err(_) => {
                let base = from.parent().unwrap_or_else(|| Path::new("."));
                self.load_at(host, school, normalize(&base.join(locator)), false)
            }
        }
    }

    /// Load the module at `module`, a file or a directory holding one. With
    /// `missing_ok`, a missing module only exports `dir`.
    fn load_at(
        &mut self,
        host: &Rc<Host>,
        school: &mut School,
        module: PathBuf,
        missing_ok: bool,
    ) -> Result<Bindings> {
        let mut bindings = Bindings::new();
        bindings.insert("dir".to_string(), Value::str(&module.to_string_lossy()));

        let mut file = module;
        let mut meta = match std::fs::metadata(&file) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound && missing_ok => return Ok(bindings),
            Err(e) => return Err(load_error(format!("cannot load {}: {e}", file.display()), e)),
        };
        if meta.is_dir() {
            file = file.join(&self.file_name);
            meta = match std::fs::metadata(&file) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound && missing_ok => {
                    return Ok(bindings);
                }
                Err(e) => {
                    return Err(load_error(format!("cannot load {}: {e}", file.display()), e));
                }
            };
        }
        if !meta.is_file() {
            return Err(ScriptError::new(
                ErrorKind::Load,
                format!("{} should be a plain-text {}", file.display(), self.file_name),
            ));
        }

        let exported = match self.cache.get(&file) {
            Some(CacheEntry::Loading) => {
                return Err(ScriptError::new(
                    ErrorKind::Cycle,
                    format!("cycle in load graph detected: {}", file.display()),
                ));
            }
            Some(CacheEntry::Done(result)) => {
                debug!(file = %file.display(), "module already loaded");
                result.clone()?
            }
            None => self.execute(host, school, &file)?,
        };
        bindings.extend(exported);
        Ok(bindings)
    }

    /// Run a file's top-level statements and cache the outcome.
    fn execute(&mut self, host: &Rc<Host>, school: &mut School, file: &Path) -> Result<Bindings> {
        self.cache.insert(file.to_path_buf(), CacheEntry::Loading);
        let result = self.run_module(host, school, file);
        self.cache
            .insert(file.to_path_buf(), CacheEntry::Done(result.clone()));
        result
    }

    fn run_module(&mut self, host: &Rc<Host>, school: &mut School, file: &Path) -> Result<Bindings> {
        let source = std::fs::read_to_string(file)
            .map_err(|e| load_error(format!("cannot read {}: {e}", file.display()), e))?;
        let path: Arc<Path> = Arc::from(file);
        let stmts = parse_module(&source, &path)?;

        info!(file = %file.display(), "executing");
        let env = Scope::new_env(None);
        let loading = Loading {
            loader: self,
            school,
        };
        Eval::new(Rc::clone(host), Some(loading), ServiceKey::global(), path)
            .exec_module(&stmts, &env)?;

        let exports = env
            .borrow()
            .vars()
            .filter(|(name, _)| !name.starts_with('_'))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Ok(exports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize(Path::new("/work/inner/../Petsfile")),
            PathBuf::from("/work/Petsfile")
        );
        assert_eq!(normalize(Path::new("/work/./a/")), PathBuf::from("/work/a"));
        assert_eq!(normalize(Path::new("/..")), PathBuf::from("/"));
        assert_eq!(normalize(Path::new("../a")), PathBuf::from("../a"));
    }

    #[test]
    fn test_relative_locators_are_not_urls() {
        assert!(Url::parse("inner").is_err());
        assert!(Url::parse("../").is_err());
        assert!(Url::parse("/abs/dir").is_err());
        assert!(Url::parse("go-get://github.com/org/repo").is_ok());
    }
}
