//! Errors raised while loading or evaluating a Petsfile

use crate::ast::Loc;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// What went wrong, broadly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The file could not be tokenized or parsed
    Syntax,
    /// A name was used before it was bound
    Undefined,
    /// An operation was applied to a value of the wrong type
    Type,
    /// A builtin was called with malformed arguments
    Usage,
    /// The script called `fail()`
    Fail,
    /// A file loaded itself, directly or through other files
    Cycle,
    /// A module could not be found, read or fetched
    Load,
    /// The process runner, registry or resolver reported an error
    Host,
}

/// A location in a Petsfile
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    pub file: Arc<Path>,
    pub line: u32,
    pub col: u32,
}

impl Position {
    pub fn new(file: &Arc<Path>, loc: Loc) -> Self {
        Self {
            file: Arc::clone(file),
            line: loc.line,
            col: loc.col,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.col)
    }
}

/// An interpreter failure with its source position and call stack.
///
/// Cloneable so that a module that failed to load reports the same error
/// every time it is loaded again.
#[derive(Debug, Clone)]
pub struct ScriptError {
    kind: ErrorKind,
    message: String,
    position: Option<Position>,
    backtrace: Vec<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

pub type Result<T> = std::result::Result<T, ScriptError>;

impl ScriptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            position: None,
            backtrace: Vec::new(),
            source: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Usage, message)
    }

    /// Wrap an error from outside the interpreter. The message is the
    /// error's own text; the error itself stays reachable via `source()`.
    pub fn host<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(ErrorKind::Host, error.to_string()).with_source(error)
    }

    pub fn with_source<E>(mut self, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(error));
        self
    }

    pub fn with_boxed_source(mut self, error: Box<dyn std::error::Error + Send + Sync>) -> Self {
        self.source = Some(Arc::from(error));
        self
    }

    /// Attach a position unless a more precise one is already set.
    pub fn at(mut self, position: Position) -> Self {
        if self.position.is_none() {
            self.position = Some(position);
        }
        self
    }

    pub(crate) fn at_loc(self, file: &Arc<Path>, loc: Loc) -> Self {
        self.at(Position::new(file, loc))
    }

    /// Record that the error passed through a call to `function` at `call_site`.
    pub(crate) fn with_frame(mut self, function: &str, call_site: Position) -> Self {
        self.backtrace.push(format!("{call_site}: in {function}"));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Call sites of the functions the error passed through, innermost first.
    pub fn backtrace(&self) -> &[String] {
        &self.backtrace
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.position {
            Some(position) => write!(f, "{position}: {}", self.message)?,
            None => f.write_str(&self.message)?,
        }
        for frame in &self.backtrace {
            write!(f, "\n  {frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn file() -> Arc<Path> {
        Arc::from(Path::new("/work/Petsfile"))
    }

    #[test]
    fn test_display_with_position_and_backtrace() {
        let err = ScriptError::new(ErrorKind::Undefined, "undefined: hello")
            .at_loc(&file(), Loc { line: 3, col: 7 })
            .with_frame("start_local", Position::new(&file(), Loc { line: 9, col: 1 }));
        assert_eq!(
            err.to_string(),
            "/work/Petsfile:3:7: undefined: hello\n  /work/Petsfile:9:1: in start_local"
        );
    }

    #[test]
    fn test_first_position_wins() {
        let err = ScriptError::usage("bad")
            .at_loc(&file(), Loc { line: 1, col: 1 })
            .at_loc(&file(), Loc { line: 2, col: 2 });
        assert_eq!(err.position().map(|p| p.line), Some(1));
    }

    #[test]
    fn test_host_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = ScriptError::host(io);
        assert_eq!(err.kind(), ErrorKind::Host);
        assert_eq!(err.message(), "gone");
        let source = err.source().unwrap();
        assert!(source.downcast_ref::<std::io::Error>().is_some());
    }
}
