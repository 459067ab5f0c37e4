use std::io;

use thiserror::Error;

use crate::exec::ResolveError;
use crate::parser::ParseError;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),

    #[error("{name}: {message}")]
    Builtin { name: &'static str, message: String },

    #[error("builtin `{0}` cannot be used in a pipeline")]
    BuiltinInPipeline(&'static str),

    #[error("failed to install SIGCHLD handler: {0}")]
    Signal(#[source] nix::Error),

    #[error("{0}: {1}")]
    Sys(&'static str, #[source] nix::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type CliResult<T = ()> = Result<T, ShellError>;

/// What the run loop does after a line has been handled.
#[derive(Debug, PartialEq)]
pub enum Flow {
    /// Print the text (possibly empty) and read the next line.
    Continue(String),
    Exit,
}

pub fn ok<T: ToString>(s: T) -> CliResult<Flow> {
    Ok(Flow::Continue(s.to_string()))
}

pub fn builtin_err<T: ToString>(name: &'static str, message: T) -> ShellError {
    ShellError::Builtin {
        name,
        message: message.to_string(),
    }
}

pub fn sys(call: &'static str) -> impl FnOnce(nix::Error) -> ShellError {
    move |e| ShellError::Sys(call, e)
}
