use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no input file given (usage: mrwasm build <file> [--optimize])")]
    MissingInput,
    #[error("input file {0} was not found")]
    InputNotFound(PathBuf),
    #[error(
        "missing tools: {}; resolve the toolchain errors reported above before building",
        .missing.join(", ")
    )]
    Toolchain { missing: Vec<String> },
    #[error("bundled asset {0} was not found")]
    MissingAsset(PathBuf),
    #[error("failed to start `{tool}`: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },
    #[error("`{tool}` {}{}", describe_exit(.code), describe_stderr(.stderr))]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("`{tool}` did not produce {path}")]
    MissingOutput { tool: String, path: PathBuf },
    #[error("failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write report: {0}")]
    Report(#[source] io::Error),
}

impl BuildError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        BuildError::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with status {code}"),
        None => "was terminated by a signal".to_string(),
    }
}

fn describe_stderr(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(":\n{stderr}")
    }
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("{0} was not found; run `mrwasm build <file>` first")]
    NotBuilt(PathBuf),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("server i/o error: {0}")]
    Io(#[from] io::Error),
}
