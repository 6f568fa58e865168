//! Adapters over the external compilers.
//!
//! The pipeline only talks to the [`Toolchain`] trait. The
//! process-backed implementation runs the real executables; tests swap
//! in fakes that write the expected files themselves.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::doctor;
use crate::error::BuildError;

pub const BYTECODE_COMPILER: &str = "mrbc";
pub const WEB_COMPILER: &str = "emcc";
pub const WEB_COMPILER_CXX: &str = "em++";

/// Arguments for `mrbc -B<app> -o <output> <input>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytecodeArgs {
    pub app_name: String,
    pub output: PathBuf,
    pub input: PathBuf,
}

impl BytecodeArgs {
    pub fn to_args(&self) -> Vec<OsString> {
        vec![
            format!("-B{}", self.app_name).into(),
            "-o".into(),
            self.output.clone().into(),
            self.input.clone().into(),
        ]
    }
}

/// Arguments for the `emcc` invocation that links the module and its loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebArgs {
    /// Adds `-Os` and `--closure 1` together; there is no partial mode.
    pub optimize: bool,
    pub include_dir: PathBuf,
    pub source: PathBuf,
    pub library: PathBuf,
    pub output: PathBuf,
}

impl WebArgs {
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-s".into(), "WASM=1".into()];
        if self.optimize {
            args.push("-Os".into());
        }
        let mut include = OsString::from("-I");
        include.push(&self.include_dir);
        args.push(include);
        args.push(self.source.clone().into());
        args.push(self.library.clone().into());
        args.push("-o".into());
        args.push(self.output.clone().into());
        if self.optimize {
            args.push("--closure".into());
            args.push("1".into());
        }
        args
    }
}

/// Outcome of one external tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub tool: String,
    pub args: Vec<OsString>,
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl Invocation {
    pub fn succeeded(&self) -> bool {
        self.code == Some(0)
    }

    /// Turns a non-zero or abnormal exit into [`BuildError::ToolFailed`].
    pub fn check(self) -> Result<Self, BuildError> {
        if self.succeeded() {
            Ok(self)
        } else {
            Err(BuildError::ToolFailed {
                tool: self.tool,
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

pub trait Toolchain {
    /// Runs the bytecode compiler. `Err` only when the process cannot start.
    fn compile_bytecode(&self, args: &BytecodeArgs) -> Result<Invocation, BuildError>;

    /// Runs the native-to-web compiler. `Err` only when the process cannot start.
    fn compile_web(&self, args: &WebArgs) -> Result<Invocation, BuildError>;
}

/// Runs the real executables, blocking until each one exits.
///
/// Bare program names are resolved with the doctor's lookup, so the file
/// that passed the gate (including `PATHEXT` matches such as `emcc.bat`
/// on Windows) is the one that gets started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessToolchain {
    bytecode: PathBuf,
    web: PathBuf,
    search_path: Option<OsString>,
}

impl ProcessToolchain {
    pub fn new(bytecode: impl Into<PathBuf>, web: impl Into<PathBuf>) -> Self {
        Self {
            bytecode: bytecode.into(),
            web: web.into(),
            search_path: env::var_os("PATH"),
        }
    }

    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    /// The file that will be started for `program`.
    fn locate(&self, program: &Path) -> PathBuf {
        let bare = program.components().count() == 1;
        match (bare, program.to_str(), self.search_path.as_deref()) {
            (true, Some(name), Some(search_path)) => {
                doctor::resolve(name, search_path).unwrap_or_else(|| program.to_path_buf())
            }
            _ => program.to_path_buf(),
        }
    }
}

impl Default for ProcessToolchain {
    fn default() -> Self {
        Self::new(BYTECODE_COMPILER, WEB_COMPILER)
    }
}

impl Toolchain for ProcessToolchain {
    fn compile_bytecode(&self, args: &BytecodeArgs) -> Result<Invocation, BuildError> {
        run(&self.locate(&self.bytecode), BYTECODE_COMPILER, args.to_args())
    }

    fn compile_web(&self, args: &WebArgs) -> Result<Invocation, BuildError> {
        run(&self.locate(&self.web), WEB_COMPILER, args.to_args())
    }
}

fn run(program: &Path, tool: &str, args: Vec<OsString>) -> Result<Invocation, BuildError> {
    debug!(tool, program = %program.display(), ?args, "invoking");
    let started = Instant::now();
    let output = Command::new(program)
        .args(&args)
        .output()
        .map_err(|source| BuildError::Spawn {
            tool: tool.to_string(),
            source,
        })?;
    let duration = started.elapsed();

    let invocation = Invocation {
        tool: tool.to_string(),
        args,
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration,
    };
    info!(tool, code = ?invocation.code, ?duration, "tool finished");
    if !invocation.stdout.is_empty() {
        debug!(tool, stdout = %invocation.stdout.trim_end(), "tool output");
    }
    Ok(invocation)
}
