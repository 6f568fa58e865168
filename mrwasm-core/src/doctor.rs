//! Toolchain presence checks.
//!
//! The doctor resolves every executable the pipeline shells out to
//! against the search path. It is a point-in-time check: a tool found
//! here may still fail to start later, which the pipeline reports as a
//! separate error.

use std::env;
use std::ffi::{OsStr, OsString};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::report;
use crate::toolchain::{BYTECODE_COMPILER, WEB_COMPILER, WEB_COMPILER_CXX};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ToolCategory {
    /// mruby: the script to bytecode compiler.
    Bytecode,
    /// Emscripten: the C to wasm compiler drivers.
    NativeToWeb,
}

impl ToolCategory {
    pub fn hint(self) -> &'static str {
        match self {
            ToolCategory::Bytecode => {
                "mruby is missing: install mruby (https://mruby.org) and make sure `mrbc` is on your PATH"
            }
            ToolCategory::NativeToWeb => {
                "Emscripten is missing: install the emsdk (https://emscripten.org) and activate it with `source ./emsdk_env.sh`"
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequiredTool {
    pub name: &'static str,
    pub category: ToolCategory,
}

/// Every executable a build needs, in probe order.
pub const REQUIRED_TOOLS: &[RequiredTool] = &[
    RequiredTool {
        name: BYTECODE_COMPILER,
        category: ToolCategory::Bytecode,
    },
    RequiredTool {
        name: WEB_COMPILER,
        category: ToolCategory::NativeToWeb,
    },
    RequiredTool {
        name: WEB_COMPILER_CXX,
        category: ToolCategory::NativeToWeb,
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStatus {
    pub name: &'static str,
    pub category: ToolCategory,
    /// Where the tool resolved to, `None` when it is missing.
    pub path: Option<PathBuf>,
}

impl ToolStatus {
    pub fn is_found(&self) -> bool {
        self.path.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    tools: Vec<ToolStatus>,
}

impl ProbeReport {
    pub fn tools(&self) -> &[ToolStatus] {
        &self.tools
    }

    /// True when at least one required tool is missing.
    pub fn has_errors(&self) -> bool {
        self.tools.iter().any(|tool| !tool.is_found())
    }

    pub fn missing(&self) -> Vec<&'static str> {
        self.tools
            .iter()
            .filter(|tool| !tool.is_found())
            .map(|tool| tool.name)
            .collect()
    }

    /// Categories with at least one missing tool, each listed once.
    pub fn missing_categories(&self) -> Vec<ToolCategory> {
        let mut categories: Vec<_> = self
            .tools
            .iter()
            .filter(|tool| !tool.is_found())
            .map(|tool| tool.category)
            .collect();
        categories.sort();
        categories.dedup();
        categories
    }
}

/// Whether the doctor runs on its own or as the pre-build gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoctorMode {
    Standalone,
    /// The all-clear line is left out; the build continues right away.
    Gate,
}

#[derive(Debug, Clone, Default)]
pub struct Doctor {
    search_path: Option<OsString>,
}

impl Doctor {
    /// Probes the `PATH` of the current process.
    pub fn from_env() -> Self {
        Self {
            search_path: env::var_os("PATH"),
        }
    }

    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
        }
    }

    pub fn probe(&self) -> ProbeReport {
        let search_path = self.search_path.as_deref().unwrap_or_default();
        let tools = REQUIRED_TOOLS
            .iter()
            .map(|tool| {
                let path = resolve(tool.name, search_path);
                debug!(tool = tool.name, path = ?path, "probed tool");
                ToolStatus {
                    name: tool.name,
                    category: tool.category,
                    path,
                }
            })
            .collect();
        ProbeReport { tools }
    }

    /// Probes the toolchain and writes the human-readable report.
    pub fn check<W: Write>(&self, mode: DoctorMode, out: &mut W) -> std::io::Result<ProbeReport> {
        let report = self.probe();
        report::write_probe_report(out, &report, mode)?;
        Ok(report)
    }
}

/// Resolves `name` the way a shell would, returning the first executable hit.
pub fn resolve(name: &str, search_path: &OsStr) -> Option<PathBuf> {
    env::split_paths(search_path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .flat_map(|dir| candidates(&dir, name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(windows)]
fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    let extensions = env::var("PATHEXT").unwrap_or_else(|_| ".COM;.EXE;.BAT;.CMD".to_string());
    let mut out = vec![dir.join(name)];
    out.extend(
        extensions
            .split(';')
            .filter(|ext| !ext.is_empty())
            .map(|ext| dir.join(format!("{name}{}", ext.to_ascii_lowercase()))),
    );
    out
}

#[cfg(not(windows))]
fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    vec![dir.join(name)]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
