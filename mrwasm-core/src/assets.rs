//! Read-only resources shipped with mrwasm.
//!
//! The bundle holds the runtime init stub appended to the generated C
//! source, the host HTML page, and the mruby headers and static library
//! built for the wasm target.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::BuildError;

pub const RUNTIME_STUB: &str = "main.c";
pub const HOST_TEMPLATE: &str = "index.html";
pub const INCLUDE_DIR: &str = "include";
pub const STATIC_LIBRARY: &str = "lib/libmruby.a";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetBundle {
    root: PathBuf,
}

impl AssetBundle {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The `assets/` directory installed next to the workspace.
    pub fn bundled() -> Self {
        Self::new(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../assets"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn runtime_stub(&self) -> PathBuf {
        self.root.join(RUNTIME_STUB)
    }

    pub fn host_template(&self) -> PathBuf {
        self.root.join(HOST_TEMPLATE)
    }

    pub fn include_dir(&self) -> PathBuf {
        self.root.join(INCLUDE_DIR)
    }

    pub fn static_library(&self) -> PathBuf {
        self.root.join(STATIC_LIBRARY)
    }

    /// Fails on the first file the pipeline reads itself.
    ///
    /// Headers and the static library are consumed by `emcc`, which
    /// reports problems with them on its own.
    pub fn verify(&self) -> Result<(), BuildError> {
        for required in [self.runtime_stub(), self.host_template()] {
            if !required.is_file() {
                return Err(BuildError::MissingAsset(required));
            }
        }
        let headers = self.headers();
        debug!(
            root = %self.root.display(),
            headers = headers.len(),
            "asset bundle verified"
        );
        Ok(())
    }

    /// C headers under the include directory, relative to it.
    pub fn headers(&self) -> Vec<PathBuf> {
        let include = self.include_dir();
        WalkDir::new(&include)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| {
                entry.file_type().is_file()
                    && entry.path().extension().is_some_and(|ext| ext == "h")
            })
            .map(|entry| {
                entry
                    .path()
                    .strip_prefix(&include)
                    .unwrap_or(entry.path())
                    .to_path_buf()
            })
            .collect()
    }
}
