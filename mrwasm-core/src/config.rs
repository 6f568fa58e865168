//! Immutable configuration objects.
//!
//! A [`BuildConfig`] is constructed once per invocation by the CLI and
//! passed by reference to every component. Nothing in the core reads
//! process-wide mutable state besides the executable search path.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::assets::AssetBundle;

/// Directory, relative to the working directory, that receives all artifacts.
pub const OUTPUT_DIR: &str = "build";

/// Tag passed to `mrbc -B`; names the bytecode array in the generated C file.
pub const APP_NAME: &str = "app";

pub const INTERMEDIATE_SOURCE: &str = "app.c";
pub const LOADER_SCRIPT: &str = "app.js";
pub const BINARY_MODULE: &str = "app.wasm";
pub const HOST_PAGE: &str = "index.html";

pub const DEFAULT_PORT: u16 = 8000;

/// Locations of the well-known files inside the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn intermediate(&self) -> PathBuf {
        self.root.join(INTERMEDIATE_SOURCE)
    }

    pub fn loader(&self) -> PathBuf {
        self.root.join(LOADER_SCRIPT)
    }

    pub fn module(&self) -> PathBuf {
        self.root.join(BINARY_MODULE)
    }

    pub fn host_page(&self) -> PathBuf {
        self.root.join(HOST_PAGE)
    }

    /// Every path the pipeline clears before a build.
    pub fn staged(&self) -> [PathBuf; 4] {
        [
            self.intermediate(),
            self.loader(),
            self.module(),
            self.host_page(),
        ]
    }

    /// The artifacts a successful build leaves behind.
    pub fn artifacts(&self) -> [PathBuf; 3] {
        [self.module(), self.loader(), self.host_page()]
    }
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        Self::new(OUTPUT_DIR)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    pub layout: ArtifactLayout,
    pub assets: AssetBundle,
}

impl BuildConfig {
    pub fn new(assets: AssetBundle) -> Self {
        Self {
            layout: ArtifactLayout::default(),
            assets,
        }
    }

    pub fn with_layout(mut self, layout: ArtifactLayout) -> Self {
        self.layout = layout;
        self
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self::new(AssetBundle::bundled())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeConfig {
    pub root: PathBuf,
    pub addr: SocketAddr,
    pub open_browser: bool,
}

impl ServeConfig {
    /// Serves `layout`'s root on `127.0.0.1:8000`.
    pub fn new(layout: &ArtifactLayout) -> Self {
        Self {
            root: layout.root().to_path_buf(),
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            open_browser: false,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn open_browser(mut self, open: bool) -> Self {
        self.open_browser = open;
        self
    }

    pub fn host_page(&self) -> PathBuf {
        self.root.join(HOST_PAGE)
    }
}
