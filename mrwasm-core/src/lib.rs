//! Core of the mrwasm toolchain driver.
//!
//! mrwasm does not compile anything itself. It drives two external
//! toolchains and stages their output:
//!
//!   script.rb
//!     -> mrbc        (bytecode embedded in build/app.c)
//!     -> + main.c    (runtime init stub appended)
//!     -> emcc        (build/app.js + build/app.wasm)
//!     -> index.html  (host page copied next to the module)
//!
//! The CLI should depend on this crate rather than reimplementing
//! the pipeline.

// ---------------------------------------------------------------------
// Configuration and errors
// ---------------------------------------------------------------------

pub mod config;
pub mod error;
pub mod assets;

// ---------------------------------------------------------------------
// Toolchain probing and invocation
// ---------------------------------------------------------------------

pub mod doctor;
pub mod toolchain;

// ---------------------------------------------------------------------
// Build pipeline, serving and terminal output
// ---------------------------------------------------------------------

pub mod pipeline;
pub mod server;
pub mod report;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use assets::AssetBundle;
pub use config::{ArtifactLayout, BuildConfig, ServeConfig};
pub use doctor::{Doctor, DoctorMode, ProbeReport, ToolCategory};
pub use error::{BuildError, ServeError};
pub use pipeline::{BuildOutcome, BuildRequest, Pipeline};
pub use toolchain::{Invocation, ProcessToolchain, Toolchain};
