//! The build pipeline.
//!
//! Stages run strictly in order and every external invocation is
//! checked before the next stage starts:
//!
//!   validate input -> doctor gate -> asset check -> stage build/
//!     -> mrbc -> append runtime stub -> emcc -> copy host page
//!     -> remove intermediate
//!
//! Nothing touches the filesystem before the doctor gate has passed.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, info_span};

use crate::config::{APP_NAME, ArtifactLayout, BuildConfig};
use crate::doctor::{Doctor, DoctorMode};
use crate::error::BuildError;
use crate::toolchain::{BytecodeArgs, Invocation, Toolchain, WebArgs};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildRequest {
    pub input: Option<PathBuf>,
    pub optimize: bool,
}

impl BuildRequest {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: Some(input.into()),
            optimize: false,
        }
    }

    pub fn optimized(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub layout: ArtifactLayout,
    /// The bytecode and web compiler runs, in order.
    pub invocations: Vec<Invocation>,
}

pub struct Pipeline<'a> {
    config: &'a BuildConfig,
    doctor: &'a Doctor,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a BuildConfig, doctor: &'a Doctor) -> Self {
        Self { config, doctor }
    }

    /// Builds `request` into the configured output directory.
    ///
    /// The doctor's gate report is written to `out`.
    pub fn run<W: Write>(
        &self,
        request: &BuildRequest,
        toolchain: &dyn Toolchain,
        out: &mut W,
    ) -> Result<BuildOutcome, BuildError> {
        let input = validate_input(request)?;
        let _span = info_span!("build", input = %input.display(), optimize = request.optimize)
            .entered();

        let report = self
            .doctor
            .check(DoctorMode::Gate, out)
            .map_err(BuildError::Report)?;
        if report.has_errors() {
            return Err(BuildError::Toolchain {
                missing: report.missing().into_iter().map(String::from).collect(),
            });
        }

        let assets = &self.config.assets;
        assets.verify()?;

        let layout = &self.config.layout;
        stage(layout)?;

        let bytecode = toolchain
            .compile_bytecode(&BytecodeArgs {
                app_name: APP_NAME.to_string(),
                output: layout.intermediate(),
                input: input.to_path_buf(),
            })?
            .check()?;
        ensure_produced(&bytecode.tool, &layout.intermediate())?;

        inject_runtime_stub(&layout.intermediate(), &assets.runtime_stub())?;

        let web = toolchain
            .compile_web(&WebArgs {
                optimize: request.optimize,
                include_dir: assets.include_dir(),
                source: layout.intermediate(),
                library: assets.static_library(),
                output: layout.loader(),
            })?
            .check()?;
        ensure_produced(&web.tool, &layout.loader())?;
        ensure_produced(&web.tool, &layout.module())?;

        let host_page = layout.host_page();
        fs::copy(assets.host_template(), &host_page)
            .map_err(|source| BuildError::io("copy host page to", &host_page, source))?;

        let intermediate = layout.intermediate();
        fs::remove_file(&intermediate)
            .map_err(|source| BuildError::io("remove", &intermediate, source))?;

        info!(output = %layout.root().display(), "build finished");
        Ok(BuildOutcome {
            layout: layout.clone(),
            invocations: vec![bytecode, web],
        })
    }
}

fn validate_input(request: &BuildRequest) -> Result<&Path, BuildError> {
    let input = request.input.as_deref().ok_or(BuildError::MissingInput)?;
    if !input.is_file() {
        return Err(BuildError::InputNotFound(input.to_path_buf()));
    }
    Ok(input)
}

/// Clears the known artifact paths and makes sure the output directory exists.
fn stage(layout: &ArtifactLayout) -> Result<(), BuildError> {
    for path in layout.staged() {
        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed stale artifact"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(BuildError::io("remove", &path, source)),
        }
    }
    fs::create_dir_all(layout.root())
        .map_err(|source| BuildError::io("create", layout.root(), source))
}

/// A tool that exits cleanly but leaves no (or an empty) file is still a failure.
fn ensure_produced(tool: &str, path: &Path) -> Result<(), BuildError> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        _ => Err(BuildError::MissingOutput {
            tool: tool.to_string(),
            path: path.to_path_buf(),
        }),
    }
}

fn inject_runtime_stub(source: &Path, stub: &Path) -> Result<(), BuildError> {
    let stub_contents =
        fs::read(stub).map_err(|err| BuildError::io("read", stub, err))?;
    let mut file = OpenOptions::new()
        .append(true)
        .open(source)
        .map_err(|err| BuildError::io("open", source, err))?;
    file.write_all(b"\n\n")
        .and_then(|()| file.write_all(&stub_contents))
        .map_err(|err| BuildError::io("append runtime stub to", source, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetBundle;
    use crate::doctor::tests::tool_dir;
    use std::cell::RefCell;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    const STUB: &str = "int main(void) { return 0; }\n";
    const TEMPLATE: &str = "<html><script src=\"app.js\"></script></html>\n";

    #[derive(Default)]
    struct FakeToolchain {
        fail_bytecode: bool,
        fail_web: bool,
        skip_intermediate: bool,
        calls: RefCell<Vec<&'static str>>,
        web_args: RefCell<Option<WebArgs>>,
        seen_source: RefCell<Option<String>>,
    }

    fn invocation(tool: &str, code: i32, stderr: &str) -> Invocation {
        Invocation {
            tool: tool.to_string(),
            args: Vec::new(),
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
            duration: Duration::from_millis(1),
        }
    }

    impl Toolchain for FakeToolchain {
        fn compile_bytecode(&self, args: &BytecodeArgs) -> Result<Invocation, BuildError> {
            self.calls.borrow_mut().push("mrbc");
            if self.fail_bytecode {
                return Ok(invocation("mrbc", 1, "hello.rb:1: syntax error, unexpected end-of-input"));
            }
            if !self.skip_intermediate {
                fs::write(&args.output, "const uint8_t app[] = {0};").expect("write intermediate");
            }
            Ok(invocation("mrbc", 0, ""))
        }

        fn compile_web(&self, args: &WebArgs) -> Result<Invocation, BuildError> {
            self.calls.borrow_mut().push("emcc");
            *self.web_args.borrow_mut() = Some(args.clone());
            *self.seen_source.borrow_mut() =
                Some(fs::read_to_string(&args.source).expect("read intermediate"));
            if self.fail_web {
                return Ok(invocation("emcc", 1, "error: undefined symbol: mrb_open"));
            }
            fs::write(&args.output, "// loader").expect("write loader");
            fs::write(args.output.with_extension("wasm"), b"\0asm").expect("write module");
            Ok(invocation("emcc", 0, ""))
        }
    }

    struct Fixture {
        dir: TempDir,
        _tools: TempDir,
        config: BuildConfig,
        doctor: Doctor,
    }

    impl Fixture {
        fn new(tools: &[&str]) -> Self {
            let dir = tempdir().expect("tempdir");
            let assets = dir.path().join("assets");
            fs::create_dir_all(assets.join("include")).expect("create assets");
            fs::write(assets.join("main.c"), STUB).expect("write stub");
            fs::write(assets.join("index.html"), TEMPLATE).expect("write template");
            fs::write(dir.path().join("hello.rb"), "puts 'hello'\n").expect("write input");

            let tool_dir = tool_dir(tools);
            let doctor = Doctor::with_search_path(tool_dir.path());
            let config = BuildConfig::new(AssetBundle::new(assets))
                .with_layout(ArtifactLayout::new(dir.path().join("build")));
            Self {
                dir,
                _tools: tool_dir,
                config,
                doctor,
            }
        }

        fn complete() -> Self {
            Self::new(&["mrbc", "emcc", "em++"])
        }

        fn request(&self) -> BuildRequest {
            BuildRequest::new(self.dir.path().join("hello.rb"))
        }

        fn run(
            &self,
            request: &BuildRequest,
            toolchain: &FakeToolchain,
        ) -> Result<BuildOutcome, BuildError> {
            let mut out = Vec::new();
            Pipeline::new(&self.config, &self.doctor).run(request, toolchain, &mut out)
        }

        fn build_dir(&self) -> PathBuf {
            self.config.layout.root().to_path_buf()
        }

        fn listing(&self) -> Vec<(String, Vec<u8>)> {
            let mut entries: Vec<_> = fs::read_dir(self.build_dir())
                .expect("read build dir")
                .map(|entry| {
                    let entry = entry.expect("dir entry");
                    let name = entry.file_name().to_string_lossy().into_owned();
                    let contents = fs::read(entry.path()).expect("read artifact");
                    (name, contents)
                })
                .collect();
            entries.sort();
            entries
        }
    }

    #[test]
    fn successful_build_leaves_exactly_three_artifacts() {
        let fixture = Fixture::complete();
        let toolchain = FakeToolchain::default();

        let outcome = fixture.run(&fixture.request(), &toolchain).expect("build");

        let names: Vec<_> = fixture.listing().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["app.js", "app.wasm", "index.html"]);
        assert_eq!(*toolchain.calls.borrow(), ["mrbc", "emcc"]);
        assert_eq!(outcome.invocations.len(), 2);
        assert_eq!(
            fs::read_to_string(fixture.config.layout.host_page()).expect("host page"),
            TEMPLATE
        );
    }

    #[test]
    fn runtime_stub_is_appended_after_blank_line() {
        let fixture = Fixture::complete();
        let toolchain = FakeToolchain::default();

        fixture.run(&fixture.request(), &toolchain).expect("build");

        let source = toolchain.seen_source.borrow().clone().expect("emcc saw source");
        assert_eq!(source, format!("const uint8_t app[] = {{0}};\n\n{STUB}"));
    }

    #[test]
    fn repeated_builds_reach_the_same_state() {
        let fixture = Fixture::complete();

        fixture
            .run(&fixture.request(), &FakeToolchain::default())
            .expect("first build");
        let first = fixture.listing();
        fixture
            .run(&fixture.request(), &FakeToolchain::default())
            .expect("second build");

        assert_eq!(first, fixture.listing());
    }

    #[test]
    fn optimize_flag_toggles_both_switches() {
        for optimize in [false, true] {
            let fixture = Fixture::complete();
            let toolchain = FakeToolchain::default();
            let request = fixture.request().optimized(optimize);

            fixture.run(&request, &toolchain).expect("build");

            let args = toolchain.web_args.borrow().clone().expect("emcc called");
            let argv = args.to_args();
            let has_size = argv.iter().any(|arg| arg == "-Os");
            let has_closure = argv.windows(2).any(|pair| pair[0] == "--closure" && pair[1] == "1");
            assert_eq!(has_size, optimize);
            assert_eq!(has_closure, optimize);
        }
    }

    #[test]
    fn missing_input_is_rejected_before_anything_else() {
        let fixture = Fixture::complete();
        let toolchain = FakeToolchain::default();

        let err = fixture
            .run(&BuildRequest::default(), &toolchain)
            .unwrap_err();

        assert!(matches!(err, BuildError::MissingInput));
        assert!(!fixture.build_dir().exists());
        assert!(toolchain.calls.borrow().is_empty());
    }

    #[test]
    fn nonexistent_input_leaves_output_untouched() {
        let fixture = Fixture::complete();
        fs::create_dir_all(fixture.build_dir()).expect("create build dir");
        fs::write(fixture.config.layout.loader(), "old loader").expect("write old loader");
        let before = fixture.listing();
        let toolchain = FakeToolchain::default();

        let request = BuildRequest::new(fixture.dir.path().join("missing.rb"));
        let err = fixture.run(&request, &toolchain).unwrap_err();

        assert!(matches!(err, BuildError::InputNotFound(_)));
        assert_eq!(before, fixture.listing());
        assert!(toolchain.calls.borrow().is_empty());
    }

    #[test]
    fn gate_blocks_staging_and_invocations() {
        let fixture = Fixture::new(&["mrbc", "emcc"]);
        let toolchain = FakeToolchain::default();

        let err = fixture.run(&fixture.request(), &toolchain).unwrap_err();

        match err {
            BuildError::Toolchain { missing } => assert_eq!(missing, ["em++"]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!fixture.build_dir().exists());
        assert!(toolchain.calls.borrow().is_empty());
    }

    #[test]
    fn gate_report_is_written_without_all_clear() {
        let fixture = Fixture::complete();
        let mut out = Vec::new();

        Pipeline::new(&fixture.config, &fixture.doctor)
            .run(&fixture.request(), &FakeToolchain::default(), &mut out)
            .expect("build");

        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("mrbc"));
        assert!(!text.contains(crate::report::ALL_CLEAR));
    }

    #[test]
    fn failing_web_compiler_aborts_without_host_page() {
        let fixture = Fixture::complete();
        fs::create_dir_all(fixture.build_dir()).expect("create build dir");
        fs::write(fixture.config.layout.host_page(), "stale").expect("write stale page");
        let toolchain = FakeToolchain {
            fail_web: true,
            ..FakeToolchain::default()
        };

        let err = fixture.run(&fixture.request(), &toolchain).unwrap_err();

        match err {
            BuildError::ToolFailed { tool, code, stderr } => {
                assert_eq!(tool, "emcc");
                assert_eq!(code, Some(1));
                assert!(stderr.contains("mrb_open"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!fixture.config.layout.host_page().exists());
        assert!(fixture.config.layout.intermediate().exists());
    }

    #[test]
    fn failing_bytecode_compiler_skips_web_compiler() {
        let fixture = Fixture::complete();
        fs::create_dir_all(fixture.build_dir()).expect("create build dir");
        fs::write(fixture.config.layout.host_page(), "stale").expect("write stale page");
        let toolchain = FakeToolchain {
            fail_bytecode: true,
            ..FakeToolchain::default()
        };

        let err = fixture.run(&fixture.request(), &toolchain).unwrap_err();

        match err {
            BuildError::ToolFailed { tool, code, stderr } => {
                assert_eq!(tool, "mrbc");
                assert_eq!(code, Some(1));
                assert!(stderr.contains("syntax error"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*toolchain.calls.borrow(), ["mrbc"]);
        assert!(toolchain.web_args.borrow().is_none());
        assert!(!fixture.config.layout.host_page().exists());
    }

    #[test]
    fn missing_intermediate_stops_before_web_compiler() {
        let fixture = Fixture::complete();
        let toolchain = FakeToolchain {
            skip_intermediate: true,
            ..FakeToolchain::default()
        };

        let err = fixture.run(&fixture.request(), &toolchain).unwrap_err();

        assert!(matches!(
            err,
            BuildError::MissingOutput { ref tool, ref path } if tool == "mrbc" && path.ends_with("app.c")
        ));
        assert_eq!(*toolchain.calls.borrow(), ["mrbc"]);
    }

    #[test]
    fn missing_asset_is_reported_before_staging() {
        let fixture = Fixture::complete();
        fs::remove_file(fixture.config.assets.runtime_stub()).expect("remove stub");
        let toolchain = FakeToolchain::default();

        let err = fixture.run(&fixture.request(), &toolchain).unwrap_err();

        assert!(matches!(err, BuildError::MissingAsset(_)));
        assert!(!fixture.build_dir().exists());
    }

    #[test]
    fn staging_keeps_unrelated_files() {
        let fixture = Fixture::complete();
        fs::create_dir_all(fixture.build_dir()).expect("create build dir");
        fs::write(fixture.build_dir().join("notes.txt"), "keep me").expect("write notes");

        fixture
            .run(&fixture.request(), &FakeToolchain::default())
            .expect("build");

        assert!(fixture.build_dir().join("notes.txt").exists());
    }
}
