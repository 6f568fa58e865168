use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, CommandFactory, FromArgMatches, Parser, Subcommand};
use mrwasm_core::report::write_build_summary;
use mrwasm_core::server;
use mrwasm_core::{
    AssetBundle, BuildConfig, BuildRequest, Doctor, DoctorMode, Pipeline, ProcessToolchain,
    ServeConfig,
};
use tracing_subscriber::EnvFilter;

/// Compile mruby scripts to WebAssembly and serve them locally.
#[derive(Parser, Debug)]
#[command(
    name = "mrwasm",
    version,
    disable_version_flag = true,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "DIR",
        env = "MRWASM_ASSETS",
        help = "Directory holding main.c, index.html, include/ and lib/libmruby.a (defaults to the bundled assets)"
    )]
    assets: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a script into build/app.wasm, build/app.js and build/index.html
    Build {
        #[arg(value_name = "FILE")]
        input: Option<PathBuf>,

        #[arg(long, help = "Optimize for size (-Os) and minify the loader (--closure 1)")]
        optimize: bool,
    },
    /// Serve build/ on http://127.0.0.1:8000
    Serve {
        #[arg(short, long, help = "Open the default browser once the server is listening")]
        open: bool,
    },
    /// Check that mrbc, emcc and em++ are installed
    Doctor,
}

fn cli_command() -> clap::Command {
    Cli::command().arg(
        Arg::new("version")
            .short('v')
            .long("version")
            .action(ArgAction::Version)
            .help("Print version"),
    )
}

fn main() -> Result<()> {
    init_tracing();
    yansi::whenever(yansi::Condition::TTY_AND_COLOR);

    let matches = cli_command().get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    execute(cli)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn execute(cli: Cli) -> Result<()> {
    let assets = cli
        .assets
        .map(AssetBundle::new)
        .unwrap_or_else(AssetBundle::bundled);
    let config = BuildConfig::new(assets);

    match cli.command {
        Command::Build { input, optimize } => build(&config, &BuildRequest { input, optimize }),
        Command::Serve { open } => serve(&config, open),
        Command::Doctor => doctor(),
    }
}

fn build(config: &BuildConfig, request: &BuildRequest) -> Result<()> {
    let doctor = Doctor::from_env();
    let mut stdout = io::stdout().lock();
    let outcome = Pipeline::new(config, &doctor)
        .run(request, &ProcessToolchain::default(), &mut stdout)
        .context("build failed")?;
    write_build_summary(&mut stdout, &outcome.layout).context("failed to write build summary")?;
    Ok(())
}

fn serve(config: &BuildConfig, open: bool) -> Result<()> {
    let serve_config = ServeConfig::new(&config.layout).open_browser(open);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime
        .block_on(server::serve(serve_config))
        .context("serve failed")
}

fn doctor() -> Result<()> {
    let mut stdout = io::stdout().lock();
    let report = Doctor::from_env()
        .check(DoctorMode::Standalone, &mut stdout)
        .context("failed to write doctor report")?;
    if report.has_errors() {
        bail!("toolchain check failed: {} not found", report.missing().join(", "));
    }
    Ok(())
}
