//! wastrun command-line driver.

use clap::Parser;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wastrun::config::{Config, Emulator, Features, MessageTable, SkipList, DEFAULT_PROMPT};
use wastrun::error::ConfigError;
use wastrun::runner::{run_script, Disposition};
use wastrun::session::Transport;

#[derive(Parser)]
#[command(name = "wastrun")]
#[command(about = "Run a WebAssembly spec test script against a runtime REPL", long_about = None)]
#[command(version)]
struct Cli {
    /// Text-to-binary compiler
    #[arg(long, env = "WAST2WASM", default_value = "wast2wasm")]
    wast2wasm: String,
    /// Runtime under test
    #[arg(long, env = "IWASM_CMD", default_value = "iwasm")]
    interpreter: String,
    /// AOT compiler
    #[arg(long, env = "WAMRC_CMD", default_value = "wamrc")]
    aot_compiler: String,
    /// Keep temporary files
    #[arg(long, alias = "no_cleanup")]
    no_cleanup: bool,
    /// Change to this directory before running
    #[arg(long)]
    rundir: Option<PathBuf>,
    /// Seconds to wait for a module to load
    #[arg(long, default_value_t = 30)]
    start_timeout: u64,
    /// Seconds to wait for a module that is expected to fail
    #[arg(long, default_value_t = 2)]
    start_fail_timeout: u64,
    /// Seconds to wait for each invocation
    #[arg(long, default_value_t = 20)]
    test_timeout: u64,
    /// Use pipes instead of a pseudo-terminal
    #[arg(long)]
    no_pty: bool,
    /// Append progress output to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Where artifacts of a failing form are preserved
    #[arg(long)]
    log_dir: Option<PathBuf>,
    /// Append the raw session transcript to this file
    #[arg(long)]
    debug_file: Option<PathBuf>,
    /// Compile modules ahead of time
    #[arg(long)]
    aot: bool,
    /// Target architecture
    #[arg(long, default_value = "x86_64")]
    target: String,
    #[arg(long)]
    sgx: bool,
    #[arg(long)]
    simd: bool,
    /// Execute in place
    #[arg(long)]
    xip: bool,
    /// Exception handling
    #[arg(long)]
    eh: bool,
    #[arg(long)]
    multi_module: bool,
    #[arg(long)]
    multi_thread: bool,
    #[arg(long)]
    gc: bool,
    #[arg(long)]
    extended_const: bool,
    #[arg(long)]
    memory64: bool,
    /// Multiple memories; implies --multi-module
    #[arg(long)]
    multi_memory: bool,
    /// Run the runtime inside QEMU
    #[arg(long)]
    qemu: bool,
    /// Firmware image for QEMU
    #[arg(long)]
    qemu_firmware: Option<PathBuf>,
    /// Verbose runtime and driver output
    #[arg(short, long)]
    verbose: bool,
    /// Directory for temporary and registered artifacts
    #[arg(long)]
    work_dir: Option<PathBuf>,
    /// Skip forms matching this regex (repeatable)
    #[arg(long = "skip", value_name = "REGEX")]
    skip: Vec<String>,
    /// Accept ACTUAL in place of an EXPECTED failure message (repeatable)
    #[arg(long = "accept-message", value_name = "EXPECTED=ACTUAL")]
    accept_message: Vec<String>,
    /// REPL prompt of the runtime
    #[arg(long, default_value = DEFAULT_PROMPT)]
    prompt: String,
    /// Test script
    test_file: PathBuf,
}

impl Cli {
    fn config(&self) -> Result<Config, ConfigError> {
        let mut messages = MessageTable::default();
        for pair in &self.accept_message {
            messages.add_pair(pair)?;
        }
        let qemu = match (&self.qemu_firmware, self.qemu) {
            (Some(firmware), true) => Some(Emulator {
                firmware: firmware.clone(),
            }),
            (None, true) => return Err(ConfigError::MissingFirmware),
            (_, false) => None,
        };
        let defaults = Config::default();
        Ok(Config {
            wast2wasm: self.wast2wasm.clone(),
            interpreter: self.interpreter.clone(),
            aot_compiler: self.aot_compiler.clone(),
            no_cleanup: self.no_cleanup,
            start_timeout: Duration::from_secs(self.start_timeout),
            start_fail_timeout: Duration::from_secs(self.start_fail_timeout),
            test_timeout: Duration::from_secs(self.test_timeout),
            transport: if self.no_pty { Transport::Pipe } else { Transport::Pty },
            log_dir: self.log_dir.clone(),
            debug_file: self.debug_file.clone(),
            aot: self.aot,
            target: self.target.clone(),
            features: Features {
                sgx: self.sgx,
                simd: self.simd,
                xip: self.xip,
                eh: self.eh,
                multi_module: self.multi_module || self.multi_memory,
                multi_thread: self.multi_thread,
                gc: self.gc,
                extended_const: self.extended_const,
                memory64: self.memory64,
                multi_memory: self.multi_memory,
            },
            qemu,
            verbose: self.verbose,
            work_dir: self.work_dir.clone().unwrap_or(defaults.work_dir),
            skip: SkipList::new(&self.skip)?,
            messages,
            prompt: self.prompt.clone(),
        })
    }
}

fn init_tracing(cli: &Cli) -> io::Result<()> {
    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let file_layer = match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .without_time()
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).without_time().with_writer(io::stdout))
        .with(file_layer)
        .init();
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(&cli) {
        eprintln!("failed to open log file: {e}");
        return ExitCode::from(Disposition::Failed.code());
    }
    let config = match cli.config() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(Disposition::Failed.code());
        }
    };
    // the script path is relative to where we were started
    let test_file = std::fs::canonicalize(&cli.test_file).unwrap_or_else(|_| cli.test_file.clone());
    if let Some(dir) = &cli.rundir {
        if let Err(e) = std::env::set_current_dir(dir) {
            error!("failed to change to {}: {e}", dir.display());
            return ExitCode::from(Disposition::Failed.code());
        }
    }
    let report = run_script(&test_file, &config);
    ExitCode::from(report.disposition.code())
}
