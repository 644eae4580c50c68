use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;

use pyject::{RemotePython, SessionOptions};

/// Run Python code inside another process.
#[derive(Parser, Debug)]
struct Args {
    /// Target process id
    pid: u32,

    /// Python source to execute in the target
    code: String,

    /// Python DLL to inject (defaults to python3.dll)
    #[arg(long)]
    dll: Option<PathBuf>,

    /// Offset-cache file (defaults to the per-user data dir)
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Per-call timeout in milliseconds (default: wait forever)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Directory for the remote interpreter's sys.path (repeatable)
    #[arg(long = "path")]
    paths: Vec<PathBuf>,
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut options = SessionOptions::new(args.pid);
    options.library_path = args.dll;
    options.cache_path = args.cache;
    options.call_timeout = args.timeout_ms.map(Duration::from_millis);

    let session = RemotePython::new(options)
        .with_context(|| format!("failed to attach to process {}", args.pid))?;

    if !args.paths.is_empty() {
        session.set_python_path(&args.paths)?;
    }

    let exit_code = session.run(&args.code)?;
    session.cleanup();

    Ok(ExitCode::from(exit_code.min(255) as u8))
}
