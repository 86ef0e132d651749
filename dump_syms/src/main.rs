//! Command-line front end: reads one PDB (plus its paired PE/PE+ image) and writes a
//! Breakpad-format `.sym` file to stdout.

use clap::Parser;
use dump_syms::{symbolize, SymbolizeOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;

/// Reads a PDB and its paired PE/PE+ image and emits a Breakpad-format `.sym` file.
#[derive(clap::Parser)]
struct Args {
    /// Path to the `.pdb` file to read.
    pdb_path: PathBuf,

    /// Path to the paired `.exe`/`.dll` image. Defaults to `<pdb>.exe`, then `<pdb>.dll`.
    #[arg(long)]
    image: Option<PathBuf>,

    /// Overrides the auto-detected Breakpad platform string (`x86`, `x86_64`, `arm`, `arm64`).
    #[arg(long)]
    platform: Option<String>,

    /// Reduce logging to just warnings and errors.
    #[arg(long)]
    quiet: bool,

    /// Turn on debug output. Noisy!
    #[arg(long)]
    verbose: bool,

    /// Show timestamps in log messages.
    #[arg(long)]
    timestamps: bool,
}

fn main() {
    let args = Args::parse();
    configure_tracing(&args);

    let options = SymbolizeOptions {
        pdb_path: args.pdb_path,
        image_path: args.image,
        platform_override: args.platform,
        file_path_filter: None,
    };

    let stdout = io::stdout();
    let mut lock = stdout.lock();

    if let Err(e) = symbolize(&options, &mut lock) {
        let _ = lock.flush();
        eprintln!("dump_syms: {e}");
        std::process::exit(e.exit_code());
    }
}

fn configure_tracing(args: &Args) {
    let max_level = if args.quiet {
        LevelFilter::WARN
    } else if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let builder = tracing_subscriber::fmt().with_max_level(max_level).with_writer(io::stderr);

    if args.timestamps {
        builder.init();
    } else {
        builder.without_time().init();
    }
}
