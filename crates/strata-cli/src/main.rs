use std::path::Path;

use clap::{Parser, Subcommand};

use strata_core::config::RepoParams;
use strata_core::error::Result;
use strata_core::repo::Repository;

#[derive(Parser)]
#[command(
    name = "strata",
    version,
    about = "Deduplicated, versioned backups with delta compression",
    after_help = "\
Repository parameters (chunk size, sketch shape, payload codec, ...) are
fixed per repository: every commit and restore of a repository must run
with the parameters it was created with. Override the defaults with
--config pointing at a YAML file; absent keys keep their defaults."
)]
struct Cli {
    /// Log verbosity level (0=error, 1=warn, 2=info, 3=debug, 4=trace)
    #[arg(short, long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(0..=4))]
    verbose: u8,

    /// Path to a YAML file overriding the default repository parameters
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new version of <SOURCE_DIR> in <REPO_DIR>
    Commit {
        source_dir: String,
        repo_dir: String,
    },

    /// Restore the latest version from <REPO_DIR> into <DEST_DIR>
    Restore {
        repo_dir: String,
        dest_dir: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let params = match &cli.config {
        Some(path) => {
            tracing::info!("using parameter file: {path}");
            RepoParams::load(Path::new(path))?
        }
        None => RepoParams::default(),
    };

    match &cli.command {
        Commands::Commit { source_dir, repo_dir } => {
            let mut repo = Repository::open(repo_dir.as_str(), params)?;
            let stats = repo.commit(Path::new(source_dir))?;
            println!(
                "Committed version {:05}: {} files ({}), {} chunks ({} new, {} deltas)",
                stats.version,
                stats.files,
                format_bytes(stats.source_bytes),
                stats.recipe_chunks,
                stats.new_chunks,
                stats.delta_chunks,
            );
        }
        Commands::Restore { repo_dir, dest_dir } => {
            let mut repo = Repository::open(repo_dir.as_str(), params)?;
            let stats = repo.restore(Path::new(dest_dir))?;
            println!(
                "Restored version {:05}: {} files ({})",
                stats.version,
                stats.files,
                format_bytes(stats.bytes),
            );
        }
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}
