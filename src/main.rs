use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use varidx::commands;
use varidx::config::Overrides;

/// varidx - package archive index
///
/// Reconciles the .var archives found in a VaM installation into one record
/// per archive, tracks duplicate copies, and answers dependency questions.
///
/// Examples:
///   varidx --vam-dir ~/VaM scan          # Index and print a summary
///   varidx --vam-dir ~/VaM impact A.B.3  # What breaks if A.B.3 is removed
#[derive(Parser, Debug)]
#[command(author, version = env!("VARIDX_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// VaM installation directory; scans AddonPackages, AllPackages and
    /// ArchivedPackages beneath it
    #[arg(long, env = "VARIDX_VAM_DIR", value_name = "DIR", global = true)]
    vam_dir: Option<PathBuf>,

    /// Metadata cache file
    #[arg(long = "cache", value_name = "FILE", global = true)]
    cache_path: Option<PathBuf>,

    /// Number of archive parser threads
    #[arg(long, value_name = "N", global = true)]
    workers: Option<usize>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Scan all package folders and print a summary
    Scan {
        /// Print the full index as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one package record
    Show {
        /// Package name, optionally with a copy suffix (e.g. A.B.1#archived)
        key: String,
    },

    /// List everything a package depends on, transitively
    Deps { name: String },

    /// List packages that depend directly on a package
    Dependents { name: String },

    /// List everything that would break if a package were removed
    Impact { name: String },

    /// List packages nothing depends on
    Orphans,

    /// List the most depended-on packages
    Critical {
        /// Minimum number of direct dependents
        #[arg(long, default_value_t = 5)]
        min: usize,
    },

    /// List unsatisfied dependencies
    Missing,

    /// List packages superseded by a newer version
    Old,

    /// Print index statistics
    Stats,

    /// Manage the metadata cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(clap::Subcommand, Debug)]
enum CacheCommands {
    /// Delete the persisted metadata cache
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = Arc::new(varidx::runtime::RealRuntime);
    let overrides = Overrides {
        vam_dir: cli.vam_dir,
        cache_path: cli.cache_path,
        workers: cli.workers,
    };

    match cli.command {
        Commands::Scan { json } => commands::scan(runtime, overrides, json).await?,
        Commands::Show { key } => commands::show(runtime, overrides, &key).await?,
        Commands::Deps { name } => commands::deps(runtime, overrides, &name).await?,
        Commands::Dependents { name } => commands::dependents(runtime, overrides, &name).await?,
        Commands::Impact { name } => commands::impact(runtime, overrides, &name).await?,
        Commands::Orphans => commands::orphans(runtime, overrides).await?,
        Commands::Critical { min } => commands::critical(runtime, overrides, min).await?,
        Commands::Missing => commands::missing(runtime, overrides).await?,
        Commands::Old => commands::old(runtime, overrides).await?,
        Commands::Stats => commands::stats(runtime, overrides).await?,
        Commands::Cache {
            command: CacheCommands::Clear,
        } => commands::cache_clear(runtime, overrides)?,
    }
    Ok(())
}
