//! Toolgate CLI
//!
//! Inspect and maintain tool caches and rate limiter state files.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use toolgate_foundation::{EnvSnapshot, GateConfig};

#[derive(Parser)]
#[command(name = "toolgate")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect or clean a tool cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Inspect, reset or exercise a rate limiter
    Limiter {
        #[command(subcommand)]
        action: LimiterAction,
    },
    /// Show effective settings and where each came from
    Config,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Print cache statistics as JSON
    Stats {
        name: String,
        /// Cache base directory (defaults to the configured cache root)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Remove every entry
    Clear {
        name: String,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Remove expired entries only
    Purge {
        name: String,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum LimiterAction {
    /// Print the recorded requests
    Show {
        name: String,
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
    /// Forget every recorded request
    Reset {
        name: String,
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
    /// Wait for a slot and record one request
    Acquire {
        name: String,
        #[arg(long)]
        max_requests: usize,
        /// Window length in seconds
        #[arg(long)]
        window: f64,
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
    debug!("toolgate {}", env!("CARGO_PKG_VERSION"));

    let output = run(args.command, GateConfig::global()).await?;
    print!("{}", output);
    if !output.ends_with('\n') {
        println!();
    }
    Ok(())
}

async fn run(command: Command, config: std::sync::Arc<GateConfig>) -> anyhow::Result<String> {
    match command {
        Command::Cache { action } => match action {
            CacheAction::Stats { name, dir } => commands::cache_stats(&config, &name, dir.as_deref()),
            CacheAction::Clear { name, dir } => commands::cache_clear(&config, &name, dir.as_deref()),
            CacheAction::Purge { name, dir } => commands::cache_purge(&config, &name, dir.as_deref()),
        },
        Command::Limiter { action } => match action {
            LimiterAction::Show { name, state_dir } => {
                commands::limiter_show(&config, &name, state_dir.as_deref())
            }
            LimiterAction::Reset { name, state_dir } => {
                commands::limiter_reset(&config, &name, state_dir.as_deref())
            }
            LimiterAction::Acquire {
                name,
                max_requests,
                window,
                state_dir,
            } => {
                commands::limiter_acquire(&config, &name, state_dir.as_deref(), max_requests, window)
                    .await
            }
        },
        Command::Config => commands::show_config(&config, &EnvSnapshot::capture()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cache_stats() {
        let args = Args::try_parse_from(["toolgate", "cache", "stats", "chembl", "--dir", "/tmp/c"]).unwrap();
        assert!(!args.debug);
        match args.command {
            Command::Cache {
                action: CacheAction::Stats { name, dir },
            } => {
                assert_eq!(name, "chembl");
                assert_eq!(dir, Some(PathBuf::from("/tmp/c")));
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_parse_acquire_with_global_debug() {
        let args = Args::try_parse_from([
            "toolgate",
            "limiter",
            "acquire",
            "pubchem",
            "--max-requests",
            "5",
            "--window",
            "1.5",
            "--debug",
        ])
        .unwrap();
        assert!(args.debug);
        match args.command {
            Command::Limiter {
                action:
                    LimiterAction::Acquire {
                        name,
                        max_requests,
                        window,
                        state_dir,
                    },
            } => {
                assert_eq!(name, "pubchem");
                assert_eq!(max_requests, 5);
                assert_eq!(window, 1.5);
                assert!(state_dir.is_none());
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_acquire_requires_limits() {
        assert!(Args::try_parse_from(["toolgate", "limiter", "acquire", "pubchem"]).is_err());
    }

    #[tokio::test]
    async fn test_run_dispatches_to_handler() {
        let dir = tempfile::tempdir().unwrap();
        let config = std::sync::Arc::new(GateConfig::new());
        let out = run(
            Command::Limiter {
                action: LimiterAction::Show {
                    name: "uniprot".to_string(),
                    state_dir: Some(dir.path().to_path_buf()),
                },
            },
            config,
        )
        .await
        .unwrap();
        assert!(out.contains("Limiter:     uniprot"));
    }
}
