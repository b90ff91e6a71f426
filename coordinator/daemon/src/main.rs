//! Retrieval Coordinator CLI
//!
//! Operator entry point: loads configuration, initializes logging, builds
//! the coordinator, and runs one operation. Results are printed to stdout as
//! JSON; logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Probe the local backend
//! coordinator health
//!
//! # Keep the availability monitor running
//! coordinator watch
//!
//! # Retrieval
//! coordinator search "how are circuit breakers reset" --mode hybrid
//! coordinator ask "summarize the deployment guide"
//!
//! # Agent memory
//! coordinator remember semantic "The user prefers dark mode"
//! coordinator recall "display preferences" --types semantic,episodic
//!
//! # Check an outbound URL against the egress policy
//! coordinator check-url http://169.254.169.254/latest/meta-data
//!
//! # Verbose logging
//! RUST_LOG=debug coordinator search "..."
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

use coordinator_core::config::{load_config_from_path, ConfigOverrides};
use coordinator_core::{Coordinator, MemoryType, SearchMode, TracingTelemetry};

/// Retrieval Coordinator - availability-aware routing and retrieval
#[derive(Parser, Debug)]
#[command(name = "coordinator")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "COORDINATOR_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "COORDINATOR_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Override the local inference backend URL
    #[arg(long, value_name = "URL", global = true)]
    local_url: Option<String>,

    /// Override the remote backend URL
    #[arg(long, value_name = "URL", global = true)]
    remote_url: Option<String>,

    /// Override the vector store URL
    #[arg(long, value_name = "URL", global = true)]
    vector_store_url: Option<String>,

    /// Disable agent memory
    #[arg(long, global = true)]
    no_memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe the local backend once and print its availability
    Health,

    /// Run the availability monitor until Ctrl-C, printing status changes
    Watch {
        /// Status print interval in seconds
        #[arg(long, default_value_t = 5)]
        every: u64,
    },

    /// Print gate, circuit and cache status
    Status,

    /// Embed a text
    Embed {
        /// Text to embed
        text: String,
        /// Variant tag (assigned by split fraction when omitted)
        #[arg(long)]
        variant: Option<String>,
    },

    /// Retrieve ranked, filtered results
    Search {
        /// Query
        query: String,
        /// keyword, semantic, hybrid, tree or auto
        #[arg(short, long, default_value = "auto")]
        mode: String,
    },

    /// Retrieve, then answer with the selected backend
    Ask {
        /// Question
        query: String,
        /// keyword, semantic, hybrid, tree or auto
        #[arg(short, long, default_value = "auto")]
        mode: String,
    },

    /// Find tools, skills and datasets relevant to a query
    Discover {
        /// Query
        query: String,
    },

    /// Store an agent memory
    Remember {
        /// episodic, semantic or procedural
        memory_type: String,
        /// Short summary
        summary: String,
        /// Full content
        #[arg(long)]
        content: Option<String>,
    },

    /// Recall agent memories
    Recall {
        /// Query
        query: String,
        /// Comma-separated memory types (default: all)
        #[arg(long, value_delimiter = ',')]
        types: Vec<String>,
        /// Maximum results
        #[arg(long, default_value_t = 5)]
        limit: usize,
        /// hybrid or tree
        #[arg(short, long, default_value = "hybrid")]
        mode: String,
    },

    /// Check a URL against the egress policy
    CheckUrl {
        /// URL to check
        url: String,
        /// Purpose recorded in logs
        #[arg(long, default_value = "cli")]
        purpose: String,
    },
}

/// Initialize logging with the specified level; logs go to stderr
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("coordinator={level},coordinator_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn overrides(args: &Args) -> ConfigOverrides {
    let mut overrides = ConfigOverrides::new();
    if let Some(ref url) = args.local_url {
        overrides = overrides.with_local_url(url.clone());
    }
    if let Some(ref url) = args.remote_url {
        overrides = overrides.with_remote_url(url.clone());
    }
    if let Some(ref url) = args.vector_store_url {
        overrides = overrides.with_vector_store_url(url.clone());
    }
    if args.no_memory {
        overrides = overrides.with_memory_enabled(false);
    }
    overrides
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

async fn run(coordinator: &Coordinator, command: Command) -> Result<ExitCode> {
    match command {
        Command::Health => {
            let state = coordinator.gate().refresh().await;
            print_json(&state)?;
            return Ok(if state.healthy {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            });
        }

        Command::Watch { every } => {
            let monitor = coordinator.spawn_monitor();
            let mut interval = tokio::time::interval(Duration::from_secs(every.max(1)));
            let mut last = None;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let snapshot = coordinator.gate().snapshot();
                        if last != Some(snapshot) {
                            print_json(&snapshot)?;
                            last = Some(snapshot);
                        }
                        coordinator.purge_expired();
                    }
                    result = tokio::signal::ctrl_c() => {
                        result.context("Failed to listen for Ctrl-C")?;
                        info!("Shutting down monitor");
                        break;
                    }
                }
            }
            monitor.abort();
        }

        Command::Status => print_json(&coordinator.status())?,

        Command::Embed { text, variant } => {
            let vector = coordinator.embeddings().embed(&text, variant.as_deref()).await;
            print_json(&json!({
                "dimension": vector.len(),
                "computed": !coordinator_core::is_zero_vector(&vector),
                "vector": vector,
            }))?;
        }

        Command::Search { query, mode } => {
            let mode: SearchMode = mode.parse()?;
            print_json(&coordinator.router().route(&query, mode).await?)?;
        }

        Command::Ask { query, mode } => {
            let mode: SearchMode = mode.parse()?;
            print_json(&coordinator.router().answer(&query, mode).await?)?;
        }

        Command::Discover { query } => {
            print_json(&coordinator.discovery().discover(&query).await)?;
        }

        Command::Remember {
            memory_type,
            summary,
            content,
        } => {
            let memory_type: MemoryType = memory_type.parse()?;
            let outcome = coordinator
                .memory()
                .store(memory_type, &summary, content.as_deref(), None)
                .await?;
            print_json(&outcome)?;
        }

        Command::Recall {
            query,
            types,
            limit,
            mode,
        } => {
            let mode: SearchMode = mode.parse()?;
            let types = types
                .iter()
                .map(|t| t.parse::<MemoryType>())
                .collect::<Result<Vec<_>, _>>()?;
            let outcome = coordinator
                .memory()
                .recall(&query, Some(types.as_slice()), limit, mode)
                .await?;
            print_json(&outcome)?;
        }

        Command::CheckUrl { url, purpose } => {
            return match coordinator.guard().assert_safe(&url, &purpose).await {
                Ok(()) => {
                    print_json(&json!({ "url": url, "allowed": true }))?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(violation) => {
                    print_json(&json!({
                        "url": url,
                        "allowed": false,
                        "reason": violation.to_string(),
                    }))?;
                    Ok(ExitCode::from(2))
                }
            };
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let mut config = load_config_from_path(args.config.clone())
        .context("Failed to load coordinator configuration")?;
    overrides(&args)
        .apply(&mut config)
        .context("Invalid command-line override")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        source = %config.source(),
        "Retrieval coordinator starting"
    );

    let coordinator = Coordinator::from_config(config, Arc::new(TracingTelemetry))
        .context("Failed to build coordinator")?;

    run(&coordinator, args.command).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "coordinator",
            "--local-url",
            "http://localhost:9000",
            "recall",
            "display preferences",
            "--types",
            "semantic,episodic",
            "--mode",
            "tree",
        ]);
        let Command::Recall { types, mode, .. } = &args.command else {
            panic!("expected recall");
        };
        assert_eq!(types, &vec!["semantic".to_string(), "episodic".to_string()]);
        assert_eq!(mode, "tree");

        let overrides = overrides(&args);
        assert_eq!(overrides.local_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(overrides.memory_enabled, None);
    }

    #[test]
    fn test_check_url_defaults() {
        let args = Args::parse_from(["coordinator", "check-url", "https://example.com"]);
        assert!(matches!(
            args.command,
            Command::CheckUrl { ref purpose, .. } if purpose == "cli"
        ));
    }
}
