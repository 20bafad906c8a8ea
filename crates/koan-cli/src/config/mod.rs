//! CLI configuration management.
//!
//! ```text
//! Cli
//! ├── weaviate: WeaviateArgs   # Endpoint, auth, adapter tuning
//! └── command: Command         # ensure | count | clear | health | discover
//! ```
//!
//! All configuration can be provided via CLI arguments or environment variables.
//! Use `--help` to see all available options.

mod weaviate;

use std::process;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use koan_weaviate::DEFAULT_PROBE_TIMEOUT;
use url::Url;
pub use weaviate::WeaviateArgs;

use crate::TRACING_TARGET_STARTUP;

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "koan")]
#[command(about = "Administrative tooling for Koan Weaviate collections")]
#[command(version)]
pub struct Cli {
    /// Weaviate connection and adapter configuration.
    #[clap(flatten)]
    pub weaviate: WeaviateArgs,

    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Administrative commands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Creates the collection's class if it does not exist.
    Ensure(CollectionArgs),

    /// Counts the objects stored in a collection.
    Count(CollectionArgs),

    /// Drops every object of a collection.
    Clear {
        #[clap(flatten)]
        collection: CollectionArgs,

        /// Confirms the destructive operation.
        #[arg(long)]
        yes: bool,
    },

    /// Probes the configured endpoint.
    Health,

    /// Resolves the engine endpoint from every known source.
    Discover {
        /// Endpoint that overrides every other source.
        #[arg(long)]
        explicit: Option<Url>,

        /// Timeout of each probe, in milliseconds.
        #[arg(long, default_value_t = DEFAULT_PROBE_TIMEOUT.as_millis() as u64)]
        probe_timeout_ms: u64,
    },
}

impl Command {
    /// Returns the subcommand name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ensure(_) => "ensure",
            Self::Count(_) => "count",
            Self::Clear { .. } => "clear",
            Self::Health => "health",
            Self::Discover { .. } => "discover",
        }
    }
}

/// Identifies one collection.
#[derive(Debug, Clone, Args)]
pub struct CollectionArgs {
    /// Entity type stored in the collection.
    #[arg(long = "entity")]
    pub entity_type: String,

    /// Partition of the entity type.
    #[arg(long)]
    pub partition: Option<String>,
}

impl Cli {
    /// Loads environment variables from .env file (if enabled) and parses CLI arguments.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    /// Loads environment variables from .env file if the dotenv feature is enabled.
    ///
    /// Runs before parsing so that clap's `env` lookups see the file's values.
    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    /// No-op when dotenv feature is disabled.
    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Logs build information and configuration.
    pub fn log(&self) {
        tracing::debug!(
            target: TRACING_TARGET_STARTUP,
            version = env!("CARGO_PKG_VERSION"),
            pid = process::id(),
            arch = std::env::consts::ARCH,
            os = std::env::consts::OS,
            features = ?Self::enabled_features(),
            command = self.command.name(),
            "Build information"
        );
        self.weaviate.log();
    }

    /// Returns a list of enabled compile-time features.
    fn enabled_features() -> Vec<&'static str> {
        [cfg!(feature = "dotenv").then_some("dotenv")]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Converts a millisecond flag into a duration.
pub fn millis(value: u64) -> Duration {
    Duration::from_millis(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(
            ["koan", "--endpoint", "http://localhost:8080"]
                .into_iter()
                .chain(args.iter().copied()),
        )
        .unwrap()
    }

    #[test]
    fn clear_defaults_to_unconfirmed() {
        let cli = parse(&["clear", "--entity", "DocumentChunk"]);
        let Command::Clear { collection, yes } = cli.command else {
            panic!("expected clear");
        };
        assert_eq!(collection.entity_type, "DocumentChunk");
        assert_eq!(collection.partition, None);
        assert!(!yes);
    }

    #[test]
    fn collection_commands_take_a_partition() {
        let cli = parse(&["count", "--entity", "Doc", "--partition", "project-abc123"]);
        let Command::Count(collection) = cli.command else {
            panic!("expected count");
        };
        assert_eq!(collection.partition.as_deref(), Some("project-abc123"));
    }

    #[test]
    fn ensure_requires_an_entity() {
        let result = Cli::try_parse_from(["koan", "--endpoint", "http://localhost:8080", "ensure"]);
        assert!(result.is_err());
    }

    #[test]
    fn discover_uses_the_default_probe_timeout() {
        let cli = parse(&["discover"]);
        let Command::Discover {
            explicit,
            probe_timeout_ms,
        } = cli.command
        else {
            panic!("expected discover");
        };
        assert!(explicit.is_none());
        assert_eq!(millis(probe_timeout_ms), DEFAULT_PROBE_TIMEOUT);
    }
}
