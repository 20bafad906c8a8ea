//! Administrative commands run against one adapter.

use koan_vector::{ServiceHealth, VectorContext, VectorRepository, VectorResult};
use serde::{Deserialize, Serialize};
use strum::AsRefStr;

use crate::TRACING_TARGET_ADAPTER;
use crate::adapter::WeaviateAdapter;
use crate::health::HealthProbe;

/// Operational commands exposed to tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(tag = "command", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AdminCommand {
    /// Creates the class if it does not exist.
    EnsureSchema,
    /// Counts stored objects.
    Count,
    /// Drops every object. Refused unless `confirm` is set.
    Clear { confirm: bool },
    /// Probes the configured endpoint.
    Health,
}

/// Result of an [`AdminCommand`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdminOutcome {
    SchemaEnsured { collection: String },
    Counted { collection: String, count: u64 },
    Cleared { collection: String },
    Health { health: ServiceHealth },
}

impl WeaviateAdapter {
    /// Runs an administrative command.
    ///
    /// `probe` is only used by [`AdminCommand::Health`], which targets the
    /// configured endpoint rather than going through the transport.
    #[tracing::instrument(
        skip_all,
        target = TRACING_TARGET_ADAPTER,
        fields(collection = %self.collection(), command = command.as_ref())
    )]
    pub async fn execute(
        &self,
        ctx: &VectorContext,
        command: AdminCommand,
        probe: &dyn HealthProbe,
    ) -> VectorResult<AdminOutcome> {
        let collection = self.collection().to_owned();
        let outcome = match command {
            AdminCommand::EnsureSchema => {
                self.ensure_schema(ctx).await?;
                AdminOutcome::SchemaEnsured { collection }
            }
            AdminCommand::Count => {
                let count = self.count(ctx).await?;
                AdminOutcome::Counted { collection, count }
            }
            AdminCommand::Clear { confirm } => {
                self.flush(ctx, confirm).await?;
                AdminOutcome::Cleared { collection }
            }
            AdminCommand::Health => {
                let health = ctx.run("health", probe.probe(&self.config().endpoint)).await?;
                AdminOutcome::Health { health }
            }
        };

        tracing::info!(
            target: TRACING_TARGET_ADAPTER,
            command = command.as_ref(),
            "Admin command completed"
        );
        Ok(outcome)
    }
}
