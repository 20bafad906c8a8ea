//! Subcommand execution.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use koan_vector::VectorContext;
use koan_weaviate::{
    AdminCommand, DEFAULT_PROBE_TIMEOUT, DiscoveryContext, DiscoverySettings, EndpointDiscovery,
    HttpHealthProbe, WeaviateConfig, WeaviateStore,
};
use serde::Serialize;
use url::Url;

use crate::TRACING_TARGET_COMMAND;
use crate::config::{Cli, CollectionArgs, Command, millis};

/// Runs the parsed command, printing its result to stdout.
pub async fn execute(cli: Cli, ctx: &VectorContext) -> anyhow::Result<()> {
    let config = cli.weaviate.to_config()?;

    match cli.command {
        Command::Ensure(target) => admin(ctx, config, &target, AdminCommand::EnsureSchema).await,
        Command::Count(target) => admin(ctx, config, &target, AdminCommand::Count).await,
        Command::Clear { collection, yes } => {
            if !yes {
                tracing::warn!(
                    target: TRACING_TARGET_COMMAND,
                    entity = %collection.entity_type,
                    "Clear requested without --yes"
                );
            }
            admin(ctx, config, &collection, AdminCommand::Clear { confirm: yes })
                .await
                .context("pass --yes to drop every object of the collection")
        }
        Command::Health => health(ctx, &config).await,
        Command::Discover {
            explicit,
            probe_timeout_ms,
        } => discover(ctx, &config, explicit, probe_timeout_ms).await,
    }
}

async fn admin(
    ctx: &VectorContext,
    config: WeaviateConfig,
    target: &CollectionArgs,
    command: AdminCommand,
) -> anyhow::Result<()> {
    let probe = probe(&config, DEFAULT_PROBE_TIMEOUT)?;
    let store = WeaviateStore::new(config).context("failed to create Weaviate client")?;
    let adapter = store
        .adapter(&target.entity_type, target.partition.as_deref())
        .await;

    let outcome = adapter
        .execute(ctx, command, &probe)
        .await
        .with_context(|| format!("{} failed on '{}'", command.as_ref(), adapter.collection()))?;
    print_json(&outcome)
}

async fn health(ctx: &VectorContext, config: &WeaviateConfig) -> anyhow::Result<()> {
    let discovery = EndpointDiscovery::new(
        DiscoverySettings::default(),
        Arc::new(probe(config, DEFAULT_PROBE_TIMEOUT)?),
    );
    let health = discovery.check(ctx, &config.endpoint).await?;
    print_json(&health)?;

    if !health.is_live() {
        bail!("{} is not serving", config.endpoint);
    }
    Ok(())
}

async fn discover(
    ctx: &VectorContext,
    config: &WeaviateConfig,
    explicit: Option<Url>,
    probe_timeout_ms: u64,
) -> anyhow::Result<()> {
    let mut settings = DiscoverySettings {
        probe_timeout: millis(probe_timeout_ms),
        ..DiscoverySettings::default()
    };
    if let Some(explicit) = explicit {
        settings = settings.with_explicit(explicit);
    }

    let probe = probe(config, settings.probe_timeout)?;
    let discovery = EndpointDiscovery::new(settings, Arc::new(probe));
    let report = discovery
        .discover(ctx, &DiscoveryContext::from_env())
        .await?;
    print_json(&report)?;

    if report.selected.is_none() {
        bail!("no live Weaviate endpoint found");
    }
    Ok(())
}

fn probe(config: &WeaviateConfig, timeout: Duration) -> anyhow::Result<HttpHealthProbe> {
    let probe = HttpHealthProbe::new(timeout).context("failed to create health probe")?;
    Ok(probe.with_api_key(config.api_key.clone()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{json}");
    Ok(())
}
