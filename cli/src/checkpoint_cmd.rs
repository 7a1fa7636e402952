//! `oxomo checkpoint` commands
//!
//! - `create` lists every endpoint and (re)writes its ledgers
//! - `drop` removes identity and ledgers
//! - `status` prints pending/done counts per endpoint

use std::path::Path;

use clap::{Parser, Subcommand};
use oxomo_core::CheckpointStatus;

use crate::{Context, exit_codes, setup_failure};

#[derive(Debug, Parser)]
pub struct CheckpointCli {
    #[command(subcommand)]
    pub command: CheckpointSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum CheckpointSubcommand {
    /// List the repository and write fresh pending ledgers
    ///
    /// Re-running replaces the existing checkpoint; harvest progress starts over.
    Create(SelectArgs),

    /// Remove the checkpoint (harvested documents are kept)
    Drop(SelectArgs),

    /// Show ledger counts
    Status(StatusArgs),
}

#[derive(Debug, Parser)]
pub struct SelectArgs {
    /// Only the endpoint mapped to this collection prefix
    #[arg(long, value_name = "PREFIX")]
    pub collection: Option<String>,
}

#[derive(Debug, Parser)]
pub struct StatusArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Output as JSON for automation
    #[arg(long)]
    pub json: bool,
}

impl CheckpointCli {
    pub async fn run(self, config_path: Option<&Path>) -> i32 {
        let ctx = match Context::load(config_path, None) {
            Ok(ctx) => ctx,
            Err(err) => return setup_failure(&err),
        };
        match self.command {
            CheckpointSubcommand::Create(args) => create(&ctx, &args).await,
            CheckpointSubcommand::Drop(args) => drop_checkpoints(&ctx, &args).await,
            CheckpointSubcommand::Status(args) => status(&ctx, &args).await,
        }
    }
}

async fn create(ctx: &Context, args: &SelectArgs) -> i32 {
    let endpoints = match ctx.config.select_endpoints(args.collection.as_deref()) {
        Ok(endpoints) => endpoints,
        Err(err) => return setup_failure(&err.into()),
    };

    let mut code = exit_codes::SUCCESS;
    for endpoint in &endpoints {
        let namespace = ctx.config.namespace(endpoint);
        match ctx
            .harvester
            .create_checkpoint(&ctx.config.database, endpoint)
            .await
        {
            Ok(identity) => {
                let status = ctx.harvester.checkpoints().status(&namespace).await;
                let (records, sets) = status
                    .map(|s| (s.records.total(), s.sets.total()))
                    .unwrap_or_default();
                println!(
                    "✓ {namespace}: {} ({records} records, {sets} sets)",
                    identity.repository_name
                );
            }
            Err(err) => {
                eprintln!("✗ {namespace}: checkpoint for {} failed: {err}", endpoint.url);
                code = exit_codes::FAILURE;
            }
        }
    }
    code
}

async fn drop_checkpoints(ctx: &Context, args: &SelectArgs) -> i32 {
    let endpoints = match ctx.config.select_endpoints(args.collection.as_deref()) {
        Ok(endpoints) => endpoints,
        Err(err) => return setup_failure(&err.into()),
    };

    for endpoint in &endpoints {
        let namespace = ctx.config.namespace(endpoint);
        if let Err(err) = ctx.harvester.checkpoints().drop(&namespace).await {
            eprintln!("✗ {namespace}: {err}");
            return exit_codes::FAILURE;
        }
        println!("dropped checkpoint {namespace}");
    }
    exit_codes::SUCCESS
}

async fn status(ctx: &Context, args: &StatusArgs) -> i32 {
    let endpoints = match ctx.config.select_endpoints(args.select.collection.as_deref()) {
        Ok(endpoints) => endpoints,
        Err(err) => return setup_failure(&err.into()),
    };

    let mut statuses = Vec::with_capacity(endpoints.len());
    for endpoint in &endpoints {
        let namespace = ctx.config.namespace(endpoint);
        match ctx.harvester.checkpoints().status(&namespace).await {
            Ok(status) => statuses.push((endpoint.url.clone(), status)),
            Err(err) => {
                eprintln!("✗ {namespace}: {err}");
                return exit_codes::FAILURE;
            }
        }
    }

    if args.json {
        print_json(&statuses);
    } else {
        for (url, status) in &statuses {
            print_human(url, status);
        }
    }
    exit_codes::SUCCESS
}

fn print_json(statuses: &[(String, CheckpointStatus)]) {
    let entries: Vec<serde_json::Value> = statuses
        .iter()
        .map(|(url, status)| {
            let mut value = serde_json::to_value(status).unwrap_or_default();
            if let Some(map) = value.as_object_mut() {
                map.insert("url".to_string(), serde_json::Value::String(url.clone()));
            }
            value
        })
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&entries).unwrap_or_default()
    );
}

fn print_human(url: &str, status: &CheckpointStatus) {
    if !status.exists {
        println!("{} ({url}): no checkpoint", status.namespace);
        return;
    }
    println!("{} ({url})", status.namespace);
    if let Some(identity) = &status.identity {
        println!("  Repository: {}", identity.repository_name);
        println!("  Created:    {}", identity.created_at);
    }
    println!(
        "  Records:    {} done / {} pending",
        status.records.done, status.records.pending
    );
    println!(
        "  Sets:       {} done / {} pending",
        status.sets.done, status.sets.pending
    );
}
