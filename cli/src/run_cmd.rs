//! `oxomo run`: harvest pending records, then pending sets, per endpoint.

use std::path::Path;

use clap::Parser;
use oxomo_core::{EndpointOutcome, EndpointReport, HarvestReport, PhaseReport, SkipCause};

use crate::{Context, exit_codes, setup_failure};

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Only the endpoint mapped to this collection prefix
    #[arg(long, value_name = "PREFIX")]
    pub collection: Option<String>,

    /// Concurrent fetches per endpoint (defaults to config, then CPU count)
    #[arg(long, short = 'w')]
    pub workers: Option<usize>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(config_path: Option<&Path>, args: RunArgs) -> i32 {
    if args.workers == Some(0) {
        eprintln!("error: --workers must be at least 1");
        return exit_codes::CONFIG_ERROR;
    }

    let ctx = match Context::load(config_path, args.workers) {
        Ok(ctx) => ctx,
        Err(err) => return setup_failure(&err),
    };
    let endpoints = match ctx.config.select_endpoints(args.collection.as_deref()) {
        Ok(endpoints) => endpoints,
        Err(err) => return setup_failure(&err.into()),
    };

    let report = match ctx.harvester.run(&ctx.config.database, &endpoints).await {
        Ok(report) => report,
        Err(err) => {
            eprintln!("error: harvest aborted: {err}");
            return exit_codes::FAILURE;
        }
    };

    for skipped in report.skipped() {
        if let Some(line) = skip_line(skipped) {
            eprintln!("{line}");
        }
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_default()
        );
    } else {
        print_summary(&report);
    }

    if report.has_skipped() {
        exit_codes::PARTIAL
    } else {
        exit_codes::SUCCESS
    }
}

fn print_summary(report: &HarvestReport) {
    for endpoint in &report.endpoints {
        match &endpoint.outcome {
            EndpointOutcome::Harvested { records, sets } => {
                println!("{} ({})", endpoint.namespace, endpoint.url);
                println!("  Records: {}", phase_line(records));
                println!("  Sets:    {}", phase_line(sets));
            }
            EndpointOutcome::Skipped { reason, .. } => {
                println!("{} ({}): skipped: {reason}", endpoint.namespace, endpoint.url);
            }
        }
    }
}

fn skip_line(endpoint: &EndpointReport) -> Option<String> {
    match &endpoint.outcome {
        EndpointOutcome::Skipped {
            cause: SkipCause::MissingCheckpoint,
            ..
        } => Some(format!(
            "checkpoint for {} not found, create it first",
            endpoint.url
        )),
        EndpointOutcome::Skipped {
            cause: SkipCause::Unreachable,
            reason,
        } => Some(format!("{} unreachable, skipped: {reason}", endpoint.url)),
        EndpointOutcome::Harvested { .. } => None,
    }
}

fn phase_line(phase: &PhaseReport) -> String {
    let mut line = format!(
        "{} harvested, {} deleted, {} failed of {}",
        phase.harvested, phase.deleted, phase.failed, phase.total
    );
    if phase.panicked > 0 {
        line.push_str(&format!(" ({} left pending)", phase.panicked));
    }
    line
}
