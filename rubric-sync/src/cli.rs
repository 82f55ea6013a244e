//! # rubric-sync CLI interface
//!
//! Command-line glue only: argument parsing, config loading, reading and writing
//! files, and printing results. Parsing, reconciliation and every Canvas call live
//! in `rubric-sync-core`.
//!
//! - `sync`: apply a rubric document to a Canvas rubric and print the report,
//!   optionally setting the assignment's points to the rubric total.
//! - `plan`: dry run; print the change set a `sync` would apply.
//! - `export`: write the remote rubric as a document.
//! - `template`: print an empty document header.
//!
//! For programmatic and integration use, call [`run`] with a constructed [`Cli`].

use crate::load_config::{load_config, CliConfig};
use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use rubric_sync_core::canvas::CanvasClient;
use rubric_sync_core::document::template_header;
use rubric_sync_core::reconcile::CriterionOp;
use rubric_sync_core::synchronise::{self, ExecuteOptions, SyncStatus};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::watch;

#[derive(Parser)]
#[clap(
    name = "rubric-sync",
    version,
    about = "Publish a CSV rubric definition to a Canvas rubric and keep the two in step"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

/// Where the remote rubric lives.
#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Path to the YAML config file
    #[clap(long)]
    pub config: PathBuf,
    /// Canvas course id (overrides `target.course_id`)
    #[clap(long)]
    pub course_id: Option<String>,
    /// Canvas rubric id (overrides `target.rubric_id`)
    #[clap(long)]
    pub rubric_id: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply a rubric document to the remote rubric
    Sync {
        #[clap(flatten)]
        target: Target,
        /// Path to the rubric CSV document
        #[clap(long)]
        csv: PathBuf,
        /// Print the report as JSON instead of a table
        #[clap(long)]
        json: bool,
        /// Set the assignment's points to the rubric total after a clean run
        #[clap(long)]
        sync_assignment_points: bool,
        /// Assignment to update (overrides `sync.assignment_id`)
        #[clap(long)]
        assignment_id: Option<String>,
    },
    /// Show what `sync` would change without changing anything
    Plan {
        #[clap(flatten)]
        target: Target,
        #[clap(long)]
        csv: PathBuf,
    },
    /// Write the remote rubric as a CSV document
    Export {
        #[clap(flatten)]
        target: Target,
        /// Output file; stdout when omitted
        #[clap(long)]
        output: Option<PathBuf>,
    },
    /// Print an empty rubric document header
    Template {
        /// Number of rating levels
        #[clap(long, default_value_t = 3)]
        levels: usize,
        #[clap(long)]
        output: Option<PathBuf>,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync {
            target,
            csv,
            json,
            sync_assignment_points,
            assignment_id,
        } => {
            let (mut config, course_id, rubric_id) = prepare(&target)?;
            if sync_assignment_points {
                config.sync.sync.sync_assignment_points = true;
            }
            if assignment_id.is_some() {
                config.sync.sync.assignment_id = assignment_id;
            }
            let document = read_document(&csv)?;
            let client = CanvasClient::new(&config.sync, &config.credential)
                .context("Failed to construct Canvas client")?;
            tracing::info!(command = "sync", course_id, rubric_id, "Starting synchronisation");

            let (cancel_tx, cancel_rx) = watch::channel(false);
            let ctrl_c = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, stopping after the current entry");
                    let _ = cancel_tx.send(true);
                }
            });
            let execute_options = ExecuteOptions::from(&config.sync.sync).with_cancel(cancel_rx);
            let outcome = synchronise::run_sync_with(
                &document,
                &course_id,
                &rubric_id,
                &client,
                &config.sync.sync,
                &execute_options,
            )
            .await;
            ctrl_c.abort();

            let report = outcome.map_err(|e| {
                tracing::error!(command = "sync", error = %e, "Synchronisation aborted");
                anyhow!(e)
            })?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{report}");
            }
            tracing::info!(command = "sync", status = %report.status(), "Synchronisation complete");
            match report.status() {
                SyncStatus::Success => Ok(()),
                status => Err(anyhow!("synchronisation finished with {status}")),
            }
        }
        Commands::Plan { target, csv } => {
            let (config, course_id, rubric_id) = prepare(&target)?;
            let document = read_document(&csv)?;
            let client = CanvasClient::new(&config.sync, &config.credential)
                .context("Failed to construct Canvas client")?;
            let changes = synchronise::plan(
                &document,
                &course_id,
                &rubric_id,
                &client,
                &config.sync.sync,
            )
            .await?;

            for op in changes.ops() {
                let id = op.remote_id().unwrap_or("-");
                let verb = match op {
                    CriterionOp::Create { .. } => "create",
                    CriterionOp::Update { .. } => "update",
                    CriterionOp::Delete { .. } => "delete",
                    CriterionOp::Unchanged { .. } => "keep",
                };
                println!("{verb:<7} {:<30} {id}", op.name());
            }
            let summary = changes.summary();
            println!(
                "{} to create, {} to update, {} to delete, {} unchanged",
                summary.creates, summary.updates, summary.deletes, summary.unchanged
            );
            Ok(())
        }
        Commands::Export { target, output } => {
            let (config, course_id, rubric_id) = prepare(&target)?;
            let client = CanvasClient::new(&config.sync, &config.credential)
                .context("Failed to construct Canvas client")?;
            let document = synchronise::export(&course_id, &rubric_id, &client).await?;
            write_output(output.as_deref(), &document)
        }
        Commands::Template { levels, output } => {
            let mut header = template_header(levels).join(",");
            header.push('\n');
            write_output(output.as_deref(), &header)
        }
    }
}

fn prepare(target: &Target) -> Result<(CliConfig, String, String)> {
    let config = load_config(&target.config)?;
    let (course_id, rubric_id) = config
        .target
        .resolve(target.course_id.clone(), target.rubric_id.clone())?;
    Ok((config, course_id, rubric_id))
}

fn read_document(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read rubric document {path:?}"))
}

fn write_output(path: Option<&Path>, contents: &str) -> Result<()> {
    match path {
        Some(path) => {
            fs::write(path, contents).with_context(|| format!("Failed to write {path:?}"))?;
            tracing::info!(output = ?path, "Wrote document");
        }
        None => print!("{contents}"),
    }
    Ok(())
}
