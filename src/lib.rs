#![doc = "rubric-sync-core: rubric synchronisation engine for Canvas."]

//! Parses a tabular rubric document, compares it with the rubric stored in
//! Canvas and applies the minimal set of criterion changes.
//!
//! document -> [`document`] -> local [`model::RubricModel`];
//! [`canvas::CanvasClient`] -> remote [`model::RubricModel`];
//! both -> [`reconcile::diff`] -> [`reconcile::ChangeSet`] ->
//! [`synchronise::execute`] -> [`synchronise::SyncReport`].
//!
//! # Usage
//! Callers normally go through [`synchronise::run_sync`] (or
//! [`synchronise::plan`] for a dry run) with any [`contract::CanvasApi`].

pub mod canvas;
pub mod config;
pub mod contract;
pub mod document;
pub mod error;
pub mod model;
pub mod reconcile;
pub mod synchronise;

pub use canvas::CanvasClient;
pub use config::{MatchKey, SyncConfig, SyncOptions};
pub use contract::CanvasApi;
pub use error::{ApiError, ParseError, RenderError, SyncError};
pub use model::{Criterion, Rating, RubricDraft, RubricModel};
pub use reconcile::{diff, diff_with, ChangeSet, CriterionOp, OperationKind};
pub use synchronise::{
    execute, export, plan, run_sync, run_sync_with, run_sync_with_credential,
    AssignmentPointsReport, EntryOutcome, EntryReport, ExecuteOptions, SyncReport, SyncStatus,
};
