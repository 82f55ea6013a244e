//! Coordinating module: parse, fetch, reconcile, then apply the change set.
//!
//! [`execute`] drives each change-set entry through
//! `Pending -> InFlight -> Applied | Failed`. Creates and Updates go first, in
//! change-set order and in batches of at most `max_concurrency`; Deletes follow
//! one at a time. A failure only affects its own entry, except
//! [`ApiError::Unauthorized`], which stops the run and leaves every entry still
//! pending as `Skipped`. Cancellation is observed between batches and between
//! deletes, never mid-request.
//!
//! When [`SyncOptions::sync_assignment_points`] is set, a run whose entries all
//! succeeded finishes by setting the assignment's `points_possible` to the rubric
//! total.

use std::fmt;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::canvas::CanvasClient;
use crate::config::{SyncConfig, SyncOptions};
use crate::contract::CanvasApi;
use crate::document::{self, DocumentParser, ParserOptions};
use crate::error::{ApiError, SyncError};
use crate::model::RubricModel;
use crate::reconcile::{self, ChangeSet, CriterionOp, OperationKind};

/// Knobs for a single [`execute`] call.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Create/Update entries in flight at once; 0 is treated as 1.
    pub max_concurrency: usize,
    /// Flipping the watched value to `true` cancels the run between entries.
    pub cancel: Option<watch::Receiver<bool>>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            cancel: None,
        }
    }
}

impl From<&SyncOptions> for ExecuteOptions {
    fn from(options: &SyncOptions) -> Self {
        Self {
            max_concurrency: options.max_concurrency,
            cancel: None,
        }
    }
}

impl ExecuteOptions {
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum EntryOutcome {
    Applied,
    /// Nothing to do; no request was made.
    Unchanged,
    /// Never attempted because the run was aborted or cancelled first.
    Skipped,
    Failed(ApiError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryReport {
    pub criterion: String,
    pub kind: OperationKind,
    /// The id the entry addressed, or the id assigned by the remote for an applied create.
    pub remote_id: Option<String>,
    pub outcome: EntryOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    PartialFailure,
    Failure,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SyncStatus::Success => "success",
            SyncStatus::PartialFailure => "partial failure",
            SyncStatus::Failure => "failure",
        };
        f.write_str(text)
    }
}

/// The follow-up `points_possible` update of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignmentPointsReport {
    pub assignment_id: String,
    pub points: f64,
    /// `Skipped` when the run had failed or skipped entries.
    pub outcome: EntryOutcome,
}

/// Outcome of one run, entry by entry, in change-set order. Built once by
/// [`execute`] and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    entries: Vec<EntryReport>,
    status: SyncStatus,
    cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    assignment_points: Option<AssignmentPointsReport>,
}

impl SyncReport {
    fn new(entries: Vec<EntryReport>, cancelled: bool) -> Self {
        let count = |pred: fn(&EntryOutcome) -> bool| {
            entries.iter().filter(|e| pred(&e.outcome)).count()
        };
        let applied = count(|o| matches!(o, EntryOutcome::Applied));
        let failed = count(|o| matches!(o, EntryOutcome::Failed(_)));
        let skipped = count(|o| matches!(o, EntryOutcome::Skipped));

        let status = if failed == 0 && skipped == 0 {
            SyncStatus::Success
        } else if applied > 0 {
            SyncStatus::PartialFailure
        } else {
            SyncStatus::Failure
        };
        Self {
            entries,
            status,
            cancelled,
            assignment_points: None,
        }
    }

    /// A failed points update turns an otherwise successful run into a partial failure.
    fn with_assignment_points(mut self, points: AssignmentPointsReport) -> Self {
        if matches!(points.outcome, EntryOutcome::Failed(_)) && self.status == SyncStatus::Success {
            self.status = SyncStatus::PartialFailure;
        }
        self.assignment_points = Some(points);
        self
    }

    pub fn entries(&self) -> &[EntryReport] {
        &self.entries
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn assignment_points(&self) -> Option<&AssignmentPointsReport> {
        self.assignment_points.as_ref()
    }

    pub fn entry(&self, criterion: &str) -> Option<&EntryReport> {
        self.entries.iter().find(|e| e.criterion == criterion)
    }

    pub fn applied(&self) -> usize {
        self.count(|o| matches!(o, EntryOutcome::Applied))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, EntryOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, EntryOutcome::Skipped))
    }

    fn count(&self, pred: impl Fn(&EntryOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Sync {}: {} applied, {} failed, {} skipped{}",
            self.status,
            self.applied(),
            self.failed(),
            self.skipped(),
            if self.cancelled { " (cancelled)" } else { "" }
        )?;
        for entry in &self.entries {
            let outcome = match &entry.outcome {
                EntryOutcome::Applied => "applied".to_string(),
                EntryOutcome::Unchanged => "unchanged".to_string(),
                EntryOutcome::Skipped => "skipped".to_string(),
                EntryOutcome::Failed(e) => format!("failed: {e}"),
            };
            writeln!(f, "  {:<9} {:<30} {}", format!("{:?}", entry.kind), entry.criterion, outcome)?;
        }
        if let Some(points) = &self.assignment_points {
            let outcome = match &points.outcome {
                EntryOutcome::Failed(e) => format!("failed: {e}"),
                other => format!("{other:?}").to_lowercase(),
            };
            writeln!(
                f,
                "  assignment {} points_possible = {}: {}",
                points.assignment_id, points.points, outcome
            )?;
        }
        Ok(())
    }
}

enum EntryState {
    Pending,
    InFlight,
    Done(EntryOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Unauthorized,
    Cancelled,
}

/// Applies `changes` to the rubric through `client`.
///
/// Never fails as a whole: per-entry failures are recorded in the report.
pub async fn execute<C>(
    course_id: &str,
    rubric_id: &str,
    changes: &ChangeSet,
    client: &C,
    options: &ExecuteOptions,
) -> SyncReport
where
    C: CanvasApi + ?Sized,
{
    let ops = changes.ops();
    let summary = changes.summary();
    info!(
        course_id,
        rubric_id,
        creates = summary.creates,
        updates = summary.updates,
        deletes = summary.deletes,
        unchanged = summary.unchanged,
        max_concurrency = options.max_concurrency,
        "[SYNC] Applying change set"
    );

    let mut states: Vec<EntryState> = ops
        .iter()
        .map(|op| {
            if op.is_mutation() {
                EntryState::Pending
            } else {
                EntryState::Done(EntryOutcome::Unchanged)
            }
        })
        .collect();
    let mut assigned: Vec<Option<String>> = vec![None; ops.len()];

    let upserts: Vec<usize> = indices_of(ops, |k| {
        matches!(k, OperationKind::Create | OperationKind::Update)
    });
    let deletes: Vec<usize> = indices_of(ops, |k| k == OperationKind::Delete);

    let mut halt = None;
    for batch in upserts.chunks(options.max_concurrency.max(1)) {
        if options.cancelled() {
            halt = Some(Halt::Cancelled);
            break;
        }
        for &idx in batch {
            states[idx] = EntryState::InFlight;
        }
        let results = join_all(
            batch
                .iter()
                .map(|&idx| apply(course_id, rubric_id, &ops[idx], client)),
        )
        .await;
        for (&idx, result) in batch.iter().zip(results) {
            if let Some(stop) = settle(&ops[idx], result, &mut states[idx], &mut assigned[idx]) {
                halt = Some(stop);
            }
        }
        if halt.is_some() {
            break;
        }
    }

    if halt.is_none() {
        for &idx in &deletes {
            if options.cancelled() {
                halt = Some(Halt::Cancelled);
                break;
            }
            states[idx] = EntryState::InFlight;
            let result = apply(course_id, rubric_id, &ops[idx], client).await;
            if let Some(stop) = settle(&ops[idx], result, &mut states[idx], &mut assigned[idx]) {
                halt = Some(stop);
                break;
            }
        }
    }

    match halt {
        Some(Halt::Unauthorized) => {
            error!(course_id, rubric_id, "[SYNC] Credential rejected, skipping remaining entries")
        }
        Some(Halt::Cancelled) => {
            warn!(course_id, rubric_id, "[SYNC] Run cancelled, skipping remaining entries")
        }
        None => {}
    }

    let entries = ops
        .iter()
        .zip(states)
        .zip(assigned)
        .map(|((op, state), created)| EntryReport {
            criterion: op.name().to_string(),
            kind: op.kind(),
            remote_id: created.or_else(|| op.remote_id().map(str::to_string)),
            outcome: match state {
                EntryState::Done(outcome) => outcome,
                EntryState::Pending | EntryState::InFlight => EntryOutcome::Skipped,
            },
        })
        .collect();

    let report = SyncReport::new(entries, halt == Some(Halt::Cancelled));
    info!(
        course_id,
        rubric_id,
        status = %report.status(),
        applied = report.applied(),
        failed = report.failed(),
        skipped = report.skipped(),
        "[SYNC] Change set applied"
    );
    report
}

fn indices_of(ops: &[CriterionOp], keep: impl Fn(OperationKind) -> bool) -> Vec<usize> {
    ops.iter()
        .enumerate()
        .filter(|(_, op)| keep(op.kind()))
        .map(|(idx, _)| idx)
        .collect()
}

/// Issues the call for one entry. Returns the new remote id for creates.
async fn apply<C>(
    course_id: &str,
    rubric_id: &str,
    op: &CriterionOp,
    client: &C,
) -> Result<Option<String>, ApiError>
where
    C: CanvasApi + ?Sized,
{
    debug!(criterion = op.name(), kind = ?op.kind(), "[SYNC] Entry in flight");
    match op {
        CriterionOp::Create { criterion } => client
            .create_criterion(course_id, rubric_id, criterion)
            .await
            .map(Some),
        CriterionOp::Update {
            remote_id,
            criterion,
        } => client
            .update_criterion(course_id, rubric_id, remote_id, criterion)
            .await
            .map(|()| None),
        CriterionOp::Delete { remote_id, .. } => client
            .delete_criterion(course_id, rubric_id, remote_id)
            .await
            .map(|()| None),
        CriterionOp::Unchanged { .. } => Ok(None),
    }
}

/// Records the result of an in-flight entry; returns `Some` when the run must stop.
fn settle(
    op: &CriterionOp,
    result: Result<Option<String>, ApiError>,
    state: &mut EntryState,
    assigned: &mut Option<String>,
) -> Option<Halt> {
    match result {
        Ok(created) => {
            info!(criterion = op.name(), kind = ?op.kind(), remote_id = ?created, "[SYNC] Entry applied");
            *assigned = created;
            *state = EntryState::Done(EntryOutcome::Applied);
            None
        }
        Err(e) => {
            error!(criterion = op.name(), kind = ?op.kind(), error = %e, "[SYNC] Entry failed");
            let stop = e.is_unauthorized().then_some(Halt::Unauthorized);
            *state = EntryState::Done(EntryOutcome::Failed(e));
            stop
        }
    }
}

/// Parses `document`, fetches the remote rubric and returns the change set
/// without applying it.
pub async fn plan<C>(
    document: &str,
    course_id: &str,
    rubric_id: &str,
    client: &C,
    options: &SyncOptions,
) -> Result<ChangeSet, SyncError>
where
    C: CanvasApi + ?Sized,
{
    let (_, changes) = plan_model(document, course_id, rubric_id, client, options).await?;
    Ok(changes)
}

async fn plan_model<C>(
    document: &str,
    course_id: &str,
    rubric_id: &str,
    client: &C,
    options: &SyncOptions,
) -> Result<(RubricModel, ChangeSet), SyncError>
where
    C: CanvasApi + ?Sized,
{
    let parser = DocumentParser::new(ParserOptions {
        decode_html_entities: options.decode_html_entities,
    });
    let local = parser.parse(document).map_err(|e| {
        error!(error = %e, "[SYNC] Document rejected");
        e
    })?;
    info!(criteria = local.len(), total_points = local.total_points(), "[SYNC] Parsed document");

    let remote = client
        .fetch_rubric(course_id, rubric_id)
        .await
        .map_err(|e| {
            error!(course_id, rubric_id, error = %e, "[SYNC] Fetch failed, nothing applied");
            SyncError::Fetch(e)
        })?;

    let changes = reconcile::diff_with(&local, &remote, options.match_key);
    Ok((local, changes))
}

/// Full run: plan, then execute. Parse and fetch failures abort before any mutation.
pub async fn run_sync<C>(
    document: &str,
    course_id: &str,
    rubric_id: &str,
    client: &C,
    options: &SyncOptions,
) -> Result<SyncReport, SyncError>
where
    C: CanvasApi + ?Sized,
{
    run_sync_with(
        document,
        course_id,
        rubric_id,
        client,
        options,
        &ExecuteOptions::from(options),
    )
    .await
}

/// [`run_sync`] with explicit executor options, e.g. a cancellation handle.
pub async fn run_sync_with<C>(
    document: &str,
    course_id: &str,
    rubric_id: &str,
    client: &C,
    options: &SyncOptions,
    execute_options: &ExecuteOptions,
) -> Result<SyncReport, SyncError>
where
    C: CanvasApi + ?Sized,
{
    let assignment_id = assignment_target(options)?;
    info!(course_id, rubric_id, "[SYNC] Starting rubric synchronisation");
    let (local, changes) = plan_model(document, course_id, rubric_id, client, options).await?;
    if changes.is_noop() {
        info!(course_id, rubric_id, "[SYNC] Remote rubric already up to date");
    }
    let report = execute(course_id, rubric_id, &changes, client, execute_options).await;

    let Some(assignment_id) = assignment_id else {
        return Ok(report);
    };
    let points = local.total_points();
    let outcome = if report.status() != SyncStatus::Success {
        warn!(course_id, assignment_id, "[SYNC] Run incomplete, leaving assignment points untouched");
        EntryOutcome::Skipped
    } else {
        match client
            .update_assignment_points(course_id, assignment_id, points)
            .await
        {
            Ok(()) => {
                info!(course_id, assignment_id, points, "[SYNC] Assignment points updated");
                EntryOutcome::Applied
            }
            Err(e) => {
                error!(course_id, assignment_id, error = %e, "[SYNC] Assignment points update failed");
                EntryOutcome::Failed(e)
            }
        }
    };
    Ok(report.with_assignment_points(AssignmentPointsReport {
        assignment_id: assignment_id.to_string(),
        points,
        outcome,
    }))
}

/// The assignment whose points follow the rubric total, if enabled.
fn assignment_target(options: &SyncOptions) -> Result<Option<&str>, SyncError> {
    if !options.sync_assignment_points {
        return Ok(None);
    }
    match options.assignment_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => Ok(Some(id)),
        _ => Err(SyncError::InvalidOptions {
            reason: "sync_assignment_points requires an assignment_id".into(),
        }),
    }
}

/// Builds a [`CanvasClient`] for `credential` and runs a full sync with it.
pub async fn run_sync_with_credential(
    document: &str,
    course_id: &str,
    rubric_id: &str,
    credential: &str,
    config: &SyncConfig,
) -> Result<SyncReport, SyncError> {
    let client = CanvasClient::new(config, credential).map_err(SyncError::Client)?;
    run_sync(document, course_id, rubric_id, &client, &config.sync).await
}

/// Fetches the remote rubric and renders it in the document schema.
pub async fn export<C>(course_id: &str, rubric_id: &str, client: &C) -> Result<String, SyncError>
where
    C: CanvasApi + ?Sized,
{
    let remote = client
        .fetch_rubric(course_id, rubric_id)
        .await
        .map_err(SyncError::Fetch)?;
    info!(course_id, rubric_id, criteria = remote.len(), "[SYNC] Exporting rubric");
    Ok(document::render(&remote)?)
}
