//! Reconciliation: compute the ordered change set that turns the remote rubric
//! into the local one.
//!
//! Local criteria are paired with remote ones by [`MatchKey`]; a remote criterion
//! is claimed at most once. Output order:
//! every local criterion in local order (`Create`, `Update` or `Unchanged`),
//! followed by a `Delete` for every unclaimed remote criterion in remote order.
//! Deletes always come last so the remote never recomputes totals from a rubric
//! that is missing criteria it is about to gain.
//!
//! [`diff`] is pure and deterministic, so its output doubles as a dry-run preview.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::MatchKey;
use crate::model::{Criterion, RubricModel};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CriterionOp {
    Create {
        criterion: Criterion,
    },
    /// Carries the full new payload; the remote does not accept partial patches.
    Update {
        remote_id: String,
        criterion: Criterion,
    },
    Delete {
        remote_id: String,
        name: String,
    },
    /// `remote_id` is absent only when the remote model was not fetched (e.g. a
    /// parsed document diffed against itself).
    Unchanged {
        remote_id: Option<String>,
        name: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    Unchanged,
}

impl CriterionOp {
    pub fn kind(&self) -> OperationKind {
        match self {
            CriterionOp::Create { .. } => OperationKind::Create,
            CriterionOp::Update { .. } => OperationKind::Update,
            CriterionOp::Delete { .. } => OperationKind::Delete,
            CriterionOp::Unchanged { .. } => OperationKind::Unchanged,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CriterionOp::Create { criterion } | CriterionOp::Update { criterion, .. } => {
                &criterion.name
            }
            CriterionOp::Delete { name, .. } | CriterionOp::Unchanged { name, .. } => name,
        }
    }

    pub fn remote_id(&self) -> Option<&str> {
        match self {
            CriterionOp::Create { .. } => None,
            CriterionOp::Update { remote_id, .. } | CriterionOp::Delete { remote_id, .. } => {
                Some(remote_id)
            }
            CriterionOp::Unchanged { remote_id, .. } => remote_id.as_deref(),
        }
    }

    /// Whether applying this entry needs a network call.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, CriterionOp::Unchanged { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeSet {
    ops: Vec<CriterionOp>,
}

impl ChangeSet {
    pub fn ops(&self) -> &[CriterionOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// True when nothing needs to be sent to the remote.
    pub fn is_noop(&self) -> bool {
        self.ops.iter().all(|op| !op.is_mutation())
    }

    pub fn summary(&self) -> ChangeSummary {
        self.ops
            .iter()
            .fold(ChangeSummary::default(), |mut acc, op| {
                match op.kind() {
                    OperationKind::Create => acc.creates += 1,
                    OperationKind::Update => acc.updates += 1,
                    OperationKind::Delete => acc.deletes += 1,
                    OperationKind::Unchanged => acc.unchanged += 1,
                }
                acc
            })
    }
}

/// Diff with the default name-based matching.
pub fn diff(local: &RubricModel, remote: &RubricModel) -> ChangeSet {
    diff_with(local, remote, MatchKey::Name)
}

pub fn diff_with(local: &RubricModel, remote: &RubricModel, key: MatchKey) -> ChangeSet {
    let remote_criteria = remote.criteria();

    // Remote order within each bucket; the first unclaimed entry wins.
    let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut by_id: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, criterion) in remote_criteria.iter().enumerate() {
        by_name.entry(criterion.name.as_str()).or_default().push(idx);
        if let Some(id) = criterion.remote_id.as_deref() {
            by_id.entry(id).or_default().push(idx);
        }
    }

    let mut claimed = vec![false; remote_criteria.len()];
    let mut ops = Vec::with_capacity(local.len() + remote_criteria.len());

    for criterion in local.criteria() {
        let unclaimed = |bucket: Option<&Vec<usize>>| {
            bucket.and_then(|indices| indices.iter().copied().find(|idx| !claimed[*idx]))
        };
        let by_local_id = match (key, criterion.remote_id.as_deref()) {
            (MatchKey::RemoteIdThenName, Some(id)) => unclaimed(by_id.get(id)),
            _ => None,
        };
        let candidate = by_local_id.or_else(|| unclaimed(by_name.get(criterion.name.as_str())));

        let op = match candidate.map(|idx| (idx, &remote_criteria[idx])) {
            Some((idx, existing))
                if existing.name == criterion.name && existing.same_content(criterion) =>
            {
                claimed[idx] = true;
                CriterionOp::Unchanged {
                    remote_id: existing.remote_id.clone(),
                    name: criterion.name.clone(),
                }
            }
            Some((idx, existing)) => match existing.remote_id.as_deref() {
                Some(id) => {
                    claimed[idx] = true;
                    CriterionOp::Update {
                        remote_id: id.to_string(),
                        criterion: Criterion {
                            remote_id: Some(id.to_string()),
                            ..criterion.clone()
                        },
                    }
                }
                None => {
                    warn!(criterion = %criterion.name, "[PLAN] Matching remote criterion has no id and cannot be updated");
                    CriterionOp::Create {
                        criterion: criterion.clone(),
                    }
                }
            },
            None => CriterionOp::Create {
                criterion: criterion.clone(),
            },
        };
        debug!(criterion = %criterion.name, kind = ?op.kind(), "[PLAN] Classified criterion");
        ops.push(op);
    }

    for (idx, existing) in remote_criteria.iter().enumerate() {
        if claimed[idx] {
            continue;
        }
        match existing.remote_id.as_deref() {
            Some(id) => ops.push(CriterionOp::Delete {
                remote_id: id.to_string(),
                name: existing.name.clone(),
            }),
            None => {
                warn!(criterion = %existing.name, "[PLAN] Remote criterion has no id and cannot be deleted")
            }
        }
    }

    let change_set = ChangeSet { ops };
    let summary = change_set.summary();
    info!(
        creates = summary.creates,
        updates = summary.updates,
        deletes = summary.deletes,
        unchanged = summary.unchanged,
        "[PLAN] Computed change set"
    );
    change_set
}
