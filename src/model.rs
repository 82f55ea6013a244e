//! Normalised in-memory rubric shared by the document parser and the remote fetch.
//!
//! Models are plain values: nothing downstream mutates one in place. The reconciler
//! reads two models and produces a [`crate::reconcile::ChangeSet`]; the executor
//! reads the change set.

use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;

/// One achievable performance level of a criterion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rating {
    pub label: String,
    pub points: f64,
    /// Longer explanation of the level; empty when the document leaves it out.
    pub long_description: String,
    pub remote_id: Option<String>,
}

impl Rating {
    pub fn new(label: impl Into<String>, points: f64) -> Self {
        Self {
            label: label.into(),
            points,
            long_description: String::new(),
            remote_id: None,
        }
    }

    pub fn with_long_description(mut self, text: impl Into<String>) -> Self {
        self.long_description = text.into();
        self
    }

    /// Label, points and long description; remote ids are ignored.
    fn same_content(&self, other: &Rating) -> bool {
        self.label == other.label
            && self.points == other.points
            && self.long_description == other.long_description
    }
}

/// One gradable dimension of a rubric. Ratings are ordered highest-scoring first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Criterion {
    pub name: String,
    pub description: String,
    pub ratings: Vec<Rating>,
    pub remote_id: Option<String>,
}

impl Criterion {
    pub fn new(name: impl Into<String>, description: impl Into<String>, ratings: Vec<Rating>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ratings,
            remote_id: None,
        }
    }

    pub fn with_remote_id(mut self, id: impl Into<String>) -> Self {
        self.remote_id = Some(id.into());
        self
    }

    /// Points awarded by the best rating.
    pub fn points(&self) -> f64 {
        self.ratings.iter().map(|r| r.points).fold(0.0, f64::max)
    }

    /// Structural comparison of everything the remote stores except identity:
    /// description and the full ordered rating list.
    pub fn same_content(&self, other: &Criterion) -> bool {
        self.description == other.description
            && self.ratings.len() == other.ratings.len()
            && self
                .ratings
                .iter()
                .zip(&other.ratings)
                .all(|(a, b)| a.same_content(b))
    }

    /// Index of the first rating that scores higher than its predecessor.
    pub(crate) fn first_increasing_rating(&self) -> Option<usize> {
        self.ratings
            .windows(2)
            .position(|pair| pair[1].points > pair[0].points)
            .map(|i| i + 1)
    }
}

/// Invariant violations found when building an authored model directly.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("criterion name must not be empty (position {0})")]
    EmptyName(usize),
    #[error("criterion '{0}' appears more than once")]
    DuplicateName(String),
    #[error("criterion '{0}' has no ratings")]
    NoRatings(String),
    #[error("criterion '{0}' has ratings whose points increase")]
    NonMonotonic(String),
    #[error("criterion '{0}' has a negative or non-finite rating")]
    InvalidPoints(String),
}

/// Ordered criteria of one rubric.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RubricModel {
    criteria: Vec<Criterion>,
}

/// Output of the document parser; identical in shape to a fetched rubric so the
/// two can be diffed structurally.
pub type RubricDraft = RubricModel;

impl RubricModel {
    /// Builds an authored model, enforcing every invariant of the data model.
    pub fn new(criteria: Vec<Criterion>) -> Result<Self, ModelError> {
        let mut seen = HashSet::new();
        for (position, criterion) in criteria.iter().enumerate() {
            if criterion.name.is_empty() {
                return Err(ModelError::EmptyName(position));
            }
            if !seen.insert(criterion.name.as_str()) {
                return Err(ModelError::DuplicateName(criterion.name.clone()));
            }
            if criterion.ratings.is_empty() {
                return Err(ModelError::NoRatings(criterion.name.clone()));
            }
            if criterion
                .ratings
                .iter()
                .any(|r| !r.points.is_finite() || r.points < 0.0)
            {
                return Err(ModelError::InvalidPoints(criterion.name.clone()));
            }
            if criterion.first_increasing_rating().is_some() {
                return Err(ModelError::NonMonotonic(criterion.name.clone()));
            }
        }
        Ok(Self { criteria })
    }

    /// For callers that already enforced the invariants with richer context.
    pub(crate) fn from_validated(criteria: Vec<Criterion>) -> Self {
        Self { criteria }
    }

    /// Wraps state observed on the remote side. It is recorded as-is: the remote
    /// is not ours to validate, only to reconcile.
    pub fn from_remote(criteria: Vec<Criterion>) -> Self {
        Self { criteria }
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Criterion> {
        self.criteria.iter().find(|c| c.name == name)
    }

    /// Sum of the best rating of every criterion.
    pub fn total_points(&self) -> f64 {
        self.criteria.iter().map(Criterion::points).sum()
    }

    /// Widest rating list, used when laying the model out as a table.
    pub fn max_ratings(&self) -> usize {
        self.criteria.iter().map(|c| c.ratings.len()).max().unwrap_or(0)
    }
}
