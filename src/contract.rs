//! # contract: the seam between the synchronisation logic and the remote rubric API
//!
//! [`CanvasApi`] is the only way the reconciler's output reaches the network. The
//! production implementation is [`crate::canvas::CanvasClient`]; tests use the
//! generated `MockCanvasApi` (exported under the default `test-export-mocks`
//! feature so integration tests and dependent crates can use it too).
//!
//! Implementations own retries, pagination and error mapping. Callers only ever
//! see the final [`ApiError`] of a call.

use async_trait::async_trait;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::error::ApiError;
use crate::model::{Criterion, RubricModel};

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait CanvasApi: Send + Sync {
    /// Fetch every criterion of the rubric, in server order, following pagination.
    async fn fetch_rubric(&self, course_id: &str, rubric_id: &str)
        -> Result<RubricModel, ApiError>;

    /// Create a criterion and return its new remote id.
    async fn create_criterion(
        &self,
        course_id: &str,
        rubric_id: &str,
        criterion: &Criterion,
    ) -> Result<String, ApiError>;

    /// Replace a criterion with the full payload of `criterion`.
    async fn update_criterion(
        &self,
        course_id: &str,
        rubric_id: &str,
        remote_id: &str,
        criterion: &Criterion,
    ) -> Result<(), ApiError>;

    async fn delete_criterion(
        &self,
        course_id: &str,
        rubric_id: &str,
        remote_id: &str,
    ) -> Result<(), ApiError>;

    /// Set the assignment's `points_possible` and switch it to points grading.
    async fn update_assignment_points(
        &self,
        course_id: &str,
        assignment_id: &str,
        points: f64,
    ) -> Result<(), ApiError>;
}
