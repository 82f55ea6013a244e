#![doc = "Canvas rubric API client: the only component that crosses the network boundary."]
//
//! # CanvasClient
//!
//! Implements [`CanvasApi`] over `reqwest` against the criteria endpoints of a
//! course rubric:
//!
//! ```text
//! GET    {base}/api/v1/courses/{course}/rubrics/{rubric}/criteria?per_page=N[&cursor=C]
//! POST   {base}/api/v1/courses/{course}/rubrics/{rubric}/criteria
//! PUT    {base}/api/v1/courses/{course}/rubrics/{rubric}/criteria/{id}
//! DELETE {base}/api/v1/courses/{course}/rubrics/{rubric}/criteria/{id}
//! PUT    {base}/api/v1/courses/{course}/assignments/{assignment}
//! ```
//!
//! Every request carries the bearer credential and goes through the same retry
//! loop: 429/502/503 and connection failures back off exponentially with jitter
//! (a `Retry-After` hint wins), 401/403 become [`ApiError::Unauthorized`]
//! immediately, anything else non-2xx becomes [`ApiError::Rejected`]. A request
//! that cannot even be built (e.g. a malformed `Link` URL) fails at once with
//! [`ApiError::Configuration`].
//!
//! The only state shared between requests is the [`RateLimitBudget`].

mod rate_limit;
mod retry;
mod wire;

pub use rate_limit::RateLimitBudget;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, LINK};
use reqwest::{Client, RequestBuilder, Response, Url};
use tracing::{debug, error, info, warn};

use crate::config::{CanvasConfig, RateLimitConfig, RetryPolicy, SyncConfig};
use crate::contract::CanvasApi;
use crate::error::ApiError;
use crate::model::{Criterion, RubricModel};

use self::retry::StatusClass;
use self::wire::{
    AssignmentRequest, CreatedCriterion, CriteriaPage, CriterionRequest, WireCriterion,
};

/// Where the next page of a listing lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum NextPage {
    /// Opaque cursor from the response body, sent back as `cursor=`.
    Cursor(String),
    /// Absolute URL from a `Link: <…>; rel="next"` header.
    Link(String),
}

impl NextPage {
    fn token(&self) -> &str {
        match self {
            NextPage::Cursor(c) | NextPage::Link(c) => c,
        }
    }
}

pub struct CanvasClient {
    http: Client,
    base_url: Url,
    credential: String,
    page_size: u32,
    retry: RetryPolicy,
    rate_limit: RateLimitConfig,
    budget: RateLimitBudget,
    next_link: Regex,
}

impl CanvasClient {
    /// Builds a client for one synchronisation run. The credential's lifecycle
    /// belongs to the caller; it is never logged.
    pub fn new(config: &SyncConfig, credential: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_parts(
            &config.canvas,
            config.retry.clone(),
            config.rate_limit.clone(),
            credential,
        )
    }

    pub fn with_parts(
        canvas: &CanvasConfig,
        retry: RetryPolicy,
        rate_limit: RateLimitConfig,
        credential: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let credential = credential.into();
        if credential.trim().is_empty() {
            return Err(ApiError::Configuration {
                reason: "bearer credential is empty".into(),
            });
        }
        let base_url = Url::parse(canvas.base_url.trim_end_matches('/')).map_err(|e| {
            ApiError::Configuration {
                reason: format!("invalid base url '{}': {e}", canvas.base_url),
            }
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Configuration {
                reason: format!("base url '{}' cannot carry a path", canvas.base_url),
            });
        }
        let http = Client::builder()
            .timeout(canvas.timeout())
            .build()
            .map_err(|e| ApiError::Configuration {
                reason: e.to_string(),
            })?;
        let next_link = Regex::new(r#"<([^>]+)>\s*;[^,]*rel\s*=\s*"?next"?"#).map_err(|e| {
            ApiError::Configuration {
                reason: e.to_string(),
            }
        })?;

        info!(
            base_url = %base_url,
            credential_set = true,
            page_size = canvas.page_size,
            max_attempts = retry.max_attempts,
            "Initialised CanvasClient"
        );
        Ok(Self {
            http,
            base_url,
            credential,
            page_size: canvas.page_size.max(1),
            retry,
            rate_limit,
            budget: RateLimitBudget::default(),
            next_link,
        })
    }

    pub fn budget(&self) -> &RateLimitBudget {
        &self.budget
    }

    fn api_url<'a>(&self, path: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["api", "v1"]).extend(path);
        }
        url
    }

    fn criteria_url(&self, course_id: &str, rubric_id: &str, remote_id: Option<&str>) -> Url {
        let criteria = ["courses", course_id, "rubrics", rubric_id, "criteria"];
        self.api_url(criteria.into_iter().chain(remote_id))
    }

    fn assignment_url(&self, course_id: &str, assignment_id: &str) -> Url {
        self.api_url(["courses", course_id, "assignments", assignment_id])
    }

    fn next_page(&self, cursor: Option<String>, headers: &HeaderMap) -> Option<NextPage> {
        if let Some(cursor) = cursor {
            return Some(NextPage::Cursor(cursor));
        }
        headers
            .get_all(LINK)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|link| {
                self.next_link
                    .captures(link)
                    .map(|caps| NextPage::Link(caps[1].to_string()))
            })
    }

    /// Sends the request produced by `build`, retrying transient failures.
    /// `build` is called once per attempt.
    async fn send<F>(&self, operation: &str, build: F) -> Result<Response, ApiError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            if self.budget.below(self.rate_limit.throttle_below) {
                warn!(
                    operation,
                    remaining = ?self.budget.remaining(),
                    pause_ms = self.rate_limit.pause_ms,
                    "[CANVAS] Rate-limit budget low, pausing"
                );
                tokio::time::sleep(Duration::from_millis(self.rate_limit.pause_ms)).await;
            }

            let sent = build().bearer_auth(&self.credential).send().await;
            let response = match sent {
                Ok(response) => response,
                Err(e) if e.is_builder() => {
                    error!(operation, error = %e, "[CANVAS] Request could not be built");
                    return Err(ApiError::Configuration {
                        reason: format!("request could not be built: {e}"),
                    });
                }
                Err(e) => {
                    if !self.retry.can_retry(attempt) {
                        error!(operation, attempt, error = %e, "[CANVAS] Connection failed, giving up");
                        return Err(ApiError::Transient {
                            attempts: attempt + 1,
                            status: None,
                            message: e.to_string(),
                        });
                    }
                    let wait = self.retry.backoff(attempt, None);
                    warn!(operation, attempt, error = %e, wait_ms = wait.as_millis() as u64, "[CANVAS] Connection failed, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                    continue;
                }
            };

            self.budget.observe(response.headers());
            let status = response.status().as_u16();
            match self.retry.classify(status) {
                StatusClass::Success => {
                    debug!(operation, status, attempt, "[CANVAS] Request succeeded");
                    return Ok(response);
                }
                StatusClass::Unauthorized => {
                    error!(operation, status, "[CANVAS] Credential rejected");
                    return Err(ApiError::Unauthorized { status });
                }
                StatusClass::Rejected => {
                    let body = response.text().await.unwrap_or_default();
                    error!(operation, status, body = %body, "[CANVAS] Request rejected");
                    return Err(ApiError::Rejected { status, body });
                }
                StatusClass::Transient => {
                    let hint = retry::retry_after(response.headers());
                    if !self.retry.can_retry(attempt) {
                        let body = response.text().await.unwrap_or_default();
                        error!(operation, status, attempt, "[CANVAS] Transient failure persisted, giving up");
                        return Err(ApiError::Transient {
                            attempts: attempt + 1,
                            status: Some(status),
                            message: body,
                        });
                    }
                    let wait = self.retry.backoff(attempt, hint);
                    warn!(
                        operation,
                        status,
                        attempt,
                        retry_after = ?hint,
                        wait_ms = wait.as_millis() as u64,
                        "[CANVAS] Transient failure, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        operation: &str,
        response: Response,
    ) -> Result<T, ApiError> {
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| ApiError::Rejected {
            status,
            body: format!("unreadable response body: {e}"),
        })?;
        serde_json::from_str(&body).map_err(|e| {
            error!(operation, status, error = %e, "[CANVAS] Malformed response body");
            ApiError::Rejected { status, body }
        })
    }
}

#[async_trait]
impl CanvasApi for CanvasClient {
    async fn fetch_rubric(
        &self,
        course_id: &str,
        rubric_id: &str,
    ) -> Result<RubricModel, ApiError> {
        info!(course_id, rubric_id, "[CANVAS] Fetching rubric criteria");
        let first = self.criteria_url(course_id, rubric_id, None);
        let per_page = self.page_size.to_string();

        let mut criteria = Vec::new();
        let mut seen = HashSet::new();
        let mut next: Option<NextPage> = None;
        let mut pages = 0usize;
        loop {
            let response = self
                .send("fetch_rubric", || match &next {
                    None => self
                        .http
                        .get(first.clone())
                        .query(&[("per_page", per_page.as_str())]),
                    Some(NextPage::Cursor(cursor)) => self.http.get(first.clone()).query(&[
                        ("per_page", per_page.as_str()),
                        ("cursor", cursor.as_str()),
                    ]),
                    Some(NextPage::Link(url)) => self.http.get(url.as_str()),
                })
                .await?;
            let headers = response.headers().clone();
            let page: CriteriaPage = Self::read_json("fetch_rubric", response).await?;
            let (batch, cursor) = page.into_parts();
            pages += 1;
            debug!(page = pages, criteria = batch.len(), "[CANVAS] Fetched criteria page");
            criteria.extend(batch.into_iter().map(Criterion::from));

            match self.next_page(cursor, &headers) {
                None => break,
                Some(page) => {
                    if !seen.insert(page.token().to_string()) {
                        error!(course_id, rubric_id, cursor = page.token(), "[CANVAS] Pagination loop detected");
                        return Err(ApiError::Incomplete {
                            cursor: page.token().to_string(),
                        });
                    }
                    next = Some(page);
                }
            }
        }

        info!(course_id, rubric_id, pages, criteria = criteria.len(), "[CANVAS] Fetched rubric");
        Ok(RubricModel::from_remote(criteria))
    }

    async fn create_criterion(
        &self,
        course_id: &str,
        rubric_id: &str,
        criterion: &Criterion,
    ) -> Result<String, ApiError> {
        info!(course_id, rubric_id, criterion = %criterion.name, "[CANVAS] Creating criterion");
        let url = self.criteria_url(course_id, rubric_id, None);
        let body = CriterionRequest {
            criterion: WireCriterion::from(criterion),
        };
        let response = self
            .send("create_criterion", || self.http.post(url.clone()).json(&body))
            .await?;
        let status = response.status().as_u16();
        let created: CreatedCriterion = Self::read_json("create_criterion", response).await?;
        created.into_id().ok_or_else(|| ApiError::Rejected {
            status,
            body: "create response carried no criterion id".into(),
        })
    }

    async fn update_criterion(
        &self,
        course_id: &str,
        rubric_id: &str,
        remote_id: &str,
        criterion: &Criterion,
    ) -> Result<(), ApiError> {
        info!(course_id, rubric_id, remote_id, criterion = %criterion.name, "[CANVAS] Updating criterion");
        let url = self.criteria_url(course_id, rubric_id, Some(remote_id));
        let body = CriterionRequest {
            criterion: WireCriterion::from(criterion),
        };
        self.send("update_criterion", || self.http.put(url.clone()).json(&body))
            .await?;
        Ok(())
    }

    async fn delete_criterion(
        &self,
        course_id: &str,
        rubric_id: &str,
        remote_id: &str,
    ) -> Result<(), ApiError> {
        info!(course_id, rubric_id, remote_id, "[CANVAS] Deleting criterion");
        let url = self.criteria_url(course_id, rubric_id, Some(remote_id));
        self.send("delete_criterion", || self.http.delete(url.clone()))
            .await?;
        Ok(())
    }

    async fn update_assignment_points(
        &self,
        course_id: &str,
        assignment_id: &str,
        points: f64,
    ) -> Result<(), ApiError> {
        info!(course_id, assignment_id, points, "[CANVAS] Updating assignment points");
        let url = self.assignment_url(course_id, assignment_id);
        let body = AssignmentRequest::points(points);
        self.send("update_assignment_points", || {
            self.http.put(url.clone()).json(&body)
        })
        .await?;
        Ok(())
    }
}
