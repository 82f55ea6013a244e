//! JSON shapes exchanged with the rubric criteria endpoints.
//!
//! Canvas calls a criterion's short title its `description` and the longer text
//! its `long_description`; the same naming applies to ratings.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::model::{Criterion, Rating};

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireRating {
    #[serde(default, deserialize_with = "lenient_id", skip_serializing)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub long_description: String,
    #[serde(default)]
    pub points: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireCriterion {
    #[serde(default, deserialize_with = "lenient_id", skip_serializing)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub long_description: String,
    #[serde(default)]
    pub points: f64,
    #[serde(default)]
    pub ratings: Vec<WireRating>,
}

/// Body of one page of `GET …/criteria`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum CriteriaPage {
    Envelope {
        criteria: Vec<WireCriterion>,
        #[serde(default)]
        next_cursor: Option<String>,
    },
    Bare(Vec<WireCriterion>),
}

impl CriteriaPage {
    pub fn into_parts(self) -> (Vec<WireCriterion>, Option<String>) {
        match self {
            CriteriaPage::Envelope {
                criteria,
                next_cursor,
            } => (criteria, next_cursor.filter(|c| !c.is_empty())),
            CriteriaPage::Bare(criteria) => (criteria, None),
        }
    }
}

/// Request body for create and update.
#[derive(Debug, Serialize)]
pub(crate) struct CriterionRequest {
    pub criterion: WireCriterion,
}

/// Body of `PUT …/assignments/{id}` when the assignment total follows the rubric.
#[derive(Debug, Serialize)]
pub(crate) struct AssignmentRequest {
    pub assignment: AssignmentPoints,
}

#[derive(Debug, Serialize)]
pub(crate) struct AssignmentPoints {
    pub points_possible: f64,
    pub grading_type: &'static str,
}

impl AssignmentRequest {
    pub fn points(points_possible: f64) -> Self {
        Self {
            assignment: AssignmentPoints {
                points_possible,
                grading_type: "points",
            },
        }
    }
}

/// Create answers either with the criterion itself or wrapped in `criterion`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum CreatedCriterion {
    Wrapped { criterion: IdOnly },
    Flat(IdOnly),
}

#[derive(Debug, Deserialize)]
pub(crate) struct IdOnly {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
}

impl CreatedCriterion {
    pub fn into_id(self) -> Option<String> {
        match self {
            CreatedCriterion::Wrapped { criterion } => criterion.id,
            CreatedCriterion::Flat(only) => only.id,
        }
    }
}

impl From<&Criterion> for WireCriterion {
    fn from(criterion: &Criterion) -> Self {
        Self {
            id: criterion.remote_id.clone(),
            description: criterion.name.clone(),
            long_description: criterion.description.clone(),
            points: criterion.points(),
            ratings: criterion
                .ratings
                .iter()
                .map(|r| WireRating {
                    id: r.remote_id.clone(),
                    description: r.label.clone(),
                    long_description: r.long_description.clone(),
                    points: r.points,
                })
                .collect(),
        }
    }
}

impl From<WireCriterion> for Criterion {
    fn from(wire: WireCriterion) -> Self {
        Criterion {
            name: wire.description,
            description: wire.long_description,
            ratings: wire
                .ratings
                .into_iter()
                .map(|r| Rating {
                    label: r.description,
                    points: r.points,
                    long_description: r.long_description,
                    remote_id: r.id,
                })
                .collect(),
            remote_id: wire.id,
        }
    }
}

/// Ids arrive as strings (`"_1234"`) or numbers depending on the endpoint.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
