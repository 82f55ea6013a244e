//! Tabular rubric documents: parsing into a [`RubricModel`] and rendering back.
//!
//! Header schema (names are trimmed and matched case-insensitively):
//!
//! ```text
//! criterion,criterion_desc,criterion_id,rating1,rating1_points,rating1_desc,rating2,rating2_points,...
//! ```
//!
//! Only `criterion` and at least one `ratingN`/`ratingN_points` pair are required.
//! Rating levels are read in ascending `N`, which must be descending score order.
//! Validation happens once, here; every downstream component trusts the model.

use std::collections::{BTreeMap, HashSet};

use regex::Regex;

use crate::error::{ParseError, RenderError};
use crate::model::{Criterion, Rating, RubricModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserOptions {
    /// Decode HTML entities such as `&amp;` or `&#8594;` in text cells.
    pub decode_html_entities: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            decode_html_entities: true,
        }
    }
}

/// Parses a document with default options.
pub fn parse(document: &str) -> Result<RubricModel, ParseError> {
    DocumentParser::default().parse(document)
}

#[derive(Debug, Clone, Default)]
pub struct DocumentParser {
    options: ParserOptions,
}

impl DocumentParser {
    pub fn new(options: ParserOptions) -> Self {
        Self { options }
    }

    /// Parses the full document. Pure: identical input always yields an equal model.
    pub fn parse(&self, document: &str) -> Result<RubricModel, ParseError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(document.as_bytes());

        let header = reader
            .headers()
            .map_err(|e| ParseError::Unreadable {
                row: Some(1),
                reason: e.to_string(),
            })?
            .clone();
        let layout = HeaderLayout::from_header(&header)?;
        tracing::debug!(
            rating_levels = layout.groups.len(),
            has_description = layout.description.is_some(),
            has_ids = layout.criterion_id.is_some(),
            "Mapped rubric document header"
        );

        let mut criteria = Vec::new();
        let mut seen_names = HashSet::new();
        let mut row = 1;
        for record in reader.records() {
            let record = record.map_err(|e| ParseError::Unreadable {
                row: Some(e.position().map_or(row + 1, |p| p.line() as usize)),
                reason: e.to_string(),
            })?;
            row = record_row(document, &record).unwrap_or(row + 1);
            if record.iter().all(str::is_empty) {
                continue;
            }

            let criterion = self.parse_row(&layout, &record, row)?;
            if !seen_names.insert(criterion.name.clone()) {
                return Err(ParseError::DuplicateCriterion {
                    row,
                    name: criterion.name,
                });
            }
            if criterion.first_increasing_rating().is_some() {
                return Err(ParseError::NonMonotonicRatings {
                    row,
                    criterion: criterion.name,
                });
            }
            criteria.push(criterion);
        }

        tracing::info!(criteria = criteria.len(), "Parsed rubric document");
        Ok(RubricModel::from_validated(criteria))
    }

    fn parse_row(
        &self,
        layout: &HeaderLayout,
        record: &csv::StringRecord,
        row: usize,
    ) -> Result<Criterion, ParseError> {
        let cell = |idx: usize| record.get(idx).unwrap_or("");
        let optional = |idx: Option<usize>| idx.map(cell).unwrap_or("");

        let name = self.text(cell(layout.criterion));
        if name.is_empty() {
            return Err(ParseError::MissingField {
                row,
                column: "criterion".into(),
            });
        }

        let mut ratings = Vec::with_capacity(layout.groups.len());
        for group in &layout.groups {
            let label = cell(group.label);
            let points = cell(group.points);
            let long_description = optional(group.desc);
            if label.is_empty() && points.is_empty() && long_description.is_empty() {
                continue;
            }
            if label.is_empty() {
                return Err(ParseError::MissingField {
                    row,
                    column: group.label_column(),
                });
            }
            if points.is_empty() {
                return Err(ParseError::MissingField {
                    row,
                    column: group.points_column(),
                });
            }
            let value = parse_points(points).ok_or_else(|| ParseError::NonNumericPoints {
                row,
                column: group.points_column(),
                value: points.to_string(),
            })?;
            ratings.push(
                Rating::new(self.text(label), value)
                    .with_long_description(self.text(long_description)),
            );
        }

        if ratings.is_empty() {
            let column = layout
                .groups
                .first()
                .map(RatingColumns::label_column)
                .unwrap_or_else(|| "rating1".into());
            return Err(ParseError::MissingField { row, column });
        }

        let remote_id = Some(optional(layout.criterion_id))
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        Ok(Criterion {
            name,
            description: self.text(optional(layout.description)),
            ratings,
            remote_id,
        })
    }

    fn text(&self, raw: &str) -> String {
        if self.options.decode_html_entities {
            html_escape::decode_html_entities(raw).into_owned()
        } else {
            raw.to_string()
        }
    }
}

/// Document row a record starts on. The reader positions a record right after the
/// previous terminator, so blank lines skipped before it are added here.
fn record_row(document: &str, record: &csv::StringRecord) -> Option<usize> {
    let position = record.position()?;
    let start = usize::try_from(position.byte()).ok()?;
    let skipped = document
        .as_bytes()
        .get(start..)?
        .iter()
        .take_while(|b| matches!(b, b'\r' | b'\n'))
        .filter(|b| **b == b'\n')
        .count();
    Some(position.line() as usize + skipped)
}

fn parse_points(raw: &str) -> Option<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|p| p.is_finite() && *p >= 0.0)
}

#[derive(Debug)]
struct RatingColumns {
    level: u32,
    label: usize,
    points: usize,
    desc: Option<usize>,
}

impl RatingColumns {
    fn label_column(&self) -> String {
        format!("rating{}", self.level)
    }

    fn points_column(&self) -> String {
        format!("rating{}_points", self.level)
    }
}

#[derive(Debug)]
struct HeaderLayout {
    criterion: usize,
    description: Option<usize>,
    criterion_id: Option<usize>,
    groups: Vec<RatingColumns>,
}

#[derive(Default)]
struct PartialGroup {
    label: Option<usize>,
    points: Option<usize>,
    desc: Option<usize>,
}

impl HeaderLayout {
    fn from_header(header: &csv::StringRecord) -> Result<Self, ParseError> {
        let malformed = |reason: String| ParseError::MalformedHeader { reason };
        let rating_column =
            Regex::new(r"^rating(\d+)(?:_(points|desc))?$").map_err(|e| malformed(e.to_string()))?;

        let names: Vec<String> = header
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_ascii_lowercase())
            .collect();
        if names.iter().all(String::is_empty) {
            return Err(malformed("document has no header row".into()));
        }

        let mut seen = HashSet::new();
        let mut criterion = None;
        let mut description = None;
        let mut criterion_id = None;
        let mut groups: BTreeMap<u32, PartialGroup> = BTreeMap::new();
        let mut unexpected = Vec::new();

        for (idx, name) in names.iter().enumerate() {
            if !name.is_empty() && !seen.insert(name.as_str()) {
                return Err(malformed(format!("column '{name}' appears more than once")));
            }
            match name.as_str() {
                "criterion" => criterion = Some(idx),
                "criterion_desc" | "description" => {
                    if description.replace(idx).is_some() {
                        return Err(malformed("more than one description column".into()));
                    }
                }
                "criterion_id" => criterion_id = Some(idx),
                other => match rating_column.captures(other) {
                    Some(caps) => {
                        let level: u32 = caps[1]
                            .parse()
                            .map_err(|_| malformed(format!("rating level in '{other}' is too large")))?;
                        let group = groups.entry(level).or_default();
                        match caps.get(2).map(|m| m.as_str()) {
                            None => group.label = Some(idx),
                            Some("points") => group.points = Some(idx),
                            Some(_) => group.desc = Some(idx),
                        }
                    }
                    None if other.is_empty() => unexpected.push("(blank)".to_string()),
                    None => unexpected.push(other.to_string()),
                },
            }
        }

        if !unexpected.is_empty() {
            return Err(malformed(format!(
                "unexpected column(s): {}",
                unexpected.join(", ")
            )));
        }
        let criterion = criterion.ok_or_else(|| malformed("missing 'criterion' column".into()))?;

        let mut rating_groups = Vec::with_capacity(groups.len());
        for (level, group) in groups {
            match (group.label, group.points) {
                (Some(label), Some(points)) => rating_groups.push(RatingColumns {
                    level,
                    label,
                    points,
                    desc: group.desc,
                }),
                _ => {
                    return Err(malformed(format!(
                        "rating level {level} needs both 'rating{level}' and 'rating{level}_points' columns"
                    )))
                }
            }
        }
        if rating_groups.is_empty() {
            return Err(malformed(
                "at least one rating column pair (rating1, rating1_points) is required".into(),
            ));
        }

        Ok(Self {
            criterion,
            description,
            criterion_id,
            groups: rating_groups,
        })
    }
}

/// Header row of an empty document with `levels` rating groups.
pub fn template_header(levels: usize) -> Vec<String> {
    header_columns(levels.max(1), false)
}

fn header_columns(levels: usize, with_ids: bool) -> Vec<String> {
    let mut columns = vec!["criterion".to_string(), "criterion_desc".to_string()];
    if with_ids {
        columns.push("criterion_id".to_string());
    }
    for n in 1..=levels {
        columns.push(format!("rating{n}"));
        columns.push(format!("rating{n}_points"));
        columns.push(format!("rating{n}_desc"));
    }
    columns
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Escape `&`, `<`, `>` and `"` in text cells so a decoding parser reads the
    /// text back unchanged. Pair with [`ParserOptions::decode_html_entities`].
    pub encode_html_entities: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            encode_html_entities: true,
        }
    }
}

impl From<ParserOptions> for RenderOptions {
    fn from(options: ParserOptions) -> Self {
        Self {
            encode_html_entities: options.decode_html_entities,
        }
    }
}

/// Renders with default options, readable by [`parse`].
pub fn render(model: &RubricModel) -> Result<String, RenderError> {
    render_with(model, RenderOptions::default())
}

/// Writes a model back into the document schema. Criteria with fewer ratings than
/// the widest one are padded with empty groups, which the parser skips.
pub fn render_with(model: &RubricModel, options: RenderOptions) -> Result<String, RenderError> {
    let text = |raw: &str| {
        if options.encode_html_entities {
            html_escape::encode_double_quoted_attribute(raw).into_owned()
        } else {
            raw.to_string()
        }
    };
    let levels = model.max_ratings().max(1);
    let with_ids = model.criteria().iter().any(|c| c.remote_id.is_some());

    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(header_columns(levels, with_ids))?;

    for criterion in model.criteria() {
        let mut row = vec![text(&criterion.name), text(&criterion.description)];
        if with_ids {
            row.push(criterion.remote_id.clone().unwrap_or_default());
        }
        for n in 0..levels {
            match criterion.ratings.get(n) {
                Some(rating) => {
                    row.push(text(&rating.label));
                    row.push(rating.points.to_string());
                    row.push(text(&rating.long_description));
                }
                None => row.extend([String::new(), String::new(), String::new()]),
            }
        }
        writer.write_record(&row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| RenderError::Finish(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| RenderError::Finish(e.to_string()))
}
