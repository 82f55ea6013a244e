/// `load_config` module: reads the static YAML config and injects the Canvas credential
/// from the environment.
///
/// The YAML file never holds secrets. The bearer token comes from `CANVAS_TOKEN`
/// (which `main` may have loaded from a `.env` file).
///
/// ```yaml
/// canvas:
///   base_url: https://canvas.example.edu
/// target:
///   course_id: 101
///   rubric_id: 7
/// retry:
///   max_attempts: 5
/// sync:
///   match_key: remote_id_then_name
///   sync_assignment_points: true
///   assignment_id: 55
/// ```
///
/// Every section is optional; missing keys fall back to the core defaults.
use anyhow::{anyhow, Context, Result};
use rubric_sync_core::config::SyncConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{error, info};

pub const TOKEN_ENV: &str = "CANVAS_TOKEN";

#[derive(Debug)]
pub struct CliConfig {
    pub sync: SyncConfig,
    pub target: TargetSection,
    pub credential: String,
}

/// Default course and rubric; command-line flags take precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TargetSection {
    #[serde(default, deserialize_with = "id_from_text_or_number")]
    pub course_id: Option<String>,
    #[serde(default, deserialize_with = "id_from_text_or_number")]
    pub rubric_id: Option<String>,
}

impl TargetSection {
    /// Resolves the ids to use, preferring explicit overrides.
    pub fn resolve(
        &self,
        course_id: Option<String>,
        rubric_id: Option<String>,
    ) -> Result<(String, String)> {
        let course_id = course_id
            .or_else(|| self.course_id.clone())
            .ok_or_else(|| anyhow!("no course id: pass --course-id or set target.course_id"))?;
        let rubric_id = rubric_id
            .or_else(|| self.rubric_id.clone())
            .ok_or_else(|| anyhow!("no rubric id: pass --rubric-id or set target.rubric_id"))?;
        Ok((course_id, rubric_id))
    }
}

fn id_from_text_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }
    Ok(Option::<Id>::deserialize(deserializer)?.map(|id| match id {
        Id::Text(text) => text,
        Id::Number(n) => n.to_string(),
    }))
}

/// Loads a static YAML config file and injects the credential from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    #[derive(Debug, Deserialize)]
    struct RawConfig {
        #[serde(default)]
        target: TargetSection,
        #[serde(flatten)]
        sync: SyncConfig,
    }

    // An empty file is a valid "all defaults" config.
    let raw: RawConfig = if config_content.trim().is_empty() {
        RawConfig {
            target: TargetSection::default(),
            sync: SyncConfig::default(),
        }
    } else {
        serde_yaml::from_str(&config_content).map_err(|e| {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            anyhow!("Failed to parse config YAML: {e}")
        })?
    };
    info!(config_path = ?path_ref, "Parsed config YAML successfully");
    raw.sync.trace_loaded();

    let credential = load_credential()?;

    Ok(CliConfig {
        sync: raw.sync,
        target: raw.target,
        credential,
    })
}

fn load_credential() -> Result<String> {
    let credential = std::env::var(TOKEN_ENV)
        .with_context(|| format!("{TOKEN_ENV} must be set to a Canvas API token"))?;
    if credential.trim().is_empty() {
        error!(env = TOKEN_ENV, "Canvas token is empty");
        return Err(anyhow!("{TOKEN_ENV} is set but empty"));
    }
    info!(env = TOKEN_ENV, credential_set = true, "Canvas token loaded from environment");
    Ok(credential)
}
