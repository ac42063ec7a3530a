//! Request and response types for the generation backend.
//!
//! Backend responses come in a few shapes: bare objects, a
//! `{code, message, data}` envelope and a `{success, error, data}`
//! envelope. [`unwrap_envelope`] peels either envelope off and turns a
//! non-zero `code` or `success: false` into [`MessageError::Rejected`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ocforge_core::generation::GenerationResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The backend answered but refused the request.
    #[error("Request rejected by backend: {0}")]
    Rejected(String),

    /// The response was valid JSON but not the expected shape.
    #[error("Malformed backend response: {0}")]
    Malformed(String),

    #[error("Invalid JSON in backend response: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// Strip a `{code, data}` or `{success, data}` envelope.
///
/// Objects without an envelope are returned unchanged.
pub fn unwrap_envelope(value: Value) -> Result<Value, MessageError> {
    let Value::Object(mut map) = value else {
        return Ok(value);
    };

    let rejected = match (map.get("code"), map.get("success")) {
        (Some(code), _) if code.as_i64().is_some_and(|c| c != 0) => true,
        (_, Some(Value::Bool(false))) => true,
        _ => false,
    };
    if rejected {
        let message = ["error", "message"]
            .iter()
            .filter_map(|key| map.get(*key).and_then(Value::as_str))
            .find(|m| !m.trim().is_empty())
            .unwrap_or("request rejected")
            .to_string();
        return Err(MessageError::Rejected(message));
    }

    let enveloped = map.contains_key("code") || map.contains_key("success");
    if enveloped {
        if let Some(data) = map.remove("data") {
            return Ok(data);
        }
    }
    Ok(Value::Object(map))
}

// ---------------------------------------------------------------------------
// Job creation
// ---------------------------------------------------------------------------

/// `POST /api/oc-maker/characters/generate-avatar`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvatarJobRequest {
    pub character_uuid: String,
    pub reference_image_urls: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub character_data: BTreeMap<String, String>,
}

/// `POST /api/oc-maker/characters/generate-image`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortraitJobRequest {
    pub character_uuid: String,
    pub gen_type: String,
    pub character_data: BTreeMap<String, String>,
    pub aspect_ratio: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub art_style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_image_urls: Option<Vec<String>>,
}

/// `POST /api/oc-maker/characters/generate-background`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackgroundJobRequest {
    pub character_uuid: String,
    pub scene_description: String,
    pub aspect_ratio: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_image_urls: Option<Vec<String>>,
}

/// `POST /api/anime-generation/create-task`, used for design sheets and
/// event illustrations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskJobRequest {
    pub gen_type: String,
    pub prompt: String,
    pub model_uuid: String,
    pub batch_size: u32,
    pub aspect_ratio: String,
    pub image_resolution: String,
    pub character_uuids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_image_urls: Option<Vec<String>>,
    pub visibility_level: String,
}

/// A job-creation request for one of the backend's endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CreateJobRequest {
    Avatar(AvatarJobRequest),
    Portrait(PortraitJobRequest),
    Background(BackgroundJobRequest),
    Task(TaskJobRequest),
}

impl CreateJobRequest {
    /// Endpoint path relative to the backend base URL.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Avatar(_) => "/api/oc-maker/characters/generate-avatar",
            Self::Portrait(_) => "/api/oc-maker/characters/generate-image",
            Self::Background(_) => "/api/oc-maker/characters/generate-background",
            Self::Task(_) => "/api/anime-generation/create-task",
        }
    }

    /// Conditioning references carried by the request.
    pub fn reference_urls(&self) -> &[String] {
        match self {
            Self::Avatar(r) => &r.reference_image_urls,
            Self::Portrait(r) => r.reference_image_urls.as_deref().unwrap_or_default(),
            Self::Background(r) => r.reference_image_urls.as_deref().unwrap_or_default(),
            Self::Task(r) => r.reference_image_urls.as_deref().unwrap_or_default(),
        }
    }
}

/// Keys checked, in order, for the issued job id.
const JOB_ID_KEYS: &[&str] = &["generation_uuid", "uuid", "jobId", "job_id"];

/// Extract the job id from a job-creation response body.
pub fn parse_job_created(value: Value) -> Result<String, MessageError> {
    let body = unwrap_envelope(value)?;
    JOB_ID_KEYS
        .iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| MessageError::Malformed("response carries no job id".to_string()))
}

// ---------------------------------------------------------------------------
// Job status
// ---------------------------------------------------------------------------

/// Status string reported by `GET /api/generation/status/{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl RemoteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One result entry. Older backends send `image_uuid`/`image_url`/`image_index`;
/// some send `image_uuid` next to `reference`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultItem {
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub image_uuid: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default, alias = "image_index")]
    pub rank: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusReport {
    pub status: RemoteStatus,
    #[serde(default)]
    pub message: Option<String>,
    /// Failure reason; takes precedence over `message`.
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub results: Vec<ResultItem>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<ResultItem>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<ResultItem>>::deserialize(deserializer)?.unwrap_or_default())
}

impl StatusReport {
    /// First non-blank of `error_message` and `message`.
    pub fn failure_reason(&self) -> Option<&str> {
        [self.error_message.as_deref(), self.message.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|m| !m.is_empty())
    }

    /// Results with a usable reference, ranked by `rank` or list position.
    pub fn generation_results(&self) -> Vec<GenerationResult> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(index, item)| {
                let reference = [
                    item.reference.as_deref(),
                    item.image_uuid.as_deref(),
                    item.image_url.as_deref(),
                ]
                    .into_iter()
                    .flatten()
                    .map(str::trim)
                    .find(|r| !r.is_empty())?;
                let rank = item.rank.unwrap_or(index as u32);
                Some(GenerationResult::new(reference, rank))
            })
            .collect()
    }
}

pub fn parse_status(value: Value) -> Result<StatusReport, MessageError> {
    let body = unwrap_envelope(value)?;
    Ok(serde_json::from_value(body)?)
}

// ---------------------------------------------------------------------------
// Image resolution
// ---------------------------------------------------------------------------

/// Image size variant requested from the resolve endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ResolveSize {
    #[default]
    Auto,
    Desktop,
    Mobile,
}

impl ResolveSize {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
        }
    }
}

impl FromStr for ResolveSize {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "desktop" => Ok(Self::Desktop),
            "mobile" => Ok(Self::Mobile),
            other => Err(MessageError::Malformed(format!(
                "unknown image size variant '{other}'"
            ))),
        }
    }
}

/// Response of `GET /api/generation/image-resolve/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ImageResolution {
    #[serde(default, alias = "resolvedUrl")]
    pub resolved_url: Option<String>,
    #[serde(default, alias = "originalUrl")]
    pub original_url: Option<String>,
}

impl ImageResolution {
    /// The resolved URL, falling back to the original one.
    pub fn best_url(&self) -> Option<&str> {
        [self.resolved_url.as_deref(), self.original_url.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|u| !u.is_empty())
    }
}

pub fn parse_image_resolution(value: Value) -> Result<ImageResolution, MessageError> {
    let body = unwrap_envelope(value)?;
    Ok(serde_json::from_value(body)?)
}

// ---------------------------------------------------------------------------
// Failure reports
// ---------------------------------------------------------------------------

/// Body of `POST /api/generation/handle-failure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub generation_uuid: String,
    pub reason: String,
    pub error_type: String,
}

// ---------------------------------------------------------------------------
// Character record
// ---------------------------------------------------------------------------

/// The visual fields of a character record. Legacy field names are
/// accepted on read.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CharacterVisuals {
    #[serde(default, alias = "profile_generation_image_uuid")]
    pub primary_portrait_ref: Option<String>,
    #[serde(default, alias = "avatar_generation_image_uuid")]
    pub avatar_ref: Option<String>,
    #[serde(default, alias = "background_url")]
    pub background_ref: Option<String>,
    #[serde(default, alias = "gallery")]
    pub archive_payload: Option<Value>,
}

pub fn parse_character(value: Value) -> Result<CharacterVisuals, MessageError> {
    let body = unwrap_envelope(value)?;
    // Some deployments nest the record under `character`.
    let record = match body {
        Value::Object(mut map) if map.contains_key("character") => {
            map.remove("character").unwrap_or(Value::Null)
        }
        other => other,
    };
    Ok(serde_json::from_value(record)?)
}

/// Partial update of a character's visual fields. Only set fields are
/// sent; `primary_portrait_ref: Some(None)` clears the primary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CharacterPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_portrait_ref: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_payload: Option<Value>,
}

impl CharacterPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn with_primary(mut self, primary: Option<String>) -> Self {
        self.primary_portrait_ref = Some(primary);
        self
    }

    pub fn with_avatar(mut self, reference: impl Into<String>) -> Self {
        self.avatar_ref = Some(reference.into());
        self
    }

    pub fn with_background(mut self, reference: impl Into<String>) -> Self {
        self.background_ref = Some(reference.into());
        self
    }

    pub fn with_archive(mut self, payload: Value) -> Self {
        self.archive_payload = Some(payload);
        self
    }
}
