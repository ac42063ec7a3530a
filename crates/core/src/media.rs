//! Image references and visual archive entries.
//!
//! A stored image reference is either an absolute URL that can be shown
//! as-is or an opaque managed-image identifier (a hyphenated UUID) that
//! must be looked up before display. [`classify_reference`] tells the two
//! apart; [`MediaEntry`] is one slot of a character's visual archive.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Pattern for a complete managed-image identifier (case-insensitive UUID).
pub const MANAGED_ID_PATTERN: &str =
    r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$";

/// Same shape as [`MANAGED_ID_PATTERN`] but unanchored, for ids embedded
/// in storage keys or legacy paths.
const EMBEDDED_ID_PATTERN: &str =
    r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}";

static MANAGED_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(MANAGED_ID_PATTERN).expect("valid regex"));

static EMBEDDED_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(EMBEDDED_ID_PATTERN).expect("valid regex"));

/// URL prefixes that are displayable without a lookup.
pub const DISPLAYABLE_SCHEMES: &[&str] = &["http://", "https://", "data:", "blob:"];

/// Metadata key that pins an entry's canonical managed-image identifier.
pub const PINNED_ID_KEY: &str = "image_uuid";

// ---------------------------------------------------------------------------
// ManagedImageId
// ---------------------------------------------------------------------------

/// Backend-issued identifier of a stored image.
///
/// Always held in lowercase so that identifiers coming from different
/// sources compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ManagedImageId(String);

impl ManagedImageId {
    /// Parse a string that is exactly a managed-image identifier
    /// (surrounding whitespace is ignored).
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        MANAGED_ID_RE
            .is_match(trimmed)
            .then(|| Self(trimmed.to_ascii_lowercase()))
    }

    /// Find the first managed-image identifier embedded anywhere in `raw`,
    /// e.g. inside a storage key such as `images/<uuid>.png`.
    pub fn extract(raw: &str) -> Option<Self> {
        EMBEDDED_ID_RE
            .find(raw)
            .map(|m| Self(m.as_str().to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ManagedImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ManagedImageId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| {
            CoreError::Validation(format!("'{value}' is not a managed image identifier"))
        })
    }
}

impl From<ManagedImageId> for String {
    fn from(id: ManagedImageId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// Reference classification
// ---------------------------------------------------------------------------

/// What a raw stored reference turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference<'a> {
    /// Absolute URL (`http`, `https`, `data` or `blob`), usable unchanged.
    Url(&'a str),
    /// Managed-image identifier that needs a lookup.
    Managed(ManagedImageId),
    /// Anything else: relative paths, storage keys, empty strings.
    Unrecognized,
}

/// Classify a raw reference. Scheme matching is case-insensitive.
pub fn classify_reference(reference: &str) -> ImageReference<'_> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return ImageReference::Unrecognized;
    }
    if has_displayable_scheme(trimmed) {
        return ImageReference::Url(trimmed);
    }
    match ManagedImageId::parse(trimmed) {
        Some(id) => ImageReference::Managed(id),
        None => ImageReference::Unrecognized,
    }
}

fn has_displayable_scheme(reference: &str) -> bool {
    DISPLAYABLE_SCHEMES.iter().any(|scheme| {
        reference
            .get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}

/// Whether `reference` is an absolute `http`/`https` URL. Backends only
/// accept these as conditioning references.
pub fn is_http_url(reference: &str) -> bool {
    let trimmed = reference.trim();
    ["http://", "https://"].iter().any(|scheme| {
        trimmed
            .get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}

// ---------------------------------------------------------------------------
// MediaKind
// ---------------------------------------------------------------------------

/// Origin of an archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Generated,
    UserUploaded,
    DesignSheet,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::UserUploaded => "user_uploaded",
            Self::DesignSheet => "design_sheet",
        }
    }

    /// Parse a stored kind, accepting the aliases older payloads used.
    pub fn from_stored(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "generated" | "generation" | "portrait" | "artwork" => Some(Self::Generated),
            "user_uploaded" | "user_upload" | "upload" | "uploaded" => Some(Self::UserUploaded),
            "design_sheet" | "breakdown_sheet" => Some(Self::DesignSheet),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// MediaEntry
// ---------------------------------------------------------------------------

/// One image in a character's visual archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaEntry {
    /// Unique within the archive.
    pub id: String,
    /// Managed-image identifier or absolute URL.
    pub reference: String,
    pub kind: MediaKind,
    pub label: Option<String>,
    /// Free-form metadata. [`PINNED_ID_KEY`] pins the canonical managed id
    /// when `reference` is a URL.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl MediaEntry {
    pub fn new(id: impl Into<String>, reference: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            reference: reference.into(),
            kind,
            label: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Pin the canonical managed-image identifier in metadata.
    pub fn with_pinned_id(mut self, id: &ManagedImageId) -> Self {
        self.metadata
            .insert(PINNED_ID_KEY.to_string(), id.as_str().to_string());
        self
    }

    /// The entry's managed-image identifier: the pinned one if valid,
    /// otherwise the reference itself if it is one.
    pub fn managed_image_id(&self) -> Option<ManagedImageId> {
        self.metadata
            .get(PINNED_ID_KEY)
            .and_then(|pinned| ManagedImageId::parse(pinned))
            .or_else(|| ManagedImageId::parse(&self.reference))
    }

    /// Whether this entry may serve as the primary portrait.
    pub fn is_primary_eligible(&self) -> bool {
        self.kind != MediaKind::DesignSheet && self.managed_image_id().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const U1: &str = "3f2b8c1e-9a4d-4e7f-b6a1-0c5d2e8f9a10";

    #[test]
    fn parse_accepts_uuid_case_insensitively() {
        let id = ManagedImageId::parse(&U1.to_uppercase()).unwrap();
        assert_eq!(id.as_str(), U1);
    }

    #[test]
    fn parse_rejects_non_uuid() {
        assert!(ManagedImageId::parse("not-a-uuid").is_none());
        assert!(ManagedImageId::parse(&format!("{U1}.png")).is_none());
        assert!(ManagedImageId::parse("").is_none());
    }

    #[test]
    fn extract_finds_embedded_id() {
        let id = ManagedImageId::extract(&format!("characters/portraits/{U1}.webp")).unwrap();
        assert_eq!(id.as_str(), U1);
        assert!(ManagedImageId::extract("characters/portraits/cover.webp").is_none());
    }

    #[test]
    fn classify_urls() {
        assert_eq!(
            classify_reference("https://cdn.example.com/a.png"),
            ImageReference::Url("https://cdn.example.com/a.png")
        );
        assert_matches!(classify_reference("HTTP://cdn.example.com/a.png"), ImageReference::Url(_));
        assert_matches!(classify_reference("data:image/png;base64,AAAA"), ImageReference::Url(_));
        assert_matches!(classify_reference("blob:https://app/123"), ImageReference::Url(_));
    }

    #[test]
    fn classify_managed_id() {
        assert_matches!(
            classify_reference(U1),
            ImageReference::Managed(id) if id.as_str() == U1
        );
    }

    #[test]
    fn classify_unrecognized() {
        assert_eq!(classify_reference("/uploads/a.png"), ImageReference::Unrecognized);
        assert_eq!(classify_reference("   "), ImageReference::Unrecognized);
        assert_eq!(classify_reference("ftp://host/a.png"), ImageReference::Unrecognized);
    }

    #[test]
    fn http_url_check_excludes_data_urls() {
        assert!(is_http_url("https://cdn.example.com/a.png"));
        assert!(!is_http_url("data:image/png;base64,AAAA"));
        assert!(!is_http_url(U1));
    }

    #[test]
    fn kind_accepts_legacy_aliases() {
        assert_eq!(MediaKind::from_stored("portrait"), Some(MediaKind::Generated));
        assert_eq!(MediaKind::from_stored("artwork"), Some(MediaKind::Generated));
        assert_eq!(MediaKind::from_stored("upload"), Some(MediaKind::UserUploaded));
        assert_eq!(MediaKind::from_stored("Design_Sheet"), Some(MediaKind::DesignSheet));
        assert_eq!(MediaKind::from_stored("sticker"), None);
    }

    #[test]
    fn pinned_id_wins_over_reference() {
        let pinned = ManagedImageId::parse(U1).unwrap();
        let entry = MediaEntry::new("e1", "https://cdn.example.com/a.png", MediaKind::Generated)
            .with_pinned_id(&pinned);
        assert_eq!(entry.managed_image_id(), Some(pinned));
        assert!(entry.is_primary_eligible());
    }

    #[test]
    fn url_entry_without_pin_is_not_eligible() {
        let entry = MediaEntry::new("e1", "https://cdn.example.com/a.png", MediaKind::Generated);
        assert!(entry.managed_image_id().is_none());
        assert!(!entry.is_primary_eligible());
    }

    #[test]
    fn design_sheet_is_never_eligible() {
        let entry = MediaEntry::new("e1", U1, MediaKind::DesignSheet);
        assert!(entry.managed_image_id().is_some());
        assert!(!entry.is_primary_eligible());
    }

    #[test]
    fn managed_id_serde_rejects_garbage() {
        let ok: ManagedImageId = serde_json::from_str(&format!("\"{U1}\"")).unwrap();
        assert_eq!(ok.as_str(), U1);
        assert!(serde_json::from_str::<ManagedImageId>("\"nope\"").is_err());
    }
}
