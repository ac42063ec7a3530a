//! Serialized form of the visual archive.
//!
//! The character record stores the archive as a JSON object keyed by
//! entry id. Older records used several other shapes (plain arrays, bare
//! URL strings, `[key, value]` pairs, `url`/`image_url`/`value` reference
//! fields and legacy kind names); [`normalize_payload`] accepts all of
//! them and [`build_payload`] always writes the current shape.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::media::{ManagedImageId, MediaEntry, MediaKind, PINNED_ID_KEY};

/// Key under which legacy payloads stored the design sheet; its `value`
/// field holds the sheet's managed-image identifier.
pub const LEGACY_DESIGN_SHEET_KEY: &str = "breakdown_sheet";

/// Fields checked, in order, for an entry's reference.
const REFERENCE_FIELDS: &[&str] = &["reference", "url", "image_url", "value"];

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct StoredEntry<'a> {
    id: &'a str,
    reference: &'a str,
    kind: MediaKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<&'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    metadata: &'a BTreeMap<String, String>,
    position: usize,
}

/// Serialize entries into the keyed payload stored on the character.
///
/// JSON object keys carry no order, so each entry records its `position`.
pub fn build_payload(entries: &[MediaEntry]) -> Value {
    let mut map = Map::with_capacity(entries.len());
    for (position, entry) in entries.iter().enumerate() {
        let stored = StoredEntry {
            id: &entry.id,
            reference: &entry.reference,
            kind: entry.kind,
            label: entry.label.as_deref(),
            metadata: &entry.metadata,
            position,
        };
        // Serializing a struct of strings into a Value cannot fail.
        let value = serde_json::to_value(&stored).unwrap_or(Value::Null);
        map.insert(entry.id.clone(), value);
    }
    Value::Object(map)
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

struct Candidate {
    entry: MediaEntry,
    position: Option<u64>,
    index: usize,
}

/// Parse any stored archive shape into an ordered entry list.
///
/// Entries without a usable reference are dropped. Ordering follows each
/// entry's `position`; entries without one keep their stored order after
/// the positioned ones.
pub fn normalize_payload(payload: &Value) -> Vec<MediaEntry> {
    let mut candidates = Vec::new();

    match payload {
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                let fallback_id = format!("gallery-{index}");
                if let Some(candidate) = normalize_item(&fallback_id, item, index) {
                    candidates.push(candidate);
                }
            }
        }
        Value::Object(map) => {
            for (index, (key, item)) in map.iter().enumerate() {
                if let Some(candidate) = normalize_item(key, item, index) {
                    candidates.push(candidate);
                }
            }
        }
        Value::String(text) => {
            // Some records double-encoded the payload.
            return match serde_json::from_str::<Value>(text) {
                Ok(inner @ (Value::Array(_) | Value::Object(_))) => normalize_payload(&inner),
                _ => Vec::new(),
            };
        }
        _ => {}
    }

    candidates.sort_by_key(|c| (c.position.is_none(), c.position, c.index));

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .map(|c| {
            let mut entry = c.entry;
            if !seen.insert(entry.id.clone()) {
                entry.id = format!("{}-{}", entry.id, c.index);
                seen.insert(entry.id.clone());
            }
            entry
        })
        .collect()
}

fn normalize_item(key: &str, item: &Value, index: usize) -> Option<Candidate> {
    match item {
        Value::String(reference) => {
            let reference = reference.trim();
            if reference.is_empty() {
                return None;
            }
            let kind = default_kind(key);
            let mut entry = MediaEntry::new(key, reference, kind);
            pin_legacy_sheet(&mut entry, key, Some(reference));
            Some(Candidate {
                entry,
                position: None,
                index,
            })
        }
        // `[key, value]` pairs produced by serializing map entries.
        Value::Array(pair) if pair.len() == 2 => {
            let inner_key = pair[0].as_str().unwrap_or(key);
            normalize_item(inner_key, &pair[1], index)
        }
        Value::Object(fields) => normalize_object(key, fields, index),
        _ => None,
    }
}

fn normalize_object(key: &str, fields: &Map<String, Value>, index: usize) -> Option<Candidate> {
    let reference = REFERENCE_FIELDS
        .iter()
        .filter_map(|field| fields.get(*field).and_then(Value::as_str))
        .map(str::trim)
        .find(|r| !r.is_empty())?;

    let id = fields
        .get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(key);

    let kind = ["kind", "type"]
        .iter()
        .filter_map(|field| fields.get(*field).and_then(Value::as_str))
        .find_map(MediaKind::from_stored)
        .unwrap_or_else(|| default_kind(key));

    let mut entry = MediaEntry::new(id, reference, kind);
    entry.label = fields
        .get("label")
        .and_then(Value::as_str)
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string);

    if let Some(Value::Object(meta)) = fields.get("metadata").or_else(|| fields.get("meta")) {
        for (meta_key, meta_value) in meta {
            let text = match meta_value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            entry.metadata.insert(meta_key.clone(), text);
        }
    }

    if let Some(pinned) = fields
        .get(PINNED_ID_KEY)
        .and_then(Value::as_str)
        .and_then(ManagedImageId::parse)
    {
        entry
            .metadata
            .entry(PINNED_ID_KEY.to_string())
            .or_insert_with(|| pinned.to_string());
    }

    pin_legacy_sheet(&mut entry, key, fields.get("value").and_then(Value::as_str));

    Some(Candidate {
        entry,
        position: fields.get("position").and_then(Value::as_u64),
        index,
    })
}

fn default_kind(key: &str) -> MediaKind {
    if key == LEGACY_DESIGN_SHEET_KEY {
        MediaKind::DesignSheet
    } else {
        MediaKind::Generated
    }
}

/// The legacy design sheet slot kept its managed id in `value`.
fn pin_legacy_sheet(entry: &mut MediaEntry, key: &str, value: Option<&str>) {
    if key != LEGACY_DESIGN_SHEET_KEY || entry.metadata.contains_key(PINNED_ID_KEY) {
        return;
    }
    if let Some(id) = value.and_then(ManagedImageId::parse) {
        entry.metadata.insert(PINNED_ID_KEY.to_string(), id.to_string());
    }
}
