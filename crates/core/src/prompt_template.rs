//! Prompt templates for design sheets and event illustrations.
//!
//! Templates contain `{placeholder}` tokens filled from the character's
//! visual profile and the request context. A placeholder without a
//! non-blank value is reported as missing instead of being silently
//! dropped, so callers can refuse to submit half-filled prompts.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Regex pattern matching `{placeholder}` tokens in prompt templates.
pub const PLACEHOLDER_PATTERN: &str = r"\{([a-zA-Z_][a-zA-Z0-9_]*)\}";

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PLACEHOLDER_PATTERN).expect("valid regex"));

/// Template value key holding the flattened visual profile.
pub const CHARACTER_INFO_KEY: &str = "character_info";

/// Template value key for the output language.
pub const LOCALE_KEY: &str = "locale";

/// Locale used when the request does not name one.
pub const DEFAULT_LOCALE: &str = "en";

/// Default design sheet template.
pub const DEFAULT_DESIGN_SHEET_TEMPLATE: &str = "Character design reference sheet drawn from the reference portrait. \
{character_info}. Front, side and back full-body turnaround, expression studies, outfit and accessory \
callouts, clean light background, annotations written in {locale}.";

/// Default event illustration template.
pub const DEFAULT_EVENT_TEMPLATE: &str = "Story illustration for the event \"{event_title}\": {event_content}. \
Featured character: {character_info}. Cinematic composition, captions in {locale}.";

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Result of resolving a prompt template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPrompt {
    pub text: String,
    /// Sorted, de-duplicated names of placeholders that had no value.
    pub unresolved_placeholders: Vec<String>,
}

impl ResolvedPrompt {
    pub fn is_complete(&self) -> bool {
        self.unresolved_placeholders.is_empty()
    }
}

/// Resolve `{placeholder}` tokens using `values`.
///
/// Values are trimmed. Missing or blank values leave the token in place
/// and are listed in `unresolved_placeholders`.
pub fn resolve_prompt_template(template: &str, values: &HashMap<String, String>) -> ResolvedPrompt {
    let mut unresolved = Vec::new();
    let text = PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            match values.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
                Some(value) => value.to_string(),
                None => {
                    unresolved.push(key.to_string());
                    caps[0].to_string()
                }
            }
        })
        .trim()
        .to_string();
    unresolved.sort();
    unresolved.dedup();
    ResolvedPrompt {
        text,
        unresolved_placeholders: unresolved,
    }
}

/// All placeholder names in `template`, sorted and de-duplicated.
pub fn extract_placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = PLACEHOLDER_RE
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Flatten a visual profile into `key: value` pairs for prompts.
///
/// Keys are sorted so the same profile always yields the same text.
/// Blank values are skipped; an empty profile yields `None`.
pub fn character_info(profile: &HashMap<String, String>) -> Option<String> {
    let mut pairs: Vec<(&String, &str)> = profile
        .iter()
        .map(|(k, v)| (k, v.trim()))
        .filter(|(_, v)| !v.is_empty())
        .collect();
    if pairs.is_empty() {
        return None;
    }
    pairs.sort();
    Some(
        pairs
            .into_iter()
            .map(|(k, v)| format!("{}: {v}", k.replace('_', " ")))
            .collect::<Vec<_>>()
            .join(", "),
    )
}
