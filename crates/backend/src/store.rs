//! REST client for the character record.
//!
//! Only the visual fields are read and written here; the rest of the
//! character record belongs to the profile service.

use ocforge_core::types::CharacterId;
use serde_json::Value;

use crate::api::{ensure_success, parse_response, BackendApiError};
use crate::messages::{parse_character, unwrap_envelope, CharacterPatch, CharacterVisuals};

/// HTTP client for `/api/oc-maker/characters/{id}`.
#[derive(Debug, Clone)]
pub struct CharacterApi {
    client: reqwest::Client,
    api_url: String,
}

impl CharacterApi {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    fn character_url(&self, character_id: CharacterId) -> String {
        format!("{}/api/oc-maker/characters/{}", self.api_url, character_id)
    }

    /// Load the character's visual fields.
    pub async fn fetch(&self, character_id: CharacterId) -> Result<CharacterVisuals, BackendApiError> {
        let response = self.client.get(self.character_url(character_id)).send().await?;
        let body: Value = parse_response(response).await?;
        Ok(parse_character(body)?)
    }

    /// Apply a partial update. Empty patches are not sent.
    pub async fn update(
        &self,
        character_id: CharacterId,
        patch: &CharacterPatch,
    ) -> Result<(), BackendApiError> {
        if patch.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(self.character_url(character_id))
            .json(patch)
            .send()
            .await?;

        // An empty 2xx body is a success; an envelope may still refuse.
        let text = ensure_success(response).await?.text().await?;
        if text.trim().is_empty() {
            return Ok(());
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(body) => {
                unwrap_envelope(body)?;
                Ok(())
            }
            Err(_) => {
                tracing::debug!(%character_id, "Character update returned a non-JSON body");
                Ok(())
            }
        }
    }
}
