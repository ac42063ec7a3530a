//! Turns stored result references into displayable URLs.
//!
//! URLs pass through untouched; managed-image identifiers are looked up
//! through [`ImageLookup`] and cached; anything else resolves to `None`.

use std::collections::HashMap;
use std::sync::Arc;

use ocforge_backend::messages::ResolveSize;
use ocforge_core::media::{classify_reference, ImageReference, ManagedImageId};

use crate::ports::ImageLookup;

pub struct ResultResolver<L: ImageLookup> {
    lookup: Arc<L>,
    size: ResolveSize,
    /// Successful lookups only; failures are retried on the next call.
    cache: HashMap<ManagedImageId, String>,
}

impl<L: ImageLookup> ResultResolver<L> {
    pub fn new(lookup: Arc<L>) -> Self {
        Self::with_size(lookup, ResolveSize::default())
    }

    pub fn with_size(lookup: Arc<L>, size: ResolveSize) -> Self {
        Self {
            lookup,
            size,
            cache: HashMap::new(),
        }
    }

    pub fn size(&self) -> ResolveSize {
        self.size
    }

    /// Resolve `reference` to a URL, or `None` if it cannot be displayed.
    pub async fn resolve(&mut self, reference: &str) -> Option<String> {
        match classify_reference(reference) {
            ImageReference::Url(url) => Some(url.to_string()),
            ImageReference::Managed(id) => self.resolve_managed(&id).await,
            ImageReference::Unrecognized => {
                tracing::debug!(reference, "Reference is neither a URL nor a managed image id");
                None
            }
        }
    }

    /// Look up a managed image, using the cache when possible.
    pub async fn resolve_managed(&mut self, id: &ManagedImageId) -> Option<String> {
        if let Some(url) = self.cache.get(id) {
            return Some(url.clone());
        }

        match self.lookup.resolve_image(id, self.size).await {
            Ok(resolution) => match resolution.best_url() {
                Some(url) => {
                    let url = url.to_string();
                    self.cache.insert(id.clone(), url.clone());
                    Some(url)
                }
                None => {
                    tracing::warn!(image_id = %id, "Image lookup returned no URL");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(image_id = %id, error = %e, "Image lookup failed");
                None
            }
        }
    }

    pub fn cached(&self, id: &ManagedImageId) -> Option<&str> {
        self.cache.get(id).map(String::as_str)
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }
}
