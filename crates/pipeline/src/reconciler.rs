//! Keeps a character's visual archive consistent with its persisted record.
//!
//! Every mutation is computed on a copy of the [`Archive`], persisted
//! through the [`CharacterStore`], and only then adopted. A failed write
//! therefore leaves the in-memory archive exactly as it was.
//!
//! Removing the primary portrait takes two steps: [`ArchiveReconciler::remove`]
//! hands out a [`RemovalToken`], and [`ArchiveReconciler::confirm_remove`]
//! performs the removal.

use std::collections::HashMap;
use std::sync::Arc;

use ocforge_backend::messages::CharacterPatch;
use ocforge_core::archive::{
    Archive, ArchiveError, PrimaryChange, PrimaryMemo, RemovalPlan, RemovalToken,
};
use ocforge_core::archive_payload::{build_payload, normalize_payload};
use ocforge_core::media::{ManagedImageId, MediaEntry};
use ocforge_core::types::CharacterId;

use crate::error::ReconcileError;
use crate::ports::CharacterStore;

/// Result of [`ArchiveReconciler::remove`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed(MediaEntry),
    /// The entry is the primary portrait; confirm with the token.
    ConfirmationRequired(RemovalToken),
}

pub struct ArchiveReconciler<S: CharacterStore> {
    store: Arc<S>,
    character_id: CharacterId,
    archive: Archive,
    pending_removals: HashMap<RemovalToken, String>,
    memo: PrimaryMemo,
}

impl<S: CharacterStore> ArchiveReconciler<S> {
    /// Wrap an archive that is already known to match the store.
    pub fn new(store: Arc<S>, character_id: CharacterId, archive: Archive) -> Self {
        Self {
            store,
            character_id,
            archive,
            pending_removals: HashMap::new(),
            memo: PrimaryMemo::new(),
        }
    }

    /// Load the character's archive from the store.
    ///
    /// The stored payload is normalized and the primary re-resolved. When
    /// the effective primary differs from the stored one it is written back.
    pub async fn load(
        store: Arc<S>,
        character_id: CharacterId,
        capacity: usize,
    ) -> Result<Self, ReconcileError> {
        let visuals = store.load(character_id).await?;
        let entries = visuals
            .archive_payload
            .as_ref()
            .map(normalize_payload)
            .unwrap_or_default();
        let stored_primary = visuals
            .primary_portrait_ref
            .as_deref()
            .and_then(ManagedImageId::extract);

        let archive = Archive::from_parts(entries, capacity, stored_primary.clone());
        let mut reconciler = Self::new(store, character_id, archive);
        let effective = reconciler.effective_primary();

        if effective != stored_primary {
            tracing::info!(
                %character_id,
                stored = ?stored_primary.as_ref().map(ManagedImageId::as_str),
                effective = ?effective.as_ref().map(ManagedImageId::as_str),
                "Correcting stored primary portrait",
            );
            let patch = CharacterPatch::default().with_primary(effective.map(String::from));
            if let Err(e) = reconciler.store.update(character_id, &patch).await {
                tracing::warn!(%character_id, error = %e, "Failed to persist corrected primary portrait");
            }
        }

        tracing::debug!(
            %character_id,
            entries = reconciler.archive.len(),
            "Visual archive loaded",
        );
        Ok(reconciler)
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn character_id(&self) -> CharacterId {
        self.character_id
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The primary portrait, recomputed only when the archive changed.
    pub fn effective_primary(&mut self) -> Option<ManagedImageId> {
        self.memo
            .effective(self.archive.entries(), self.archive.primary())
    }

    pub fn primary_recomputations(&self) -> usize {
        self.memo.recomputations()
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    pub async fn add(&mut self, entry: MediaEntry) -> Result<(), ReconcileError> {
        let mut next = self.archive.clone();
        next.add(entry)?;
        self.commit(next).await
    }

    /// Remove an entry, or ask for confirmation if it is the primary.
    pub async fn remove(&mut self, entry_id: &str) -> Result<RemoveOutcome, ReconcileError> {
        match self.archive.plan_removal(entry_id)? {
            RemovalPlan::Immediate => {
                let mut next = self.archive.clone();
                let removed = next.remove(entry_id)?;
                self.commit(next).await?;
                Ok(RemoveOutcome::Removed(removed))
            }
            RemovalPlan::RequiresConfirmation => {
                let token = RemovalToken::new();
                self.pending_removals.insert(token, entry_id.to_string());
                tracing::debug!(entry_id, %token, "Primary removal awaiting confirmation");
                Ok(RemoveOutcome::ConfirmationRequired(token))
            }
        }
    }

    /// Perform a removal previously answered with a token.
    ///
    /// The token survives a persistence failure so the caller can retry.
    pub async fn confirm_remove(&mut self, token: RemovalToken) -> Result<MediaEntry, ReconcileError> {
        let entry_id = self
            .pending_removals
            .get(&token)
            .cloned()
            .ok_or(ArchiveError::UnknownRemovalToken(token))?;

        let mut next = self.archive.clone();
        let removed = match next.remove(&entry_id) {
            Ok(removed) => removed,
            Err(e) => {
                self.pending_removals.remove(&token);
                return Err(e.into());
            }
        };
        self.commit(next).await?;
        self.pending_removals.remove(&token);
        Ok(removed)
    }

    /// Drop a pending removal.
    pub fn cancel_remove(&mut self, token: RemovalToken) -> Result<(), ReconcileError> {
        match self.pending_removals.remove(&token) {
            Some(_) => Ok(()),
            None => Err(ArchiveError::UnknownRemovalToken(token).into()),
        }
    }

    pub async fn reorder(&mut self, order: &[String]) -> Result<(), ReconcileError> {
        let mut next = self.archive.clone();
        next.reorder(order)?;
        self.commit(next).await
    }

    /// Designate a new primary portrait.
    ///
    /// An ineligible image is not an error: it is logged and reported as
    /// [`PrimaryChange::Rejected`] with nothing persisted.
    pub async fn set_primary(&mut self, image: &ManagedImageId) -> Result<PrimaryChange, ReconcileError> {
        let mut next = self.archive.clone();
        let change = next.set_primary(image);
        match &change {
            PrimaryChange::Rejected(violation) => {
                tracing::warn!(
                    character_id = %self.character_id,
                    %violation,
                    "Ignoring primary portrait change",
                );
            }
            PrimaryChange::Unchanged => {}
            PrimaryChange::Changed { .. } => self.commit(next).await?,
        }
        Ok(change)
    }

    /// Persist the difference between the current archive and `next`, then
    /// adopt `next`.
    async fn commit(&mut self, next: Archive) -> Result<(), ReconcileError> {
        let mut patch = CharacterPatch::default();
        if next.entries() != self.archive.entries() {
            patch = patch.with_archive(build_payload(next.entries()));
        }
        if next.primary() != self.archive.primary() {
            patch = patch.with_primary(next.primary().map(|p| p.as_str().to_string()));
        }

        if !patch.is_empty() {
            self.store.update(self.character_id, &patch).await?;
        }
        self.archive = next;
        Ok(())
    }
}
