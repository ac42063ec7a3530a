//! The visual archive: an ordered, capacity-bounded list of media
//! entries plus the designated primary portrait.
//!
//! Two rules hold after every operation in this module:
//!
//! * the entry count never exceeds the capacity (adds are refused when
//!   the archive is full), and
//! * a non-null primary always names the managed image of an entry that
//!   is not a design sheet.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::media::{is_http_url, ManagedImageId, MediaEntry, MediaKind};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default number of entries a character archive can hold.
pub const DEFAULT_ARCHIVE_CAPACITY: usize = 10;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from archive mutations. A failed mutation leaves the archive
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArchiveError {
    /// The archive already holds `capacity` entries.
    #[error("Visual archive limit reached ({capacity} entries)")]
    CapacityReached { capacity: usize },

    #[error("Archive entry not found: {0}")]
    EntryNotFound(String),

    #[error("Archive already contains an entry with id {0}")]
    DuplicateEntry(String),

    #[error("New order is not a permutation of the archive entries")]
    NotAPermutation,

    #[error("Unknown or expired removal token: {0}")]
    UnknownRemovalToken(RemovalToken),
}

/// Why a primary assignment was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationReason {
    /// No entry resolves to the requested image.
    NotInArchive,
    /// The only matching entries are design sheets.
    DesignSheet,
}

/// A refused attempt to break the primary-portrait rule.
///
/// Never raised as an error; callers log it and carry on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    pub attempted: ManagedImageId,
    pub reason: ViolationReason,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            ViolationReason::NotInArchive => write!(
                f,
                "primary portrait {} does not match any archive entry",
                self.attempted
            ),
            ViolationReason::DesignSheet => write!(
                f,
                "primary portrait {} refers to a design sheet",
                self.attempted
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Result of [`Archive::set_primary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryChange {
    Changed { previous: Option<ManagedImageId> },
    Unchanged,
    Rejected(InvariantViolation),
}

/// How a removal request must proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalPlan {
    Immediate,
    /// The entry is the current primary; removal needs confirmation.
    RequiresConfirmation,
}

/// Opaque token handed out when removing the primary needs confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemovalToken(uuid::Uuid);

impl RemovalToken {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RemovalToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RemovalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Primary resolution
// ---------------------------------------------------------------------------

/// Pick the primary portrait for `entries`.
///
/// Keeps `current` when it still names an eligible entry, otherwise takes
/// the first eligible entry in archive order, otherwise `None`.
pub fn resolve_primary(
    entries: &[MediaEntry],
    current: Option<&ManagedImageId>,
) -> Option<ManagedImageId> {
    let mut eligible = entries
        .iter()
        .filter(|e| e.kind != MediaKind::DesignSheet)
        .filter_map(MediaEntry::managed_image_id);

    match current {
        Some(current) => {
            let mut first = None;
            for id in eligible {
                if &id == current {
                    return Some(id);
                }
                first.get_or_insert(id);
            }
            first
        }
        None => eligible.next(),
    }
}

// ---------------------------------------------------------------------------
// Archive
// ---------------------------------------------------------------------------

/// Ordered media entries with a capacity bound and a primary portrait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    entries: Vec<MediaEntry>,
    capacity: usize,
    primary: Option<ManagedImageId>,
}

impl Archive {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
            primary: None,
        }
    }

    /// Rebuild an archive from stored parts, re-establishing the primary
    /// rule. Stored archives over capacity are kept intact; they only
    /// refuse further adds.
    pub fn from_parts(
        entries: Vec<MediaEntry>,
        capacity: usize,
        stored_primary: Option<ManagedImageId>,
    ) -> Self {
        let primary = resolve_primary(&entries, stored_primary.as_ref());
        Self {
            entries,
            capacity,
            primary,
        }
    }

    pub fn entries(&self) -> &[MediaEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn primary(&self) -> Option<&ManagedImageId> {
        self.primary.as_ref()
    }

    pub fn get(&self, entry_id: &str) -> Option<&MediaEntry> {
        self.entries.iter().find(|e| e.id == entry_id)
    }

    pub fn contains(&self, entry_id: &str) -> bool {
        self.get(entry_id).is_some()
    }

    /// The eligible entry currently serving as primary portrait.
    pub fn primary_entry(&self) -> Option<&MediaEntry> {
        let primary = self.primary.as_ref()?;
        self.entries
            .iter()
            .find(|e| e.is_primary_eligible() && e.managed_image_id().as_ref() == Some(primary))
    }

    /// Append an entry. Refused when full or when the id is taken.
    ///
    /// An unset primary is re-resolved afterwards, so the first eligible
    /// entry of an empty archive becomes primary.
    pub fn add(&mut self, entry: MediaEntry) -> Result<(), ArchiveError> {
        if self.is_full() {
            return Err(ArchiveError::CapacityReached {
                capacity: self.capacity,
            });
        }
        if self.contains(&entry.id) {
            return Err(ArchiveError::DuplicateEntry(entry.id));
        }
        self.entries.push(entry);
        if self.primary.is_none() {
            self.primary = resolve_primary(&self.entries, None);
        }
        Ok(())
    }

    /// Decide whether removing `entry_id` needs confirmation.
    pub fn plan_removal(&self, entry_id: &str) -> Result<RemovalPlan, ArchiveError> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ArchiveError::EntryNotFound(entry_id.to_string()))?;
        let is_primary = self.primary.is_some()
            && entry.is_primary_eligible()
            && entry.managed_image_id() == self.primary;
        Ok(if is_primary {
            RemovalPlan::RequiresConfirmation
        } else {
            RemovalPlan::Immediate
        })
    }

    /// Remove an entry unconditionally and re-resolve the primary.
    ///
    /// Confirmation for primary removal is enforced one level up, by the
    /// reconciler that hands out [`RemovalToken`]s.
    pub fn remove(&mut self, entry_id: &str) -> Result<MediaEntry, ArchiveError> {
        let index = self
            .entries
            .iter()
            .position(|e| e.id == entry_id)
            .ok_or_else(|| ArchiveError::EntryNotFound(entry_id.to_string()))?;
        let removed = self.entries.remove(index);
        self.primary = resolve_primary(&self.entries, self.primary.as_ref());
        Ok(removed)
    }

    /// Reorder entries. `order` must list every entry id exactly once.
    pub fn reorder(&mut self, order: &[String]) -> Result<(), ArchiveError> {
        if order.len() != self.entries.len() {
            return Err(ArchiveError::NotAPermutation);
        }
        let mut seen = HashSet::with_capacity(order.len());
        if !order.iter().all(|id| seen.insert(id.as_str())) {
            return Err(ArchiveError::NotAPermutation);
        }

        let mut reordered = Vec::with_capacity(order.len());
        for id in order {
            let entry = self.get(id).ok_or(ArchiveError::NotAPermutation)?;
            reordered.push(entry.clone());
        }
        self.entries = reordered;
        Ok(())
    }

    /// Designate `image` as primary if it names an eligible entry.
    pub fn set_primary(&mut self, image: &ManagedImageId) -> PrimaryChange {
        let matching: Vec<&MediaEntry> = self
            .entries
            .iter()
            .filter(|e| e.managed_image_id().as_ref() == Some(image))
            .collect();

        if matching.is_empty() {
            return PrimaryChange::Rejected(InvariantViolation {
                attempted: image.clone(),
                reason: ViolationReason::NotInArchive,
            });
        }
        if matching.iter().all(|e| e.kind == MediaKind::DesignSheet) {
            return PrimaryChange::Rejected(InvariantViolation {
                attempted: image.clone(),
                reason: ViolationReason::DesignSheet,
            });
        }
        if self.primary.as_ref() == Some(image) {
            return PrimaryChange::Unchanged;
        }
        let previous = self.primary.replace(image.clone());
        PrimaryChange::Changed { previous }
    }

    /// Raw reference of the portrait that conditions avatar and design
    /// sheet jobs: the primary entry, else the first eligible entry.
    ///
    /// Returns the entry's `http(s)` URL when it has one, otherwise its
    /// managed-image identifier (which still needs resolving).
    pub fn portrait_reference(&self) -> Option<String> {
        let entry = self
            .primary_entry()
            .or_else(|| self.entries.iter().find(|e| e.is_primary_eligible()))?;
        if is_http_url(&entry.reference) {
            return Some(entry.reference.trim().to_string());
        }
        entry.managed_image_id().map(String::from)
    }
}

impl Default for Archive {
    fn default() -> Self {
        Self::new(DEFAULT_ARCHIVE_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Memoized effective primary
// ---------------------------------------------------------------------------

/// The inputs that determine the effective primary, as a plain value.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PrimaryInputs {
    candidates: Vec<(MediaKind, Option<ManagedImageId>)>,
    current: Option<ManagedImageId>,
}

impl PrimaryInputs {
    fn capture(entries: &[MediaEntry], current: Option<&ManagedImageId>) -> Self {
        Self {
            candidates: entries
                .iter()
                .map(|e| (e.kind, e.managed_image_id()))
                .collect(),
            current: current.cloned(),
        }
    }
}

/// Caches the effective primary and recomputes it only when the inputs
/// compare unequal to the previous call.
#[derive(Debug, Default)]
pub struct PrimaryMemo {
    last: Option<(PrimaryInputs, Option<ManagedImageId>)>,
    recomputations: usize,
}

impl PrimaryMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective primary for `entries` given the stored `current` primary.
    pub fn effective(
        &mut self,
        entries: &[MediaEntry],
        current: Option<&ManagedImageId>,
    ) -> Option<ManagedImageId> {
        let inputs = PrimaryInputs::capture(entries, current);
        if let Some((cached_inputs, cached)) = &self.last {
            if *cached_inputs == inputs {
                return cached.clone();
            }
        }
        let resolved = resolve_primary(entries, current);
        self.recomputations += 1;
        self.last = Some((inputs, resolved.clone()));
        resolved
    }

    /// How many times the primary was actually recomputed.
    pub fn recomputations(&self) -> usize {
        self.recomputations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const U1: &str = "11111111-1111-4111-8111-111111111111";
    const U2: &str = "22222222-2222-4222-8222-222222222222";
    const U3: &str = "33333333-3333-4333-8333-333333333333";

    fn id(raw: &str) -> ManagedImageId {
        ManagedImageId::parse(raw).unwrap()
    }

    fn generated(entry_id: &str, image: &str) -> MediaEntry {
        MediaEntry::new(entry_id, image, MediaKind::Generated)
    }

    fn full_archive() -> Archive {
        let mut archive = Archive::new(DEFAULT_ARCHIVE_CAPACITY);
        for i in 0..DEFAULT_ARCHIVE_CAPACITY {
            archive
                .add(MediaEntry::new(
                    format!("e{i}"),
                    format!("https://cdn.example.com/{i}.png"),
                    MediaKind::UserUploaded,
                ))
                .unwrap();
        }
        archive
    }

    // -- resolve_primary ------------------------------------------------------

    #[test]
    fn resolve_primary_skips_design_sheet() {
        let entries = vec![
            MediaEntry::new("b", U2, MediaKind::DesignSheet),
            generated("a", U1),
        ];
        assert_eq!(resolve_primary(&entries, None), Some(id(U1)));
    }

    #[test]
    fn resolve_primary_keeps_current_when_eligible() {
        let entries = vec![generated("a", U1), generated("b", U2)];
        assert_eq!(resolve_primary(&entries, Some(&id(U2))), Some(id(U2)));
    }

    #[test]
    fn resolve_primary_replaces_stale_current() {
        let entries = vec![generated("a", U1)];
        assert_eq!(resolve_primary(&entries, Some(&id(U3))), Some(id(U1)));
    }

    #[test]
    fn resolve_primary_replaces_current_pointing_at_design_sheet() {
        let entries = vec![
            MediaEntry::new("sheet", U2, MediaKind::DesignSheet),
            generated("a", U1),
        ];
        assert_eq!(resolve_primary(&entries, Some(&id(U2))), Some(id(U1)));
    }

    #[test]
    fn resolve_primary_none_without_managed_ids() {
        let entries = vec![MediaEntry::new(
            "a",
            "https://cdn.example.com/a.png",
            MediaKind::Generated,
        )];
        assert_eq!(resolve_primary(&entries, None), None);
        assert_eq!(resolve_primary(&[], Some(&id(U1))), None);
    }

    // -- add ------------------------------------------------------------------

    #[test]
    fn add_to_full_archive_is_rejected_and_unchanged() {
        let mut archive = full_archive();
        let before = archive.clone();
        let result = archive.add(generated("e11", U1));
        assert_eq!(
            result,
            Err(ArchiveError::CapacityReached {
                capacity: DEFAULT_ARCHIVE_CAPACITY
            })
        );
        assert_eq!(archive, before);
        assert_eq!(archive.len(), DEFAULT_ARCHIVE_CAPACITY);
    }

    #[test]
    fn add_duplicate_id_is_rejected() {
        let mut archive = Archive::default();
        archive.add(generated("a", U1)).unwrap();
        assert_eq!(
            archive.add(generated("a", U2)),
            Err(ArchiveError::DuplicateEntry("a".into()))
        );
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn first_eligible_add_becomes_primary() {
        let mut archive = Archive::default();
        archive
            .add(MediaEntry::new("sheet", U2, MediaKind::DesignSheet))
            .unwrap();
        assert_eq!(archive.primary(), None);
        archive.add(generated("a", U1)).unwrap();
        assert_eq!(archive.primary(), Some(&id(U1)));
        archive.add(generated("b", U3)).unwrap();
        assert_eq!(archive.primary(), Some(&id(U1)));
    }

    // -- remove ---------------------------------------------------------------

    #[test]
    fn removing_primary_requires_confirmation() {
        let mut archive = Archive::default();
        archive.add(generated("a", U1)).unwrap();
        archive.add(generated("b", U2)).unwrap();
        assert_eq!(archive.plan_removal("a"), Ok(RemovalPlan::RequiresConfirmation));
        assert_eq!(archive.plan_removal("b"), Ok(RemovalPlan::Immediate));
        assert_matches!(archive.plan_removal("zz"), Err(ArchiveError::EntryNotFound(_)));
    }

    #[test]
    fn remove_primary_promotes_next_eligible() {
        let mut archive = Archive::default();
        archive.add(generated("a", U1)).unwrap();
        archive
            .add(MediaEntry::new("sheet", U2, MediaKind::DesignSheet))
            .unwrap();
        archive.add(generated("c", U3)).unwrap();
        let removed = archive.remove("a").unwrap();
        assert_eq!(removed.id, "a");
        assert_eq!(archive.primary(), Some(&id(U3)));
    }

    #[test]
    fn remove_last_eligible_clears_primary() {
        let mut archive = Archive::default();
        archive.add(generated("a", U1)).unwrap();
        archive.remove("a").unwrap();
        assert_eq!(archive.primary(), None);
        assert!(archive.is_empty());
    }

    // -- reorder --------------------------------------------------------------

    #[test]
    fn reorder_accepts_permutation() {
        let mut archive = Archive::default();
        archive.add(generated("a", U1)).unwrap();
        archive.add(generated("b", U2)).unwrap();
        archive.reorder(&["b".into(), "a".into()]).unwrap();
        let ids: Vec<&str> = archive.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
        // Order carries no meaning for the primary.
        assert_eq!(archive.primary(), Some(&id(U1)));
    }

    #[test]
    fn reorder_rejects_non_permutations() {
        let mut archive = Archive::default();
        archive.add(generated("a", U1)).unwrap();
        archive.add(generated("b", U2)).unwrap();
        let before = archive.clone();
        assert_eq!(archive.reorder(&["a".into()]), Err(ArchiveError::NotAPermutation));
        assert_eq!(
            archive.reorder(&["a".into(), "a".into()]),
            Err(ArchiveError::NotAPermutation)
        );
        assert_eq!(
            archive.reorder(&["a".into(), "x".into()]),
            Err(ArchiveError::NotAPermutation)
        );
        assert_eq!(archive, before);
    }

    // -- set_primary ----------------------------------------------------------

    #[test]
    fn set_primary_changes_to_eligible_entry() {
        let mut archive = Archive::default();
        archive.add(generated("a", U1)).unwrap();
        archive.add(generated("b", U2)).unwrap();
        assert_eq!(
            archive.set_primary(&id(U2)),
            PrimaryChange::Changed {
                previous: Some(id(U1))
            }
        );
        assert_eq!(archive.set_primary(&id(U2)), PrimaryChange::Unchanged);
        assert_eq!(archive.primary(), Some(&id(U2)));
    }

    #[test]
    fn set_primary_rejects_design_sheet() {
        let mut archive = Archive::default();
        archive.add(generated("a", U1)).unwrap();
        archive
            .add(MediaEntry::new("sheet", U2, MediaKind::DesignSheet))
            .unwrap();
        assert_matches!(
            archive.set_primary(&id(U2)),
            PrimaryChange::Rejected(InvariantViolation {
                reason: ViolationReason::DesignSheet,
                ..
            })
        );
        assert_eq!(archive.primary(), Some(&id(U1)));
    }

    #[test]
    fn set_primary_rejects_unknown_image() {
        let mut archive = Archive::default();
        assert_matches!(
            archive.set_primary(&id(U3)),
            PrimaryChange::Rejected(InvariantViolation {
                reason: ViolationReason::NotInArchive,
                ..
            })
        );
        assert_eq!(archive.primary(), None);
    }

    // -- from_parts / portrait_reference ---------------------------------------

    #[test]
    fn from_parts_repairs_stale_primary() {
        let archive = Archive::from_parts(
            vec![
                MediaEntry::new("sheet", U2, MediaKind::DesignSheet),
                generated("a", U1),
            ],
            DEFAULT_ARCHIVE_CAPACITY,
            Some(id(U2)),
        );
        assert_eq!(archive.primary(), Some(&id(U1)));
    }

    #[test]
    fn portrait_reference_prefers_http_url_of_primary() {
        let entry = MediaEntry::new("a", "https://cdn.example.com/a.png", MediaKind::Generated)
            .with_pinned_id(&id(U1));
        let archive = Archive::from_parts(vec![entry], 10, Some(id(U1)));
        assert_eq!(
            archive.portrait_reference().as_deref(),
            Some("https://cdn.example.com/a.png")
        );
    }

    #[test]
    fn portrait_reference_falls_back_to_managed_id() {
        let archive = Archive::from_parts(vec![generated("a", U1)], 10, None);
        assert_eq!(archive.portrait_reference().as_deref(), Some(U1));
        assert_eq!(Archive::default().portrait_reference(), None);
    }

    // -- PrimaryMemo ----------------------------------------------------------

    #[test]
    fn memo_skips_recompute_for_equal_inputs() {
        let mut memo = PrimaryMemo::new();
        let entries = vec![generated("a", U1), generated("b", U2)];
        assert_eq!(memo.effective(&entries, None), Some(id(U1)));
        let cloned = entries.clone();
        assert_eq!(memo.effective(&cloned, None), Some(id(U1)));
        assert_eq!(memo.recomputations(), 1);
    }

    #[test]
    fn memo_recomputes_when_inputs_change() {
        let mut memo = PrimaryMemo::new();
        let mut entries = vec![generated("a", U1), generated("b", U2)];
        memo.effective(&entries, None);
        entries.remove(0);
        assert_eq!(memo.effective(&entries, None), Some(id(U2)));
        assert_eq!(memo.effective(&entries, Some(&id(U2))), Some(id(U2)));
        assert_eq!(memo.recomputations(), 3);
    }

    #[test]
    fn memo_ignores_label_changes() {
        let mut memo = PrimaryMemo::new();
        let entries = vec![generated("a", U1)];
        memo.effective(&entries, None);
        let relabeled = vec![generated("a", U1).with_label("Front view")];
        memo.effective(&relabeled, None);
        assert_eq!(memo.recomputations(), 1);
    }
}
