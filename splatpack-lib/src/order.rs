//! Depth-order resolution.
//!
//! An external sort writes, once per frame, the identities of the splats to
//! draw in back-to-front order. Decoding walks render slots sequentially and
//! resolves each one through this buffer, so attribute storage is never
//! reordered.

use crate::error::SplatError;

/// Texel coordinates of a splat in every per-splat texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageLocation {
    pub row: u32,
    pub col: u32,
}

impl StorageLocation {
    #[inline]
    pub const fn of(identity: u32, row_width: u32) -> Self {
        Self {
            row: identity / row_width,
            col: identity % row_width,
        }
    }
}

/// Render-slot to splat-identity mapping for one frame.
///
/// Entries past `active_count` are stale tail of an over-allocated buffer and
/// are never resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderBuffer {
    entries: Vec<u32>,
    active_count: usize,
}

impl OrderBuffer {
    pub fn new(entries: Vec<u32>, active_count: usize) -> Result<Self, SplatError> {
        if active_count > entries.len() {
            return Err(SplatError::InvalidOrderBuffer(format!(
                "{} active slots in a buffer of {}",
                active_count,
                entries.len()
            )));
        }
        Ok(Self {
            entries,
            active_count,
        })
    }

    /// Buffer whose every entry is active.
    pub fn from_identities(entries: Vec<u32>) -> Self {
        let active_count = entries.len();
        Self {
            entries,
            active_count,
        }
    }

    /// Replaces this frame's order. Taking `&mut self` means no decode of the
    /// previous frame can still be reading it.
    pub fn publish(&mut self, identities: &[u32]) {
        if self.entries.len() < identities.len() {
            self.entries.resize(identities.len(), 0);
        }
        self.entries[..identities.len()].copy_from_slice(identities);
        self.active_count = identities.len();
    }

    #[inline]
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_active(&self, slot: usize) -> bool {
        slot < self.active_count
    }

    #[inline]
    pub fn resolve(&self, slot: usize) -> Result<u32, SplatError> {
        if !self.is_active(slot) {
            return Err(SplatError::SlotOutOfRange {
                slot,
                active_count: self.active_count,
            });
        }
        Ok(self.entries[slot])
    }

    /// Identities of the active slots, in slot order.
    #[inline]
    pub fn active(&self) -> &[u32] {
        &self.entries[..self.active_count]
    }

    /// Checks that every active identity names a stored splat.
    pub fn validate(&self, num_splats: usize) -> Result<(), SplatError> {
        match self.active().iter().find(|&&id| id as usize >= num_splats) {
            Some(&identity) => Err(SplatError::IdentityOutOfRange {
                identity,
                num_splats,
            }),
            None => Ok(()),
        }
    }
}
