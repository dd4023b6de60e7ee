//! Reference store adapter
//!
//! The persistent storage engine is an external collaborator; the core
//! talks to it only through the [`ReferenceStore`] trait. [`StoreView`]
//! wraps a store with the current mode's write permissions: a Show-mode
//! write is refused loudly, never silently dropped, and leaves the store
//! untouched.

use std::collections::HashMap;

use tracing::warn;

use crate::mapping::ChannelMapping;
use crate::mode::Mode;
use crate::signature::{ReferenceSignature, SongId};
use crate::{CoreError, Result};

/// Interface to the external signature/mapping persistence.
pub trait ReferenceStore: Send {
    /// Fetch one signature, if present.
    fn get_signature(&self, song_id: SongId) -> Result<Option<ReferenceSignature>>;

    /// All known song ids.
    fn list_signatures(&self) -> Result<Vec<SongId>>;

    /// Insert or atomically replace a signature.
    fn put_signature(&mut self, signature: ReferenceSignature) -> Result<()>;

    /// The session's instrument/fixture mapping set.
    fn get_channel_mapping(&self) -> Result<Vec<ChannelMapping>>;
}

/// Mode-gated view over a reference store.
///
/// Reads always pass through. Writes follow the mode table: Maintenance
/// may overwrite anything, Probe may only create or extend provisional
/// signatures, Show refuses all writes with [`CoreError::WriteRefused`].
pub struct StoreView<'a> {
    store: &'a mut dyn ReferenceStore,
    mode: Mode,
}

impl<'a> StoreView<'a> {
    /// View `store` with the permissions of `mode`.
    pub fn new(store: &'a mut dyn ReferenceStore, mode: Mode) -> Self {
        Self { store, mode }
    }

    /// See [`ReferenceStore::get_signature`].
    pub fn get_signature(&self, song_id: SongId) -> Result<Option<ReferenceSignature>> {
        self.store.get_signature(song_id)
    }

    /// See [`ReferenceStore::list_signatures`].
    pub fn list_signatures(&self) -> Result<Vec<SongId>> {
        self.store.list_signatures()
    }

    /// See [`ReferenceStore::get_channel_mapping`].
    pub fn get_channel_mapping(&self) -> Result<Vec<ChannelMapping>> {
        self.store.get_channel_mapping()
    }

    /// Mode-gated write. The permission check happens before the store is
    /// touched, so a refused write cannot leave partial state behind.
    pub fn put_signature(&mut self, signature: ReferenceSignature) -> Result<()> {
        match self.mode {
            Mode::Maintenance => self.store.put_signature(signature),
            Mode::Probe => {
                if !signature.provisional {
                    warn!(
                        song_id = signature.song_id,
                        "probe mode may only write provisional signatures"
                    );
                    return Err(CoreError::WriteRefused { mode: self.mode });
                }
                if let Some(mut existing) = self.store.get_signature(signature.song_id)? {
                    if !existing.provisional {
                        warn!(
                            song_id = signature.song_id,
                            "probe mode may not replace a committed signature"
                        );
                        return Err(CoreError::WriteRefused { mode: self.mode });
                    }
                    // Probe extends its own provisional captures; it never
                    // replaces frames already taken.
                    existing.extend_frames(signature.frames);
                    return self.store.put_signature(existing);
                }
                self.store.put_signature(signature)
            }
            Mode::Show => {
                warn!(
                    song_id = signature.song_id,
                    "reference store write attempted during show"
                );
                Err(CoreError::WriteRefused { mode: self.mode })
            }
        }
    }
}

/// In-memory store for tests and rehearsal sessions without persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    signatures: HashMap<SongId, ReferenceSignature>,
    mappings: Vec<ChannelMapping>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with signatures and a mapping set.
    pub fn with_content(
        signatures: impl IntoIterator<Item = ReferenceSignature>,
        mappings: Vec<ChannelMapping>,
    ) -> Self {
        Self {
            signatures: signatures.into_iter().map(|s| (s.song_id, s)).collect(),
            mappings,
        }
    }
}

impl ReferenceStore for MemoryStore {
    fn get_signature(&self, song_id: SongId) -> Result<Option<ReferenceSignature>> {
        Ok(self.signatures.get(&song_id).cloned())
    }

    fn list_signatures(&self) -> Result<Vec<SongId>> {
        let mut ids: Vec<SongId> = self.signatures.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn put_signature(&mut self, signature: ReferenceSignature) -> Result<()> {
        self.signatures.insert(signature.song_id, signature);
        Ok(())
    }

    fn get_channel_mapping(&self) -> Result<Vec<ChannelMapping>> {
        Ok(self.mappings.clone())
    }
}
