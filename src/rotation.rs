//! Which photo is on screen and which comes next.
//!
//! The controller owns the synced list and the current index. Every sync is tagged with a
//! generation ticket; a result whose ticket is no longer current is discarded, so a
//! suspended or superseded cycle can never replace the list.

use config_model::SelectionPolicy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::RotationError;
use crate::events::PhotoRecord;

/// Generation a sync was started under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTicket(u64);

#[derive(Debug)]
pub struct RotationController {
    photos: Vec<PhotoRecord>,
    current_index: usize,
    policy: SelectionPolicy,
    rng: StdRng,
    generation: u64,
    synced: bool,
}

impl RotationController {
    /// A fixed `seed` makes random selection reproducible.
    pub fn new(policy: SelectionPolicy, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            photos: Vec::new(),
            current_index: 0,
            policy,
            rng,
            generation: 0,
            synced: false,
        }
    }

    pub fn set_policy(&mut self, policy: SelectionPolicy) {
        self.policy = policy;
    }

    /// True once any sync has been applied, even an empty one.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn photos(&self) -> &[PhotoRecord] {
        &self.photos
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Starts a new generation; tickets from earlier generations become stale.
    pub fn begin_sync(&mut self) -> SyncTicket {
        self.generation += 1;
        SyncTicket(self.generation)
    }

    pub fn is_current(&self, ticket: SyncTicket) -> bool {
        ticket.0 == self.generation
    }

    /// Invalidates any in-flight sync without touching the current list.
    pub fn invalidate(&mut self) {
        self.generation += 1;
    }

    /// Replaces the list if `ticket` is still current. Returns whether it was applied.
    pub fn apply_sync(&mut self, ticket: SyncTicket, photos: Vec<PhotoRecord>) -> bool {
        if !self.is_current(ticket) {
            debug!(
                ticket = ticket.0,
                generation = self.generation,
                "discarding stale album sync"
            );
            return false;
        }
        self.photos = photos;
        self.synced = true;
        self.current_index = match self.policy {
            SelectionPolicy::Random if !self.photos.is_empty() => {
                self.rng.random_range(0..self.photos.len())
            }
            _ => 0,
        };
        true
    }

    pub fn current(&self) -> Result<&PhotoRecord, RotationError> {
        self.photos
            .get(self.current_index)
            .ok_or(RotationError::NoPhotos)
    }

    /// Moves to the next photo according to the selection policy.
    pub fn advance(&mut self) -> Result<&PhotoRecord, RotationError> {
        let len = self.photos.len();
        if len == 0 {
            return Err(RotationError::NoPhotos);
        }
        self.current_index = match self.policy {
            SelectionPolicy::Sequential => (self.current_index + 1) % len,
            SelectionPolicy::Random if len == 1 => 0,
            SelectionPolicy::Random => {
                let pick = self.rng.random_range(0..len - 1);
                if pick >= self.current_index { pick + 1 } else { pick }
            }
        };
        self.current()
    }
}
