//! # Subscription Ledger
//!
//! Reference counts per region plus the load state of each region.
//!
//! Every observer holds a square of interest around its column:
//!
//! ```text
//!   s s s s s      h = hard interest (radius r = 1)
//!   s h h h s      s = soft interest (border of soft_border = 1)
//!   s h h h s
//!   s h h h s      Soft counts cover the whole square, hard counts
//!   s s s s s      only the inner one, so soft >= hard always holds.
//! ```
//!
//! The ledger itself is plain data. [`crate::EntityCache`] guards it with a
//! single mutex, so each method here runs as one critical section.

use std::collections::HashMap;

use tracing::{debug, trace};

use tessera_core::{ColumnIndex, Planet, RegionKey};

use crate::error::{StreamingError, StreamingResult};
use crate::state::{InterestLost, LoadState};

/// Ledger entry for one region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionInfo {
    /// Region this entry describes.
    pub key: RegionKey,
    /// Number of hard-radius covers.
    pub hard: u32,
    /// Number of soft-radius covers (hard included).
    pub soft: u32,
    /// Load state.
    pub state: LoadState,
    sequence: u64,
}

impl SubscriptionInfo {
    /// Queue position: lower values are served first.
    #[inline]
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Work handed to the streaming worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Claim {
    /// Load the region's entities.
    Load(RegionKey),
    /// Save and evict the region's entities.
    Unload(RegionKey),
}

impl Claim {
    /// The claimed region.
    #[must_use]
    pub const fn key(self) -> RegionKey {
        match self {
            Self::Load(key) | Self::Unload(key) => key,
        }
    }
}

/// Result of committing a finished save.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnloadOutcome {
    /// Entry removed and `count` entities evicted from the live set.
    Evicted {
        /// Number of entities removed.
        count: usize,
    },
    /// Interest came back during the save; the region stays resident.
    Restored,
    /// Entities changed during the save. They were taken out of the live
    /// set, and the region stays claimed until they are saved once more.
    Resave,
}

/// Per-region reference counts and load states.
#[derive(Debug)]
pub struct SubscriptionLedger {
    entries: HashMap<RegionKey, SubscriptionInfo>,
    soft_border: i32,
    next_sequence: u64,
    in_flight: Option<RegionKey>,
}

/// Offsets of the interest square, row by row, flagged when inside the
/// hard radius.
fn interest_square(radius: i32, border: i32) -> impl Iterator<Item = (i32, i32, bool)> {
    let outer = radius.saturating_add(border);
    (-outer..=outer).flat_map(move |dy| {
        (-outer..=outer).map(move |dx| (dx, dy, dx.abs() <= radius && dy.abs() <= radius))
    })
}

impl SubscriptionLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new(soft_border: i32) -> Self {
        Self {
            entries: HashMap::new(),
            soft_border: soft_border.max(0),
            next_sequence: 0,
            in_flight: None,
        }
    }

    /// Width of the soft border in columns.
    #[inline]
    #[must_use]
    pub const fn soft_border(&self) -> i32 {
        self.soft_border
    }

    /// Number of tracked regions.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no region is tracked.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for a region.
    #[must_use]
    pub fn get(&self, key: &RegionKey) -> Option<&SubscriptionInfo> {
        self.entries.get(key)
    }

    /// Load state of a region.
    #[must_use]
    pub fn state(&self, key: &RegionKey) -> Option<LoadState> {
        self.entries.get(key).map(|info| info.state)
    }

    /// Iterates all entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &SubscriptionInfo> {
        self.entries.values()
    }

    /// Region the worker is currently loading or saving.
    #[inline]
    #[must_use]
    pub const fn in_flight(&self) -> Option<RegionKey> {
        self.in_flight
    }

    /// True if some region waits for the worker.
    #[must_use]
    pub fn has_queued_work(&self) -> bool {
        self.entries.values().any(|info| info.state.is_queued())
    }

    /// True if nothing is queued and nothing is in flight.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.in_flight.is_none() && !self.has_queued_work()
    }

    /// Regions whose entities may be in the live set.
    #[must_use]
    pub fn resident_keys(&self) -> Vec<RegionKey> {
        let mut keys: Vec<_> = self
            .entries
            .values()
            .filter(|info| info.state.is_resident())
            .map(|info| info.key)
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Registers interest in the square around `center`.
    ///
    /// Returns the number of entries created.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::InvalidState`] for a negative radius.
    pub fn subscribe(
        &mut self,
        planet: &Planet,
        center: ColumnIndex,
        radius: i32,
    ) -> StreamingResult<usize> {
        if radius < 0 {
            return Err(negative_radius(planet, center, radius));
        }

        let mut created = 0;
        for (dx, dy, hard) in interest_square(radius, self.soft_border) {
            let key = planet.region_key(center.offset(dx, dy));
            let info = self.entries.entry(key).or_insert_with(|| {
                created += 1;
                let info = SubscriptionInfo {
                    key,
                    hard: 0,
                    soft: 0,
                    state: LoadState::ToLoad,
                    sequence: self.next_sequence,
                };
                self.next_sequence += 1;
                info
            });

            let before = info.state;
            info.state = before.on_subscribe();
            info.soft += 1;
            if hard {
                info.hard += 1;
            }
            if before != info.state {
                trace!(planet = key.planet.0, x = key.column.x, y = key.column.y,
                    from = %before, to = %info.state, "region resubscribed");
            }
        }

        debug!(planet = planet.id().0, x = center.x, y = center.y, radius, created,
            "subscribed");
        Ok(created)
    }

    /// Releases interest in the square around `center`.
    ///
    /// Returns the number of regions whose soft interest reached zero.
    /// Every covered region is validated first; on error nothing changes.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::InvalidState`] for a negative radius, a
    /// region with no entry, or counts that would underflow.
    pub fn unsubscribe(
        &mut self,
        planet: &Planet,
        center: ColumnIndex,
        radius: i32,
    ) -> StreamingResult<usize> {
        if radius < 0 {
            return Err(negative_radius(planet, center, radius));
        }

        let mut required: HashMap<RegionKey, (u32, u32)> = HashMap::new();
        for (dx, dy, hard) in interest_square(radius, self.soft_border) {
            let key = planet.region_key(center.offset(dx, dy));
            let need = required.entry(key).or_default();
            need.1 += 1;
            if hard {
                need.0 += 1;
            }
        }
        for (dx, dy, _) in interest_square(radius, self.soft_border) {
            let key = planet.region_key(center.offset(dx, dy));
            let (hard, soft) = required[&key];
            let Some(info) = self.entries.get(&key) else {
                return Err(StreamingError::InvalidState {
                    key,
                    reason: "unsubscribe from a region with no subscription".to_string(),
                });
            };
            if info.soft < soft || info.hard < hard {
                return Err(StreamingError::InvalidState {
                    key,
                    reason: format!(
                        "counts would underflow (hard {}/{hard}, soft {}/{soft})",
                        info.hard, info.soft
                    ),
                });
            }
        }

        let mut released = 0;
        for (dx, dy, hard) in interest_square(radius, self.soft_border) {
            let key = planet.region_key(center.offset(dx, dy));
            let Some(info) = self.entries.get_mut(&key) else {
                continue;
            };
            info.soft -= 1;
            if hard {
                info.hard -= 1;
            }
            if info.soft > 0 {
                continue;
            }

            released += 1;
            match info.state.on_interest_lost() {
                InterestLost::Forget => {
                    trace!(planet = key.planet.0, x = key.column.x, y = key.column.y,
                        "region forgotten before load");
                    self.entries.remove(&key);
                }
                InterestLost::Keep(next) => {
                    if next.is_queued() && next != info.state {
                        info.sequence = self.next_sequence;
                        self.next_sequence += 1;
                    }
                    info.state = next;
                }
            }
        }

        debug!(planet = planet.id().0, x = center.x, y = center.y, radius, released,
            "unsubscribed");
        Ok(released)
    }

    /// Claims the next unit of work. Loads go first; within a kind the
    /// region queued earliest wins.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::InvariantViolation`] if a claim is still
    /// in flight.
    pub fn claim_next(&mut self) -> StreamingResult<Option<Claim>> {
        if let Some(key) = self.in_flight {
            return Err(StreamingError::InvariantViolation {
                key,
                found: self.state(&key),
                expected: "no region in flight when claiming",
            });
        }

        let oldest = |state: LoadState| {
            self.entries
                .values()
                .filter(|info| info.state == state)
                .min_by_key(|info| info.sequence)
                .map(|info| info.key)
        };

        let claim = if let Some(key) = oldest(LoadState::ToLoad) {
            Some((key, LoadState::Loading, Claim::Load(key)))
        } else {
            oldest(LoadState::ToUnload).map(|key| (key, LoadState::Unloading, Claim::Unload(key)))
        };

        let Some((key, next, claim)) = claim else {
            return Ok(None);
        };
        if let Some(info) = self.entries.get_mut(&key) {
            info.state = next;
        }
        self.in_flight = Some(key);
        Ok(Some(claim))
    }

    /// Commits a finished load. Returns the state after the commit.
    ///
    /// `Loading` becomes `Ready`; if interest changed during the load
    /// (`ToUnload` or `Ready`) the state is kept.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::InvariantViolation`] if `key` was not the
    /// claimed load or is in a state a load cannot finish in.
    pub fn commit_load(&mut self, key: RegionKey) -> StreamingResult<LoadState> {
        self.release(key)?;
        let info = self.entry_mut(key, "an entry for the loaded region")?;
        match info.state {
            LoadState::Loading => info.state = LoadState::Ready,
            LoadState::ToUnload | LoadState::Ready => {}
            found => {
                return Err(StreamingError::InvariantViolation {
                    key,
                    found: Some(found),
                    expected: "Loading, ToUnload or Ready after a load",
                })
            }
        }
        Ok(info.state)
    }

    /// Records a failed load. Returns the new state, `None` if the entry
    /// was dropped because nobody wants it any more.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::InvariantViolation`] if `key` was not the
    /// claimed load or is in an unexpected state.
    pub fn fail_load(&mut self, key: RegionKey) -> StreamingResult<Option<LoadState>> {
        self.release(key)?;
        let sequence = self.next_sequence;
        let info = self.entry_mut(key, "an entry for the failed load")?;
        match info.state {
            LoadState::Loading | LoadState::Ready => {
                info.state = LoadState::ToLoad;
                info.sequence = sequence;
                self.next_sequence += 1;
                Ok(Some(LoadState::ToLoad))
            }
            LoadState::ToUnload if info.soft == 0 => {
                self.entries.remove(&key);
                Ok(None)
            }
            found => Err(StreamingError::InvariantViolation {
                key,
                found: Some(found),
                expected: "Loading, Ready or unreferenced ToUnload after a failed load",
            }),
        }
    }

    /// Commits a finished save.
    ///
    /// For a region still `Unloading`, `evict` runs inside this critical
    /// section and must drop the region's entities. It returns how many it
    /// removed, or `None` if they changed since the save snapshot. In that
    /// case the entry stays `Unloading` and the region stays claimed, so
    /// the next commit for it is the final one.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::InvariantViolation`] if `key` was not the
    /// claimed save or is in a state a save cannot finish in.
    pub fn commit_unload(
        &mut self,
        key: RegionKey,
        evict: impl FnOnce() -> Option<usize>,
    ) -> StreamingResult<UnloadOutcome> {
        self.release(key)?;
        let info = self.entry_mut(key, "an entry for the saved region")?;
        match info.state {
            LoadState::CancelUnload => {
                info.state = LoadState::Ready;
                Ok(UnloadOutcome::Restored)
            }
            LoadState::Unloading => {
                if let Some(count) = evict() {
                    self.entries.remove(&key);
                    Ok(UnloadOutcome::Evicted { count })
                } else {
                    self.in_flight = Some(key);
                    Ok(UnloadOutcome::Resave)
                }
            }
            found => Err(StreamingError::InvariantViolation {
                key,
                found: Some(found),
                expected: "Unloading or CancelUnload after a save",
            }),
        }
    }

    /// Records a failed save. Returns the new state.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::InvariantViolation`] if `key` was not the
    /// claimed save or is in an unexpected state.
    pub fn fail_unload(&mut self, key: RegionKey) -> StreamingResult<LoadState> {
        self.release(key)?;
        let sequence = self.next_sequence;
        let info = self.entry_mut(key, "an entry for the failed save")?;
        match info.state {
            LoadState::Unloading => {
                info.state = LoadState::ToUnload;
                info.sequence = sequence;
                self.next_sequence += 1;
                Ok(LoadState::ToUnload)
            }
            LoadState::CancelUnload => {
                info.state = LoadState::Ready;
                Ok(LoadState::Ready)
            }
            found => Err(StreamingError::InvariantViolation {
                key,
                found: Some(found),
                expected: "Unloading or CancelUnload after a failed save",
            }),
        }
    }

    fn release(&mut self, key: RegionKey) -> StreamingResult<()> {
        if self.in_flight != Some(key) {
            return Err(StreamingError::InvariantViolation {
                key,
                found: self.state(&key),
                expected: "the region claimed by the worker",
            });
        }
        self.in_flight = None;
        Ok(())
    }

    fn entry_mut(
        &mut self,
        key: RegionKey,
        expected: &'static str,
    ) -> StreamingResult<&mut SubscriptionInfo> {
        self.entries
            .get_mut(&key)
            .ok_or(StreamingError::InvariantViolation {
                key,
                found: None,
                expected,
            })
    }
}

fn negative_radius(planet: &Planet, center: ColumnIndex, radius: i32) -> StreamingError {
    StreamingError::InvalidState {
        key: planet.region_key(center),
        reason: format!("negative radius {radius}"),
    }
}
