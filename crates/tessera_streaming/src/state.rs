//! # Region Load States
//!
//! ```text
//!            S (new key)
//!                │
//!                ▼          W claim          W load done
//!   (removed) ◄─ ToLoad ──────────► Loading ─────────────► Ready ◄──┐
//!           U (soft=0)                 │ U                │ U     │ S
//!                                      ▼                  ▼       │
//!                                   ToUnload ◄────────────┘───────┘
//!                                      │ W claim
//!                                      ▼        S
//!            (removed) ◄─ W save ─ Unloading ──────► CancelUnload
//!                                      ▲     ◄──────      │ W save
//!                                      │        U         ▼
//!                                      │                Ready
//! ```
//!
//! S = subscribe on an existing key, U = unsubscribe bringing soft
//! interest to zero, W = worker. Worker-side transitions live on
//! [`crate::SubscriptionLedger`]; the caller-side ones are here.

/// Lifecycle state of one region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadState {
    /// Wanted, waiting for the worker.
    ToLoad,
    /// The worker is loading it.
    Loading,
    /// Entities are resident.
    Ready,
    /// No longer wanted, waiting for the worker to save it.
    ToUnload,
    /// The worker is saving it.
    Unloading,
    /// Wanted again while the save was running.
    CancelUnload,
}

/// What happens to an entry whose soft interest reached zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterestLost {
    /// Nothing was loaded yet: drop the entry.
    Forget,
    /// Keep the entry in the given state.
    Keep(LoadState),
}

impl LoadState {
    /// Transition for a subscribe on an existing entry.
    #[inline]
    #[must_use]
    pub const fn on_subscribe(self) -> Self {
        match self {
            Self::ToUnload => Self::Ready,
            Self::Unloading => Self::CancelUnload,
            other => other,
        }
    }

    /// Transition for an unsubscribe that brought soft interest to zero.
    #[inline]
    #[must_use]
    pub const fn on_interest_lost(self) -> InterestLost {
        match self {
            Self::ToLoad => InterestLost::Forget,
            Self::Loading | Self::Ready => InterestLost::Keep(Self::ToUnload),
            Self::CancelUnload => InterestLost::Keep(Self::Unloading),
            other => InterestLost::Keep(other),
        }
    }

    /// True while the worker holds I/O for this region.
    #[inline]
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Loading | Self::Unloading | Self::CancelUnload)
    }

    /// True if the worker has something to do for this region.
    #[inline]
    #[must_use]
    pub const fn is_queued(self) -> bool {
        matches!(self, Self::ToLoad | Self::ToUnload)
    }

    /// True if the region's entities may be in the live set.
    #[inline]
    #[must_use]
    pub const fn is_resident(self) -> bool {
        matches!(
            self,
            Self::Ready | Self::ToUnload | Self::Unloading | Self::CancelUnload
        )
    }
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_transitions() {
        assert_eq!(LoadState::ToLoad.on_subscribe(), LoadState::ToLoad);
        assert_eq!(LoadState::Loading.on_subscribe(), LoadState::Loading);
        assert_eq!(LoadState::Ready.on_subscribe(), LoadState::Ready);
        assert_eq!(LoadState::ToUnload.on_subscribe(), LoadState::Ready);
        assert_eq!(LoadState::Unloading.on_subscribe(), LoadState::CancelUnload);
        assert_eq!(LoadState::CancelUnload.on_subscribe(), LoadState::CancelUnload);
    }

    #[test]
    fn test_interest_lost_transitions() {
        assert_eq!(LoadState::ToLoad.on_interest_lost(), InterestLost::Forget);
        assert_eq!(
            LoadState::Loading.on_interest_lost(),
            InterestLost::Keep(LoadState::ToUnload)
        );
        assert_eq!(
            LoadState::Ready.on_interest_lost(),
            InterestLost::Keep(LoadState::ToUnload)
        );
        assert_eq!(
            LoadState::CancelUnload.on_interest_lost(),
            InterestLost::Keep(LoadState::Unloading)
        );
    }

    #[test]
    fn test_classification() {
        assert!(LoadState::ToLoad.is_queued());
        assert!(LoadState::ToUnload.is_queued());
        assert!(!LoadState::Ready.is_queued());
        assert!(LoadState::CancelUnload.is_in_flight());
        assert!(!LoadState::ToLoad.is_resident());
        assert!(!LoadState::Loading.is_resident());
        assert!(LoadState::ToUnload.is_resident());
    }
}
