//! Knobs that shape how a pair is drawn

use crate::types::Item;

/// How hard to look for a pair the voter has not judged before
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupPolicy {
    pub max_attempts: u32,
    /// Serve the last drawn pair even if already seen, instead of failing
    pub accept_on_exhaustion: bool,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            accept_on_exhaustion: true,
        }
    }
}

impl DedupPolicy {
    /// Fail with `NoNovelPair` once `max_attempts` draws are used up
    pub fn strict(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            accept_on_exhaustion: false,
        }
    }
}

/// Which drawn item is shown in the first slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlacementPolicy {
    /// Keep draw order
    #[default]
    AsDrawn,
    /// Put the higher-weighted item first; ties keep draw order
    PromotedFirst,
}

impl PlacementPolicy {
    pub fn place(self, first: Item, second: Item) -> (Item, Item) {
        match self {
            PlacementPolicy::PromotedFirst
                if second.promotion_weight > first.promotion_weight =>
            {
                (second, first)
            }
            _ => (first, second),
        }
    }
}
