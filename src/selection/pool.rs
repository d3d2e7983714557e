//! Weighted candidate pool
//!
//! Each item appears once per unit of promotion weight, so a uniform draw
//! over slots picks an item with probability proportional to its weight.

use crate::types::Item;
use rand::Rng;

pub struct WeightedPool {
    items: Vec<Item>,
    /// Indices into `items`, each repeated `weight` times
    slots: Vec<usize>,
}

impl WeightedPool {
    pub fn new(items: Vec<Item>) -> Self {
        let slots = items
            .iter()
            .enumerate()
            .flat_map(|(idx, item)| std::iter::repeat(idx).take(item.promotion_weight.slots()))
            .collect();

        Self { items, slots }
    }

    pub fn distinct_items(&self) -> usize {
        self.items.len()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn item(&self, idx: usize) -> &Item {
        &self.items[idx]
    }

    /// Draw two slots that point at different items.
    ///
    /// Caller guarantees at least two distinct items.
    pub fn draw_distinct<R: Rng + ?Sized>(&self, rng: &mut R) -> (usize, usize) {
        let first = self.slots[rng.gen_range(0..self.slots.len())];
        let mut second = self.slots[rng.gen_range(0..self.slots.len())];
        while second == first {
            second = self.slots[rng.gen_range(0..self.slots.len())];
        }
        (first, second)
    }
}
