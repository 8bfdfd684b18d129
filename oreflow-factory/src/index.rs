//! Per-item availability: providers, backups, and reservations.
//!
//! Everything here lives for exactly one cycle; storage updates populate it
//! and the engine clears it before arming the cycle timer.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;

use futures_util::future::{try_join_all, LocalBoxFuture};
use oreflow_data::Item;
use oreflow_errors::OreflowResult;

use crate::factory::{Factory, LOG_EXTRACT};

/// A capability to pull items out of one spot of one storage.
///
/// Extraction moves `size` items into the given bus slot and updates the
/// owning storage's bookkeeping; the index's own counts were already
/// adjusted when the provider was reserved.
pub(crate) trait ProviderSource {
    fn extract(
        &self,
        factory: &Factory,
        size: i32,
        bus_slot: usize,
    ) -> LocalBoxFuture<'static, OreflowResult<()>>;
}

/// A provider entry in an item's priority queue.
pub(crate) struct Provider {
    pub(crate) priority: i32,
    pub(crate) size: i32,
    pub(crate) source: Rc<dyn ProviderSource>,
}

/// Max-heap order: highest priority first (drawers over chests over ME),
/// then the fullest provider, so small stragglers persist for future cycles.
impl Ord for Provider {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.size).cmp(&(other.priority, other.size))
    }
}

impl PartialOrd for Provider {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Provider {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Provider {}

/// One item's availability during the current cycle.
#[derive(Default)]
pub(crate) struct ItemInfo {
    providers: BinaryHeap<Provider>,
    n_avail: i32,
    n_backup: i32,
}

impl ItemInfo {
    pub(crate) fn add_provider(&mut self, provider: Provider) {
        debug_assert!(provider.size > 0, "empty provider");
        self.n_avail += provider.size;
        self.providers.push(provider);
    }

    pub(crate) fn backup(&mut self, size: i32) {
        self.n_backup += size;
    }

    pub(crate) fn avail(&self, allow_backup: bool) -> i32 {
        if allow_backup {
            self.n_avail
        } else {
            (self.n_avail - self.n_backup).max(0)
        }
    }

    /// Claim up to `size` items, draining the best providers first. Returns
    /// the claimed `(source, amount)` chunks; the availability count drops
    /// immediately so concurrent planners cannot double-book.
    pub(crate) fn take(&mut self, size: i32) -> Vec<(Rc<dyn ProviderSource>, i32)> {
        let mut remaining = size.min(self.n_avail);
        let mut chunks = Vec::new();
        while remaining > 0 {
            let mut provider = self.providers.pop().expect("n_avail tracks providers");
            let taken = provider.size.min(remaining);
            provider.size -= taken;
            self.n_avail -= taken;
            remaining -= taken;
            chunks.push((provider.source.clone(), taken));
            if provider.size > 0 {
                self.providers.push(provider);
            }
        }
        chunks
    }

    #[cfg(test)]
    pub(crate) fn provider_sizes(&self) -> Vec<i32> {
        self.providers.iter().map(|p| p.size).collect()
    }
}

/// An item count already claimed from the index, waiting to be physically
/// extracted into a bus slot.
pub struct Reservation {
    reason: String,
    item: Rc<Item>,
    size: i32,
    chunks: Vec<(Rc<dyn ProviderSource>, i32)>,
}

impl Reservation {
    pub(crate) fn new(
        reason: String,
        item: Rc<Item>,
        size: i32,
        chunks: Vec<(Rc<dyn ProviderSource>, i32)>,
    ) -> Self {
        Reservation {
            reason,
            item,
            size,
            chunks,
        }
    }

    /// Issue the transfer actions that move the reserved items into
    /// `bus_slot`.
    pub async fn extract(self, factory: &Factory, bus_slot: usize) -> OreflowResult<()> {
        factory.log(
            format!("{}: {}*{}", self.reason, self.item.label, self.size),
            LOG_EXTRACT,
            None,
        );
        try_join_all(
            self.chunks
                .iter()
                .map(|(source, size)| source.extract(factory, *size, bus_slot)),
        )
        .await
        .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    struct Inert;

    impl ProviderSource for Inert {
        fn extract(
            &self,
            _factory: &Factory,
            _size: i32,
            _bus_slot: usize,
        ) -> LocalBoxFuture<'static, OreflowResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn provider(priority: i32, size: i32) -> Provider {
        Provider {
            priority,
            size,
            source: Rc::new(Inert),
        }
    }

    #[test]
    fn avail_tracks_providers_and_backups() {
        let mut info = ItemInfo::default();
        info.add_provider(provider(0, 40));
        info.add_provider(provider(0, 2));
        assert_eq!(info.avail(true), 42);
        assert_eq!(info.avail(false), 42);

        info.backup(10);
        assert_eq!(info.avail(true), 42);
        assert_eq!(info.avail(false), 32);

        // A backup larger than availability clamps to zero.
        info.backup(100);
        assert_eq!(info.avail(false), 0);
        assert_eq!(info.avail(true), 42);
    }

    #[test]
    fn take_prefers_priority_then_fullness() {
        let mut info = ItemInfo::default();
        info.add_provider(provider(i32::MIN, 100)); // ME
        info.add_provider(provider(10, 8)); // small chest stack
        info.add_provider(provider(60, 60)); // full chest stack
        info.add_provider(provider(i32::MAX, 5)); // drawer

        // Drawer first despite being the smallest, then the fullest chest.
        let chunks = info.take(40);
        let sizes: Vec<i32> = chunks.iter().map(|(_, n)| *n).collect();
        assert_eq!(sizes, vec![5, 35]);
        assert_eq!(info.avail(true), 133);
        assert_eq!(info.provider_sizes().iter().sum::<i32>(), 133);
    }

    #[test]
    fn take_never_goes_negative() {
        let mut info = ItemInfo::default();
        info.add_provider(provider(0, 3));
        let chunks = info.take(10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].1, 3);
        assert_eq!(info.avail(true), 0);
        assert!(info.provider_sizes().is_empty());
    }

    #[test]
    fn extraction_conserves_the_sum_invariant() {
        let mut info = ItemInfo::default();
        for size in [7, 13, 21] {
            info.add_provider(provider(size, size));
        }
        let before = info.avail(true);
        let taken: i32 = info.take(17).iter().map(|(_, n)| *n).sum();
        assert_eq!(taken, 17);
        assert_eq!(info.avail(true), before - 17);
        assert_eq!(info.provider_sizes().iter().sum::<i32>(), before - 17);
        assert!(info.provider_sizes().iter().all(|&s| s > 0));
    }
}
