//! The bus allocator: a cooperative pool of transfer slots in the shared
//! transit inventory.
//!
//! Waiters queue FIFO and are fulfilled in order, so repeated non-partial
//! waits cannot starve. Slots freed with `cleanup` stay occupied as
//! *transient* slots until the end-of-cycle sweep has sunk whatever they
//! hold back into storage.

use std::collections::{BTreeSet, VecDeque};

use oreflow_errors::OreflowError;
use oreflow_server::{promise, Completer, Promise};

struct BusWaiter {
    n: usize,
    allow_partial: bool,
    completer: Completer<Vec<usize>>,
}

pub(crate) struct BusState {
    size: usize,
    allocated: BTreeSet<usize>,
    transient: BTreeSet<usize>,
    waiters: VecDeque<BusWaiter>,
}

impl BusState {
    pub(crate) fn new(size: usize) -> Self {
        BusState {
            size,
            allocated: BTreeSet::new(),
            transient: BTreeSet::new(),
            waiters: VecDeque::new(),
        }
    }

    fn free_slots(&self) -> Vec<usize> {
        (0..self.size)
            .filter(|slot| !self.allocated.contains(slot) && !self.transient.contains(slot))
            .collect()
    }

    /// Request `n` slots. Partial requests resolve immediately with whatever
    /// is free (possibly nothing); whole requests park until `n` slots are
    /// free. A whole request beyond the bus size can never complete and
    /// fails on enqueue.
    pub(crate) fn allocate(&mut self, allow_partial: bool, n: usize) -> Promise<Vec<usize>> {
        let (completer, result) = promise();
        if !allow_partial && n > self.size {
            completer.fail(OreflowError::BusExhausted {
                requested: n,
                size: self.size,
            });
            return result;
        }
        self.waiters.push_back(BusWaiter {
            n,
            allow_partial,
            completer,
        });
        self.update();
        result
    }

    /// Return slots to the pool. `cleanup` marks them transient instead:
    /// they may hold residual items and stay occupied until swept.
    pub(crate) fn free(&mut self, slots: &[usize], cleanup: bool) {
        for slot in slots {
            debug_assert!(self.allocated.contains(slot) || self.transient.contains(slot));
            self.allocated.remove(slot);
            if cleanup {
                self.transient.insert(*slot);
            }
        }
        self.update();
    }

    /// Run the waiter queue in FIFO order while slots remain.
    fn update(&mut self) {
        while let Some(front) = self.waiters.front() {
            let free = self.free_slots();
            let granted = if front.allow_partial {
                front.n.min(free.len())
            } else if free.len() >= front.n {
                front.n
            } else {
                break;
            };
            let waiter = self.waiters.pop_front().expect("front checked");
            let slots = free[..granted].to_vec();
            self.allocated.extend(&slots);
            if let Err(slots) = waiter.completer.resolve(slots) {
                // Nobody is waiting anymore; reclaim the grant.
                for slot in slots {
                    self.allocated.remove(&slot);
                }
            }
        }
    }

    /// Slots freed with cleanup that have not been swept yet.
    pub(crate) fn transient_slots(&self) -> Vec<usize> {
        self.transient.iter().copied().collect()
    }

    /// Release a swept transient slot back to the pool.
    pub(crate) fn release_transient(&mut self, slot: usize) {
        self.transient.remove(&slot);
        self.update();
    }
}

#[cfg(test)]
mod tests {
    use futures_util::FutureExt;
    use pretty_assertions::assert_eq;

    use super::*;

    /// Resolve a promise that must already be complete.
    fn now<T>(promise: Promise<T>) -> oreflow_errors::OreflowResult<T> {
        promise
            .now_or_never()
            .expect("promise should be resolved synchronously")
    }

    #[test]
    fn allocates_distinct_slots() {
        let mut bus = BusState::new(4);
        let a = now(bus.allocate(false, 2)).unwrap();
        let b = now(bus.allocate(false, 2)).unwrap();
        let mut all: Vec<usize> = a.iter().chain(&b).copied().collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|&slot| slot < 4));
    }

    #[test]
    fn oversized_request_fails_on_enqueue() {
        let mut bus = BusState::new(2);
        assert!(matches!(
            now(bus.allocate(false, 3)),
            Err(OreflowError::BusExhausted {
                requested: 3,
                size: 2
            })
        ));
    }

    #[test]
    fn partial_with_no_free_slots_is_an_immediate_empty_success() {
        let mut bus = BusState::new(1);
        let _held = now(bus.allocate(false, 1)).unwrap();
        assert_eq!(now(bus.allocate(true, 1)).unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn partial_takes_what_exists() {
        let mut bus = BusState::new(3);
        let _held = now(bus.allocate(false, 2)).unwrap();
        assert_eq!(now(bus.allocate(true, 4)), Ok(vec![2]));
    }

    #[test]
    fn waiters_are_fifo() {
        let mut bus = BusState::new(1);
        let held = now(bus.allocate(false, 1)).unwrap();
        let mut first = bus.allocate(false, 1);
        let mut second = bus.allocate(false, 1);
        assert!((&mut first).now_or_never().is_none());

        bus.free(&held, false);
        let granted = now(first).unwrap();
        assert!((&mut second).now_or_never().is_none());

        bus.free(&granted, false);
        now(second).unwrap();
    }

    #[test]
    fn cleanup_slots_stay_out_of_the_pool_until_released() {
        let mut bus = BusState::new(1);
        let held = now(bus.allocate(false, 1)).unwrap();
        bus.free(&held, true);

        let mut parked = bus.allocate(false, 1);
        assert!((&mut parked).now_or_never().is_none());
        assert_eq!(bus.transient_slots(), vec![0]);

        bus.release_transient(0);
        assert_eq!(now(parked).unwrap(), vec![0]);
    }

    mod properties {
        use std::collections::BTreeSet;

        use futures_util::FutureExt;
        use proptest::prelude::*;
        use test_strategy::proptest;

        use crate::bus::BusState;

        /// Under any interleaving of allocations and frees, grants stay
        /// within the slot range, never overlap, and every parked whole
        /// request eventually completes.
        #[proptest]
        fn grants_are_disjoint_in_range_and_starvation_free(
            #[strategy(1usize..6)] size: usize,
            #[strategy(proptest::collection::vec((any::<bool>(), 0usize..6), 1..24))]
            requests: Vec<(bool, usize)>,
        ) {
            let mut bus = BusState::new(size);
            let mut held: Vec<Vec<usize>> = Vec::new();
            let mut pending = Vec::new();
            for (step, (allow_partial, n)) in requests.into_iter().enumerate() {
                if step % 2 == 1 {
                    if let Some(slots) = held.pop() {
                        bus.free(&slots, false);
                    }
                }
                let mut request = bus.allocate(allow_partial, n.min(size));
                match (&mut request).now_or_never() {
                    Some(result) => held.push(result.unwrap()),
                    None => pending.push(request),
                }
                let mut still_pending = Vec::new();
                for mut request in pending {
                    match (&mut request).now_or_never() {
                        Some(result) => held.push(result.unwrap()),
                        None => still_pending.push(request),
                    }
                }
                pending = still_pending;

                let granted: Vec<usize> = held.iter().flatten().copied().collect();
                let unique: BTreeSet<usize> = granted.iter().copied().collect();
                prop_assert_eq!(granted.len(), unique.len(), "overlapping grants");
                prop_assert!(granted.iter().all(|&slot| slot < size));
            }

            // Release everything; FIFO fulfillment must complete every
            // parked request.
            for slots in held.drain(..) {
                bus.free(&slots, false);
            }
            for mut request in pending {
                let result = (&mut request).now_or_never();
                prop_assert!(result.is_some(), "a parked request starved");
                bus.free(&result.unwrap().unwrap(), false);
            }
        }
    }

    #[test]
    fn dropped_waiter_grants_are_reclaimed() {
        let mut bus = BusState::new(1);
        let held = now(bus.allocate(false, 1)).unwrap();
        let parked = bus.allocate(false, 1);
        drop(parked);
        bus.free(&held, false);
        // The dropped waiter's grant went back to the pool.
        assert_eq!(now(bus.allocate(false, 1)).unwrap(), vec![0]);
    }
}
