//  Copyright 2022, The Tari Project
//
//  Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
//  following conditions are met:
//
//  1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
//  disclaimer.
//
//  2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
//  following disclaimer in the documentation and/or other materials provided with the distribution.
//
//  3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
//  products derived from this software without specific prior written permission.
//
//  THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
//  INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
//  DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
//  SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
//  SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
//  WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
//  USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
        Weak,
    },
};

use log::*;
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};

use crate::{
    blocks::{Block, BlockHash},
    chain_storage::BlockchainBackend,
    common::clock::Clock,
    sync::{
        messages::{GetData, Inventory},
        performance::Performance,
        reservations::Reservations,
        EVICTION_MULTIPLE,
        MICRO_PER_SECOND,
        MINIMUM_HISTORY,
    },
};

const LOG_TARGET: &str = "c::bn::sync::reservation";

/// One import measurement. `time` is the start of the storage call in clock microseconds, so a long storage stall
/// does not stretch the effective window.
#[derive(Clone, Copy, Debug)]
struct ImportRecord {
    events: u64,
    database: u64,
    time: u64,
}

/// The hash/height assignment of one reservation. Both views are kept consistent under the enclosing lock; `heights`
/// iterates in ascending height order.
#[derive(Default)]
struct AssignedBlocks {
    heights: BTreeMap<u64, BlockHash>,
    hashes: HashMap<BlockHash, u64>,
    pending: bool,
    partitioned: bool,
}

impl AssignedBlocks {
    fn len(&self) -> usize {
        self.heights.len()
    }

    fn is_empty(&self) -> bool {
        self.heights.is_empty()
    }

    fn insert(&mut self, hash: BlockHash, height: u64) {
        let previous = self.hashes.insert(hash, height);
        debug_assert!(previous.is_none(), "block hash reserved twice");
        let previous = self.heights.insert(height, hash);
        debug_assert!(previous.is_none(), "block height reserved twice");
    }

    fn remove_by_hash(&mut self, hash: &BlockHash) -> Option<u64> {
        let height = self.hashes.remove(hash)?;
        self.heights.remove(&height);
        Some(height)
    }

    fn pop_lowest(&mut self) -> Option<(u64, BlockHash)> {
        let (height, hash) = self.heights.pop_first()?;
        self.hashes.remove(&hash);
        Some((height, hash))
    }

    fn drain(&mut self) -> Vec<(u64, BlockHash)> {
        self.hashes.clear();
        std::mem::take(&mut self.heights).into_iter().collect()
    }
}

/// A single peer channel's share of the block download: the set of blocks reserved to it, the request bookkeeping
/// flags and the rolling import rate measured from its deliveries.
///
/// A reservation is shared between the owning peer session (which requests and imports) and the table (which
/// populates, partitions and prunes). All operations are safe under concurrent calls.
pub struct Reservation {
    slot: usize,
    rate_window: u64,
    clock: Arc<dyn Clock>,
    table: Weak<Reservations>,
    stopped: AtomicBool,
    rate: RwLock<Performance>,
    history: Mutex<VecDeque<ImportRecord>>,
    assigned: RwLock<AssignedBlocks>,
}

impl Reservation {
    pub(super) fn new(slot: usize, rate_window: u64, clock: Arc<dyn Clock>, table: Weak<Reservations>) -> Self {
        Self {
            slot,
            rate_window,
            clock,
            table,
            stopped: AtomicBool::new(false),
            rate: RwLock::new(Performance::idle()),
            history: Mutex::new(VecDeque::new()),
            assigned: RwLock::new(AssignedBlocks {
                pending: true,
                ..Default::default()
            }),
        }
    }

    /// Stable identifier of this reservation within the table. Never reused.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// True when work has arrived since the last request packet was built.
    pub fn pending(&self) -> bool {
        self.assigned.read().pending
    }

    pub fn set_pending(&self, pending: bool) {
        self.assigned.write().pending = pending;
    }

    /// Microseconds covered by a saturated rate window.
    pub fn rate_window(&self) -> u64 {
        self.rate_window
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.read().is_empty()
    }

    pub fn size(&self) -> usize {
        self.assigned.read().len()
    }

    pub fn start(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    /// Terminal for the owning channel. Clears the rate but leaves the assignment in place for the table to reclaim.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.reset();
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Shortcut for `rate().idle`.
    pub fn idle(&self) -> bool {
        self.rate.read().idle
    }

    /// A copy of the published rate.
    pub fn rate(&self) -> Performance {
        *self.rate.read()
    }

    pub(super) fn set_rate(&self, rate: Performance) {
        *self.rate.write() = rate;
    }

    /// Publishes the idle rate and clears the import history. The assignment is untouched.
    pub fn reset(&self) {
        self.set_rate(Performance::idle());
        self.history.lock().clear();
    }

    /// True if this channel's import rate is an outlier below the fleet mean. Idleness is ignored here; only an
    /// active channel tests itself.
    pub fn expired(&self) -> bool {
        let table = match self.table.upgrade() {
            Some(table) => table,
            None => return false,
        };
        let normal_rate = self.rate().normal();
        let statistics = table.rates();
        let deviation = normal_rate - statistics.arithmetic_mean;
        let allowed_deviation = EVICTION_MULTIPLE * statistics.standard_deviation;
        let below_average = deviation < 0.0;
        let outlier = deviation.abs() > allowed_deviation;
        below_average && outlier
    }

    /// Fold one import measurement into the rolling window and republish the rate once enough history exists.
    pub(super) fn update_rate(&self, events: u64, database: u64) {
        let mut rate = Performance {
            idle: false,
            events: 0,
            database: 0,
            window: 0,
        };

        let mut history = self.history.lock();
        let end = self.clock.now_micros();
        let event_start = end.saturating_sub(database);
        let cutoff = end.saturating_sub(self.rate_window);
        let history_count = history.len();

        while history.front().map_or(false, |record| record.time < cutoff) {
            history.pop_front();
        }

        let window_full = history_count > history.len();
        history.push_back(ImportRecord {
            events,
            database,
            time: event_start,
        });

        if history.len() < MINIMUM_HISTORY {
            return;
        }

        for record in history.iter() {
            rate.events = rate
                .events
                .checked_add(record.events)
                .expect("import event count overflowed");
            rate.database = rate
                .database
                .checked_add(record.database)
                .expect("import database cost overflowed");
        }

        let front_time = history.front().map(|record| record.time).unwrap_or(end);
        rate.window = if window_full {
            self.rate_window
        } else {
            end.saturating_sub(front_time)
        };

        drop(history);

        #[cfg(feature = "metrics")]
        {
            if window_full {
                super::metrics::full_rate_windows().inc();
            }
        }

        debug!(
            target: LOG_TARGET,
            "Records ({}) size: {} time: {:.6} cost: {:.6} full: {}",
            self.slot,
            rate.events,
            rate.window as f64 / MICRO_PER_SECOND as f64,
            rate.database as f64 / MICRO_PER_SECOND as f64,
            window_full
        );

        self.set_rate(rate);
    }

    /// Reserve a block to this channel. Reserving the same hash or height twice is a caller bug.
    pub fn insert(&self, hash: BlockHash, height: u64) {
        let mut assigned = self.assigned.write();
        assigned.pending = true;
        assigned.insert(hash, height);
    }

    /// Build the outstanding block request for this channel. A packet is only produced for a new channel or when new
    /// work arrived since the last request. Entries are ordered by ascending height.
    pub fn request(&self, new_channel: bool) -> GetData {
        // A new channel starts measuring from its next block.
        if new_channel {
            self.reset();
        }

        let assigned = self.assigned.upgradable_read();

        if !new_channel && !assigned.pending {
            return GetData::default();
        }

        let inventories = assigned.heights.values().map(|hash| Inventory::block(*hash)).collect();

        let mut assigned = RwLockUpgradableReadGuard::upgrade(assigned);
        assigned.pending = false;

        GetData::new(inventories)
    }

    /// Deliver a block received from the remote peer. The storage call is timed and feeds the rolling rate;
    /// unsolicited deliveries are dropped.
    pub fn import(&self, chain: &dyn BlockchainBackend, block: Arc<Block>) {
        let hash = block.hash();

        let height = match self.find_height_and_erase(&hash) {
            Some(height) => height,
            None => {
                debug!(
                    target: LOG_TARGET,
                    "Ignoring unsolicited block ({}) [{}]", self.slot, hash
                );
                return;
            },
        };

        // No reservation lock is held across the storage call.
        let start = self.clock.now_micros();
        let result = chain.update(block, height);
        let cost = self.clock.now_micros().saturating_sub(start);

        match result {
            Ok(()) => {
                self.update_rate(1, cost);
                #[cfg(feature = "metrics")]
                super::metrics::imported_blocks().inc();
                let record = self.rate();
                info!(
                    target: LOG_TARGET,
                    "Imported block #{} ({:02}) [{}] {:.2} {:.2}%",
                    height,
                    self.slot,
                    hash,
                    record.total() * MICRO_PER_SECOND as f64,
                    record.ratio() * 100.0
                );
            },
            Err(err) => {
                // The target was already erased and is not re-issued. Storage only refuses a solicited block when the
                // node is shutting down or the header chain it was validated against has been abandoned.
                warn!(
                    target: LOG_TARGET,
                    "Failed to import block #{} ({}) [{}]: {}", height, self.slot, hash, err
                );
            },
        }

        self.populate();
    }

    /// Ask the table for more work once the assignment drains. No reservation lock is held while calling into the
    /// table.
    pub fn populate(&self) {
        if !self.stopped() && self.is_empty() {
            if let Some(table) = self.table.upgrade() {
                table.populate(self);
            }
        }
    }

    /// A reservation that recently donated work re-arms itself here, so the owning channel requests its remaining
    /// blocks again. Returns whether the flag was consumed.
    pub fn toggle_partitioned(&self) -> bool {
        let assigned = self.assigned.upgradable_read();
        if assigned.partitioned {
            let mut assigned = RwLockUpgradableReadGuard::upgrade(assigned);
            assigned.pending = true;
            assigned.partitioned = false;
            return true;
        }
        false
    }

    /// Donate the lower half of this assignment to `minimal`, rounding up so the donor never keeps more than the
    /// donee plus one. Returns whether `minimal` received anything.
    ///
    /// Both assigned locks are taken here. The table mutex serializes all partition calls and nothing else acquires
    /// two assigned locks, so the acquisition order cannot deadlock.
    pub(super) fn partition(&self, minimal: &Reservation) -> bool {
        if !minimal.is_empty() {
            return true;
        }

        let mut donor = self.assigned.write();
        let mut donee = minimal.assigned.write();

        // Lowest heights move first so a slow donor stops holding up low-height imports.
        let offset = (donor.len() + 1) / 2;
        for _ in 0..offset {
            match donor.pop_lowest() {
                Some((height, hash)) => donee.insert(hash, height),
                None => break,
            }
        }

        let still_populated = !donor.is_empty();
        let received = !donee.is_empty();
        donor.partitioned = still_populated;
        donee.pending = received;
        drop(donee);
        drop(donor);

        if !still_populated {
            self.reset();
        }

        if received {
            debug!(
                target: LOG_TARGET,
                "Moved [{}] blocks from slot ({}) to ({}) leaving [{}]",
                minimal.size(),
                self.slot,
                minimal.slot,
                self.size()
            );
        }

        received
    }

    /// True if the given hash is currently reserved to this channel.
    pub(super) fn owns(&self, hash: &BlockHash) -> bool {
        self.assigned.read().hashes.contains_key(hash)
    }

    /// Hand the whole assignment back, lowest heights first.
    pub(super) fn drain_assigned(&self) -> Vec<(u64, BlockHash)> {
        self.assigned.write().drain()
    }

    fn find_height_and_erase(&self, hash: &BlockHash) -> Option<u64> {
        let assigned = self.assigned.upgradable_read();

        if !assigned.hashes.contains_key(hash) {
            return None;
        }

        let mut assigned = RwLockUpgradableReadGuard::upgrade(assigned);
        assigned.remove_by_hash(hash)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        common::clock::ManualClock,
        sync::test_support::{sample_block, sample_chain, MockChain},
    };

    const TEST_RATE_WINDOW: u64 = 15_000_000;

    fn new_reservation(clock: Arc<ManualClock>) -> Reservation {
        Reservation::new(0, TEST_RATE_WINDOW, clock, Weak::new())
    }

    fn new_reservation_with_window(clock: Arc<ManualClock>, rate_window: u64) -> Reservation {
        Reservation::new(0, rate_window, clock, Weak::new())
    }

    #[test]
    fn new_reservation_is_idle_empty_and_pending() {
        let reservation = new_reservation(Arc::new(ManualClock::new(0)));
        assert_eq!(reservation.slot(), 0);
        assert_eq!(reservation.rate_window(), TEST_RATE_WINDOW);
        assert!(reservation.pending());
        assert!(reservation.idle());
        assert!(reservation.is_empty());
        assert_eq!(reservation.size(), 0);
        assert!(!reservation.stopped());
    }

    #[test]
    fn request_after_insert_contains_the_inserted_block() {
        let reservation = new_reservation(Arc::new(ManualClock::new(0)));
        let hash = BlockHash::random();
        reservation.insert(hash, 5);

        let packet = reservation.request(false);
        assert_eq!(packet.len(), 1);
        assert_eq!(packet.inventories()[0].hash, hash);

        // Nothing new arrived, so the next request is empty.
        let packet = reservation.request(false);
        assert!(packet.is_empty());
    }

    #[test]
    fn request_orders_inventories_by_ascending_height() {
        let reservation = new_reservation(Arc::new(ManualClock::new(0)));
        let (high, mid, low) = (BlockHash::random(), BlockHash::random(), BlockHash::random());
        reservation.insert(high, 30);
        reservation.insert(low, 10);
        reservation.insert(mid, 20);

        let packet = reservation.request(true);
        let hashes: Vec<_> = packet.inventories().iter().map(|inv| inv.hash).collect();
        assert_eq!(hashes, vec![low, mid, high]);
    }

    #[test]
    fn request_for_new_channel_resets_rate_and_ignores_pending() {
        let clock = Arc::new(ManualClock::new(0));
        let reservation = new_reservation(clock.clone());
        for _ in 0..3 {
            clock.advance(100);
            reservation.update_rate(1, 100);
        }
        assert!(!reservation.idle());

        reservation.insert(BlockHash::random(), 1);
        reservation.set_pending(false);

        let packet = reservation.request(true);
        assert_eq!(packet.len(), 1);
        assert!(reservation.idle());
        assert!(!reservation.pending());
    }

    #[test]
    fn rate_publishes_only_after_minimum_history() {
        let clock = Arc::new(ManualClock::new(0));
        let chain = MockChain::new(clock.clone(), 100);
        let reservation = new_reservation(clock);

        let (blocks, targets) = sample_chain(3, 1);
        for target in &targets {
            reservation.insert(target.hash, target.height);
        }

        reservation.import(chain.as_ref(), blocks[0].clone());
        reservation.import(chain.as_ref(), blocks[1].clone());
        assert!(reservation.idle());

        reservation.import(chain.as_ref(), blocks[2].clone());
        let rate = reservation.rate();
        assert!(!rate.idle);
        assert_eq!(rate.events, 3);
        assert_eq!(rate.database, 300);
        assert_eq!(rate.window, 300);

        let imported = chain.imported();
        assert_eq!(imported.len(), 3);
        assert_eq!(imported[0].1, 1);
        assert_eq!(imported[2].1, 3);
        assert!(reservation.is_empty());
    }

    #[test]
    fn rate_sums_cover_the_whole_history() {
        let clock = Arc::new(ManualClock::new(0));
        let reservation = new_reservation(clock.clone());

        for cost in [100, 250, 400] {
            clock.advance(cost);
            reservation.update_rate(1, cost);
        }

        let rate = reservation.rate();
        assert_eq!(rate.events, 3);
        assert_eq!(rate.database, 750);
        // Window spans from the first event start to the last update.
        assert_eq!(rate.window, 750);
    }

    #[test]
    fn update_rate_trims_samples_outside_the_window() {
        let clock = Arc::new(ManualClock::new(0));
        let reservation = new_reservation_with_window(clock.clone(), 350);

        for _ in 0..3 {
            clock.advance(100);
            reservation.update_rate(1, 100);
        }
        assert_eq!(reservation.rate().window, 300);

        // The fourth sample pushes the first one past the 350us window; the published window clamps to the
        // configured width.
        clock.advance(100);
        reservation.update_rate(1, 100);

        let rate = reservation.rate();
        assert_eq!(rate.events, 3);
        assert_eq!(rate.window, 350);
        assert_eq!(reservation.history.lock().len(), 3);
    }

    #[test]
    fn unsolicited_import_changes_nothing() {
        let clock = Arc::new(ManualClock::new(0));
        let chain = MockChain::new(clock.clone(), 100);
        let reservation = new_reservation(clock);

        reservation.insert(BlockHash::random(), 1);
        reservation.insert(BlockHash::random(), 2);

        reservation.import(chain.as_ref(), sample_block(999));

        assert!(chain.imported().is_empty());
        assert_eq!(reservation.size(), 2);
        assert!(reservation.history.lock().is_empty());
        assert!(reservation.idle());
    }

    #[test]
    fn failed_import_records_no_sample() {
        let clock = Arc::new(ManualClock::new(0));
        let chain = MockChain::new(clock.clone(), 100);
        chain.set_failing(true);
        let reservation = new_reservation(clock);

        let block = sample_block(1);
        reservation.insert(block.hash(), 1);
        reservation.import(chain.as_ref(), block);

        // The target is consumed either way, but the rate history is untouched.
        assert!(reservation.is_empty());
        assert!(chain.imported().is_empty());
        assert!(reservation.history.lock().is_empty());
    }

    #[test]
    fn stop_clears_rate_and_history_but_not_assignment() {
        let clock = Arc::new(ManualClock::new(0));
        let reservation = new_reservation(clock.clone());
        reservation.insert(BlockHash::random(), 7);
        for _ in 0..3 {
            clock.advance(100);
            reservation.update_rate(1, 100);
        }
        assert!(!reservation.idle());

        reservation.stop();

        assert!(reservation.stopped());
        assert!(reservation.idle());
        assert!(reservation.history.lock().is_empty());
        assert_eq!(reservation.size(), 1);

        reservation.start();
        assert!(!reservation.stopped());
    }

    #[test]
    fn partition_moves_the_lower_half() {
        let clock = Arc::new(ManualClock::new(0));
        let donor = new_reservation(clock.clone());
        let donee = Reservation::new(1, TEST_RATE_WINDOW, clock, Weak::new());

        let (_, targets) = sample_chain(10, 1);
        for target in &targets {
            donor.insert(target.hash, target.height);
        }

        assert!(donor.partition(&donee));

        assert_eq!(donor.size(), 5);
        assert_eq!(donee.size(), 5);
        assert!(donee.pending());

        let donee_heights: Vec<_> = donee.drain_assigned().iter().map(|(height, _)| *height).collect();
        assert_eq!(donee_heights, vec![1, 2, 3, 4, 5]);
        let donor_heights: Vec<_> = donor.drain_assigned().iter().map(|(height, _)| *height).collect();
        assert_eq!(donor_heights, vec![6, 7, 8, 9, 10]);
    }

    #[test]
    fn partition_rounds_up_towards_the_donee() {
        let clock = Arc::new(ManualClock::new(0));
        let donor = new_reservation(clock.clone());
        let donee = Reservation::new(1, TEST_RATE_WINDOW, clock, Weak::new());

        let (_, targets) = sample_chain(5, 1);
        for target in &targets {
            donor.insert(target.hash, target.height);
        }

        assert!(donor.partition(&donee));
        assert_eq!(donor.size(), 2);
        assert_eq!(donee.size(), 3);
        assert!(donor.toggle_partitioned());
        // The flag is consumed by the toggle.
        assert!(!donor.toggle_partitioned());
        assert!(donor.pending());
    }

    #[test]
    fn partition_of_a_single_target_empties_and_resets_the_donor() {
        let clock = Arc::new(ManualClock::new(0));
        let donor = new_reservation(clock.clone());
        let donee = Reservation::new(1, TEST_RATE_WINDOW, clock.clone(), Weak::new());

        for _ in 0..3 {
            clock.advance(100);
            donor.update_rate(1, 100);
        }
        donor.insert(BlockHash::random(), 1);

        assert!(donor.partition(&donee));
        assert!(donor.is_empty());
        assert_eq!(donee.size(), 1);
        // The donor gave everything away, so it is reset rather than flagged.
        assert!(donor.idle());
        assert!(!donor.toggle_partitioned());
    }

    #[test]
    fn partition_into_a_populated_donee_is_a_noop() {
        let clock = Arc::new(ManualClock::new(0));
        let donor = new_reservation(clock.clone());
        let donee = Reservation::new(1, TEST_RATE_WINDOW, clock, Weak::new());

        donor.insert(BlockHash::random(), 1);
        donee.insert(BlockHash::random(), 2);

        assert!(donor.partition(&donee));
        assert_eq!(donor.size(), 1);
        assert_eq!(donee.size(), 1);
    }

    #[test]
    fn expired_is_false_without_a_table() {
        let reservation = new_reservation(Arc::new(ManualClock::new(0)));
        assert!(!reservation.expired());
    }

    #[test]
    #[should_panic(expected = "reserved twice")]
    fn duplicate_insert_is_a_contract_violation() {
        let reservation = new_reservation(Arc::new(ManualClock::new(0)));
        let hash = BlockHash::random();
        reservation.insert(hash, 1);
        reservation.insert(hash, 2);
    }
}
