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
    collections::VecDeque,
    sync::{Arc, Weak},
};

use log::*;
use parking_lot::{Mutex, RwLock};

use crate::{
    blocks::Block,
    chain_storage::BlockchainBackend,
    common::clock::{Clock, MonotonicClock},
    sync::{
        config::BlockDownloadConfig,
        hooks::Hooks,
        performance::Statistics,
        reservation::Reservation,
        BlockTarget,
        MICRO_PER_SECOND,
    },
};

const LOG_TARGET: &str = "c::bn::sync::reservations";

/// The hash source feeding the table: upcoming block targets in strictly increasing height order. May be finite (the
/// sync completes) or effectively unbounded (catch-up).
pub type TargetSource = Box<dyn Iterator<Item = BlockTarget> + Send>;

struct TableInner {
    rows: Vec<Arc<Reservation>>,
    hashes: VecDeque<BlockTarget>,
    source: TargetSource,
    next_slot: usize,
}

impl TableInner {
    /// Pull up to `count` targets from the source into the unassigned queue.
    fn drain_source(&mut self, count: usize) {
        for _ in 0..count {
            match self.source.next() {
                Some(target) => self.hashes.push_back(target),
                None => break,
            }
        }
    }
}

/// The fleet-wide allocator. Owns the unassigned target queue and one reservation per peer channel, hands out work on
/// demand, rebalances it when a channel is starved and drops channels whose import rate falls too far below the
/// fleet.
///
/// The table mutex is acquired before any per-reservation lock, and reservations never call back into the table while
/// holding their own locks.
pub struct Reservations {
    inner: Mutex<TableInner>,
    chain: Arc<dyn BlockchainBackend>,
    config: BlockDownloadConfig,
    clock: Arc<dyn Clock>,
    hooks: RwLock<Hooks>,
}

impl Reservations {
    /// Create a table with `peer_count` empty reservations and an initial drain of the target source.
    pub fn new(
        chain: Arc<dyn BlockchainBackend>,
        source: TargetSource,
        peer_count: usize,
        config: BlockDownloadConfig,
    ) -> Arc<Self> {
        Self::with_clock(chain, source, peer_count, config, Arc::new(MonotonicClock::new()))
    }

    /// As [`Reservations::new`], with an explicit time source.
    pub fn with_clock(
        chain: Arc<dyn BlockchainBackend>,
        source: TargetSource,
        peer_count: usize,
        config: BlockDownloadConfig,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let table = Arc::new_cyclic(|weak: &Weak<Reservations>| {
            let rows = (0..peer_count)
                .map(|slot| {
                    Arc::new(Reservation::new(
                        slot,
                        config.rate_window_micros(),
                        clock.clone(),
                        weak.clone(),
                    ))
                })
                .collect();
            Self {
                inner: Mutex::new(TableInner {
                    rows,
                    hashes: VecDeque::new(),
                    source,
                    next_slot: peer_count,
                }),
                chain,
                config,
                clock,
                hooks: RwLock::new(Hooks::default()),
            }
        });

        {
            let mut inner = table.inner.lock();
            let initial = table.config.max_request_size.saturating_mul(peer_count);
            inner.drain_source(initial);
        }

        table
    }

    /// The storage collaborator blocks are imported into.
    pub fn chain(&self) -> Arc<dyn BlockchainBackend> {
        self.chain.clone()
    }

    /// Snapshot of the current rows.
    pub fn rows(&self) -> Vec<Arc<Reservation>> {
        self.inner.lock().rows.clone()
    }

    /// Register a hook invoked when `prune` drops a channel. The session layer uses this to tear the channel down.
    pub fn on_evict<H>(&self, hook: H)
    where H: Fn(&Arc<Reservation>) + Send + Sync + 'static {
        self.hooks.write().add_on_evict_hook(hook);
    }

    /// Reserve a row for a newly attached peer channel. Slots are stable and never reused.
    pub fn attach(self: &Arc<Self>) -> Arc<Reservation> {
        let mut inner = self.inner.lock();
        let slot = inner.next_slot;
        inner.next_slot += 1;
        let row = Arc::new(Reservation::new(
            slot,
            self.config.rate_window_micros(),
            self.clock.clone(),
            Arc::downgrade(self),
        ));
        inner.rows.push(row.clone());
        row
    }

    /// Detach a row when its peer disconnects. Outstanding work is reclaimed. Remaining slots keep their identity.
    pub fn remove(&self, row: &Reservation) {
        {
            let mut inner = self.inner.lock();
            inner.rows.retain(|other| other.slot() != row.slot());
        }
        self.reclaim(row);
        debug!(target: LOG_TARGET, "Removed reservation ({})", row.slot());
    }

    /// Top `row` up from the unassigned queue, pulling lazily from the source. When both are dry the richest row
    /// donates half its assignment, so a starved channel gets work even while incumbents hold the rest of the chain.
    pub fn populate(&self, row: &Reservation) {
        let mut inner = self.inner.lock();

        let deficit = self.config.max_request_size.saturating_sub(row.size());
        if inner.hashes.len() < deficit {
            let shortfall = deficit - inner.hashes.len();
            inner.drain_source(shortfall);
        }

        let mut reserved = 0usize;
        while row.size() < self.config.max_request_size {
            match inner.hashes.pop_front() {
                Some(target) => {
                    row.insert(target.hash, target.height);
                    reserved += 1;
                },
                None => break,
            }
        }

        if reserved > 0 {
            debug!(
                target: LOG_TARGET,
                "Reserved [{}] blocks to slot ({})", reserved, row.slot()
            );
            return;
        }

        if !row.is_empty() {
            return;
        }

        // Queue and source are dry. Take half of the largest active assignment.
        let maximal = inner
            .rows
            .iter()
            .filter(|other| other.slot() != row.slot() && !other.stopped() && other.size() > 0)
            .max_by_key(|other| other.size())
            .cloned();

        if let Some(maximal) = maximal {
            maximal.partition(row);
        }
    }

    /// Import-rate statistics across the rows that have published a rate.
    pub fn rates(&self) -> Statistics {
        let rows = self.inner.lock().rows.clone();

        let normals: Vec<f64> = rows
            .iter()
            .filter(|row| !row.idle())
            .map(|row| row.rate().normal())
            .collect();

        let active_count = normals.len();
        if active_count == 0 {
            return Statistics::default();
        }

        let arithmetic_mean = normals.iter().sum::<f64>() / active_count as f64;
        let standard_deviation = if active_count < 2 {
            0.0
        } else {
            let variance = normals
                .iter()
                .map(|normal| (normal - arithmetic_mean).powi(2))
                .sum::<f64>() /
                active_count as f64;
            variance.sqrt()
        };

        Statistics {
            arithmetic_mean,
            standard_deviation,
            active_count,
        }
    }

    /// Drop outlier channels. Expired rows are stopped, their work is reclaimed and the eviction hooks fire so the
    /// session layer tears the channels down.
    pub fn prune(&self) {
        let rows = self.inner.lock().rows.clone();

        for row in rows {
            if row.stopped() || row.idle() {
                continue;
            }
            if row.expired() {
                warn!(
                    target: LOG_TARGET,
                    "Dropping slow channel ({}) importing at {:.2} blocks/s",
                    row.slot(),
                    row.rate().normal() * MICRO_PER_SECOND as f64
                );
                row.stop();
                self.reclaim(&row);
                #[cfg(feature = "metrics")]
                super::metrics::evicted_peers().inc();
                self.hooks.read().call_on_evict_hooks(&row);
            }
        }
    }

    /// Route a received block to the owning row. The usual path is the session calling [`Reservation::import`]
    /// directly; this lookup covers callers that only hold the table.
    pub fn import(&self, block: Arc<Block>) {
        let hash = block.hash();
        let owner = {
            let inner = self.inner.lock();
            inner.rows.iter().find(|row| row.owns(&hash)).cloned()
        };

        match owner {
            Some(row) => row.import(self.chain.as_ref(), block),
            None => debug!(target: LOG_TARGET, "Ignoring unsolicited block [{}]", hash),
        }
    }

    /// Return a row's assignment to the unassigned queue, keeping the lowest heights at the head so they are
    /// re-issued first.
    fn reclaim(&self, row: &Reservation) {
        let targets = row.drain_assigned();
        if targets.is_empty() {
            return;
        }

        let mut inner = self.inner.lock();
        for (height, hash) in targets.into_iter().rev() {
            inner.hashes.push_front(BlockTarget { hash, height });
        }
    }
}
