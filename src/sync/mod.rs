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

mod config;
mod hooks;
mod messages;
#[cfg(feature = "metrics")]
mod metrics;
mod performance;
mod reservation;
mod reservations;

#[cfg(test)]
mod test_support;

pub use config::BlockDownloadConfig;
pub use messages::{GetData, Inventory, InventoryType};
pub use performance::{Performance, Statistics};
pub use reservation::Reservation;
pub use reservations::{Reservations, TargetSource};

use serde::{Deserialize, Serialize};

use crate::blocks::BlockHash;

/// A block awaiting download, identified by content hash and chain height. Heights are unique within a sync session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTarget {
    pub hash: BlockHash,
    pub height: u64,
}

/// The number of import samples a channel must accumulate before a rate is published. Below this the channel reads as
/// idle and is excluded from fleet statistics.
pub(crate) const MINIMUM_HISTORY: usize = 3;

// The allowed number of standard deviations below the fleet mean before a channel is dropped.
// With one channel there is no deviation, so nothing is dropped.
// With two channels a multiple below 1.0 drops a channel on every test and one above 1.0 prevents all drops.
// With three or more channels the multiple bounds the allowed deviation; the 1% slack stops jitter at the threshold
// from dropping a channel that is merely average-slow.
pub(crate) const EVICTION_MULTIPLE: f64 = 1.01;

/// Conversion factor between the microsecond counters used internally and the per-second figures reported in logs.
pub(crate) const MICRO_PER_SECOND: u64 = 1_000_000;
