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

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sync::MINIMUM_HISTORY;

// A remote peer is asked for at most this many blocks in a single request. Note that the remote node might not be
// willing to provide this many blocks in a single response.
const MAX_REQUEST_SIZE: usize = 50;

// Expected worst-case time for one block to be delivered and imported.
const BLOCK_LATENCY: Duration = Duration::from_secs(5);

/// Configuration for the parallel block download scheduler.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct BlockDownloadConfig {
    /// Upper bound on the number of blocks reserved to one peer channel at a time. Default: 50
    pub max_request_size: usize,
    /// Expected per-block delivery latency. Sizes the rolling window over which each channel's import rate is
    /// measured. Default: 5s
    pub block_latency: Duration,
}

impl Default for BlockDownloadConfig {
    fn default() -> Self {
        Self {
            max_request_size: MAX_REQUEST_SIZE,
            block_latency: BLOCK_LATENCY,
        }
    }
}

impl BlockDownloadConfig {
    /// The sliding window over which a channel's import rate is measured, in microseconds. Fixed for the lifetime of
    /// a reservation.
    pub(crate) fn rate_window_micros(&self) -> u64 {
        (MINIMUM_HISTORY as u64).saturating_mul(u64::try_from(self.block_latency.as_micros()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_rate_window_covers_minimum_history() {
        let config = BlockDownloadConfig::default();
        assert_eq!(config.max_request_size, 50);
        assert_eq!(config.rate_window_micros(), 15_000_000);
    }
}
