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

use serde::{Deserialize, Serialize};

/// Immutable snapshot of one channel's rolling import rate. Published atomically; readers always observe a complete
/// record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Performance {
    /// True until enough import history has accumulated to measure a rate.
    pub idle: bool,
    /// Blocks imported within the window.
    pub events: u64,
    /// Microseconds spent inside storage calls within the window.
    pub database: u64,
    /// Microseconds covered by the window.
    pub window: u64,
}

impl Performance {
    /// The record published before any rate has been measured, and again after a reset.
    pub const fn idle() -> Self {
        Self {
            idle: true,
            events: 0,
            database: 0,
            window: 0,
        }
    }

    /// Blocks per microsecond over the window.
    pub fn normal(&self) -> f64 {
        if self.window == 0 {
            return 0.0;
        }
        self.events as f64 / self.window as f64
    }

    /// Blocks per microsecond counting storage time on top of the window.
    pub fn total(&self) -> f64 {
        let denominator = self.database.saturating_add(self.window);
        if denominator == 0 {
            return 0.0;
        }
        self.events as f64 / denominator as f64
    }

    /// Fraction of wall clock spent inside storage calls.
    pub fn ratio(&self) -> f64 {
        if self.window == 0 {
            return 0.0;
        }
        self.database as f64 / self.window as f64
    }
}

impl Default for Performance {
    fn default() -> Self {
        Self::idle()
    }
}

/// Aggregate import-rate statistics over the channels that have published a rate.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Statistics {
    pub arithmetic_mean: f64,
    pub standard_deviation: f64,
    pub active_count: usize,
}
