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

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, IntCounter};

pub fn imported_blocks() -> &'static IntCounter {
    static METER: Lazy<IntCounter> = Lazy::new(|| {
        register_int_counter!(
            "base_node::sync::imported_blocks",
            "Number of blocks imported by the download scheduler"
        )
        .unwrap()
    });

    &METER
}

pub fn full_rate_windows() -> &'static IntCounter {
    static METER: Lazy<IntCounter> = Lazy::new(|| {
        register_int_counter!(
            "base_node::sync::full_rate_windows",
            "Number of rate updates computed over a saturated history window"
        )
        .unwrap()
    });

    &METER
}

pub fn evicted_peers() -> &'static IntCounter {
    static METER: Lazy<IntCounter> = Lazy::new(|| {
        register_int_counter!(
            "base_node::sync::evicted_peers",
            "Number of peer channels dropped for importing below the fleet rate"
        )
        .unwrap()
    });

    &METER
}
