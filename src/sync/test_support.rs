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

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;

use crate::{
    blocks::{Block, BlockHash, BlockHeader},
    chain_storage::{BlockchainBackend, ChainStorageError},
    common::clock::ManualClock,
    sync::BlockTarget,
};

/// Deterministic block fixture; distinct nonces yield distinct hashes.
pub fn sample_block(nonce: u64) -> Arc<Block> {
    let mut header = BlockHeader::new(1);
    header.nonce = nonce;
    Arc::new(Block::new(header, Vec::new()))
}

/// Blocks at heights `start_height..start_height + count`, plus their download targets.
pub fn sample_chain(count: u64, start_height: u64) -> (Vec<Arc<Block>>, Vec<BlockTarget>) {
    let blocks: Vec<_> = (0..count).map(|i| sample_block(start_height + i)).collect();
    let targets = blocks
        .iter()
        .enumerate()
        .map(|(i, block)| BlockTarget {
            hash: block.hash(),
            height: start_height + i as u64,
        })
        .collect();
    (blocks, targets)
}

/// Chain backend that advances the shared test clock by a fixed cost per import.
pub struct MockChain {
    clock: Arc<ManualClock>,
    cost: u64,
    fail: AtomicBool,
    imported: Mutex<Vec<(BlockHash, u64)>>,
}

impl MockChain {
    pub fn new(clock: Arc<ManualClock>, cost: u64) -> Arc<Self> {
        Arc::new(Self {
            clock,
            cost,
            fail: AtomicBool::new(false),
            imported: Mutex::new(Vec::new()),
        })
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn imported(&self) -> Vec<(BlockHash, u64)> {
        self.imported.lock().clone()
    }
}

impl BlockchainBackend for MockChain {
    fn update(&self, block: Arc<Block>, height: u64) -> Result<(), ChainStorageError> {
        self.clock.advance(self.cost);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChainStorageError::ShutdownInProgress);
        }
        self.imported.lock().push((block.hash(), height));
        Ok(())
    }
}
