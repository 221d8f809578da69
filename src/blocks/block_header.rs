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

use blake2::Blake2b;
use digest::{consts::U32, Digest};
use serde::{Deserialize, Serialize};

use crate::blocks::BlockHash;

/// The proof-of-work block header. Headers do not carry a height; during download the height of a solicited block is
/// tracked by the scheduler against the header hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u16,
    /// Hash of the preceding block in the chain.
    pub prev_hash: BlockHash,
    /// Merkle root of the block body.
    pub merkle_root: BlockHash,
    /// Seconds since the Unix epoch, as claimed by the miner.
    pub timestamp: u64,
    /// Compact encoding of the proof-of-work target.
    pub bits: u32,
    pub nonce: u64,
}

impl BlockHeader {
    pub fn new(version: u16) -> Self {
        Self {
            version,
            prev_hash: BlockHash::default(),
            merkle_root: BlockHash::default(),
            timestamp: 0,
            bits: 0,
            nonce: 0,
        }
    }

    /// The content hash identifying this block.
    pub fn hash(&self) -> BlockHash {
        let digest = Blake2b::<U32>::new()
            .chain_update(self.version.to_le_bytes())
            .chain_update(self.prev_hash.as_bytes())
            .chain_update(self.merkle_root.as_bytes())
            .chain_update(self.timestamp.to_le_bytes())
            .chain_update(self.bits.to_le_bytes())
            .chain_update(self.nonce.to_le_bytes())
            .finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest);
        BlockHash::new(hash)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hash_commits_to_every_field() {
        let header = BlockHeader::new(1);
        let base = header.hash();

        let mut changed = header.clone();
        changed.nonce = 1;
        assert_ne!(changed.hash(), base);

        let mut changed = header.clone();
        changed.timestamp = 1;
        assert_ne!(changed.hash(), base);

        let mut changed = header;
        changed.prev_hash = BlockHash::new([7u8; 32]);
        assert_ne!(changed.hash(), base);
    }

    #[test]
    fn hash_is_stable_for_equal_headers() {
        let a = BlockHeader::new(2);
        let b = BlockHeader::new(2);
        assert_eq!(a.hash(), b.hash());
    }
}
