// Copyright 2020 The Alerim Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Blocks and block headers. The header hash commits to every header
//! field; the pool recomputes it for each submitted share, so the byte
//! layout here is load-bearing for share validation.

use crate::hash::Hash;
use crate::merkle::merkle_root;
use crate::pow;
use crate::transaction::Transaction;
use num_bigint::BigUint;

/// Block header, the part miners search a nonce for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
	/// Protocol version
	pub version: u32,
	/// Creation time, unix seconds
	pub timestamp: i64,
	/// Hash of the previous block header
	pub prev_hash: Hash,
	/// Merkle root over the block's transactions
	pub merkle_root: Hash,
	/// Difficulty this header was mined against
	pub difficulty: BigUint,
	/// The solution nonce
	pub nonce: u64,
}

impl BlockHeader {
	/// SHA-256 over the serialized header fields. Integers little-endian,
	/// hashes raw, difficulty as its minimal big-endian magnitude.
	pub fn hash(&self) -> Hash {
		let mut buf = Vec::with_capacity(96);
		buf.extend_from_slice(&self.version.to_le_bytes());
		buf.extend_from_slice(&self.timestamp.to_le_bytes());
		buf.extend_from_slice(self.prev_hash.as_bytes());
		buf.extend_from_slice(self.merkle_root.as_bytes());
		buf.extend_from_slice(&self.difficulty.to_bytes_be());
		buf.extend_from_slice(&self.nonce.to_le_bytes());
		Hash::from_data(&buf)
	}

	/// Does this header's hash meet its own difficulty?
	pub fn validate_pow(&self) -> bool {
		pow::meets_difficulty(&self.hash(), &self.difficulty)
	}
}

/// A full block: header plus ordered transactions, coinbase first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
	/// The header
	pub header: BlockHeader,
	/// Transactions committed by the header's Merkle root
	pub transactions: Vec<Transaction>,
}

impl Block {
	/// Assemble a block from its parts, computing the Merkle root.
	pub fn new(
		version: u32,
		timestamp: i64,
		prev_hash: Hash,
		difficulty: BigUint,
		transactions: Vec<Transaction>,
	) -> Block {
		let merkle_root = merkle_root(&transactions);
		Block {
			header: BlockHeader {
				version,
				timestamp,
				prev_hash,
				merkle_root,
				difficulty,
				nonce: 0,
			},
			transactions,
		}
	}

	/// The block identity, its header hash.
	pub fn hash(&self) -> Hash {
		self.header.hash()
	}

	/// Check the header's Merkle root matches the transactions carried.
	pub fn verify_merkle_root(&self) -> bool {
		self.header.merkle_root == merkle_root(&self.transactions)
	}

	/// Search nonces until the header meets its difficulty. Test helper,
	/// only practical at the trivial difficulties tests use.
	pub fn mine(&mut self) {
		while !self.header.validate_pow() {
			self.header.nonce += 1;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::hash::ZERO_HASH;
	use num_traits::One;

	fn sample_block() -> Block {
		let txs = vec![Transaction::coinbase(
			"pool",
			BigUint::from(50u32),
			1640995200,
		)];
		Block::new(1, 1640995200, ZERO_HASH, BigUint::one(), txs)
	}

	#[test]
	fn nonce_changes_hash() {
		let mut b = sample_block();
		let h0 = b.hash();
		b.header.nonce = 1;
		assert_ne!(h0, b.hash());
	}

	#[test]
	fn merkle_root_matches_transactions() {
		let b = sample_block();
		assert!(b.verify_merkle_root());
		let mut tampered = b.clone();
		tampered.transactions.push(Transaction::coinbase(
			"other",
			BigUint::from(1u32),
			0,
		));
		assert!(!tampered.verify_merkle_root());
	}

	#[test]
	fn trivial_difficulty_mines_instantly() {
		let mut b = sample_block();
		b.mine();
		assert!(b.header.validate_pow());
	}
}
