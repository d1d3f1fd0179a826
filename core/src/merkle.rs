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

//! Merkle root over transaction hashes. Odd levels duplicate their last
//! element, bitcoin-style.

use crate::hash::{Hash, ZERO_HASH};
use crate::transaction::Transaction;
use sha2::{Digest, Sha256};

/// Compute the Merkle root committing to the given transactions, in order.
/// An empty set commits to the zero hash.
pub fn merkle_root(txs: &[Transaction]) -> Hash {
	if txs.is_empty() {
		return ZERO_HASH;
	}

	let mut level: Vec<Hash> = txs.iter().map(|tx| tx.hash).collect();
	while level.len() > 1 {
		if level.len() % 2 != 0 {
			let last = *level.last().unwrap();
			level.push(last);
		}
		level = level
			.chunks(2)
			.map(|pair| {
				let mut hasher = Sha256::new();
				hasher.update(pair[0].as_bytes());
				hasher.update(pair[1].as_bytes());
				let mut hash = [0; 32];
				hash.copy_from_slice(&hasher.finalize());
				Hash(hash)
			})
			.collect();
	}
	level[0]
}

#[cfg(test)]
mod tests {
	use super::*;
	use num_bigint::BigUint;

	fn tx(n: u32) -> Transaction {
		Transaction::with_timestamp("a", "b", BigUint::from(n), n as i64)
	}

	#[test]
	fn empty_set_is_zero() {
		assert_eq!(merkle_root(&[]), ZERO_HASH);
	}

	#[test]
	fn single_tx_root_is_its_hash() {
		let t = tx(1);
		assert_eq!(merkle_root(&[t.clone()]), t.hash);
	}

	#[test]
	fn odd_count_duplicates_last() {
		// three leaves hash like four with the last doubled
		let txs: Vec<_> = (1..=3).map(tx).collect();
		let mut padded = txs.clone();
		padded.push(txs[2].clone());
		assert_eq!(merkle_root(&txs), merkle_root(&padded));
	}

	#[test]
	fn order_matters() {
		let a = [tx(1), tx(2)];
		let b = [tx(2), tx(1)];
		assert_ne!(merkle_root(&a), merkle_root(&b));
	}
}
