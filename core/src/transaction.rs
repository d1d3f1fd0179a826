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

//! Transactions as the pool sees them: simple value transfers between
//! string addresses, in atomic units. Signature validation belongs to the
//! chain, not here.

use crate::hash::Hash;
use chrono::Utc;
use num_bigint::BigUint;

/// A value transfer. The coinbase form has an empty sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
	/// Sender address, empty for coinbase
	pub from: String,
	/// Recipient address
	pub to: String,
	/// Amount in atomic units
	pub amount: BigUint,
	/// Creation time, unix seconds
	pub timestamp: i64,
	/// Transaction identity
	pub hash: Hash,
}

impl Transaction {
	/// Build a transfer from `from` to `to`, stamped now.
	pub fn new(from: &str, to: &str, amount: BigUint) -> Transaction {
		Self::with_timestamp(from, to, amount, Utc::now().timestamp())
	}

	/// Build a transfer with an explicit timestamp.
	pub fn with_timestamp(from: &str, to: &str, amount: BigUint, timestamp: i64) -> Transaction {
		let hash = Self::compute_hash(from, to, &amount, timestamp);
		Transaction {
			from: from.to_string(),
			to: to.to_string(),
			amount,
			timestamp,
			hash,
		}
	}

	/// Build the coinbase transaction paying the block subsidy to `to`.
	pub fn coinbase(to: &str, amount: BigUint, timestamp: i64) -> Transaction {
		Self::with_timestamp("", to, amount, timestamp)
	}

	/// Coinbase transactions have no sender.
	pub fn is_coinbase(&self) -> bool {
		self.from.is_empty()
	}

	fn compute_hash(from: &str, to: &str, amount: &BigUint, timestamp: i64) -> Hash {
		let mut buf = Vec::new();
		buf.extend_from_slice(from.as_bytes());
		buf.extend_from_slice(to.as_bytes());
		buf.extend_from_slice(&amount.to_bytes_be());
		buf.extend_from_slice(&timestamp.to_le_bytes());
		Hash::from_data(&buf)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn coinbase_has_no_sender() {
		let tx = Transaction::coinbase("pool-addr", BigUint::from(50u32), 1640995200);
		assert!(tx.is_coinbase());
		assert_eq!(tx.to, "pool-addr");
	}

	#[test]
	fn hash_commits_to_fields() {
		let a = Transaction::with_timestamp("x", "y", BigUint::from(1u32), 1);
		let b = Transaction::with_timestamp("x", "y", BigUint::from(2u32), 1);
		let c = Transaction::with_timestamp("x", "y", BigUint::from(1u32), 1);
		assert_ne!(a.hash, b.hash);
		assert_eq!(a.hash, c.hash);
	}
}
