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

//! Definition of the genesis block. The genesis header is accepted as-is,
//! without a proof-of-work check.

use crate::block::Block;
use crate::consensus::HEADER_VERSION;
use crate::hash::ZERO_HASH;
use num_bigint::BigUint;

/// Genesis timestamp: 2022-01-01 00:00:00 UTC
pub const GENESIS_TIMESTAMP: i64 = 1640995200;

/// The first block of the chain, mined against the given starting
/// difficulty.
pub fn genesis(difficulty: BigUint) -> Block {
	Block::new(HEADER_VERSION, GENESIS_TIMESTAMP, ZERO_HASH, difficulty, vec![])
}

#[cfg(test)]
mod tests {
	use super::*;
	use num_traits::One;

	#[test]
	fn genesis_is_deterministic() {
		let a = genesis(BigUint::one());
		let b = genesis(BigUint::one());
		assert_eq!(a.hash(), b.hash());
		assert_eq!(a.header.prev_hash, ZERO_HASH);
	}
}
