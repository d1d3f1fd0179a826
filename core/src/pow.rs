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

//! Proof-of-work target arithmetic. Difficulty is an arbitrary-precision
//! integer; the matching target is 2^256 / difficulty and a hash meets the
//! difficulty when, read as a big-endian integer, it is strictly below the
//! target.

use crate::hash::Hash;
use num_bigint::BigUint;
use num_traits::One;

/// The numeric target a hash must stay under for the given difficulty.
pub fn target_for(difficulty: &BigUint) -> BigUint {
	let space = BigUint::one() << 256usize;
	if difficulty.bits() == 0 {
		return space;
	}
	space / difficulty
}

/// Whether the hash meets (is strictly below the target of) the given
/// difficulty.
pub fn meets_difficulty(hash: &Hash, difficulty: &BigUint) -> bool {
	let value = BigUint::from_bytes_be(hash.as_bytes());
	value < target_for(difficulty)
}

/// Lowercase big-endian hex of a difficulty or target value, no prefix.
pub fn to_hex(value: &BigUint) -> String {
	format!("{:x}", value)
}

/// Parse a lowercase hex difficulty or target value.
pub fn from_hex(hex: &str) -> Result<BigUint, String> {
	let hex = hex.trim().trim_start_matches("0x");
	if hex.is_empty() {
		return Err("empty difficulty hex".to_string());
	}
	BigUint::parse_bytes(hex.as_bytes(), 16)
		.ok_or_else(|| format!("invalid difficulty hex: {}", hex))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn hash_of_byte(b: u8) -> Hash {
		Hash([b; 32])
	}

	#[test]
	fn difficulty_one_accepts_almost_everything() {
		// target is the whole 2^256 space, any hash is below it
		let one = BigUint::one();
		assert!(meets_difficulty(&hash_of_byte(0xff), &one));
		assert!(meets_difficulty(&hash_of_byte(0x00), &one));
	}

	#[test]
	fn high_difficulty_rejects_large_hashes() {
		// difficulty 2^16 needs the top 16 bits clear
		let diff = BigUint::one() << 16usize;
		assert!(!meets_difficulty(&hash_of_byte(0xff), &diff));
		let mut low = [0xffu8; 32];
		low[0] = 0;
		low[1] = 0;
		assert!(meets_difficulty(&Hash(low), &diff));
	}

	#[test]
	fn target_is_inverse_of_difficulty() {
		let d1 = BigUint::from(1000u32);
		let d2 = BigUint::from(2000u32);
		// doubling difficulty halves the target
		assert_eq!(target_for(&d1) / 2u32, target_for(&d2));
	}

	#[test]
	fn hex_round_trip() {
		let d = BigUint::parse_bytes(b"deadbeef00112233", 16).unwrap();
		assert_eq!(from_hex(&to_hex(&d)).unwrap(), d);
		assert_eq!(to_hex(&d), "deadbeef00112233");
	}
}
