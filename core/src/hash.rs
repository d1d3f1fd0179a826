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

//! The 32-byte SHA-256 hash type used for block, transaction and Merkle
//! identities. Wire representation is lowercase big-endian hex.

use crate::util::{from_hex, to_hex};
use sha2::{Digest, Sha256};
use std::fmt;

/// A hash consisting of all zeroes, the genesis predecessor
pub const ZERO_HASH: Hash = Hash([0; 32]);

/// A 32-byte SHA-256 digest.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
	/// Size of a hash in bytes
	pub const LEN: usize = 32;

	/// Hash the provided bytes with a single round of SHA-256
	pub fn from_data(data: &[u8]) -> Hash {
		let mut hash = [0; 32];
		hash.copy_from_slice(&Sha256::digest(data));
		Hash(hash)
	}

	/// Parse a hash from its lowercase hex representation
	pub fn from_hex(hex: &str) -> Result<Hash, String> {
		let bytes = from_hex(hex)?;
		if bytes.len() != Hash::LEN {
			return Err(format!("hash must be {} bytes, got {}", Hash::LEN, bytes.len()));
		}
		let mut hash = [0; 32];
		hash.copy_from_slice(&bytes);
		Ok(Hash(hash))
	}

	/// The raw bytes
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	/// Lowercase big-endian hex, no prefix
	pub fn to_hex(&self) -> String {
		to_hex(&self.0)
	}
}

impl AsRef<[u8]> for Hash {
	fn as_ref(&self) -> &[u8] {
		&self.0
	}
}

impl fmt::Debug for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_hex())
	}
}

impl fmt::Display for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_hex())
	}
}

impl serde::Serialize for Hash {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_str(&self.to_hex())
	}
}

impl<'de> serde::Deserialize<'de> for Hash {
	fn deserialize<D>(deserializer: D) -> Result<Hash, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = <String as serde::Deserialize>::deserialize(deserializer)?;
		Hash::from_hex(&s).map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hex_round_trip() {
		let h = Hash::from_data(b"alerim");
		let parsed = Hash::from_hex(&h.to_hex()).unwrap();
		assert_eq!(h, parsed);
		assert_eq!(h.to_hex().len(), 64);
		assert_eq!(h.to_hex(), h.to_hex().to_lowercase());
	}

	#[test]
	fn bad_hex_rejected() {
		assert!(Hash::from_hex("00ff").is_err());
		assert!(Hash::from_hex("not hex").is_err());
	}
}
