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

//! Implements hex-encoding from bytes to string and decoding of strings
//! to bytes. All wire-visible hex in alerim is lowercase and unprefixed.

use std::fmt::Write;

/// Encode the provided bytes into a lowercase hex string
pub fn to_hex(bytes: &[u8]) -> String {
	let mut s = String::with_capacity(bytes.len() * 2);
	for byte in bytes {
		write!(&mut s, "{:02x}", byte).expect("hex format error");
	}
	s
}

/// Decode a hex string into bytes.
pub fn from_hex(hex: &str) -> Result<Vec<u8>, String> {
	let hex = hex.trim().trim_start_matches("0x");
	if hex.len() % 2 != 0 {
		return Err(format!("hex string has odd length: {}", hex.len()));
	}
	(0..hex.len())
		.step_by(2)
		.map(|i| {
			u8::from_str_radix(&hex[i..i + 2], 16)
				.map_err(|e| format!("invalid hex at {}: {}", i, e))
		})
		.collect()
}

/// Arbitrary types that can render themselves as lowercase hex.
pub trait ToHex {
	/// Hex representation of self
	fn to_hex(&self) -> String;
}

impl<T: AsRef<[u8]>> ToHex for T {
	fn to_hex(&self) -> String {
		to_hex(self.as_ref())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_to_hex() {
		assert_eq!(to_hex(&[0, 0, 0, 0]), "00000000");
		assert_eq!(to_hex(&[10, 11, 12, 13]), "0a0b0c0d");
		assert_eq!(to_hex(&[0, 0, 0, 255]), "000000ff");
	}

	#[test]
	fn test_from_hex() {
		assert_eq!(from_hex("00000000").unwrap(), vec![0, 0, 0, 0]);
		assert_eq!(from_hex("0a0b0c0d").unwrap(), vec![10, 11, 12, 13]);
		assert_eq!(from_hex("000000ff").unwrap(), vec![0, 0, 0, 255]);
		assert!(from_hex("00f").is_err());
		assert!(from_hex("zz").is_err());
	}
}
