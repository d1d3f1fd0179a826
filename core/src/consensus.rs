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

//! Consensus-relevant constants and short helper functions. Anything a
//! mining pool and the chain must agree on lives here.

use num_bigint::BigUint;

/// Name of the network
pub const NETWORK_NAME: &str = "Alerim";

/// Symbol of the coin
pub const COIN_SYMBOL: &str = "AIM";

/// An AIM is divisible to 10^18 atomic units
pub const AIM_BASE: u64 = 1_000_000_000_000_000_000;

/// Block interval, in seconds, the network tunes its difficulty for
pub const BLOCK_TIME_SEC: u64 = 60;

/// Current block header version
pub const HEADER_VERSION: u32 = 1;

/// Default block subsidy, in atomic units: 50 AIM
pub fn default_block_reward() -> BigUint {
	BigUint::from(50u32) * BigUint::from(AIM_BASE)
}

/// Number of confirmations a found block needs before its reward credits
/// can be promoted to spendable balances.
pub const DEFAULT_MATURITY_DEPTH: u64 = 100;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn block_reward_is_50_aim() {
		let expected: BigUint = "50000000000000000000".parse().unwrap();
		assert_eq!(default_block_reward(), expected);
	}
}
