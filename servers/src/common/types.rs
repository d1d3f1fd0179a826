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

//! Pool server configuration types.

use crate::core::consensus;
use num_bigint::BigUint;

/// Variable difficulty controller configuration. Steers every session
/// toward one share every `target_time_s` seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VardiffConfig {
	/// Target time between shares, seconds
	#[serde(default = "VardiffConfig::default_target_time_s")]
	pub target_time_s: f64,

	/// Minimum time between difficulty adjustments, seconds
	#[serde(default = "VardiffConfig::default_retarget_time_s")]
	pub retarget_time_s: f64,

	/// Allowed variance of the interval sample before retargeting, percent
	#[serde(default = "VardiffConfig::default_variance_pct")]
	pub variance_pct: f64,

	/// Largest single upward adjustment factor
	#[serde(default = "VardiffConfig::default_maximum_step")]
	pub maximum_step: f64,

	/// Smallest single downward adjustment factor
	#[serde(default = "VardiffConfig::default_minimum_step")]
	pub minimum_step: f64,

	/// Floor for per-session difficulty
	#[serde(default = "VardiffConfig::default_minimum_diff")]
	pub minimum_diff: BigUint,

	/// Ceiling for per-session difficulty
	#[serde(default = "VardiffConfig::default_maximum_diff")]
	pub maximum_diff: BigUint,

	/// Number of inter-share intervals kept per session
	#[serde(default = "VardiffConfig::default_buffer_size")]
	pub buffer_size: usize,
}

impl VardiffConfig {
	fn default_target_time_s() -> f64 {
		10.0
	}
	fn default_retarget_time_s() -> f64 {
		120.0
	}
	fn default_variance_pct() -> f64 {
		30.0
	}
	fn default_maximum_step() -> f64 {
		2.0
	}
	fn default_minimum_step() -> f64 {
		0.5
	}
	fn default_minimum_diff() -> BigUint {
		BigUint::from(1_000u32)
	}
	fn default_maximum_diff() -> BigUint {
		BigUint::from(1_000u32) * BigUint::from(1_000_000u32)
	}
	fn default_buffer_size() -> usize {
		30
	}
}

impl Default for VardiffConfig {
	fn default() -> VardiffConfig {
		VardiffConfig {
			target_time_s: VardiffConfig::default_target_time_s(),
			retarget_time_s: VardiffConfig::default_retarget_time_s(),
			variance_pct: VardiffConfig::default_variance_pct(),
			maximum_step: VardiffConfig::default_maximum_step(),
			minimum_step: VardiffConfig::default_minimum_step(),
			minimum_diff: VardiffConfig::default_minimum_diff(),
			maximum_diff: VardiffConfig::default_maximum_diff(),
			buffer_size: VardiffConfig::default_buffer_size(),
		}
	}
}

/// Block template rebuild policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateConfig {
	/// How often to rebuild the template to pick up new mempool
	/// transactions, seconds
	#[serde(default = "TemplateConfig::default_refresh_interval_s")]
	pub refresh_interval_s: i64,

	/// How long the previous job keeps accepting in-flight submissions
	/// after a template flip, seconds
	#[serde(default = "TemplateConfig::default_stale_window_s")]
	pub stale_window_s: i64,
}

impl TemplateConfig {
	fn default_refresh_interval_s() -> i64 {
		30
	}
	fn default_stale_window_s() -> i64 {
		30
	}
}

impl Default for TemplateConfig {
	fn default() -> TemplateConfig {
		TemplateConfig {
			refresh_interval_s: TemplateConfig::default_refresh_interval_s(),
			stale_window_s: TemplateConfig::default_stale_window_s(),
		}
	}
}

/// Pool (mining server) configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolServerConfig {
	/// Run the stratum server, the only way miners communicate with this
	/// node
	pub enable_pool_server: Option<bool>,

	/// If enabled, the address and port to listen on
	pub stratum_server_addr: Option<String>,

	/// Address block rewards are paid to and payouts are sent from; also
	/// collects the pool fee and any round rounding remainder
	pub pool_address: String,

	/// Block subsidy in atomic units
	#[serde(default = "PoolServerConfig::default_block_reward")]
	pub block_reward: BigUint,

	/// Pool fee, integer percent of the block reward
	#[serde(default = "PoolServerConfig::default_pool_fee_pct")]
	pub pool_fee_pct: u8,

	/// Minimum balance, in atomic units, before a payout is emitted
	#[serde(default = "PoolServerConfig::default_payout_threshold")]
	pub payout_threshold: BigUint,

	/// Seconds between payout cycles
	#[serde(default = "PoolServerConfig::default_payout_interval_s")]
	pub payout_interval_s: u64,

	/// Confirmations before block credits become spendable balance
	#[serde(default = "PoolServerConfig::default_maturity_depth")]
	pub maturity_depth: u64,

	/// Seconds since last share before a worker stops counting as active
	#[serde(default = "PoolServerConfig::default_worker_activity_timeout_s")]
	pub worker_activity_timeout_s: i64,

	/// Seconds of silence before an idle session is closed
	#[serde(default = "PoolServerConfig::default_idle_timeout_s")]
	pub idle_timeout_s: i64,

	/// Variable difficulty controller settings
	#[serde(default)]
	pub vardiff: VardiffConfig,

	/// Template rebuild settings
	#[serde(default)]
	pub template: TemplateConfig,
}

impl PoolServerConfig {
	fn default_block_reward() -> BigUint {
		consensus::default_block_reward()
	}
	fn default_pool_fee_pct() -> u8 {
		2
	}
	fn default_payout_threshold() -> BigUint {
		BigUint::from(consensus::AIM_BASE)
	}
	fn default_payout_interval_s() -> u64 {
		24 * 3600
	}
	fn default_maturity_depth() -> u64 {
		consensus::DEFAULT_MATURITY_DEPTH
	}
	fn default_worker_activity_timeout_s() -> i64 {
		300
	}
	fn default_idle_timeout_s() -> i64 {
		300
	}
}

impl Default for PoolServerConfig {
	fn default() -> PoolServerConfig {
		PoolServerConfig {
			enable_pool_server: Some(true),
			stratum_server_addr: Some("0.0.0.0:3333".to_string()),
			pool_address: "pool".to_string(),
			block_reward: PoolServerConfig::default_block_reward(),
			pool_fee_pct: PoolServerConfig::default_pool_fee_pct(),
			payout_threshold: PoolServerConfig::default_payout_threshold(),
			payout_interval_s: PoolServerConfig::default_payout_interval_s(),
			maturity_depth: PoolServerConfig::default_maturity_depth(),
			worker_activity_timeout_s: PoolServerConfig::default_worker_activity_timeout_s(),
			idle_timeout_s: PoolServerConfig::default_idle_timeout_s(),
			vardiff: VardiffConfig::default(),
			template: TemplateConfig::default(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_documented_values() {
		let config = PoolServerConfig::default();
		assert_eq!(config.pool_fee_pct, 2);
		assert_eq!(config.maturity_depth, 100);
		assert_eq!(config.payout_interval_s, 86_400);
		assert_eq!(config.vardiff.target_time_s, 10.0);
		assert_eq!(config.vardiff.retarget_time_s, 120.0);
		assert_eq!(config.vardiff.buffer_size, 30);
		assert_eq!(config.template.stale_window_s, 30);
	}

	#[test]
	fn config_survives_serde() {
		let config = PoolServerConfig::default();
		let json = serde_json::to_string(&config).unwrap();
		let back: PoolServerConfig = serde_json::from_str(&json).unwrap();
		assert_eq!(config, back);
	}
}
