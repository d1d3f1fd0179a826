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

//! Variable difficulty controller. Steers each session's inter-share
//! interval toward the configured target by retargeting its difficulty,
//! no more often than the retarget interval and only when the interval
//! sample is quiet enough to trust.
//!
//! The controller owns its per-session timing state and nothing else: it
//! returns retarget decisions to the caller (pool core), which applies
//! them to the session and notifies the miner. Interval statistics are
//! per connection, so state is keyed by session id, not by login.

use crate::common::types::VardiffConfig;
use crate::util::RwLock;
use chrono::Utc;
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use std::collections::{HashMap, VecDeque};

/// Timing state for one session.
#[derive(Debug, Clone)]
struct SessionState {
	/// Ring buffer of inter-share intervals, seconds
	intervals: VecDeque<f64>,
	/// Previous share arrival, unix milliseconds
	last_share_ms: Option<i64>,
	/// Last retarget, unix milliseconds
	last_retarget_ms: i64,
	/// Difficulty currently assigned to the session
	current_diff: BigUint,
}

/// Operator-facing view of one session's controller state.
#[derive(Debug, Clone, Serialize)]
pub struct VardiffSnapshot {
	/// Session the state belongs to
	pub session_id: usize,
	/// Current difficulty, lowercase hex
	pub current_diff: String,
	/// Buffered interval count
	pub buffer_len: usize,
	/// Mean of the buffered intervals, seconds; zero when empty
	pub mean_interval_s: f64,
	/// Last retarget, unix milliseconds
	pub last_retarget_ms: i64,
	/// The interval the controller steers toward, seconds
	pub target_time_s: f64,
}

/// The controller. One per pool, holding every session's timing state.
pub struct VardiffController {
	config: VardiffConfig,
	sessions: RwLock<HashMap<usize, SessionState>>,
}

impl VardiffController {
	/// New controller with the given tuning.
	pub fn new(config: VardiffConfig) -> VardiffController {
		VardiffController {
			config,
			sessions: RwLock::new(HashMap::new()),
		}
	}

	/// The difficulty sessions start at.
	pub fn initial_difficulty(&self) -> BigUint {
		self.config.minimum_diff.clone()
	}

	/// Register a session, assigning the initial difficulty.
	pub fn add_session(&self, session_id: usize) -> BigUint {
		self.add_session_at(session_id, Utc::now().timestamp_millis())
	}

	/// Clock-injected form of [`add_session`].
	pub fn add_session_at(&self, session_id: usize, now_ms: i64) -> BigUint {
		let diff = self.initial_difficulty();
		self.sessions.write().insert(
			session_id,
			SessionState {
				intervals: VecDeque::with_capacity(self.config.buffer_size),
				last_share_ms: None,
				last_retarget_ms: now_ms,
				current_diff: diff.clone(),
			},
		);
		diff
	}

	/// Drop a session's state on disconnect.
	pub fn remove_session(&self, session_id: usize) {
		self.sessions.write().remove(&session_id);
	}

	/// The difficulty currently assigned to the session.
	pub fn current_difficulty(&self, session_id: usize) -> Option<BigUint> {
		self.sessions
			.read()
			.get(&session_id)
			.map(|s| s.current_diff.clone())
	}

	/// Feed an accepted share. Returns the new difficulty when this share
	/// triggered a retarget, None otherwise.
	pub fn record_share(&self, session_id: usize) -> Option<BigUint> {
		self.record_share_at(session_id, Utc::now().timestamp_millis())
	}

	/// Clock-injected form of [`record_share`].
	pub fn record_share_at(&self, session_id: usize, now_ms: i64) -> Option<BigUint> {
		let config = self.config.clone();
		let mut sessions = self.sessions.write();
		let state = sessions.get_mut(&session_id)?;

		// interval sample; nothing to measure on the first share
		if let Some(last_ms) = state.last_share_ms {
			let interval_s = (now_ms - last_ms) as f64 / 1000.0;
			state.intervals.push_back(interval_s);
			while state.intervals.len() > config.buffer_size {
				state.intervals.pop_front();
			}
		}
		state.last_share_ms = Some(now_ms);

		if (now_ms - state.last_retarget_ms) as f64 / 1000.0 < config.retarget_time_s {
			return None;
		}
		if state.intervals.len() < 2 {
			return None;
		}

		let n = state.intervals.len() as f64;
		let mean: f64 = state.intervals.iter().sum::<f64>() / n;
		let variance: f64 = state
			.intervals
			.iter()
			.map(|t| (t - mean) * (t - mean))
			.sum::<f64>() / n;

		// too noisy to trust this window
		if variance > mean * config.variance_pct / 100.0 {
			return None;
		}
		if mean <= 0.0 {
			return None;
		}

		let ratio = (config.target_time_s / mean)
			.max(config.minimum_step)
			.min(config.maximum_step);

		let new_diff = scale_difficulty(&state.current_diff, ratio);
		let new_diff = clamp(new_diff, &config.minimum_diff, &config.maximum_diff);

		// dead-band: ignore changes within one percent
		let change = ratio_of(&new_diff, &state.current_diff);
		if (change - 1.0).abs() <= 0.01 {
			return None;
		}

		state.current_diff = new_diff.clone();
		state.last_retarget_ms = now_ms;
		state.intervals.clear();
		Some(new_diff)
	}

	/// Snapshot a session's controller state.
	pub fn snapshot(&self, session_id: usize) -> Option<VardiffSnapshot> {
		let sessions = self.sessions.read();
		let state = sessions.get(&session_id)?;
		let mean = if state.intervals.is_empty() {
			0.0
		} else {
			state.intervals.iter().sum::<f64>() / state.intervals.len() as f64
		};
		Some(VardiffSnapshot {
			session_id,
			current_diff: format!("{:x}", state.current_diff),
			buffer_len: state.intervals.len(),
			mean_interval_s: mean,
			last_retarget_ms: state.last_retarget_ms,
			target_time_s: self.config.target_time_s,
		})
	}
}

// Multiply a difficulty by a float ratio. The ratio is bounded by the
// step clamps, so f64 precision is enough scratch; the result is
// re-quantized to an integer difficulty.
fn scale_difficulty(diff: &BigUint, ratio: f64) -> BigUint {
	const SCALE: u64 = 1_000_000;
	let numer = (ratio * SCALE as f64).round() as u64;
	diff * BigUint::from(numer) / BigUint::from(SCALE)
}

fn clamp(value: BigUint, min: &BigUint, max: &BigUint) -> BigUint {
	if value < *min {
		min.clone()
	} else if value > *max {
		max.clone()
	} else {
		value
	}
}

// Approximate new/old as f64, good enough for the one percent dead-band.
fn ratio_of(new: &BigUint, old: &BigUint) -> f64 {
	const SHIFT: u64 = 1_000_000;
	if old.bits() == 0 {
		return f64::MAX;
	}
	let scaled = new * BigUint::from(SHIFT) / old;
	scaled.to_f64().unwrap_or(f64::MAX) / SHIFT as f64
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_config() -> VardiffConfig {
		VardiffConfig {
			target_time_s: 10.0,
			retarget_time_s: 120.0,
			variance_pct: 30.0,
			maximum_step: 2.0,
			minimum_step: 0.5,
			minimum_diff: BigUint::from(100u32),
			maximum_diff: BigUint::from(10_000_000u32),
			buffer_size: 30,
		}
	}

	fn controller_with_diff(diff: u32) -> (VardiffController, i64) {
		let mut config = test_config();
		config.minimum_diff = BigUint::from(diff);
		let c = VardiffController::new(config);
		let t0 = 1_600_000_000_000;
		c.add_session_at(1, t0);
		(c, t0)
	}

	// Drive shares at a fixed cadence, returning every retarget decision.
	fn drive(
		c: &VardiffController,
		start_ms: i64,
		interval_ms: i64,
		count: usize,
	) -> Vec<BigUint> {
		let mut changes = vec![];
		let mut now = start_ms;
		for _ in 0..count {
			now += interval_ms;
			if let Some(d) = c.record_share_at(1, now) {
				changes.push(d);
			}
		}
		changes
	}

	#[test]
	fn no_retarget_before_interval() {
		let (c, t0) = controller_with_diff(1000);
		// 10 shares every 5s: only 50s elapsed, under the 120s gate
		let changes = drive(&c, t0, 5_000, 10);
		assert!(changes.is_empty());
		assert_eq!(c.current_difficulty(1).unwrap(), BigUint::from(1000u32));
	}

	#[test]
	fn fast_shares_raise_difficulty_with_step_clamp() {
		let (c, t0) = controller_with_diff(1000);
		// shares every 5s against a 10s target: ratio 2.0, clamped at max_step
		let changes = drive(&c, t0, 5_000, 25);
		assert_eq!(changes.len(), 1);
		assert_eq!(changes[0], BigUint::from(2000u32));
	}

	#[test]
	fn slow_shares_lower_difficulty_with_step_clamp() {
		let (c, t0) = controller_with_diff(1000);
		// shares every 40s against a 10s target: ratio 0.25 clamps to 0.5
		let changes = drive(&c, t0, 40_000, 10);
		assert!(!changes.is_empty());
		assert_eq!(changes[0], BigUint::from(500u32));
	}

	#[test]
	fn converges_to_target_then_holds() {
		let (c, t0) = controller_with_diff(1000);
		// steady 5s cadence doubles difficulty each retarget until the
		// controller believes the miner would hit the 10s target
		let changes = drive(&c, t0, 5_000, 200);
		assert!(!changes.is_empty());
		let last = changes.last().unwrap().clone();
		// the simulated cadence never slows down, so every step is a
		// doubling; difficulty is monotonically non-decreasing
		for pair in changes.windows(2) {
			assert!(pair[1] >= pair[0]);
		}
		assert_eq!(c.current_difficulty(1).unwrap(), last);
	}

	#[test]
	fn clamps_to_configured_extrema() {
		let mut config = test_config();
		config.maximum_diff = BigUint::from(150u32);
		let c = VardiffController::new(config);
		let t0 = 1_600_000_000_000;
		c.add_session_at(1, t0);
		let changes = drive(&c, t0, 5_000, 50);
		assert!(!changes.is_empty());
		for d in &changes {
			assert!(*d <= BigUint::from(150u32));
			assert!(*d >= BigUint::from(100u32));
		}
	}

	#[test]
	fn noisy_intervals_are_ignored() {
		let (c, t0) = controller_with_diff(1000);
		// alternate 1s and 60s gaps: variance far above the gate
		let mut now = t0;
		let mut changed = false;
		for i in 0..40 {
			now += if i % 2 == 0 { 1_000 } else { 60_000 };
			if c.record_share_at(1, now).is_some() {
				changed = true;
			}
		}
		assert!(!changed);
	}

	#[test]
	fn dead_band_suppresses_tiny_changes() {
		let mut config = test_config();
		config.minimum_diff = BigUint::from(1000u32);
		// 10.05s cadence against a 10s target: ratio ~1.005, inside the band
		let c = VardiffController::new(config);
		let t0 = 1_600_000_000_000;
		c.add_session_at(1, t0);
		let changes = drive(&c, t0, 10_050, 30);
		assert!(changes.is_empty());
		assert_eq!(c.current_difficulty(1).unwrap(), BigUint::from(1000u32));
	}

	#[test]
	fn buffer_resets_after_retarget() {
		let (c, t0) = controller_with_diff(1000);
		let changes = drive(&c, t0, 5_000, 25);
		assert_eq!(changes.len(), 1);
		let snap = c.snapshot(1).unwrap();
		// one interval recorded since the retarget cleared the buffer
		assert!(snap.buffer_len <= 1);
	}

	#[test]
	fn removed_session_stops_tracking() {
		let (c, t0) = controller_with_diff(1000);
		c.remove_session(1);
		assert!(c.record_share_at(1, t0 + 1000).is_none());
		assert!(c.current_difficulty(1).is_none());
	}
}
