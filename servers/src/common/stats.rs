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

//! Worker and pool statistics: cumulative share counters, bounded share
//! and block histories, rolling time windows, and hashrate estimation.
//! Everything here is operator-facing; reward accounting keeps its own
//! numbers.

use crate::core::hash::Hash;
use crate::util::RwLock;
use chrono::Utc;
use num_bigint::BigUint;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Share entries retained per worker for hashrate estimation
pub const SHARE_HISTORY_LIMIT: usize = 1000;
/// Found blocks retained pool-wide
pub const BLOCK_HISTORY_LIMIT: usize = 1000;
/// Difficulty changes retained per worker
pub const DIFF_HISTORY_LIMIT: usize = 100;

// Hashrate estimates look at the last ten minutes of shares.
const HASHRATE_WINDOW_MS: i64 = 10 * 60 * 1000;

const HOUR_MS: i64 = 3600 * 1000;

/// Why a session's difficulty changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffReason {
	/// The difficulty every new session starts at
	Initial,
	/// The variable difficulty controller retargeted
	Vardiff,
}

/// A named rolling counter window. When the window outlives its duration
/// it resets and starts counting again.
#[derive(Debug, Clone, Serialize)]
pub struct TimeWindow {
	/// Window name, e.g. "1h"
	pub label: &'static str,
	/// Window length, milliseconds
	duration_ms: i64,
	/// Start of the current window, unix milliseconds
	pub start_ms: i64,
	/// Shares counted in the current window
	pub shares: u64,
	/// Blocks counted in the current window
	pub blocks: u64,
}

impl TimeWindow {
	fn new(label: &'static str, duration_ms: i64, now_ms: i64) -> TimeWindow {
		TimeWindow {
			label,
			duration_ms,
			start_ms: now_ms,
			shares: 0,
			blocks: 0,
		}
	}

	fn roll(&mut self, now_ms: i64) {
		if now_ms - self.start_ms > self.duration_ms {
			self.start_ms = now_ms;
			self.shares = 0;
			self.blocks = 0;
		}
	}
}

fn default_windows(now_ms: i64) -> Vec<TimeWindow> {
	vec![
		TimeWindow::new("1h", HOUR_MS, now_ms),
		TimeWindow::new("24h", 24 * HOUR_MS, now_ms),
		TimeWindow::new("7d", 7 * 24 * HOUR_MS, now_ms),
	]
}

#[derive(Debug, Clone)]
struct ShareEntry {
	timestamp_ms: i64,
	valid: bool,
}

#[derive(Debug, Clone)]
struct DiffEntry {
	timestamp_ms: i64,
	difficulty: BigUint,
	reason: DiffReason,
}

/// A block found by the pool.
#[derive(Debug, Clone, Serialize)]
pub struct BlockEntry {
	/// When the block was accepted, unix milliseconds
	pub timestamp_ms: i64,
	/// Chain height of the block
	pub height: u64,
	/// Block hash
	pub hash: Hash,
	/// Worker whose share became the block
	pub miner: String,
	/// Block reward, atomic units, decimal
	pub reward: String,
}

/// Per-worker statistics. A worker is an accounting identity, not a
/// connection: all sessions authorized under the same login feed the same
/// entry, and entries are never removed.
#[derive(Debug, Clone)]
pub struct WorkerStats {
	/// The worker identity (authorized login)
	pub id: String,
	/// Last share or protocol activity, unix milliseconds
	pub last_seen_ms: i64,
	/// Shares accepted
	pub num_accepted: u64,
	/// Shares rejected for any reason
	pub num_rejected: u64,
	/// Accepted shares that were also blocks
	pub num_blocks_found: u64,
	/// Hashrate as reported by the miner itself, hashes/s
	pub reported_hashrate: f64,
	share_history: VecDeque<ShareEntry>,
	diff_history: VecDeque<DiffEntry>,
	windows: Vec<TimeWindow>,
}

impl WorkerStats {
	fn new(id: &str, now_ms: i64) -> WorkerStats {
		WorkerStats {
			id: id.to_string(),
			last_seen_ms: now_ms,
			num_accepted: 0,
			num_rejected: 0,
			num_blocks_found: 0,
			reported_hashrate: 0.0,
			share_history: VecDeque::with_capacity(SHARE_HISTORY_LIMIT),
			diff_history: VecDeque::with_capacity(DIFF_HISTORY_LIMIT),
			windows: default_windows(now_ms),
		}
	}

	fn add_share(&mut self, valid: bool, now_ms: i64) {
		if valid {
			self.num_accepted += 1;
		} else {
			self.num_rejected += 1;
		}
		self.last_seen_ms = now_ms;

		self.share_history.push_back(ShareEntry {
			timestamp_ms: now_ms,
			valid,
		});
		while self.share_history.len() > SHARE_HISTORY_LIMIT {
			self.share_history.pop_front();
		}

		for window in &mut self.windows {
			window.roll(now_ms);
			window.shares += 1;
		}
	}

	fn add_block(&mut self, now_ms: i64) {
		self.num_blocks_found += 1;
		for window in &mut self.windows {
			window.roll(now_ms);
			window.blocks += 1;
		}
	}

	fn record_diff_change(&mut self, difficulty: BigUint, reason: DiffReason, now_ms: i64) {
		self.diff_history.push_back(DiffEntry {
			timestamp_ms: now_ms,
			difficulty,
			reason,
		});
		while self.diff_history.len() > DIFF_HISTORY_LIMIT {
			self.diff_history.pop_front();
		}
	}

	/// Shares per second over the last ten minutes. Zero when the window
	/// holds fewer than two samples or no time has passed.
	fn current_hashrate(&self, now_ms: i64) -> f64 {
		let cutoff = now_ms - HASHRATE_WINDOW_MS;
		let recent: Vec<i64> = self
			.share_history
			.iter()
			.filter(|s| s.timestamp_ms >= cutoff)
			.map(|s| s.timestamp_ms)
			.collect();
		if recent.len() < 2 {
			return 0.0;
		}
		let oldest = *recent.first().unwrap();
		let span_s = (now_ms - oldest) as f64 / 1000.0;
		if span_s <= 0.0 {
			return 0.0;
		}
		recent.len() as f64 / span_s
	}

	/// Shares per second over the 24 h window.
	fn average_hashrate(&self, now_ms: i64) -> f64 {
		let day = self.windows.iter().find(|w| w.label == "24h");
		match day {
			Some(w) => {
				let span_s = (now_ms - w.start_ms) as f64 / 1000.0;
				if span_s <= 0.0 {
					0.0
				} else {
					w.shares as f64 / span_s
				}
			}
			None => 0.0,
		}
	}
}

/// One window, as exposed to operators.
#[derive(Debug, Clone, Serialize)]
pub struct WindowSnapshot {
	/// Window name
	pub label: &'static str,
	/// Shares in the current window
	pub shares: u64,
	/// Blocks in the current window
	pub blocks: u64,
}

/// A difficulty change, as exposed to operators.
#[derive(Debug, Clone, Serialize)]
pub struct DiffChangeSnapshot {
	/// When, unix milliseconds
	pub timestamp_ms: i64,
	/// New difficulty, lowercase hex
	pub difficulty: String,
	/// Why
	pub reason: DiffReason,
}

/// Point-in-time view of one worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
	/// Worker identity
	pub id: String,
	/// Last activity, unix milliseconds
	pub last_seen_ms: i64,
	/// Shares accepted
	pub num_accepted: u64,
	/// Shares rejected
	pub num_rejected: u64,
	/// Total submissions seen
	pub total_submits: u64,
	/// Blocks found
	pub num_blocks_found: u64,
	/// Estimated share rate over the last ten minutes, shares/s
	pub current_hashrate: f64,
	/// Share rate over the 24 h window, shares/s
	pub average_hashrate: f64,
	/// Miner-reported hashrate, hashes/s
	pub reported_hashrate: f64,
	/// Rolling windows
	pub windows: Vec<WindowSnapshot>,
	/// Recent difficulty changes, oldest first
	pub difficulty_changes: Vec<DiffChangeSnapshot>,
}

/// Point-in-time view of the whole pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
	/// Connected stratum sessions
	pub num_sessions: usize,
	/// Workers ever seen
	pub total_workers: usize,
	/// Workers with activity inside the activity window
	pub active_workers: usize,
	/// Blocks found since startup
	pub blocks_found: u64,
	/// Last block time, unix milliseconds, zero if none
	pub last_block_time_ms: i64,
	/// Current chain height as the pool sees it
	pub block_height: u64,
	/// Network difficulty, lowercase hex
	pub network_difficulty: String,
	/// Sum of worker share rates, shares/s
	pub pool_hashrate: f64,
	/// Rolling windows
	pub windows: Vec<WindowSnapshot>,
	/// Most recent found blocks, newest first, at most ten
	pub recent_blocks: Vec<BlockEntry>,
}

struct PoolAggregate {
	windows: Vec<TimeWindow>,
	block_history: VecDeque<BlockEntry>,
	blocks_found: u64,
	last_block_time_ms: i64,
	pool_hashrate: f64,
}

/// All statistics the pool maintains, one instance per pool. Aggregates
/// are guarded by their own locks; no lock is held across anything
/// slower than a map lookup.
pub struct PoolStats {
	workers: RwLock<HashMap<String, WorkerStats>>,
	pool: RwLock<PoolAggregate>,
	num_sessions: AtomicUsize,
	block_height: AtomicU64,
	network_difficulty: RwLock<BigUint>,
}

impl PoolStats {
	/// Fresh, empty statistics.
	pub fn new() -> PoolStats {
		let now_ms = Utc::now().timestamp_millis();
		PoolStats {
			workers: RwLock::new(HashMap::new()),
			pool: RwLock::new(PoolAggregate {
				windows: default_windows(now_ms),
				block_history: VecDeque::with_capacity(BLOCK_HISTORY_LIMIT),
				blocks_found: 0,
				last_block_time_ms: 0,
				pool_hashrate: 0.0,
			}),
			num_sessions: AtomicUsize::new(0),
			block_height: AtomicU64::new(0),
			network_difficulty: RwLock::new(BigUint::from(0u32)),
		}
	}

	/// Make sure a stats entry exists for the worker and touch its
	/// last-seen. Called on authorize.
	pub fn register_worker(&self, id: &str) {
		self.register_worker_at(id, Utc::now().timestamp_millis());
	}

	/// Clock-injected form of [`register_worker`].
	pub fn register_worker_at(&self, id: &str, now_ms: i64) {
		let mut workers = self.workers.write();
		let entry = workers
			.entry(id.to_string())
			.or_insert_with(|| WorkerStats::new(id, now_ms));
		entry.last_seen_ms = now_ms;
	}

	/// Record a share decision for the worker.
	pub fn record_share(&self, id: &str, valid: bool) {
		self.record_share_at(id, valid, Utc::now().timestamp_millis());
	}

	/// Clock-injected form of [`record_share`].
	pub fn record_share_at(&self, id: &str, valid: bool, now_ms: i64) {
		// one aggregate lock at a time, always
		{
			let mut workers = self.workers.write();
			let entry = workers
				.entry(id.to_string())
				.or_insert_with(|| WorkerStats::new(id, now_ms));
			entry.add_share(valid, now_ms);
		}

		let mut pool = self.pool.write();
		for window in &mut pool.windows {
			window.roll(now_ms);
			window.shares += 1;
		}
	}

	/// Record a found block for the worker and pool-wide.
	pub fn record_block(&self, id: &str, height: u64, hash: Hash, reward: &BigUint) {
		self.record_block_at(id, height, hash, reward, Utc::now().timestamp_millis());
	}

	/// Clock-injected form of [`record_block`].
	pub fn record_block_at(
		&self,
		id: &str,
		height: u64,
		hash: Hash,
		reward: &BigUint,
		now_ms: i64,
	) {
		{
			let mut workers = self.workers.write();
			let entry = workers
				.entry(id.to_string())
				.or_insert_with(|| WorkerStats::new(id, now_ms));
			entry.add_block(now_ms);
		}

		let mut pool = self.pool.write();
		pool.blocks_found += 1;
		pool.last_block_time_ms = now_ms;
		pool.block_history.push_back(BlockEntry {
			timestamp_ms: now_ms,
			height,
			hash,
			miner: id.to_string(),
			reward: reward.to_str_radix(10),
		});
		while pool.block_history.len() > BLOCK_HISTORY_LIMIT {
			pool.block_history.pop_front();
		}
		for window in &mut pool.windows {
			window.roll(now_ms);
			window.blocks += 1;
		}
	}

	/// Store the hashrate a miner reported for itself.
	pub fn sample_hashrate(&self, id: &str, hps: f64) {
		let mut workers = self.workers.write();
		if let Some(entry) = workers.get_mut(id) {
			entry.reported_hashrate = hps;
		}
	}

	/// Record a difficulty change applied to a session of this worker.
	pub fn record_diff_change(&self, id: &str, difficulty: BigUint, reason: DiffReason) {
		let now_ms = Utc::now().timestamp_millis();
		let mut workers = self.workers.write();
		let entry = workers
			.entry(id.to_string())
			.or_insert_with(|| WorkerStats::new(id, now_ms));
		entry.record_diff_change(difficulty, reason, now_ms);
	}

	/// Touch the worker's last-seen.
	pub fn last_seen(&self, id: &str) {
		let now_ms = Utc::now().timestamp_millis();
		let mut workers = self.workers.write();
		if let Some(entry) = workers.get_mut(id) {
			entry.last_seen_ms = now_ms;
		}
	}

	/// A session connected.
	pub fn session_connected(&self) {
		self.num_sessions.fetch_add(1, Ordering::Relaxed);
	}

	/// A session went away.
	pub fn session_disconnected(&self) {
		self.num_sessions.fetch_sub(1, Ordering::Relaxed);
	}

	/// Track the chain height the pool currently mines on.
	pub fn update_block_height(&self, height: u64) {
		self.block_height.store(height, Ordering::Relaxed);
	}

	/// Track the network difficulty the pool currently mines against.
	pub fn update_network_difficulty(&self, difficulty: BigUint) {
		*self.network_difficulty.write() = difficulty;
	}

	/// Workers with activity within the last `timeout_s` seconds.
	pub fn active_workers(&self, timeout_s: i64) -> usize {
		let cutoff = Utc::now().timestamp_millis() - timeout_s * 1000;
		self.workers
			.read()
			.values()
			.filter(|w| w.last_seen_ms >= cutoff)
			.count()
	}

	/// Sum the per-worker ten-minute share rates into a pool rate and
	/// remember it for snapshots. Called from the stats tick.
	pub fn refresh_pool_hashrate(&self) -> f64 {
		let now_ms = Utc::now().timestamp_millis();
		let total: f64 = self
			.workers
			.read()
			.values()
			.map(|w| w.current_hashrate(now_ms))
			.sum();
		self.pool.write().pool_hashrate = total;
		total
	}

	/// Snapshot one worker, if it exists.
	pub fn worker_snapshot(&self, id: &str) -> Option<WorkerSnapshot> {
		let now_ms = Utc::now().timestamp_millis();
		let workers = self.workers.read();
		let w = workers.get(id)?;
		Some(WorkerSnapshot {
			id: w.id.clone(),
			last_seen_ms: w.last_seen_ms,
			num_accepted: w.num_accepted,
			num_rejected: w.num_rejected,
			total_submits: w.num_accepted + w.num_rejected,
			num_blocks_found: w.num_blocks_found,
			current_hashrate: w.current_hashrate(now_ms),
			average_hashrate: w.average_hashrate(now_ms),
			reported_hashrate: w.reported_hashrate,
			windows: w
				.windows
				.iter()
				.map(|win| WindowSnapshot {
					label: win.label,
					shares: win.shares,
					blocks: win.blocks,
				})
				.collect(),
			difficulty_changes: w
				.diff_history
				.iter()
				.map(|d| DiffChangeSnapshot {
					timestamp_ms: d.timestamp_ms,
					difficulty: format!("{:x}", d.difficulty),
					reason: d.reason,
				})
				.collect(),
		})
	}

	/// Snapshot the pool.
	pub fn pool_snapshot(&self, activity_timeout_s: i64) -> PoolSnapshot {
		let total_workers = self.workers.read().len();
		let active_workers = self.active_workers(activity_timeout_s);

		let pool = self.pool.read();
		PoolSnapshot {
			num_sessions: self.num_sessions.load(Ordering::Relaxed),
			total_workers,
			active_workers,
			blocks_found: pool.blocks_found,
			last_block_time_ms: pool.last_block_time_ms,
			block_height: self.block_height.load(Ordering::Relaxed),
			network_difficulty: format!("{:x}", *self.network_difficulty.read()),
			pool_hashrate: pool.pool_hashrate,
			windows: pool
				.windows
				.iter()
				.map(|win| WindowSnapshot {
					label: win.label,
					shares: win.shares,
					blocks: win.blocks,
				})
				.collect(),
			recent_blocks: pool.block_history.iter().rev().take(10).cloned().collect(),
		}
	}
}

impl Default for PoolStats {
	fn default() -> PoolStats {
		PoolStats::new()
	}
}
