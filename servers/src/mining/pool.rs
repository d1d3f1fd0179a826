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

//! Pool core: the worker and session registries, the job registry, and
//! the share pipeline gluing sessions to validation, vardiff, accounting
//! and statistics. A share submission traverses this file in one causal
//! chain; everything it decides is against the session's difficulty at
//! the moment of receipt, never retroactively.

use crate::common::stats::{DiffReason, PoolSnapshot, PoolStats, WorkerSnapshot};
use crate::common::types::PoolServerConfig;
use crate::core::chain::ChainAdapter;
use crate::core::hash::Hash;
use crate::core::pow;
use crate::mining::rewards::{PayoutStatus, RewardLedger};
use crate::mining::stratum_data::SessionsList;
use crate::mining::stratumserver;
use crate::mining::template::{Job, JobLookup, JobRegistry};
use crate::mining::vardiff::{VardiffController, VardiffSnapshot};
use crate::util::RwLock;
use chrono::Utc;
use num_bigint::BigUint;
use std::collections::HashSet;
use std::sync::Arc;

/// Why a submission was turned away. Stable names and codes; miners key
/// retry behavior off these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
	/// The job id is neither current nor in the previous job's grace
	/// window
	Stale,
	/// This (job, nonce) pair was already accepted
	Duplicate,
	/// The hash does not meet the session's difficulty
	LowDifficulty,
	/// The submitted hash does not match the recomputed header
	Malformed,
	/// No authorized worker behind the session
	Unauthorized,
	/// Anything else
	Other,
}

impl RejectReason {
	/// Stable stratum error code.
	pub fn code(&self) -> i32 {
		match self {
			RejectReason::Stale => 21,
			RejectReason::Duplicate => 22,
			RejectReason::LowDifficulty => 23,
			RejectReason::Unauthorized => 24,
			RejectReason::Malformed => 20,
			RejectReason::Other => 20,
		}
	}

	/// Stable error message.
	pub fn message(&self) -> &'static str {
		match self {
			RejectReason::Stale => "stale",
			RejectReason::Duplicate => "duplicate",
			RejectReason::LowDifficulty => "low difficulty",
			RejectReason::Unauthorized => "unauthorized worker",
			RejectReason::Malformed => "malformed share",
			RejectReason::Other => "other",
		}
	}
}

/// What an accepted share amounted to.
#[derive(Debug, Clone)]
pub struct ShareOutcome {
	/// The share also met network difficulty and its block was accepted
	pub block_found: bool,
	/// The share triggered a vardiff retarget to this difficulty
	pub new_difficulty: Option<BigUint>,
}

/// The pool aggregate. Explicitly constructed at startup and shared with
/// every session task; there is no other process-wide state.
pub struct MiningPool {
	config: PoolServerConfig,
	chain: Arc<dyn ChainAdapter>,
	/// Live stratum sessions
	pub sessions: SessionsList,
	/// Worker and pool statistics
	pub stats: PoolStats,
	vardiff: VardiffController,
	ledger: RewardLedger,
	jobs: RwLock<JobRegistry>,
	// (job_id, nonce) pairs already accepted, pruned on job rotation
	accepted: RwLock<HashSet<(u64, u64)>>,
}

impl MiningPool {
	/// Build the pool aggregate and its first block template.
	pub fn new(config: PoolServerConfig, chain: Arc<dyn ChainAdapter>) -> MiningPool {
		let vardiff = VardiffController::new(config.vardiff.clone());
		let ledger = RewardLedger::new(
			config.pool_fee_pct,
			config.payout_threshold.clone(),
			config.maturity_depth,
			&config.pool_address,
		);
		let pool = MiningPool {
			vardiff,
			ledger,
			jobs: RwLock::new(JobRegistry::new(config.template.stale_window_s)),
			accepted: RwLock::new(HashSet::new()),
			sessions: SessionsList::new(),
			stats: PoolStats::new(),
			config,
			chain,
		};
		pool.rebuild_job();
		pool
	}

	/// The pool configuration.
	pub fn config(&self) -> &PoolServerConfig {
		&self.config
	}

	/// Difficulty handed to brand-new sessions.
	pub fn initial_difficulty(&self) -> BigUint {
		self.vardiff.initial_difficulty()
	}

	/// Register a connection with the session and vardiff registries.
	pub fn register_session(
		&self,
		ip: String,
		tx: futures::channel::mpsc::Sender<String>,
		kill_switch: futures::channel::oneshot::Sender<()>,
	) -> usize {
		let difficulty = self.initial_difficulty();
		let id = self.sessions.add_session(ip, difficulty, tx, kill_switch);
		self.vardiff.add_session(id);
		self.stats.session_connected();
		id
	}

	/// Deregister a connection everywhere.
	pub fn drop_session(&self, id: usize) {
		self.sessions.remove_session(id);
		self.vardiff.remove_session(id);
		self.stats.session_disconnected();
	}

	/// Bind a worker identity to a session. Liberal policy: any
	/// non-empty login is a valid payout identifier.
	pub fn authorize(&self, session_id: usize, login: &str, agent: &str) -> bool {
		if login.is_empty() {
			return false;
		}
		if !self.sessions.login(session_id, login.to_string(), agent.to_string()) {
			return false;
		}
		self.stats.register_worker(login);
		if let Some(diff) = self.vardiff.current_difficulty(session_id) {
			self.stats.record_diff_change(login, diff, DiffReason::Initial);
		}
		true
	}

	/// The job miners should currently be searching.
	pub fn current_job(&self) -> Option<Arc<Job>> {
		self.jobs.read().current()
	}

	/// Build a fresh template from the chain tip and mempool, rotate the
	/// registry and prune the duplicate set down to the jobs still
	/// accepting submissions. The chain is read before the job lock is
	/// taken.
	pub fn rebuild_job(&self) -> Arc<Job> {
		let tip = self.chain.current_tip();
		let pending = self.chain.pending_transactions();
		let difficulty = self.chain.current_difficulty();

		let job = self.jobs.write().build(
			&tip,
			pending,
			difficulty,
			&self.config.pool_address,
			&self.config.block_reward,
		);
		let live: HashSet<u64> = [job.id, job.id.wrapping_sub(1)].iter().cloned().collect();
		self.accepted.write().retain(|(job_id, _)| live.contains(job_id));

		self.stats.update_block_height(job.height);
		self.stats.update_network_difficulty(job.difficulty.clone());
		job
	}

	/// Broadcast the current job to every authorized session.
	pub fn notify_all_current_job(&self) {
		if let Some(job) = self.current_job() {
			debug!("broadcasting job {} to all sessions", job.id);
			self.sessions.broadcast(stratumserver::job_message(&job));
		}
	}

	/// The whole share pipeline, entered from `mining.submit`.
	pub fn submit_share(
		&self,
		session_id: usize,
		job_id: u64,
		nonce: u64,
		candidate_hash: Hash,
	) -> Result<ShareOutcome, RejectReason> {
		// 1. session must exist and be authorized
		let session = self
			.sessions
			.get_session(session_id)
			.ok_or(RejectReason::Unauthorized)?;
		let login = match (&session.login, session.authenticated) {
			(Some(login), true) => login.clone(),
			_ => return Err(RejectReason::Unauthorized),
		};

		// 2. resolve the job, previous job only inside its grace window
		let job = match self.jobs.read().lookup(job_id) {
			JobLookup::Current(job) | JobLookup::Grace(job) => job,
			JobLookup::Stale => {
				self.stats.record_share(&login, false);
				return Err(RejectReason::Stale);
			}
		};

		// 3. duplicate suppression across all sessions
		if self.accepted.read().contains(&(job_id, nonce)) {
			self.stats.record_share(&login, false);
			return Err(RejectReason::Duplicate);
		}

		// 4. recompute the header; the client's hash must match ours
		let header = job.header_with_nonce(nonce);
		let hash = header.hash();
		if hash != candidate_hash {
			self.stats.record_share(&login, false);
			return Err(RejectReason::Malformed);
		}

		// 5. judge against the session's difficulty at receipt
		if !pow::meets_difficulty(&hash, &session.difficulty) {
			self.stats.record_share(&login, false);
			return Err(RejectReason::LowDifficulty);
		}

		// re-check under the write lock; two sessions may race the same
		// nonce past step 3
		if !self.accepted.write().insert((job_id, nonce)) {
			self.stats.record_share(&login, false);
			return Err(RejectReason::Duplicate);
		}

		// 6. the share is good: count it, credit it, feed the controller
		self.stats.record_share(&login, true);
		self.ledger.add_share(&login);
		self.sessions.last_seen(session_id);

		let new_difficulty = self.vardiff.record_share(session_id);
		if let Some(ref diff) = new_difficulty {
			self.sessions.set_difficulty(session_id, diff.clone());
			self.stats
				.record_diff_change(&login, diff.clone(), DiffReason::Vardiff);
			self.sessions
				.send_to(session_id, stratumserver::set_difficulty_message(diff));
			info!(
				"session {} ({}) retargeted to difficulty {:x}",
				session_id, login, diff
			);
		}

		// 7. a share meeting network difficulty is a block candidate
		let mut block_found = false;
		if pow::meets_difficulty(&hash, &job.difficulty) {
			let block = job.finalize(nonce);
			let block_hash = block.hash();
			match self.chain.append_block(block) {
				Ok(()) => {
					block_found = true;
					let tip = self.chain.current_tip();
					warn!(
						"block found at height {}, hash {}, by worker {} - Yay!!!",
						tip.height, block_hash, login
					);
					self.stats.record_block(
						&login,
						tip.height,
						block_hash,
						&self.config.block_reward,
					);
					self.ledger.on_block_found(tip.height, &self.config.block_reward);
					self.rebuild_job();
					self.notify_all_current_job();
				}
				Err(e) => {
					// lost the race to a peer block; the work was still
					// honest, so the credit above stands
					error!(
						"chain rejected block candidate {} from {}: {}",
						block_hash, login, e
					);
					let tip = self.chain.current_tip();
					if tip.hash != job.prev_hash {
						self.rebuild_job();
						self.notify_all_current_job();
					}
				}
			}
		}

		Ok(ShareOutcome {
			block_found,
			new_difficulty,
		})
	}

	/// One pass of the template tick: rebuild on a tip change, or on
	/// refresh expiry while miners are connected.
	pub fn template_tick(&self) {
		let tip = self.chain.current_tip();
		let now = Utc::now().timestamp();
		let (tip_changed, refresh_due) = match self.current_job() {
			Some(job) => (
				job.prev_hash != tip.hash,
				now - job.created_at >= self.config.template.refresh_interval_s,
			),
			None => (true, true),
		};
		if tip_changed || (refresh_due && self.sessions.count() > 0) {
			debug!("template tick: rebuilding (tip_changed: {})", tip_changed);
			self.rebuild_job();
			self.notify_all_current_job();
		}
	}

	/// One pass of the idle sweep: kick sessions silent past the idle
	/// timeout.
	pub fn idle_sweep(&self) {
		let cutoff = Utc::now().timestamp_millis() - self.config.idle_timeout_s * 1000;
		for session in self.sessions.idle_sessions(cutoff) {
			warn!(
				"session {} ip {} idle for more than {}s, closing",
				session.id, session.ip, self.config.idle_timeout_s
			);
			session.trigger_kill_switch();
		}
	}

	/// One pass of the stats tick.
	pub fn stats_tick(&self) {
		self.stats.refresh_pool_hashrate();
	}

	/// Run one payout cycle against the chain.
	pub fn run_payout_cycle(&self) {
		self.ledger.run_payout_cycle(self.chain.as_ref());
	}

	/// Matured, unpaid balance of a worker.
	pub fn balance_of(&self, worker: &str) -> BigUint {
		self.ledger.balance_of(worker)
	}

	/// Shares a worker holds in the current round.
	pub fn pending_shares_of(&self, worker: &str) -> u64 {
		self.ledger.pending_shares_of(worker)
	}

	/// Stage-cancel credits of a reorged-out block.
	pub fn cancel_immature(&self, height: u64) {
		self.ledger.cancel_immature(height);
	}

	/// Pool-wide statistics snapshot.
	pub fn pool_stats(&self) -> PoolSnapshot {
		self.stats
			.pool_snapshot(self.config.worker_activity_timeout_s)
	}

	/// One worker's statistics snapshot.
	pub fn worker_stats(&self, id: &str) -> Option<WorkerSnapshot> {
		self.stats.worker_snapshot(id)
	}

	/// Vardiff state of every session bound to the login.
	pub fn vardiff_stats(&self, login: &str) -> Vec<VardiffSnapshot> {
		self.sessions
			.sessions_of(login)
			.into_iter()
			.filter_map(|id| self.vardiff.snapshot(id))
			.collect()
	}

	/// Payout health snapshot.
	pub fn payout_status(&self) -> PayoutStatus {
		self.ledger.payout_status()
	}

	/// Shutdown: kick sessions and flush the payout cycle once.
	pub fn shutdown(&self) {
		info!("pool shutting down: draining sessions, flushing payouts");
		self.sessions.kill_all();
		self.run_payout_cycle();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::common::types::{PoolServerConfig, VardiffConfig};
	use crate::core::chain::Chain;
	use futures::channel::{mpsc, oneshot};
	use num_traits::One;

	const QUEUE: usize = 64;

	fn test_config(min_diff: u32) -> PoolServerConfig {
		let mut config = PoolServerConfig::default();
		config.maturity_depth = 0;
		config.vardiff = VardiffConfig {
			minimum_diff: BigUint::from(min_diff),
			..VardiffConfig::default()
		};
		config
	}

	fn pool_with(network_diff_bits: usize, min_diff: u32) -> Arc<MiningPool> {
		let (pool, _chain) = pool_and_chain(network_diff_bits, min_diff);
		pool
	}

	fn pool_and_chain(network_diff_bits: usize, min_diff: u32) -> (Arc<MiningPool>, Arc<Chain>) {
		let chain = Arc::new(Chain::new(BigUint::one() << network_diff_bits));
		let pool = Arc::new(MiningPool::new(test_config(min_diff), chain.clone()));
		(pool, chain)
	}

	fn connect_and_authorize(pool: &MiningPool, login: &str) -> usize {
		let (tx, _rx) = mpsc::channel(QUEUE);
		let (kill, _kill_rx) = oneshot::channel();
		let id = pool.register_session("127.0.0.1".to_string(), tx, kill);
		assert!(pool.authorize(id, login, "test-rig"));
		id
	}

	// Find a nonce whose header hash meets the session difficulty but
	// not the network difficulty (a plain share), starting at `from`.
	fn share_nonce(job: &Job, network_diff: &BigUint, from: u64) -> u64 {
		let mut nonce = from;
		loop {
			let hash = job.header_with_nonce(nonce).hash();
			if !pow::meets_difficulty(&hash, network_diff) {
				return nonce;
			}
			nonce += 1;
		}
	}

	// Find a nonce that solves the block.
	fn block_nonce(job: &Job, network_diff: &BigUint, from: u64) -> u64 {
		let mut nonce = from;
		loop {
			let hash = job.header_with_nonce(nonce).hash();
			if pow::meets_difficulty(&hash, network_diff) {
				return nonce;
			}
			nonce += 1;
		}
	}

	fn submit(pool: &MiningPool, session: usize, job: &Job, nonce: u64) -> Result<ShareOutcome, RejectReason> {
		let hash = job.header_with_nonce(nonce).hash();
		pool.submit_share(session, job.id, nonce, hash)
	}

	#[test]
	fn unauthorized_submit_is_rejected() {
		let pool = pool_with(16, 1);
		let (tx, _rx) = mpsc::channel(QUEUE);
		let (kill, _kill_rx) = oneshot::channel();
		let id = pool.register_session("ip".to_string(), tx, kill);
		let job = pool.current_job().unwrap();
		assert_eq!(
			submit(&pool, id, &job, 0).unwrap_err(),
			RejectReason::Unauthorized
		);
	}

	#[test]
	fn low_difficulty_share_counts_invalid_only() {
		let pool = pool_with(16, 1);
		let id = connect_and_authorize(&pool, "addrA");
		let job = pool.current_job().unwrap();

		// judged against an impossible session target
		pool.sessions
			.set_difficulty(id, BigUint::one() << 255usize);
		let nonce = share_nonce(&job, &job.difficulty, 0);
		assert_eq!(
			submit(&pool, id, &job, nonce).unwrap_err(),
			RejectReason::LowDifficulty
		);

		let stats = pool.worker_stats("addrA").unwrap();
		assert_eq!(stats.num_rejected, 1);
		assert_eq!(stats.num_accepted, 0);
	}

	#[test]
	fn malformed_hash_is_rejected() {
		let pool = pool_with(16, 1);
		let id = connect_and_authorize(&pool, "addrA");
		let job = pool.current_job().unwrap();
		let wrong = Hash([0xab; 32]);
		assert_eq!(
			pool.submit_share(id, job.id, 5, wrong).unwrap_err(),
			RejectReason::Malformed
		);
	}

	#[test]
	fn stale_job_is_rejected() {
		let pool = pool_with(16, 1);
		let id = connect_and_authorize(&pool, "addrA");
		assert_eq!(
			pool.submit_share(id, 999, 0, Hash([0; 32])).unwrap_err(),
			RejectReason::Stale
		);
		let stats = pool.worker_stats("addrA").unwrap();
		assert_eq!(stats.num_rejected, 1);
	}

	#[test]
	fn duplicate_nonce_rejected_for_any_session() {
		let pool = pool_with(16, 1);
		let a = connect_and_authorize(&pool, "addrA");
		let b = connect_and_authorize(&pool, "addrB");
		let job = pool.current_job().unwrap();
		let nonce = share_nonce(&job, &job.difficulty, 0);

		assert!(submit(&pool, a, &job, nonce).is_ok());
		assert_eq!(
			submit(&pool, a, &job, nonce).unwrap_err(),
			RejectReason::Duplicate
		);
		assert_eq!(
			submit(&pool, b, &job, nonce).unwrap_err(),
			RejectReason::Duplicate
		);
		// no double credit
		assert_eq!(pool.pending_shares_of("addrA"), 1);
		assert_eq!(pool.pending_shares_of("addrB"), 0);
	}

	#[test]
	fn accepted_share_is_credited_everywhere() {
		let pool = pool_with(16, 1);
		let id = connect_and_authorize(&pool, "addrA");
		let job = pool.current_job().unwrap();
		let nonce = share_nonce(&job, &job.difficulty, 0);

		let outcome = submit(&pool, id, &job, nonce).unwrap();
		assert!(!outcome.block_found);
		assert_eq!(pool.pending_shares_of("addrA"), 1);
		let stats = pool.worker_stats("addrA").unwrap();
		assert_eq!(stats.num_accepted, 1);
		assert_eq!(stats.num_rejected, 0);
	}

	#[test]
	fn block_find_closes_round_pro_rata() {
		let (pool, chain) = pool_and_chain(16, 1);
		let a = connect_and_authorize(&pool, "addrA");
		let b = connect_and_authorize(&pool, "addrB");
		let job = pool.current_job().unwrap();
		let network = job.difficulty.clone();

		// 300 shares for A, 100 for B, none of them blocks
		let mut nonce = 0;
		for _ in 0..300 {
			nonce = share_nonce(&job, &network, nonce);
			submit(&pool, a, &job, nonce).unwrap();
			nonce += 1;
		}
		for _ in 0..100 {
			nonce = share_nonce(&job, &network, nonce);
			submit(&pool, b, &job, nonce).unwrap();
			nonce += 1;
		}
		assert_eq!(pool.pending_shares_of("addrA"), 300);
		assert_eq!(pool.pending_shares_of("addrB"), 100);

		// A solves the block; its share joins the round before settling
		let solving = block_nonce(&job, &network, nonce);
		let outcome = submit(&pool, a, &job, solving).unwrap();
		assert!(outcome.block_found);

		// round reset
		assert_eq!(pool.pending_shares_of("addrA"), 0);
		assert_eq!(pool.pending_shares_of("addrB"), 0);

		// maturity depth 0: the payout cycle promotes the round and pays
		// both workers; verify the split of 50 AIM at 2% fee over
		// 301:100 shares through the emitted transactions
		pool.run_payout_cycle();
		let reward = pool.config().block_reward.clone();
		let fee = &reward * BigUint::from(2u32) / BigUint::from(100u32);
		let distributable = &reward - &fee;
		let expect_a = &distributable * BigUint::from(301u32) / BigUint::from(401u32);
		let expect_b = &distributable * BigUint::from(100u32) / BigUint::from(401u32);

		let payouts = chain.pending_transactions();
		assert_eq!(payouts.len(), 2);
		let paid_to = |to: &str| {
			payouts
				.iter()
				.find(|tx| tx.to == to)
				.map(|tx| tx.amount.clone())
				.unwrap()
		};
		assert_eq!(paid_to("addrA"), expect_a);
		assert_eq!(paid_to("addrB"), expect_b);
		assert_eq!(pool.payout_status().num_paid, 2);
		assert!(pool.balance_of("addrA").bits() == 0);

		// a new job was broadcast on top of the found block
		let new_job = pool.current_job().unwrap();
		assert!(new_job.id > job.id);
		assert_eq!(new_job.height, job.height + 1);
	}

	#[test]
	fn block_find_share_meets_worker_target_too() {
		let pool = pool_with(16, 1);
		let id = connect_and_authorize(&pool, "addrA");
		let job = pool.current_job().unwrap();
		let solving = block_nonce(&job, &job.difficulty, 0);
		let hash = job.header_with_nonce(solving).hash();
		let session = pool.sessions.get_session(id).unwrap();
		assert!(pow::meets_difficulty(&hash, &session.difficulty));
		assert!(submit(&pool, id, &job, solving).unwrap().block_found);
	}

	#[test]
	fn share_is_judged_at_receipt_difficulty() {
		let pool = pool_with(16, 1);
		let id = connect_and_authorize(&pool, "addrA");
		let job = pool.current_job().unwrap();
		let nonce = share_nonce(&job, &job.difficulty, 0);

		// fine at difficulty 1
		assert!(submit(&pool, id, &job, nonce).is_ok());

		// the same work is judged against the new difficulty from now on
		pool.sessions
			.set_difficulty(id, BigUint::one() << 255usize);
		let nonce2 = share_nonce(&job, &job.difficulty, nonce + 1);
		assert_eq!(
			submit(&pool, id, &job, nonce2).unwrap_err(),
			RejectReason::LowDifficulty
		);
	}

	#[test]
	fn grace_window_accepts_previous_job() {
		let pool = pool_with(16, 1);
		let id = connect_and_authorize(&pool, "addrA");
		let job = pool.current_job().unwrap();
		pool.rebuild_job();
		// the old job is still inside its grace window
		let nonce = share_nonce(&job, &job.difficulty, 0);
		assert!(submit(&pool, id, &job, nonce).is_ok());
	}

	#[test]
	fn reject_codes_are_stable() {
		assert_eq!(RejectReason::Stale.code(), 21);
		assert_eq!(RejectReason::Duplicate.code(), 22);
		assert_eq!(RejectReason::LowDifficulty.code(), 23);
		assert_eq!(RejectReason::Unauthorized.code(), 24);
		assert_eq!(RejectReason::Malformed.code(), 20);
		assert_eq!(
			serde_json::to_string(&RejectReason::LowDifficulty).unwrap(),
			"\"low-difficulty\""
		);
	}
}
