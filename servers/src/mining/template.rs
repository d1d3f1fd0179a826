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

//! Block template assembly and the job registry. A job is the header
//! skeleton miners search; the registry keeps the current job plus the
//! previous one inside a grace window, so submissions in flight across a
//! template flip are not thrown away.

use crate::core::block::{Block, BlockHeader};
use crate::core::chain::Tip;
use crate::core::consensus::HEADER_VERSION;
use crate::core::hash::Hash;
use crate::core::merkle::merkle_root;
use crate::core::transaction::Transaction;
use chrono::Utc;
use num_bigint::BigUint;
use std::sync::Arc;

/// A unit of work handed to miners.
#[derive(Debug, Clone)]
pub struct Job {
	/// Monotonically increasing job id
	pub id: u64,
	/// Height the block built from this job would land at
	pub height: u64,
	/// Hash of the chain tip this job extends
	pub prev_hash: Hash,
	/// Merkle root over coinbase plus selected transactions
	pub merkle_root: Hash,
	/// Header timestamp, unix seconds
	pub timestamp: i64,
	/// Network difficulty a block from this job must meet
	pub difficulty: BigUint,
	/// The transactions committed by the merkle root, coinbase first
	pub transactions: Vec<Transaction>,
	/// When the job was built, unix seconds
	pub created_at: i64,
}

impl Job {
	/// The header a miner at `nonce` would have hashed.
	pub fn header_with_nonce(&self, nonce: u64) -> BlockHeader {
		BlockHeader {
			version: HEADER_VERSION,
			timestamp: self.timestamp,
			prev_hash: self.prev_hash,
			merkle_root: self.merkle_root,
			difficulty: self.difficulty.clone(),
			nonce,
		}
	}

	/// The full block this job finalizes to at `nonce`.
	pub fn finalize(&self, nonce: u64) -> Block {
		Block {
			header: self.header_with_nonce(nonce),
			transactions: self.transactions.clone(),
		}
	}
}

/// Where a looked-up job id stands relative to the registry.
#[derive(Debug, Clone)]
pub enum JobLookup {
	/// The latest job
	Current(Arc<Job>),
	/// The previous job, still inside its grace window
	Grace(Arc<Job>),
	/// Unknown or expired
	Stale,
}

/// Owns the current and previous job. One per pool, behind the pool's
/// job lock.
pub struct JobRegistry {
	next_id: u64,
	current: Option<Arc<Job>>,
	previous: Option<Arc<Job>>,
	/// When `previous` was demoted, unix seconds
	rotated_at: i64,
	stale_window_s: i64,
}

impl JobRegistry {
	/// Empty registry; `build` creates the first job.
	pub fn new(stale_window_s: i64) -> JobRegistry {
		JobRegistry {
			next_id: 0,
			current: None,
			previous: None,
			rotated_at: 0,
			stale_window_s,
		}
	}

	/// Assemble a fresh job from a chain tip and mempool snapshot. A new
	/// coinbase paying `pool_address` is prepended. The old current job
	/// starts its grace window. The chain state comes in as values so no
	/// registry lock is ever held across a chain call.
	pub fn build(
		&mut self,
		tip: &Tip,
		pending_txs: Vec<Transaction>,
		difficulty: BigUint,
		pool_address: &str,
		block_reward: &BigUint,
	) -> Arc<Job> {
		let now = Utc::now().timestamp();

		let mut transactions =
			vec![Transaction::coinbase(pool_address, block_reward.clone(), now)];
		transactions.extend(pending_txs);

		let job = Arc::new(Job {
			id: self.next_id,
			height: tip.height + 1,
			prev_hash: tip.hash,
			merkle_root: merkle_root(&transactions),
			timestamp: now,
			difficulty,
			transactions,
			created_at: now,
		});
		self.next_id += 1;

		self.previous = self.current.take();
		self.rotated_at = now;
		self.current = Some(job.clone());
		job
	}

	/// The latest job, if any has been built.
	pub fn current(&self) -> Option<Arc<Job>> {
		self.current.clone()
	}

	/// Resolve a submitted job id against the current job and the
	/// previous one within the grace window.
	pub fn lookup(&self, job_id: u64) -> JobLookup {
		self.lookup_at(job_id, Utc::now().timestamp())
	}

	/// Clock-injected form of [`lookup`].
	pub fn lookup_at(&self, job_id: u64, now: i64) -> JobLookup {
		if let Some(ref job) = self.current {
			if job.id == job_id {
				return JobLookup::Current(job.clone());
			}
		}
		if let Some(ref job) = self.previous {
			if job.id == job_id && now - self.rotated_at <= self.stale_window_s {
				return JobLookup::Grace(job.clone());
			}
		}
		JobLookup::Stale
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::core::chain::{Chain, ChainAdapter};
	use num_traits::One;

	fn registry_and_chain() -> (JobRegistry, Chain) {
		(JobRegistry::new(30), Chain::new(BigUint::one()))
	}

	// The pool core reads the chain first, then hands the snapshot in.
	fn build_from(registry: &mut JobRegistry, chain: &Chain, addr: &str, reward: &BigUint) -> Arc<Job> {
		registry.build(
			&chain.current_tip(),
			chain.pending_transactions(),
			chain.current_difficulty(),
			addr,
			reward,
		)
	}

	#[test]
	fn build_prepends_coinbase_and_numbers_jobs() {
		let (mut registry, chain) = registry_and_chain();
		let reward = BigUint::from(50u32);

		let job0 = build_from(&mut registry, &chain, "pool-addr", &reward);
		let job1 = build_from(&mut registry, &chain, "pool-addr", &reward);

		assert_eq!(job0.id, 0);
		assert_eq!(job1.id, 1);
		assert!(job0.transactions[0].is_coinbase());
		assert_eq!(job0.transactions[0].to, "pool-addr");
		assert_eq!(job0.height, 1);
		assert_eq!(job0.prev_hash, chain.current_tip().hash);
	}

	#[test]
	fn merkle_root_commits_to_mempool() {
		let (mut registry, chain) = registry_and_chain();
		let reward = BigUint::from(50u32);
		let job0 = build_from(&mut registry, &chain, "pool", &reward);

		chain
			.submit_transaction(Transaction::new("a", "b", BigUint::from(3u32)))
			.unwrap();
		let job1 = build_from(&mut registry, &chain, "pool", &reward);

		assert_eq!(job1.transactions.len(), 2);
		assert_ne!(job0.merkle_root, job1.merkle_root);
	}

	#[test]
	fn lookup_honors_grace_window() {
		let (mut registry, chain) = registry_and_chain();
		let reward = BigUint::from(50u32);
		let job0 = build_from(&mut registry, &chain, "pool", &reward);
		build_from(&mut registry, &chain, "pool", &reward);
		let rotated = registry.rotated_at;

		match registry.lookup_at(job0.id, rotated + 10) {
			JobLookup::Grace(job) => assert_eq!(job.id, job0.id),
			other => panic!("expected grace, got {:?}", other),
		}
		match registry.lookup_at(job0.id, rotated + 31) {
			JobLookup::Stale => (),
			other => panic!("expected stale, got {:?}", other),
		}
	}

	#[test]
	fn unknown_job_is_stale() {
		let (mut registry, chain) = registry_and_chain();
		build_from(&mut registry, &chain, "pool", &BigUint::from(50u32));
		match registry.lookup_at(99, 0) {
			JobLookup::Stale => (),
			other => panic!("expected stale, got {:?}", other),
		}
	}

	#[test]
	fn finalized_block_matches_job_commitments() {
		let (mut registry, chain) = registry_and_chain();
		let job = build_from(&mut registry, &chain, "pool", &BigUint::from(50u32));
		let block = job.finalize(42);
		assert_eq!(block.header.nonce, 42);
		assert!(block.verify_merkle_root());
		assert_eq!(block.header.prev_hash, chain.current_tip().hash);
	}
}
