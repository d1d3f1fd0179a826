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

//! Reward accounting. Shares accumulate per worker inside the current
//! round; a found block closes the round and converts shares into credits
//! pro rata, integer arithmetic only. Credits mature for a configured
//! number of confirmations before they become spendable balance, and the
//! payout cycle turns balances above the threshold into transactions on
//! the chain.
//!
//! Conservation holds exactly in every round: worker credits plus the
//! pool fee plus the rounding remainder equal the block reward.

use crate::core::chain::ChainAdapter;
use crate::core::transaction::Transaction;
use crate::util::RwLock;
use chrono::Utc;
use num_bigint::BigUint;
use num_traits::Zero;
use std::collections::HashMap;

/// Credits from one found block, waiting for maturity.
#[derive(Debug, Clone)]
struct MaturingRound {
	/// Height of the block that closed the round
	height: u64,
	/// Per-worker credit deltas, operator account included
	credits: HashMap<String, BigUint>,
}

/// Operator-facing payout health.
#[derive(Debug, Clone, Serialize)]
pub struct PayoutStatus {
	/// Last payout cycle start, unix milliseconds, zero if never
	pub last_attempt_ms: i64,
	/// Payout transactions accepted by the chain over the lifetime
	pub num_paid: u64,
	/// Payout transactions the chain rejected over the lifetime
	pub num_failed: u64,
	/// Rounds still maturing
	pub immature_rounds: usize,
	/// Most recent payout error, if any
	pub last_error: Option<String>,
}

struct LedgerInner {
	pending_shares: HashMap<String, u64>,
	maturing: Vec<MaturingRound>,
	balances: HashMap<String, BigUint>,
	last_attempt_ms: i64,
	num_paid: u64,
	num_failed: u64,
	last_error: Option<String>,
}

/// The reward ledger. One per pool.
pub struct RewardLedger {
	fee_pct: u8,
	payout_threshold: BigUint,
	maturity_depth: u64,
	operator_account: String,
	inner: RwLock<LedgerInner>,
}

impl RewardLedger {
	/// New empty ledger.
	pub fn new(
		fee_pct: u8,
		payout_threshold: BigUint,
		maturity_depth: u64,
		operator_account: &str,
	) -> RewardLedger {
		RewardLedger {
			fee_pct,
			payout_threshold,
			maturity_depth,
			operator_account: operator_account.to_string(),
			inner: RwLock::new(LedgerInner {
				pending_shares: HashMap::new(),
				maturing: Vec::new(),
				balances: HashMap::new(),
				last_attempt_ms: 0,
				num_paid: 0,
				num_failed: 0,
				last_error: None,
			}),
		}
	}

	/// Count one accepted share for the worker in the current round.
	pub fn add_share(&self, worker: &str) {
		let mut inner = self.inner.write();
		*inner.pending_shares.entry(worker.to_string()).or_insert(0) += 1;
	}

	/// Shares the worker holds in the current round.
	pub fn pending_shares_of(&self, worker: &str) -> u64 {
		self.inner
			.read()
			.pending_shares
			.get(worker)
			.copied()
			.unwrap_or(0)
	}

	/// Spendable (matured) balance of the worker.
	pub fn balance_of(&self, worker: &str) -> BigUint {
		self.inner
			.read()
			.balances
			.get(worker)
			.cloned()
			.unwrap_or_else(BigUint::zero)
	}

	/// Close the current round against a block found at `height` paying
	/// `reward`. Credits are staged until the block matures.
	pub fn on_block_found(&self, height: u64, reward: &BigUint) {
		let mut inner = self.inner.write();

		let total: u64 = inner.pending_shares.values().sum();
		if total == 0 {
			return;
		}

		// integer arithmetic, truncation toward zero throughout
		let fee = reward * BigUint::from(self.fee_pct) / BigUint::from(100u32);
		let distributable = reward - &fee;

		let mut credits: HashMap<String, BigUint> = HashMap::new();
		let mut credited_sum = BigUint::zero();
		for (worker, shares) in &inner.pending_shares {
			let credit = &distributable * BigUint::from(*shares) / BigUint::from(total);
			credited_sum += &credit;
			credits.insert(worker.clone(), credit);
		}

		// fee and rounding remainder go to the operator account
		let remainder = &distributable - &credited_sum;
		let operator_cut = fee + remainder;
		if !operator_cut.is_zero() {
			let entry = credits
				.entry(self.operator_account.clone())
				.or_insert_with(BigUint::zero);
			*entry += operator_cut;
		}

		inner.maturing.push(MaturingRound { height, credits });
		inner.pending_shares.clear();
	}

	/// Drop staged credits of a block that was reorged out before
	/// maturing. Balances already promoted are unaffected.
	pub fn cancel_immature(&self, height: u64) {
		let mut inner = self.inner.write();
		inner.maturing.retain(|round| round.height != height);
	}

	/// Promote rounds that reached maturity depth into balances.
	fn promote_matured(inner: &mut LedgerInner, tip_height: u64, maturity_depth: u64) {
		let rounds: Vec<MaturingRound> = inner.maturing.drain(..).collect();
		for round in rounds {
			if tip_height.saturating_sub(round.height) >= maturity_depth {
				for (worker, credit) in round.credits {
					let entry = inner
						.balances
						.entry(worker)
						.or_insert_with(BigUint::zero);
					*entry += credit;
				}
			} else {
				inner.maturing.push(round);
			}
		}
	}

	/// One payout cycle: promote matured credits, then emit a payout
	/// transaction for every balance at or above the threshold. A
	/// rejected transaction leaves the balance untouched for the next
	/// cycle.
	pub fn run_payout_cycle(&self, chain: &dyn ChainAdapter) {
		let tip_height = chain.current_tip().height;

		// collect payables under the lock, call the chain outside it
		let payables: Vec<(String, BigUint)> = {
			let mut inner = self.inner.write();
			inner.last_attempt_ms = Utc::now().timestamp_millis();
			Self::promote_matured(&mut inner, tip_height, self.maturity_depth);
			inner
				.balances
				.iter()
				.filter(|(worker, balance)| {
					**balance >= self.payout_threshold && **worker != self.operator_account
				})
				.map(|(worker, balance)| (worker.clone(), balance.clone()))
				.collect()
		};

		for (worker, amount) in payables {
			let tx = Transaction::new(&self.operator_account, &worker, amount.clone());
			match chain.submit_transaction(tx) {
				Ok(()) => {
					let mut inner = self.inner.write();
					// the worker may have gained new matured credits while
					// the chain call was in flight; only clear what we paid
					if let Some(balance) = inner.balances.get_mut(&worker) {
						if *balance >= amount {
							*balance -= &amount;
						} else {
							*balance = BigUint::zero();
						}
					}
					inner.num_paid += 1;
					inner.last_error = None;
					info!(
						"payout of {} to {} accepted",
						amount.to_str_radix(10),
						worker
					);
				}
				Err(e) => {
					let mut inner = self.inner.write();
					inner.num_failed += 1;
					inner.last_error = Some(e.to_string());
					warn!("payout to {} failed, keeping balance: {}", worker, e);
				}
			}
		}
	}

	/// Payout health snapshot.
	pub fn payout_status(&self) -> PayoutStatus {
		let inner = self.inner.read();
		PayoutStatus {
			last_attempt_ms: inner.last_attempt_ms,
			num_paid: inner.num_paid,
			num_failed: inner.num_failed,
			immature_rounds: inner.maturing.len(),
			last_error: inner.last_error.clone(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::core::chain::{Chain, Error as ChainError};
	use crate::core::chain::Tip;
	use crate::core::hash::ZERO_HASH;
	use crate::core::Block;
	use num_traits::One;
	use std::sync::atomic::{AtomicBool, Ordering};

	fn aim(n: u64) -> BigUint {
		BigUint::from(n) * BigUint::from(1_000_000_000_000_000_000u64)
	}

	fn ledger() -> RewardLedger {
		RewardLedger::new(2, aim(1), 0, "pool")
	}

	#[test]
	fn round_settlement_is_pro_rata_and_conserves_reward() {
		let ledger = ledger();
		for _ in 0..300 {
			ledger.add_share("addrA");
		}
		for _ in 0..100 {
			ledger.add_share("addrB");
		}

		let reward = aim(50);
		ledger.on_block_found(1, &reward);
		{
			let mut inner = ledger.inner.write();
			RewardLedger::promote_matured(&mut inner, 1, 0);
		}

		// fee = 1 AIM, distributable = 49 AIM, split 300:100
		let credited_a: BigUint = "36750000000000000000".parse().unwrap();
		let credited_b: BigUint = "12250000000000000000".parse().unwrap();
		assert_eq!(ledger.balance_of("addrA"), credited_a);
		assert_eq!(ledger.balance_of("addrB"), credited_b);
		// conservation: credits + fee + remainder == reward exactly
		assert_eq!(ledger.balance_of("pool"), aim(1));
		assert_eq!(
			ledger.balance_of("addrA") + ledger.balance_of("addrB") + ledger.balance_of("pool"),
			reward
		);
		// round reset
		assert_eq!(ledger.pending_shares_of("addrA"), 0);
		assert_eq!(ledger.pending_shares_of("addrB"), 0);
	}

	#[test]
	fn remainder_goes_to_operator() {
		// 3 workers, 1 share each, reward 100, no fee: 33 each, 1 left over
		let ledger = RewardLedger::new(0, BigUint::from(1_000u32), 0, "pool");
		ledger.add_share("a");
		ledger.add_share("b");
		ledger.add_share("c");
		ledger.on_block_found(1, &BigUint::from(100u32));
		{
			let mut inner = ledger.inner.write();
			RewardLedger::promote_matured(&mut inner, 1, 0);
		}
		assert_eq!(ledger.balance_of("a"), BigUint::from(33u32));
		assert_eq!(ledger.balance_of("b"), BigUint::from(33u32));
		assert_eq!(ledger.balance_of("c"), BigUint::from(33u32));
		assert_eq!(ledger.balance_of("pool"), BigUint::from(1u32));
	}

	#[test]
	fn empty_round_changes_nothing() {
		let ledger = ledger();
		ledger.on_block_found(1, &aim(50));
		assert!(ledger.inner.read().maturing.is_empty());
		assert!(ledger.balance_of("anyone").is_zero());
	}

	#[test]
	fn credits_wait_for_maturity() {
		let ledger = RewardLedger::new(2, aim(1), 100, "pool");
		ledger.add_share("a");
		ledger.on_block_found(10, &aim(50));

		let mut inner = ledger.inner.write();
		// 50 confirmations: not yet
		RewardLedger::promote_matured(&mut inner, 60, 100);
		assert!(inner.balances.get("a").is_none());
		// 100 confirmations: promoted
		RewardLedger::promote_matured(&mut inner, 110, 100);
		assert!(inner.balances.get("a").is_some());
	}

	#[test]
	fn reorg_cancels_immature_credits() {
		let ledger = RewardLedger::new(2, aim(1), 100, "pool");
		ledger.add_share("a");
		ledger.on_block_found(10, &aim(50));
		ledger.cancel_immature(10);
		let mut inner = ledger.inner.write();
		RewardLedger::promote_matured(&mut inner, 200, 100);
		assert!(inner.balances.get("a").is_none());
	}

	#[test]
	fn payout_zeroes_balances_above_threshold() {
		let ledger = ledger();
		for _ in 0..400 {
			ledger.add_share("addrA");
		}
		ledger.on_block_found(1, &aim(50));

		let chain = Chain::new(BigUint::one());
		ledger.run_payout_cycle(&chain);

		assert!(ledger.balance_of("addrA") < aim(1));
		assert!(ledger.balance_of("addrA").is_zero());
		let status = ledger.payout_status();
		assert_eq!(status.num_paid, 1);
		assert_eq!(status.num_failed, 0);
		assert!(status.last_error.is_none());
		// the transaction landed in the mempool
		assert_eq!(chain.pending_transactions().len(), 1);
		assert_eq!(chain.pending_transactions()[0].to, "addrA");
	}

	#[test]
	fn below_threshold_balances_are_kept() {
		// fee 0, reward 10 atomic units, threshold 1 AIM
		let ledger = RewardLedger::new(0, aim(1), 0, "pool");
		ledger.add_share("a");
		ledger.on_block_found(1, &BigUint::from(10u32));

		let chain = Chain::new(BigUint::one());
		ledger.run_payout_cycle(&chain);

		assert_eq!(ledger.balance_of("a"), BigUint::from(10u32));
		assert!(chain.pending_transactions().is_empty());
	}

	struct RejectingSink {
		rejected: AtomicBool,
	}

	impl ChainAdapter for RejectingSink {
		fn append_block(&self, _block: Block) -> Result<(), ChainError> {
			unreachable!("payout cycle never appends blocks")
		}
		fn current_difficulty(&self) -> BigUint {
			BigUint::one()
		}
		fn current_tip(&self) -> Tip {
			Tip {
				hash: ZERO_HASH,
				height: 1000,
				timestamp: 0,
			}
		}
		fn pending_transactions(&self) -> Vec<Transaction> {
			vec![]
		}
		fn submit_transaction(&self, _tx: Transaction) -> Result<(), ChainError> {
			self.rejected.store(true, Ordering::SeqCst);
			Err(ChainError::TxRejected("sink unavailable".to_string()))
		}
	}

	#[test]
	fn rejected_payout_preserves_balance() {
		let ledger = ledger();
		for _ in 0..400 {
			ledger.add_share("addrA");
		}
		ledger.on_block_found(1, &aim(50));

		let sink = RejectingSink {
			rejected: AtomicBool::new(false),
		};
		ledger.run_payout_cycle(&sink);

		assert!(sink.rejected.load(Ordering::SeqCst));
		// balance survives for the next cycle
		let expected: BigUint = "49000000000000000000".parse().unwrap();
		assert_eq!(ledger.balance_of("addrA"), expected);
		let status = ledger.payout_status();
		assert_eq!(status.num_failed, 1);
		assert!(status.last_error.is_some());
	}
}
