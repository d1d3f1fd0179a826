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

//! The narrow interface the pool uses to talk to the chain, plus the
//! in-memory chain backing it. The pool never reaches past this adapter:
//! consensus, gossip and persistence live on the other side of it.

use crate::block::Block;
use crate::genesis::genesis;
use crate::hash::Hash;
use crate::transaction::Transaction;
use crate::util::RwLock;
use failure::Fail;
use num_bigint::BigUint;

/// Chain adapter errors.
#[derive(Debug, Fail)]
pub enum Error {
	/// A block failed validation or lost an append race
	#[fail(display = "block rejected, {}", _0)]
	BlockRejected(String),
	/// A transaction was not accepted into the mempool
	#[fail(display = "transaction rejected, {}", _0)]
	TxRejected(String),
}

/// The head of the chain as the pool needs to see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tip {
	/// Hash of the best block header
	pub hash: Hash,
	/// Height of the best block
	pub height: u64,
	/// Timestamp of the best block, unix seconds
	pub timestamp: i64,
}

/// Everything the pool engine needs from the chain. Implementations must
/// be safe to call from many tasks; calls may be slow (network, disk).
pub trait ChainAdapter: Send + Sync {
	/// Validate and append a solved block on the current tip.
	fn append_block(&self, block: Block) -> Result<(), Error>;
	/// The difficulty a block must currently meet.
	fn current_difficulty(&self) -> BigUint;
	/// The current best tip.
	fn current_tip(&self) -> Tip;
	/// Snapshot of pending transactions for template building.
	fn pending_transactions(&self) -> Vec<Transaction>;
	/// Submit a transaction (payouts) to the mempool.
	fn submit_transaction(&self, tx: Transaction) -> Result<(), Error>;
}

struct ChainInner {
	blocks: Vec<Block>,
	mempool: Vec<Transaction>,
	difficulty: BigUint,
}

/// In-memory chain: genesis plus every appended block, and a mempool.
/// Fine for a single pool node; anything durable should implement
/// `ChainAdapter` against a real chain instead.
pub struct Chain {
	inner: RwLock<ChainInner>,
}

impl Chain {
	/// Create a chain holding just the genesis block, mining against the
	/// given difficulty.
	pub fn new(difficulty: BigUint) -> Chain {
		Chain {
			inner: RwLock::new(ChainInner {
				blocks: vec![genesis(difficulty.clone())],
				mempool: vec![],
				difficulty,
			}),
		}
	}

	/// Current chain height (genesis is 0).
	pub fn height(&self) -> u64 {
		self.inner.read().blocks.len() as u64 - 1
	}

	/// Sum of amounts received minus sent for the address.
	pub fn balance_of(&self, address: &str) -> BigUint {
		let inner = self.inner.read();
		let mut received = BigUint::from(0u32);
		let mut sent = BigUint::from(0u32);
		for block in &inner.blocks {
			for tx in &block.transactions {
				if tx.to == address {
					received += &tx.amount;
				}
				if !tx.is_coinbase() && tx.from == address {
					sent += &tx.amount;
				}
			}
		}
		if sent > received {
			BigUint::from(0u32)
		} else {
			received - sent
		}
	}
}

impl ChainAdapter for Chain {
	fn append_block(&self, block: Block) -> Result<(), Error> {
		let mut inner = self.inner.write();
		let tip_hash = inner.blocks.last().expect("genesis always present").hash();

		if block.header.prev_hash != tip_hash {
			return Err(Error::BlockRejected(
				"previous hash does not match current tip".to_string(),
			));
		}
		if !block.verify_merkle_root() {
			return Err(Error::BlockRejected("merkle root mismatch".to_string()));
		}
		if block.header.difficulty < inner.difficulty {
			return Err(Error::BlockRejected(
				"header difficulty below chain difficulty".to_string(),
			));
		}
		if !block.header.validate_pow() {
			return Err(Error::BlockRejected("invalid proof of work".to_string()));
		}

		let included: Vec<Hash> = block.transactions.iter().map(|tx| tx.hash).collect();
		inner.mempool.retain(|tx| !included.contains(&tx.hash));
		inner.blocks.push(block);
		Ok(())
	}

	fn current_difficulty(&self) -> BigUint {
		self.inner.read().difficulty.clone()
	}

	fn current_tip(&self) -> Tip {
		let inner = self.inner.read();
		let best = inner.blocks.last().expect("genesis always present");
		Tip {
			hash: best.hash(),
			height: inner.blocks.len() as u64 - 1,
			timestamp: best.header.timestamp,
		}
	}

	fn pending_transactions(&self) -> Vec<Transaction> {
		self.inner.read().mempool.clone()
	}

	fn submit_transaction(&self, tx: Transaction) -> Result<(), Error> {
		if tx.to.is_empty() {
			return Err(Error::TxRejected("missing recipient".to_string()));
		}
		self.inner.write().mempool.push(tx);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::consensus::HEADER_VERSION;
	use chrono::Utc;
	use num_traits::One;

	fn trivial_chain() -> Chain {
		Chain::new(BigUint::one())
	}

	fn next_block(chain: &Chain, txs: Vec<Transaction>) -> Block {
		let tip = chain.current_tip();
		let mut block = Block::new(
			HEADER_VERSION,
			Utc::now().timestamp(),
			tip.hash,
			chain.current_difficulty(),
			txs,
		);
		block.mine();
		block
	}

	#[test]
	fn append_advances_tip() {
		let chain = trivial_chain();
		let block = next_block(&chain, vec![]);
		let hash = block.hash();
		chain.append_block(block).unwrap();
		assert_eq!(chain.height(), 1);
		assert_eq!(chain.current_tip().hash, hash);
	}

	#[test]
	fn stale_prev_hash_rejected() {
		let chain = trivial_chain();
		let first = next_block(&chain, vec![]);
		let second_on_same_parent = next_block(&chain, vec![]);
		chain.append_block(first).unwrap();
		// second block still points at genesis
		match chain.append_block(second_on_same_parent) {
			Err(Error::BlockRejected(_)) => (),
			other => panic!("expected rejection, got {:?}", other.map(|_| ())),
		}
	}

	#[test]
	fn append_drains_included_mempool_txs() {
		let chain = trivial_chain();
		let tx = Transaction::new("a", "b", BigUint::from(5u32));
		chain.submit_transaction(tx.clone()).unwrap();
		assert_eq!(chain.pending_transactions().len(), 1);

		let block = next_block(&chain, vec![tx]);
		chain.append_block(block).unwrap();
		assert!(chain.pending_transactions().is_empty());
	}

	#[test]
	fn balance_follows_transfers() {
		let chain = trivial_chain();
		let coinbase = Transaction::coinbase("miner", BigUint::from(50u32), 1);
		let block = next_block(&chain, vec![coinbase]);
		chain.append_block(block).unwrap();

		let spend = Transaction::new("miner", "shop", BigUint::from(20u32));
		let block = next_block(&chain, vec![spend]);
		chain.append_block(block).unwrap();

		assert_eq!(chain.balance_of("miner"), BigUint::from(30u32));
		assert_eq!(chain.balance_of("shop"), BigUint::from(20u32));
	}
}
