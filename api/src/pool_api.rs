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

//! Snapshot getters over a shared pool handle.

use alerim_servers::{MiningPool, PayoutStatus, PoolSnapshot, VardiffSnapshot, WorkerSnapshot};
use failure::Fail;
use std::sync::Arc;

/// API errors.
#[derive(Debug, Fail)]
pub enum Error {
	/// The requested entity does not exist.
	#[fail(display = "not found: {}", _0)]
	NotFound(String),
}

/// Pool statistics plus payout health, one response body.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
	/// Pool-wide counters and windows
	pub pool: PoolSnapshot,
	/// Payout cycle health
	pub payout: PayoutStatus,
}

/// Worker statistics plus the vardiff state of its live sessions.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
	/// Cumulative counters, windows and histories
	pub worker: WorkerSnapshot,
	/// Controller state per connected session
	pub sessions: Vec<VardiffSnapshot>,
}

/// Read-only view over the pool for dashboards and healthchecks.
pub struct PoolApi {
	pool: Arc<MiningPool>,
}

impl PoolApi {
	/// Create a new API instance around a shared pool handle.
	pub fn new(pool: Arc<MiningPool>) -> PoolApi {
		PoolApi { pool }
	}

	/// Pool-wide statistics and payout status.
	pub fn pool_stats(&self) -> PoolStatus {
		PoolStatus {
			pool: self.pool.pool_stats(),
			payout: self.pool.payout_status(),
		}
	}

	/// Statistics for one worker identity.
	pub fn worker_stats(&self, id: &str) -> Result<WorkerStatus, Error> {
		let worker = self
			.pool
			.worker_stats(id)
			.ok_or_else(|| Error::NotFound(format!("worker {}", id)))?;
		Ok(WorkerStatus {
			worker,
			sessions: self.pool.vardiff_stats(id),
		})
	}

	/// Vardiff controller state for one worker's sessions.
	pub fn vardiff_stats(&self, id: &str) -> Result<Vec<VardiffSnapshot>, Error> {
		let sessions = self.pool.vardiff_stats(id);
		if sessions.is_empty() && self.pool.worker_stats(id).is_none() {
			return Err(Error::NotFound(format!("worker {}", id)));
		}
		Ok(sessions)
	}
}
