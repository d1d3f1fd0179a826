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

//! The Alerim mining pool engine: the stratum session layer, the
//! per-worker variable difficulty controller, the share validation
//! pipeline, reward accounting with payouts, and the statistics windows
//! feeding both the operator dashboards and the controller.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]

#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate log;

use alerim_core as core;
use alerim_util as util;

mod error;
pub use crate::error::Error;

pub mod common;
pub mod mining;

pub use crate::common::stats::{PoolSnapshot, PoolStats, WorkerSnapshot};
pub use crate::common::types::{PoolServerConfig, TemplateConfig, VardiffConfig};
pub use crate::mining::pool::{MiningPool, RejectReason};
pub use crate::mining::rewards::PayoutStatus;
pub use crate::mining::stratumserver::StratumServer;
pub use crate::mining::vardiff::VardiffSnapshot;
