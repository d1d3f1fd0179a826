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

//! Chain primitives shared by the pool server and its tooling: block and
//! transaction types, SHA-256 header hashing, Merkle trees, big-integer
//! proof-of-work targets, and the narrow adapter the pool uses to talk to
//! the chain.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate serde_derive;

use alerim_util as util;

pub mod block;
pub mod chain;
pub mod consensus;
pub mod genesis;
pub mod hash;
pub mod merkle;
pub mod pow;
pub mod transaction;

pub use crate::block::{Block, BlockHeader};
pub use crate::chain::{Chain, ChainAdapter, Tip};
pub use crate::hash::{Hash, ZERO_HASH};
pub use crate::transaction::Transaction;
