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

//! Logging, hex encoding and other low-level utilities that don't fit
//! anywhere else, used across the alerim crates.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

// Re-export so only the util crate needs to depend on parking_lot directly.
pub use parking_lot::{Mutex, RwLock};

mod hex;
pub use crate::hex::{from_hex, to_hex, ToHex};

pub mod logger;
pub use crate::logger::init_logger;

mod stop_state;
pub use crate::stop_state::StopState;
