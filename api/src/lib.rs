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

//! Read-only snapshot handles the HTTP layer serves from. The handles
//! own nothing and mutate nothing; authentication and transport belong
//! to whatever fronts them.

#[macro_use]
extern crate serde_derive;

mod pool_api;
pub use crate::pool_api::{Error, PoolApi, PoolStatus, WorkerStatus};
