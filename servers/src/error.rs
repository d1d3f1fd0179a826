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

//! Error type wrapping the underlying module errors.

use crate::core::chain;
use failure::Fail;

/// Pool server errors.
#[derive(Debug, Fail)]
pub enum Error {
	/// Error originating from the chain adapter.
	#[fail(display = "Chain error, {}", _0)]
	Chain(chain::Error),
	/// Error originating from some I/O operation (sockets, mostly).
	#[fail(display = "IO error, {}", _0)]
	IOError(std::io::Error),
	/// Configuration error
	#[fail(display = "Configuration error, {}", _0)]
	Configuration(String),
	/// General error
	#[fail(display = "General error, {}", _0)]
	General(String),
}

impl From<chain::Error> for Error {
	fn from(e: chain::Error) -> Error {
		Error::Chain(e)
	}
}

impl From<std::io::Error> for Error {
	fn from(e: std::io::Error) -> Error {
		Error::IOError(e)
	}
}
