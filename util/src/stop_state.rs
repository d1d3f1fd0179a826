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

//! Process-wide stop flag shared between the listener, the background
//! loops and the shutdown handler.

use parking_lot::Mutex;

/// Broadcast a stop request to every component holding a clone of the
/// surrounding `Arc`.
pub struct StopState {
	stopped: Mutex<bool>,
}

impl StopState {
	/// Create a fresh (running) stop state
	pub fn new() -> StopState {
		StopState {
			stopped: Mutex::new(false),
		}
	}

	/// Has a stop been requested?
	pub fn is_stopped(&self) -> bool {
		*self.stopped.lock()
	}

	/// Request all components to stop
	pub fn stop(&self) {
		*self.stopped.lock() = true;
	}
}

impl Default for StopState {
	fn default() -> StopState {
		StopState::new()
	}
}
