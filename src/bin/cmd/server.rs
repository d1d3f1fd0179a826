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

/// alerim server commands processing
use clap::ArgMatches;
use std::sync::Arc;

use alerim_api::PoolApi;
use alerim_core::chain::Chain;
use alerim_servers::{Error, MiningPool, PoolServerConfig, StratumServer};
use alerim_util::StopState;

// Exit codes: 0 clean shutdown, 1 listener bind failure, 2 ledger-sink
// initialization failure.
const EXIT_OK: i32 = 0;
const EXIT_BIND_FAILURE: i32 = 1;
const EXIT_SINK_FAILURE: i32 = 2;

/// Handles the server part of the command line: builds a configuration
/// from the arguments, starts the pool server and blocks until SIGINT or
/// SIGTERM asks it to stop.
pub fn server_command(server_args: &ArgMatches<'_>) -> i32 {
	let mut config = PoolServerConfig::default();
	if let Some(port) = server_args.value_of("port") {
		match port.parse::<u16>() {
			Ok(port) => config.stratum_server_addr = Some(format!("0.0.0.0:{}", port)),
			Err(_) => {
				error!("invalid port: {}", port);
				return EXIT_BIND_FAILURE;
			}
		}
	}
	if let Some(addr) = server_args.value_of("pool_address") {
		config.pool_address = addr.to_string();
	}

	// In-memory chain as the ledger sink, mining from genesis at the
	// configured session floor difficulty.
	let chain = Arc::new(Chain::new(config.vardiff.minimum_diff.clone()));
	if chain.height() != 0 {
		error!("chain initialization failed");
		return EXIT_SINK_FAILURE;
	}

	let pool = Arc::new(MiningPool::new(config.clone(), chain));
	let api = PoolApi::new(pool.clone());
	let server = StratumServer::new(config, pool);

	let stop_state = Arc::new(StopState::new());
	let stop_handle = stop_state.clone();
	ctrlc::set_handler(move || {
		warn!("received SIGINT (Ctrl+C) or SIGTERM (kill), shutting down");
		stop_handle.stop();
	})
	.expect("Error setting handler for both SIGINT (Ctrl+C) and SIGTERM (kill)");

	match server.run_loop(stop_state) {
		Ok(()) => {
			match serde_json::to_string(&api.pool_stats()) {
				Ok(summary) => info!("final pool status: {}", summary),
				Err(_) => (),
			}
			info!("alerim server stopped cleanly");
			EXIT_OK
		}
		Err(Error::IOError(e)) => {
			error!("unable to bind stratum listener, {}", e);
			EXIT_BIND_FAILURE
		}
		Err(e) => {
			error!("unable to start alerim server, {}", e);
			EXIT_BIND_FAILURE
		}
	}
}
