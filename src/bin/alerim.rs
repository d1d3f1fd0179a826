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

//! Main for the alerim pool node: command line parsing, logging setup
//! and dispatch into the server command.

#[macro_use]
extern crate log;

use alerim_util::logger::LoggingConfig;
use clap::{App, Arg, SubCommand};
use std::process::exit;

mod cmd;

fn main() {
	let args = App::new("alerim")
		.version("1.0.0")
		.author("The Alerim Team")
		.about("Mining pool node for the Alerim network")
		.subcommand(
			SubCommand::with_name("server")
				.about("Run the alerim pool server")
				.arg(
					Arg::with_name("port")
						.short("p")
						.long("port")
						.help("Stratum port to listen on")
						.takes_value(true),
				)
				.arg(
					Arg::with_name("pool_address")
						.short("a")
						.long("pool_address")
						.help("Address block rewards are paid to")
						.takes_value(true),
				)
				.arg(
					Arg::with_name("log_file")
						.long("log_file")
						.help("Append logs to this file as well as stdout")
						.takes_value(true),
				),
		)
		.get_matches();

	match args.subcommand() {
		("server", Some(server_args)) => {
			let mut logging = LoggingConfig::default();
			logging.log_file_path = server_args.value_of("log_file").map(|s| s.to_string());
			alerim_util::init_logger(&logging);

			info!("starting alerim pool node");
			let code = cmd::server::server_command(server_args);
			exit(code);
		}
		_ => {
			eprintln!("unknown command, try 'alerim server'");
			exit(1);
		}
	}
}
