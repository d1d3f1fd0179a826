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

//! Logging configuration and initialization on top of log4rs. Stdout
//! always, an optional append-to file when a path is configured.

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

/// Logging configuration, mirrored from the server TOML section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
	/// log level for stdout
	pub stdout_log_level: LevelFilter,
	/// log level for the file
	pub file_log_level: LevelFilter,
	/// log file path, None disables file logging
	pub log_file_path: Option<String>,
}

impl Default for LoggingConfig {
	fn default() -> LoggingConfig {
		LoggingConfig {
			stdout_log_level: LevelFilter::Info,
			file_log_level: LevelFilter::Debug,
			log_file_path: None,
		}
	}
}

const LOG_PATTERN: &str = "{d(%Y%m%d %H:%M:%S%.3f)} {h({l})} {M} - {m}{n}";

/// Initialize the global logger. Call once, early, before anything logs.
pub fn init_logger(config: &LoggingConfig) {
	let stdout = ConsoleAppender::builder()
		.encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
		.build();

	let mut root = Root::builder().appender("stdout");
	let mut builder = Config::builder().appender(
		Appender::builder().build("stdout", Box::new(stdout)),
	);

	if let Some(ref path) = config.log_file_path {
		match FileAppender::builder()
			.encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
			.append(true)
			.build(path)
		{
			Ok(file) => {
				builder =
					builder.appender(Appender::builder().build("file", Box::new(file)));
				root = root.appender("file");
			}
			Err(e) => eprintln!("Unable to open log file {}, {}", path, e),
		}
	}

	let config = builder
		.build(root.build(config.stdout_log_level))
		.expect("invalid logger configuration");

	if log4rs::init_config(config).is_err() {
		// a second init can only happen in tests, keep the first logger
		warn!("logger already initialized");
	}
}
