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

//! Mining Stratum Server. One JSON object per line over TCP; inbound
//! requests are `{id, method, params[]}`, outbound either responses
//! `{id, result|error}` or id-less notifications `{method, params[]}`.
//! Each connection runs its own read and write tasks; writes go through
//! the session's bounded queue so broadcasts never interleave bytes with
//! responses.

use futures::channel::{mpsc, oneshot};
use futures::pin_mut;
use futures::{SinkExt, StreamExt, TryStreamExt};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::time::delay_for;
use tokio_util::codec::{Framed, LinesCodec};

use crate::common::types::PoolServerConfig;
use crate::core::hash::Hash;
use crate::core::pow;
use crate::error::Error;
use crate::mining::pool::{MiningPool, RejectReason};
use crate::mining::stratum_data::SESSION_QUEUE_LIMIT;
use crate::mining::template::Job;
use crate::util::StopState;
use chrono::prelude::Utc;
use num_bigint::BigUint;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Agent tag returned from mining.subscribe.
pub const AGENT: &str = "AlerimStratum/1.0.0";

// Unparseable lines tolerated before a session is closed.
const MAX_PARSE_FAILURES: u32 = 5;

// ----------------------------------------
// http://www.jsonrpc.org/specification
// RPC Methods

/// Represents a compliant JSON RPC 2.0 id.
/// Valid id: Integer, String.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(untagged)]
pub enum JsonId {
	/// Numeric id
	IntId(u64),
	/// String id
	StrId(String),
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct RpcRequest {
	pub id: Option<JsonId>,
	pub method: String,
	#[serde(default)]
	pub params: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct RpcResponse {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub id: Option<JsonId>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct RpcNotification {
	pub method: String,
	pub params: Value,
}

/// A stratum error: `[code, message, null]` on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
	code: i32,
	message: String,
}

impl RpcError {
	pub fn invalid_request() -> Self {
		RpcError {
			code: 20,
			message: "Invalid request".to_string(),
		}
	}
	pub fn unknown_method() -> Self {
		RpcError {
			code: 20,
			message: "Unknown method".to_string(),
		}
	}
	pub fn unauthorized() -> Self {
		RpcError {
			code: RejectReason::Unauthorized.code(),
			message: RejectReason::Unauthorized.message().to_string(),
		}
	}
}

impl From<RejectReason> for RpcError {
	fn from(reason: RejectReason) -> Self {
		RpcError {
			code: reason.code(),
			message: reason.message().to_string(),
		}
	}
}

impl From<RpcError> for Value {
	fn from(e: RpcError) -> Self {
		json!([e.code, e.message, Value::Null])
	}
}

fn response_ok(id: Option<JsonId>, result: Value) -> String {
	let resp = RpcResponse {
		id,
		result: Some(result),
		error: None,
	};
	serde_json::to_string(&resp).unwrap_or_else(|_| "{}".to_string())
}

fn response_err(id: Option<JsonId>, error: RpcError) -> String {
	let resp = RpcResponse {
		id,
		result: None,
		error: Some(error.into()),
	};
	serde_json::to_string(&resp).unwrap_or_else(|_| "{}".to_string())
}

fn notification(method: &str, params: Value) -> String {
	let n = RpcNotification {
		method: method.to_string(),
		params,
	};
	serde_json::to_string(&n).unwrap_or_else(|_| "{}".to_string())
}

/// The mining.set_difficulty notification for the given difficulty.
/// The wire carries the target, the upper bound a hash must stay under,
/// so clients compare candidate hashes against it directly.
pub fn set_difficulty_message(difficulty: &BigUint) -> String {
	notification(
		"mining.set_difficulty",
		json!([pow::to_hex(&pow::target_for(difficulty))]),
	)
}

/// The mining.notify notification for the given job: job id first, then
/// the four work fields, all lowercase big-endian hex. The last field is
/// the network target a full solution must stay under.
pub fn job_message(job: &Job) -> String {
	notification(
		"mining.notify",
		json!([
			format!("{:x}", job.id),
			job.prev_hash.to_hex(),
			job.merkle_root.to_hex(),
			format!("{:x}", job.timestamp),
			pow::to_hex(&pow::target_for(&job.difficulty)),
		]),
	)
}

// Utility function to parse a JSON RPC positional parameter list,
// returning a proper error if things go wrong.
fn parse_params<T>(params: Option<Value>) -> Result<T, RpcError>
where
	for<'de> T: serde::Deserialize<'de>,
{
	params
		.and_then(|v| serde_json::from_value(v).ok())
		.ok_or_else(RpcError::invalid_request)
}

// ----------------------------------------
// Handler - dispatches parsed requests against the pool

pub struct Handler {
	id: String,
	pool: Arc<MiningPool>,
}

impl Handler {
	pub fn new(id: &str, pool: Arc<MiningPool>) -> Handler {
		Handler {
			id: id.to_string(),
			pool,
		}
	}

	/// Handle one inbound request, queueing the response and any
	/// follow-up notifications on the session's writer in order.
	pub fn handle_rpc_requests(&self, request: RpcRequest, session_id: usize) {
		self.pool.sessions.last_seen(session_id);

		let method = request.method.clone();
		match method.as_str() {
			"mining.subscribe" => self.handle_subscribe(request, session_id),
			"mining.authorize" => self.handle_authorize(request, session_id),
			"mining.submit" => self.handle_submit(request, session_id),
			_ => {
				debug!(
					"(Server ID: {}) session {} called unknown method {}",
					self.id, session_id, method
				);
				self.send(session_id, response_err(request.id, RpcError::unknown_method()));
			}
		}
	}

	fn send(&self, session_id: usize, msg: String) {
		self.pool.sessions.send_to(session_id, msg);
	}

	// Handle SUBSCRIBE message: hand out a subscription id and tell the
	// session the difficulty it starts at.
	fn handle_subscribe(&self, request: RpcRequest, session_id: usize) {
		let agent: Vec<String> = request
			.params
			.and_then(|v| serde_json::from_value(v).ok())
			.unwrap_or_default();
		if let Some(agent) = agent.first() {
			debug!("session {} subscribed with agent {}", session_id, agent);
		}

		self.pool.sessions.subscribed(session_id);
		let subscription_id = format!("subscription-{}", Utc::now().timestamp_nanos());
		self.send(
			session_id,
			response_ok(request.id, json!([subscription_id, AGENT])),
		);

		// the difficulty every following submit is judged against
		if let Some(session) = self.pool.sessions.get_session(session_id) {
			self.send(session_id, set_difficulty_message(&session.difficulty));
		}
	}

	// Handle AUTHORIZE message: bind the worker identity and push the
	// current job.
	fn handle_authorize(&self, request: RpcRequest, session_id: usize) {
		let id = request.id.clone();
		let (username, _password): (String, String) = match parse_params(request.params) {
			Ok(p) => p,
			Err(e) => {
				self.send(session_id, response_err(id, e));
				return;
			}
		};

		if !self.pool.authorize(session_id, &username, "") {
			self.send(session_id, response_err(id, RpcError::unauthorized()));
			return;
		}

		info!(
			"(Server ID: {}) session {} authorized as {}",
			self.id, session_id, username
		);
		self.send(session_id, response_ok(id, json!(true)));

		if let Some(job) = self.pool.current_job() {
			self.send(session_id, job_message(&job));
		}
	}

	// Handle SUBMIT message. We accept and credit valid shares of all
	// difficulty above the session's; shares that are full solutions
	// are also appended to the chain.
	fn handle_submit(&self, request: RpcRequest, session_id: usize) {
		let id = request.id.clone();

		let authorized = self
			.pool
			.sessions
			.get_session(session_id)
			.map(|s| s.authenticated)
			.unwrap_or(false);
		if !authorized {
			self.send(session_id, response_err(id, RpcError::unauthorized()));
			return;
		}

		let (username, job_id, nonce, hash): (String, String, String, String) =
			match parse_params(request.params) {
				Ok(p) => p,
				Err(e) => {
					self.send(session_id, response_err(id, e));
					return;
				}
			};

		let parsed = u64::from_str_radix(job_id.trim_start_matches("0x"), 16)
			.ok()
			.and_then(|job_id| {
				u64::from_str_radix(nonce.trim_start_matches("0x"), 16)
					.ok()
					.map(|nonce| (job_id, nonce))
			})
			.and_then(|(job_id, nonce)| {
				Hash::from_hex(&hash).ok().map(|hash| (job_id, nonce, hash))
			});
		let (job_id, nonce, hash) = match parsed {
			Some(p) => p,
			None => {
				self.send(
					session_id,
					response_err(id, RejectReason::Malformed.into()),
				);
				return;
			}
		};

		match self.pool.submit_share(session_id, job_id, nonce, hash) {
			Ok(outcome) => {
				if outcome.block_found {
					info!(
						"(Server ID: {}) share from {} solved a block",
						self.id, username
					);
				}
				self.send(session_id, response_ok(id, json!(true)));
			}
			Err(reason) => {
				debug!(
					"(Server ID: {}) share from {} rejected: {:?}",
					self.id, username, reason
				);
				self.send(session_id, response_err(id, reason.into()));
			}
		}
	}
}

// ----------------------------------------
// Background loops

async fn template_loop(pool: Arc<MiningPool>, stop_state: Arc<StopState>) {
	while !stop_state.is_stopped() {
		pool.template_tick();
		delay_for(Duration::from_secs(1)).await;
	}
}

async fn payout_loop(pool: Arc<MiningPool>, stop_state: Arc<StopState>) {
	let interval = pool.config().payout_interval_s;
	let mut elapsed: u64 = 0;
	while !stop_state.is_stopped() {
		delay_for(Duration::from_secs(1)).await;
		elapsed += 1;
		if elapsed >= interval {
			elapsed = 0;
			pool.run_payout_cycle();
		}
	}
}

async fn idle_loop(pool: Arc<MiningPool>, stop_state: Arc<StopState>) {
	while !stop_state.is_stopped() {
		pool.idle_sweep();
		delay_for(Duration::from_secs(5)).await;
	}
}

async fn stats_loop(pool: Arc<MiningPool>, stop_state: Arc<StopState>) {
	while !stop_state.is_stopped() {
		pool.stats_tick();
		delay_for(Duration::from_secs(10)).await;
	}
}

// ----------------------------------------
// Per-connection plumbing

fn spawn_session(pool: Arc<MiningPool>, handler: Arc<Handler>, socket: tokio::net::TcpStream) {
	let ip = socket
		.peer_addr()
		.map(|a| a.ip().to_string())
		.unwrap_or_else(|_| "unknown".to_string());

	// Session IO channel and kill switch
	let (tx, mut rx) = mpsc::channel::<String>(SESSION_QUEUE_LIMIT);
	let (kill_switch, kill_switch_receiver) = oneshot::channel::<()>();

	let session_id = pool.register_session(ip.clone(), tx, kill_switch);
	info!("session {} connected from {}", session_id, ip);

	let framed = Framed::new(socket, LinesCodec::new());
	let (mut writer, mut reader) = framed.split();

	let read_pool = pool.clone();
	let read = async move {
		while let Some(line) = reader
			.try_next()
			.await
			.map_err(|e| error!("error reading from session {}, {}", session_id, e))?
		{
			if line.is_empty() {
				continue;
			}
			debug!("session {} request: {}", session_id, line);
			match serde_json::from_str::<RpcRequest>(&line) {
				Ok(request) => handler.handle_rpc_requests(request, session_id),
				Err(e) => {
					debug!("session {} sent bad json: {}", session_id, e);
					read_pool
						.sessions
						.send_to(session_id, response_err(None, RpcError::invalid_request()));
					// repeated framing failure closes the session
					if read_pool.sessions.parse_failure(session_id) >= MAX_PARSE_FAILURES {
						error!(
							"session {} exceeded parse failure limit, closing",
							session_id
						);
						return Err(());
					}
				}
			}
		}
		Result::<_, ()>::Ok(())
	};

	let write = async move {
		while let Some(line) = rx.next().await {
			// Frames with LinesCodec add the line separator for us.
			writer
				.send(line)
				.await
				.map_err(|e| error!("stratum cannot send data to session, {}", e))?;
		}
		Result::<_, ()>::Ok(())
	};

	let task = async move {
		pin_mut!(read, write);
		let rw = futures::future::select(read, write);
		futures::future::select(rw, kill_switch_receiver).await;
		pool.drop_session(session_id);
		info!("session {} disconnected", session_id);
	};
	tokio::spawn(task);
}

// ----------------------------------------
// Alerim Stratum Server

pub struct StratumServer {
	id: String,
	config: PoolServerConfig,
	pool: Arc<MiningPool>,
}

impl StratumServer {
	/// Creates a new Stratum Server around an existing pool.
	pub fn new(config: PoolServerConfig, pool: Arc<MiningPool>) -> StratumServer {
		StratumServer {
			id: String::from("0"),
			config,
			pool,
		}
	}

	/// "main()" - runs the server until the stop state fires: binds the
	/// listener, accepts sessions, and drives the template, payout,
	/// idle and stats loops. Returns once shutdown completed; a bind
	/// failure is the only startup error.
	pub fn run_loop(&self, stop_state: Arc<StopState>) -> Result<(), Error> {
		let listen_addr: SocketAddr = self
			.config
			.stratum_server_addr
			.clone()
			.unwrap_or_else(|| "0.0.0.0:3333".to_string())
			.parse()
			.map_err(|_| {
				Error::Configuration("invalid stratum listen address".to_string())
			})?;

		info!(
			"(Server ID: {}) starting stratum server on {}, initial difficulty {:x}",
			self.id,
			listen_addr,
			self.pool.initial_difficulty()
		);

		let pool = self.pool.clone();
		let handler = Arc::new(Handler::new(&self.id, pool.clone()));

		let mut rt = Runtime::new()?;
		rt.block_on(async move {
			let mut listener = match TcpListener::bind(&listen_addr).await {
				Ok(listener) => listener,
				Err(e) => {
					error!(
						"stratum: failed to bind to listen address {}, {}",
						listen_addr, e
					);
					return Err(Error::IOError(e));
				}
			};
			warn!("stratum server started on {}", listen_addr);

			tokio::spawn(template_loop(pool.clone(), stop_state.clone()));
			tokio::spawn(payout_loop(pool.clone(), stop_state.clone()));
			tokio::spawn(idle_loop(pool.clone(), stop_state.clone()));
			tokio::spawn(stats_loop(pool.clone(), stop_state.clone()));

			let accept_pool = pool.clone();
			let accept_handler = handler.clone();
			let server = async move {
				loop {
					match listener.accept().await {
						Ok((socket, _peer)) => {
							spawn_session(accept_pool.clone(), accept_handler.clone(), socket)
						}
						Err(e) => error!("accept error = {:?}", e),
					}
				}
			};
			let shutdown = async {
				while !stop_state.is_stopped() {
					delay_for(Duration::from_millis(500)).await;
				}
			};
			pin_mut!(server, shutdown);
			futures::future::select(server, shutdown).await;

			// drain sessions and flush the payout cycle once
			pool.shutdown();
			warn!("stratum server stopped");
			Ok(())
		})
	}
}
