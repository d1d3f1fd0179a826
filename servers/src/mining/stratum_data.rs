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

//! Session bookkeeping for the stratum server. A session is one TCP
//! connection: its outbound message queue, its kill switch, the login it
//! authorized under (if any) and the difficulty it is currently judged
//! against. Several sessions may share one login; accounting is merged,
//! difficulty is not.

use crate::util::RwLock;
use chrono::prelude::Utc;
use futures::channel::mpsc;
use futures::channel::oneshot;
use num_bigint::BigUint;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Outbound messages per session the writer may buffer before
/// notifications start being dropped.
pub const SESSION_QUEUE_LIMIT: usize = 128;

type Tx = mpsc::Sender<String>;

/// A connected stratum session.
#[derive(Clone)]
pub struct Session {
	/// Session id, unique for the lifetime of the server
	pub id: usize,
	/// Remote IP, for logs
	pub ip: String,
	/// Connect time, unix milliseconds
	pub create_time: i64,
	/// Agent string from subscribe
	pub agent: String,
	/// Worker identity bound at authorize
	pub login: Option<String>,
	/// Has mining.subscribe completed
	pub subscribed: bool,
	/// Has mining.authorize completed
	pub authenticated: bool,
	/// Difficulty submissions are currently judged against
	pub difficulty: BigUint,
	/// Last inbound message, unix milliseconds
	pub last_seen: i64,
	/// Consecutive unparseable lines, sessions close past the limit
	pub parse_failures: u32,
	tx: Tx,
	kill_switch: Arc<RwLock<Option<oneshot::Sender<()>>>>,
}

impl Session {
	/// Creates a new session around a connection's outbound queue.
	pub fn new(
		id: usize,
		ip: String,
		difficulty: BigUint,
		tx: Tx,
		kill_switch: oneshot::Sender<()>,
	) -> Session {
		let now = Utc::now().timestamp_millis();
		Session {
			id,
			ip,
			create_time: now,
			agent: String::from(""),
			login: None,
			subscribed: false,
			authenticated: false,
			difficulty,
			last_seen: now,
			parse_failures: 0,
			tx,
			kill_switch: Arc::new(RwLock::new(Some(kill_switch))),
		}
	}

	fn update(&mut self, other: &Session) {
		assert!(self.id == other.id);
		self.agent = other.agent.clone();
		self.login = other.login.clone();
		self.subscribed = other.subscribed;
		self.authenticated = other.authenticated;
		self.difficulty = other.difficulty.clone();
		self.last_seen = other.last_seen;
		self.parse_failures = other.parse_failures;
	}

	/// Kick the session off the server; its socket tasks unwind.
	pub fn trigger_kill_switch(&self) {
		if let Some(s) = self.kill_switch.write().take() {
			let _ = s.send(());
		}
	}
}

/// Collection of the live sessions. Never hand out references into the
/// map; clone in, write back through `update_session`.
pub struct SessionsList {
	sessions: RwLock<HashMap<usize, Session>>,
	next_id: AtomicUsize,
}

impl SessionsList {
	/// Empty list.
	pub fn new() -> SessionsList {
		SessionsList {
			sessions: RwLock::new(HashMap::new()),
			next_id: AtomicUsize::new(0),
		}
	}

	/// Register a fresh connection, returning its session id.
	pub fn add_session(
		&self,
		ip: String,
		difficulty: BigUint,
		tx: Tx,
		kill_switch: oneshot::Sender<()>,
	) -> usize {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let session = Session::new(id, ip, difficulty, tx, kill_switch);
		self.sessions.write().insert(id, session);
		id
	}

	/// Snapshot of one session.
	pub fn get_session(&self, id: usize) -> Option<Session> {
		self.sessions.read().get(&id).cloned()
	}

	/// Write a modified session snapshot back.
	pub fn update_session(&self, session: &Session) {
		if let Some(s) = self.sessions.write().get_mut(&session.id) {
			s.update(session);
		}
	}

	/// Deregister a session, returning how many remain.
	pub fn remove_session(&self, id: usize) -> usize {
		let mut sessions = self.sessions.write();
		if sessions.remove(&id).is_none() {
			error!("stratum: no such session {} in map", id);
		}
		sessions.len()
	}

	/// Bind the worker identity after a successful authorize.
	pub fn login(&self, id: usize, login: String, agent: String) -> bool {
		if let Some(mut session) = self.get_session(id) {
			session.login = Some(login);
			session.agent = agent;
			session.authenticated = true;
			self.update_session(&session);
			return true;
		}
		false
	}

	/// Mark the subscribe handshake done.
	pub fn subscribed(&self, id: usize) {
		if let Some(mut session) = self.get_session(id) {
			session.subscribed = true;
			self.update_session(&session);
		}
	}

	/// Set the difficulty future submissions of this session are judged
	/// against.
	pub fn set_difficulty(&self, id: usize, difficulty: BigUint) {
		if let Some(s) = self.sessions.write().get_mut(&id) {
			s.difficulty = difficulty;
		}
	}

	/// Touch the session's last-seen on any inbound message.
	pub fn last_seen(&self, id: usize) {
		if let Some(s) = self.sessions.write().get_mut(&id) {
			s.last_seen = Utc::now().timestamp_millis();
		}
	}

	/// Count a framing failure; returns the running total.
	pub fn parse_failure(&self, id: usize) -> u32 {
		let mut sessions = self.sessions.write();
		match sessions.get_mut(&id) {
			Some(s) => {
				s.parse_failures += 1;
				s.parse_failures
			}
			None => 0,
		}
	}

	/// Queue a message to one session. The queue is bounded: a full
	/// queue drops the message, the next notification carries fresh
	/// state anyway.
	pub fn send_to(&self, id: usize, msg: String) {
		let tx = match self.sessions.read().get(&id) {
			Some(s) => s.tx.clone(),
			None => return,
		};
		let mut tx = tx;
		if let Err(e) = tx.try_send(msg) {
			if e.is_full() {
				debug!("session {} write queue full, dropping notification", id);
			} else {
				error!("unable to send message to session {}", id);
			}
		}
	}

	/// Queue a message to every authorized session.
	pub fn broadcast(&self, msg: String) {
		let ids: Vec<usize> = self
			.sessions
			.read()
			.values()
			.filter(|s| s.authenticated)
			.map(|s| s.id)
			.collect();
		for id in ids {
			self.send_to(id, msg.clone());
		}
	}

	/// Live session count.
	pub fn count(&self) -> usize {
		self.sessions.read().len()
	}

	/// Session ids bound to the given login.
	pub fn sessions_of(&self, login: &str) -> Vec<usize> {
		self.sessions
			.read()
			.values()
			.filter(|s| s.login.as_deref() == Some(login))
			.map(|s| s.id)
			.collect()
	}

	/// Sessions silent since before `cutoff_ms`, for the idle sweep.
	pub fn idle_sessions(&self, cutoff_ms: i64) -> Vec<Session> {
		self.sessions
			.read()
			.values()
			.filter(|s| s.last_seen < cutoff_ms)
			.cloned()
			.collect()
	}

	/// Kick every session, for shutdown.
	pub fn kill_all(&self) {
		for session in self.sessions.read().values() {
			session.trigger_kill_switch();
		}
	}
}

impl Default for SessionsList {
	fn default() -> SessionsList {
		SessionsList::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn session_with_queue() -> (SessionsList, usize, mpsc::Receiver<String>) {
		let list = SessionsList::new();
		let (tx, rx) = mpsc::channel(SESSION_QUEUE_LIMIT);
		let (kill, _kill_rx) = oneshot::channel();
		let id = list.add_session("127.0.0.1".to_string(), BigUint::from(1000u32), tx, kill);
		(list, id, rx)
	}

	#[test]
	fn login_binds_identity() {
		let (list, id, _rx) = session_with_queue();
		assert!(!list.get_session(id).unwrap().authenticated);
		assert!(list.login(id, "addrA".to_string(), "cgminer".to_string()));
		let session = list.get_session(id).unwrap();
		assert!(session.authenticated);
		assert_eq!(session.login.as_deref(), Some("addrA"));
		assert_eq!(list.sessions_of("addrA"), vec![id]);
	}

	#[test]
	fn broadcast_skips_unauthorized_sessions() {
		let (list, id, mut rx) = session_with_queue();
		list.broadcast("job".to_string());
		assert!(rx.try_next().is_err()); // nothing queued yet

		list.login(id, "addrA".to_string(), String::new());
		list.broadcast("job".to_string());
		assert_eq!(rx.try_next().unwrap(), Some("job".to_string()));
	}

	#[test]
	fn full_queue_drops_messages_without_panic() {
		let list = SessionsList::new();
		let (tx, _rx) = mpsc::channel(1);
		let (kill, _kill_rx) = oneshot::channel();
		let id = list.add_session("ip".to_string(), BigUint::from(1u32), tx, kill);
		for _ in 0..10 {
			list.send_to(id, "msg".to_string());
		}
		assert_eq!(list.count(), 1);
	}

	#[test]
	fn difficulty_updates_are_visible() {
		let (list, id, _rx) = session_with_queue();
		list.set_difficulty(id, BigUint::from(4000u32));
		assert_eq!(
			list.get_session(id).unwrap().difficulty,
			BigUint::from(4000u32)
		);
	}

	#[test]
	fn remove_session_shrinks_list() {
		let (list, id, _rx) = session_with_queue();
		assert_eq!(list.count(), 1);
		assert_eq!(list.remove_session(id), 0);
	}
}
