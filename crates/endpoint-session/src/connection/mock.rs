//! Scriptable in-memory transport for tests and local wiring.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Connection, ConnectionFactory};
use crate::endpoint::ConnectionUrl;
use crate::error::ConnectionError;

/// Every call made against a mock connection, in order, across all urls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Create(ConnectionUrl),
    Open(ConnectionUrl),
    Close(ConnectionUrl),
    Send(ConnectionUrl, String),
}

#[derive(Default)]
struct MockState {
    calls: Vec<MockCall>,
    open: HashMap<ConnectionUrl, bool>,
    scripted_checks: HashMap<ConnectionUrl, VecDeque<bool>>,
    open_on_establish: bool,
    failing_sends: bool,
}

/// Shared control surface for the connections a [`MockConnectionFactory`] builds.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Variant whose connections report open as soon as `open()` is called.
    pub fn opening_immediately() -> Self {
        let transport = Self::default();
        transport.state.lock().open_on_establish = true;
        transport
    }

    pub fn factory(&self) -> MockConnectionFactory {
        MockConnectionFactory {
            state: Arc::clone(&self.state),
        }
    }

    pub fn set_open(&self, url: &ConnectionUrl, open: bool) {
        self.state.lock().open.insert(url.clone(), open);
    }

    /// Queues answers for upcoming `is_open` checks on `url`. Once exhausted the
    /// connection falls back to the state set by [`MockTransport::set_open`].
    pub fn script_open_checks(&self, url: &ConnectionUrl, answers: impl IntoIterator<Item = bool>) {
        self.state
            .lock()
            .scripted_checks
            .entry(url.clone())
            .or_default()
            .extend(answers);
    }

    pub fn fail_sends(&self, failing: bool) {
        self.state.lock().failing_sends = failing;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Payloads sent on `url`, in send order.
    pub fn sent(&self, url: &ConnectionUrl) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Send(sent_on, payload) if sent_on == url => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every payload sent on any url, in send order.
    pub fn sent_all(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Send(_, payload) => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }
}

pub struct MockConnectionFactory {
    state: Arc<Mutex<MockState>>,
}

impl ConnectionFactory for MockConnectionFactory {
    fn create(&self, url: &ConnectionUrl) -> Box<dyn Connection> {
        self.state.lock().calls.push(MockCall::Create(url.clone()));
        Box::new(MockConnection {
            url: url.clone(),
            state: Arc::clone(&self.state),
        })
    }
}

pub struct MockConnection {
    url: ConnectionUrl,
    state: Arc<Mutex<MockState>>,
}

impl Connection for MockConnection {
    fn open(&mut self) {
        let mut state = self.state.lock();
        state.calls.push(MockCall::Open(self.url.clone()));
        if state.open_on_establish {
            state.open.insert(self.url.clone(), true);
        }
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.calls.push(MockCall::Close(self.url.clone()));
        state.open.insert(self.url.clone(), false);
    }

    fn send(&mut self, payload: &str) -> Result<(), ConnectionError> {
        let mut state = self.state.lock();
        if state.failing_sends {
            return Err(ConnectionError::Closed);
        }
        state
            .calls
            .push(MockCall::Send(self.url.clone(), payload.to_string()));
        Ok(())
    }

    fn is_open(&self) -> bool {
        let mut state = self.state.lock();
        if let Some(answer) = state
            .scripted_checks
            .get_mut(&self.url)
            .and_then(|answers| answers.pop_front())
        {
            return answer;
        }
        state.open.get(&self.url).copied().unwrap_or(false)
    }
}
