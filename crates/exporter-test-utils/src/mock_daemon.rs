//! Scripted daemon connector.
//!
//! Each call to `connect` consumes the next scripted outcome: a session or a
//! refusal. Once the script runs out every further attempt is refused.
//!
//! A scripted session first delivers its events in order, then either waits
//! forever or, with [`SessionScript::close_after_sends`], reports the peer
//! closing once it has written that many requests. Every request written to
//! any session is recorded with the session's number (1-based).
//!
//! # Example
//!
//! ```rust,ignore
//! let connector = Arc::new(
//!     MockConnector::new()
//!         .then_session(SessionScript::new().close_after_sends(3))
//!         .then_refuse()
//!         .then_session(SessionScript::new()),
//! );
//! ```

use async_trait::async_trait;
use exporter_service::rpc::{DaemonConnector, DaemonRequest, DaemonSession, RpcError};
use exporter_service::types::Event;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Behavior of one scripted session.
#[derive(Debug, Clone, Default)]
pub struct SessionScript {
    events: VecDeque<Event>,
    close_after_sends: Option<usize>,
}

impl SessionScript {
    /// A session that stays open and delivers nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` after the ones already scripted.
    #[must_use]
    pub fn with_event(mut self, event: Event) -> Self {
        self.events.push_back(event);
        self
    }

    /// Close once `sends` requests (subscriptions included) were written
    /// and every scripted event was delivered.
    #[must_use]
    pub fn close_after_sends(mut self, sends: usize) -> Self {
        self.close_after_sends = Some(sends);
        self
    }
}

/// A request written to a scripted session.
#[derive(Debug, Clone, PartialEq)]
pub struct SentRequest {
    /// 1-based number of the session it was written to.
    pub session: usize,
    pub request: DaemonRequest,
}

type SentLog = Arc<Mutex<Vec<SentRequest>>>;

/// Connector handing out scripted sessions.
#[derive(Debug, Default)]
pub struct MockConnector {
    script: Mutex<VecDeque<Option<SessionScript>>>,
    sessions_opened: Mutex<usize>,
    attempts: Mutex<usize>,
    sent: SentLog,
}

impl MockConnector {
    /// A connector that refuses every attempt until sessions are scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next attempt opens a session following `script`.
    #[must_use]
    pub fn then_session(self, script: SessionScript) -> Self {
        self.script.lock().unwrap().push_back(Some(script));
        self
    }

    /// Next attempt is refused.
    #[must_use]
    pub fn then_refuse(self) -> Self {
        self.script.lock().unwrap().push_back(None);
        self
    }

    /// Number of `connect` calls so far.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    /// Every request written so far.
    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().unwrap().clone()
    }

    /// Commands written to session `session`, in order.
    pub fn commands_on(&self, session: usize) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|sent| sent.session == session)
            .map(|sent| sent.request.command)
            .collect()
    }
}

#[async_trait]
impl DaemonConnector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn DaemonSession>, RpcError> {
        *self.attempts.lock().unwrap() += 1;

        let Some(Some(script)) = self.script.lock().unwrap().pop_front() else {
            return Err(RpcError::Transport("connection refused".to_string()));
        };

        let id = {
            let mut opened = self.sessions_opened.lock().unwrap();
            *opened += 1;
            *opened
        };
        Ok(Box::new(ScriptedSession {
            id,
            script,
            sends: 0,
            sent: Arc::clone(&self.sent),
        }))
    }
}

struct ScriptedSession {
    id: usize,
    script: SessionScript,
    sends: usize,
    sent: SentLog,
}

#[async_trait]
impl DaemonSession for ScriptedSession {
    async fn next_event(&mut self) -> Result<Option<Event>, RpcError> {
        if let Some(event) = self.script.events.pop_front() {
            return Ok(Some(event));
        }
        match self.script.close_after_sends {
            Some(limit) if self.sends >= limit => Ok(None),
            _ => std::future::pending().await,
        }
    }

    async fn send(&mut self, request: DaemonRequest) -> Result<(), RpcError> {
        self.sends += 1;
        self.sent.lock().unwrap().push(SentRequest {
            session: self.id,
            request,
        });
        Ok(())
    }
}
