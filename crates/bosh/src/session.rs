// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The BOSH session machine: request ids, the server-issued session id, the
//! outbound body queue, and the retry backoff for session establishment.

use std::collections::VecDeque;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::transport::{HttpPool, PostOutcome, TransportError};

pub const HTTPBIND_NS: &str = "http://jabber.org/protocol/httpbind";

/// First session request is retried quickly; an established session polls on
/// a longer leash.
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(2);
const SETTLED_RETRY_DELAY: Duration = Duration::from_secs(10);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Where this session is in its lifecycle. The transitions into
/// `Authenticating` and `Online` are driven by the controller, since they
/// hang off iq replies rather than BOSH-level events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Unbound,
    RequestingSid,
    Authenticating,
    Online,
    Terminating,
}

pub struct BoshSession {
    server: String,
    rid: u64,
    sid: Option<String>,
    pub phase: Phase,
    /// A session request is outstanding and its retry timer has not fired.
    sid_asked: bool,
    retry_delay: Duration,
    queue: VecDeque<String>,
}

impl BoshSession {
    pub fn new(server: String) -> Self {
        Self {
            server,
            rid: 0,
            sid: None,
            phase: Phase::Unbound,
            sid_asked: false,
            retry_delay: INITIAL_RETRY_DELAY,
            queue: VecDeque::new(),
        }
    }

    pub fn sid(&self) -> Option<&str> {
        self.sid.as_deref()
    }

    pub fn rid(&self) -> u64 {
        self.rid
    }

    pub fn sid_pending(&self) -> bool {
        self.sid_asked
    }

    pub fn queue_is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// The framed bodies waiting to be posted, oldest first.
    pub fn queued_bodies(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(String::as_str)
    }

    /// Enqueue a session request. Each attempt starts over with a fresh
    /// random 24-bit request id. Returns the delay after which the caller
    /// should report the retry timer elapsed.
    pub fn ask_sid(&mut self) -> Duration {
        self.rid = rand::rng().random_range(0..(1u64 << 24));
        self.sid = None;
        self.phase = Phase::RequestingSid;
        let body = format!(
            "<body hold='1' rid='{}' to='{}' ver='1.6' wait='10' xml:lang='en' xmlns='{}'/>",
            self.rid, self.server, HTTPBIND_NS
        );
        self.enqueue_raw(body);
        self.sid_asked = true;
        self.retry_delay
    }

    /// The SID retry timer fired. With a session in hand the backoff settles;
    /// without one it grows by 10s plus jitter until it stops growing at the
    /// cap, and the next loop pass may ask again.
    pub fn retry_elapsed(&mut self) {
        if self.sid.is_some() {
            self.retry_delay = SETTLED_RETRY_DELAY;
        } else if self.retry_delay < MAX_RETRY_DELAY {
            self.retry_delay += Duration::from_secs(10 + rand::rng().random_range(0..=10));
        }
        self.sid_asked = false;
    }

    /// Take the `sid` attribute from a response body. Only honored while a
    /// session request is outstanding. Returns true if adopted.
    pub fn adopt_sid(&mut self, sid: &str) -> bool {
        if self.sid_asked && self.sid.is_none() && !sid.is_empty() {
            self.sid = Some(sid.to_string());
            true
        } else {
            false
        }
    }

    /// Wrap one or more stanzas in a `<body rid sid>` envelope and enqueue
    /// it; an empty payload becomes the self-closing poll body. Dropped
    /// silently while no session is established.
    pub fn enqueue(&mut self, stanzas: &str) {
        let Some(sid) = &self.sid else {
            return;
        };
        let body = if stanzas.is_empty() {
            format!(
                "<body rid='{}' sid='{}' xmlns='{}'/>",
                self.rid, sid, HTTPBIND_NS
            )
        } else {
            format!(
                "<body rid='{}' sid='{}' xmlns='{}'>{}</body>",
                self.rid, sid, HTTPBIND_NS, stanzas
            )
        };
        self.queue.push_back(body);
        self.rid += 1;
    }

    /// Enqueue a body that is already framed (the session request is the one
    /// body sent without a sid).
    fn enqueue_raw(&mut self, body: String) {
        self.queue.push_back(body);
        self.rid += 1;
    }

    /// Enqueue the clean session teardown body.
    pub fn enqueue_terminate(&mut self) {
        let Some(sid) = &self.sid else {
            return;
        };
        let body = format!(
            "<body rid='{}' sid='{}' type='terminate' xmlns='{}'/>",
            self.rid, sid, HTTPBIND_NS
        );
        self.queue.push_back(body);
        self.rid += 1;
        self.phase = Phase::Terminating;
    }

    /// Push queued bodies out through the pool, head first. A body the pool
    /// cannot take yet stays at the head for the next pass (peek, then
    /// commit only on a successful post).
    pub async fn pump(&mut self, pool: &mut HttpPool) -> Result<(), TransportError> {
        while let Some(head) = self.queue.front() {
            match pool.post(head).await? {
                PostOutcome::Sent => {
                    self.queue.pop_front();
                }
                PostOutcome::Busy => break,
            }
        }
        Ok(())
    }

    /// Forget the session entirely: no sid, empty queue, back to `Unbound`.
    /// The retry backoff is deliberately left as-is so reconnect storms keep
    /// their spacing.
    pub fn reset(&mut self) {
        debug!(server = %self.server, "BOSH session reset");
        self.sid = None;
        self.phase = Phase::Unbound;
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn established(server: &str) -> BoshSession {
        let mut session = BoshSession::new(server.to_string());
        session.ask_sid();
        assert!(session.adopt_sid("SID1"));
        session
    }

    #[test]
    fn ask_sid_uses_a_fresh_24_bit_rid() {
        let mut session = BoshSession::new("srv".to_string());
        session.ask_sid();
        // rid was incremented once by the enqueue.
        assert!(session.rid() >= 1);
        assert!(session.rid() <= 1 << 24);
        assert!(session.sid_pending());
        assert_eq!(session.phase, Phase::RequestingSid);
        let body = session.queue.front().unwrap();
        assert!(body.contains("hold='1'"));
        assert!(body.contains("ver='1.6'"));
        assert!(body.contains("wait='10'"));
        assert!(body.contains("to='srv'"));
        assert!(!body.contains("sid="));
    }

    #[test]
    fn stanzas_without_a_sid_are_dropped() {
        let mut session = BoshSession::new("srv".to_string());
        let rid_before = session.rid();
        session.enqueue("<presence/>");
        session.enqueue("");
        assert!(session.queue_is_empty());
        assert_eq!(session.rid(), rid_before);
    }

    #[test]
    fn rid_increments_once_per_enqueued_body() {
        let mut session = established("srv");
        let base = session.rid();
        session.enqueue("<presence/>");
        session.enqueue("<iq type='get'/>");
        session.enqueue("");
        assert_eq!(session.rid(), base + 3);
        let rids: Vec<&String> = session.queue.iter().collect();
        assert!(rids[1].contains(&format!("rid='{base}'")));
        assert!(rids[2].contains(&format!("rid='{}'", base + 1)));
        assert!(rids[3].contains(&format!("rid='{}'", base + 2)));
    }

    #[test]
    fn empty_payload_becomes_poll_body() {
        let mut session = established("srv");
        session.enqueue("");
        let body = session.queue.back().unwrap();
        assert!(body.ends_with("/>"));
        assert!(body.contains("sid='SID1'"));
        assert!(!body.contains("terminate"));
    }

    #[test]
    fn wrapped_payload_keeps_the_stanza() {
        let mut session = established("srv");
        session.enqueue("<presence to='general@conference.srv/u'/>");
        let body = session.queue.back().unwrap();
        assert!(body.starts_with("<body rid="));
        assert!(body.ends_with("<presence to='general@conference.srv/u'/></body>"));
    }

    #[test]
    fn terminate_body_shape() {
        let mut session = established("srv");
        session.enqueue_terminate();
        let body = session.queue.back().unwrap();
        assert!(body.contains("type='terminate'"));
        assert!(body.contains("sid='SID1'"));
        assert_eq!(session.phase, Phase::Terminating);
    }

    #[test]
    fn sid_is_adopted_only_while_asked() {
        let mut session = BoshSession::new("srv".to_string());
        assert!(!session.adopt_sid("S"));
        session.ask_sid();
        assert!(!session.adopt_sid(""));
        assert!(session.adopt_sid("S"));
        assert_eq!(session.sid(), Some("S"));
        // A second sid on an established session is ignored.
        assert!(!session.adopt_sid("S2"));
        assert_eq!(session.sid(), Some("S"));
    }

    #[test]
    fn retry_backoff_grows_then_stops_at_the_cap() {
        let mut session = BoshSession::new("srv".to_string());
        let mut delays = vec![session.ask_sid()];
        for _ in 0..6 {
            session.retry_elapsed();
            delays.push(session.ask_sid());
        }
        assert_eq!(delays[0], Duration::from_secs(2));
        // Each growth step adds 10 + uniform(0..=10) seconds.
        for (i, pair) in delays.windows(2).enumerate() {
            if pair[0] < Duration::from_secs(60) {
                let grown = pair[1] - pair[0];
                assert!(grown >= Duration::from_secs(10), "step {i} grew {grown:?}");
                assert!(grown <= Duration::from_secs(20), "step {i} grew {grown:?}");
            } else {
                assert_eq!(pair[1], pair[0], "delay kept growing past the cap");
            }
        }
        assert!(*delays.last().unwrap() >= Duration::from_secs(60));
    }

    #[test]
    fn retry_with_a_sid_settles_the_backoff() {
        let mut session = BoshSession::new("srv".to_string());
        session.ask_sid();
        session.adopt_sid("S");
        session.retry_elapsed();
        assert_eq!(session.retry_delay, Duration::from_secs(10));
        assert!(!session.sid_pending());
    }

    #[test]
    fn reset_forgets_sid_and_queue() {
        let mut session = established("srv");
        session.enqueue("<presence/>");
        session.reset();
        assert_eq!(session.sid(), None);
        assert_eq!(session.phase, Phase::Unbound);
        assert!(session.queue_is_empty());
    }
}
