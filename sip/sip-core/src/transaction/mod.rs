//! RFC 3261 transactions as plain state machines
//!
//! Transactions never own a task or timer. The [`Endpoint`](crate::Endpoint) feeds them
//! messages and asks them for their next deadline, all sending happens through the
//! [`TpHandle`](crate::transport::TpHandle) stored inside each transaction.

use bytesstr::BytesStr;
use sip_types::Method;
use sip_types::header::typed::CallId;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

mod client;
mod server;

pub(crate) use client::ClientTsx;
pub(crate) use server::ServerTsx;

pub mod consts {
    use std::time::Duration;

    pub const T1: Duration = Duration::from_millis(500);
    pub const T2: Duration = Duration::from_secs(4);
    pub const T4: Duration = Duration::from_secs(5);

    pub const RFC3261_BRANCH_PREFIX: &str = "z9hG4bK";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

/// Identifies a transaction by the branch of the topmost Via, the CSeq method and its role
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TsxKey {
    branch: BytesStr,
    method: Method,
    role: Role,
}

impl TsxKey {
    /// Create a new client key with a random branch
    pub fn client(method: &Method) -> Self {
        Self {
            branch: generate_branch(),
            method: method.clone(),
            role: Role::Client,
        }
    }

    pub fn client_with_branch(branch: BytesStr, method: Method) -> Self {
        Self {
            branch,
            method,
            role: Role::Client,
        }
    }

    pub fn server(branch: BytesStr, method: Method) -> Self {
        Self {
            branch,
            method,
            role: Role::Server,
        }
    }

    pub fn branch(&self) -> &BytesStr {
        &self.branch
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn role(&self) -> Role {
        self.role
    }
}

impl fmt::Display for TsxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role {
            Role::Client => "client",
            Role::Server => "server",
        };

        write!(f, "{role}:{}:{}", self.method, self.branch)
    }
}

/// Retransmission timer, doubling its interval on every fire
#[derive(Debug, Clone, Copy)]
pub(crate) struct Retransmit {
    pub(crate) at: Instant,
    pub(crate) interval: Duration,
    pub(crate) cap: Option<Duration>,
}

impl Retransmit {
    pub(crate) fn new(now: Instant, interval: Duration, cap: Option<Duration>) -> Self {
        Self {
            at: now + interval,
            interval,
            cap,
        }
    }

    /// Advance to the next retransmission
    pub(crate) fn next(&mut self, now: Instant) {
        self.interval *= 2;

        if let Some(cap) = self.cap {
            self.interval = self.interval.min(cap);
        }

        self.at = now + self.interval;
    }
}

/// Result of firing a transaction's deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fired {
    /// Still alive, possibly retransmitted something
    Pending,
    /// Gave up waiting for the peer
    TimedOut,
    /// Finished, can be removed silently
    Terminated,
}

fn earliest(deadlines: impl IntoIterator<Item = Option<Instant>>) -> Option<Instant> {
    deadlines.into_iter().flatten().min()
}

#[derive(Default)]
pub(crate) struct Transactions {
    pub(crate) client: HashMap<TsxKey, ClientTsx>,
    pub(crate) server: HashMap<TsxKey, ServerTsx>,
}

impl Transactions {
    pub(crate) fn timeout(&self) -> Option<Instant> {
        earliest(
            self.client
                .values()
                .map(ClientTsx::timeout)
                .chain(self.server.values().map(ServerTsx::timeout)),
        )
    }

    pub(crate) fn due(&self, now: Instant) -> (Vec<TsxKey>, Vec<TsxKey>) {
        let client = self
            .client
            .iter()
            .filter(|(_, tsx)| tsx.timeout().is_some_and(|at| at <= now))
            .map(|(key, _)| key.clone())
            .collect();

        let server = self
            .server
            .iter()
            .filter(|(_, tsx)| tsx.timeout().is_some_and(|at| at <= now))
            .map(|(key, _)| key.clone())
            .collect();

        (client, server)
    }

    /// Find the accepted INVITE server transaction a 2xx ACK belongs to
    pub(crate) fn find_accepted(&self, call_id: &CallId, cseq: u32) -> Option<TsxKey> {
        self.server
            .iter()
            .find(|(_, tsx)| tsx.awaits_ack_for(call_id, cseq))
            .map(|(key, _)| key.clone())
    }

    pub(crate) fn remove(&mut self, key: &TsxKey) -> bool {
        match key.role {
            Role::Client => self.client.remove(key).is_some(),
            Role::Server => self.server.remove(key).is_some(),
        }
    }

    /// Transactions still waiting on the peer or retransmitting
    pub(crate) fn pending(&self) -> usize {
        self.client.values().filter(|tsx| !tsx.lingering()).count()
            + self.server.values().filter(|tsx| !tsx.lingering()).count()
    }

    pub(crate) fn len(&self) -> usize {
        self.client.len() + self.server.len()
    }
}

/// Generate a RFC 3261 compliant branch parameter
pub fn generate_branch() -> BytesStr {
    use rand::distr::Alphanumeric;
    use rand::{Rng, rng};

    consts::RFC3261_BRANCH_PREFIX
        .bytes()
        .chain(rng().sample_iter(Alphanumeric).take(23))
        .map(char::from)
        .collect::<String>()
        .into()
}

#[cfg(test)]
mod test {
    use super::*;
    use consts::{T1, T2};

    #[test]
    fn branch_has_magic_cookie() {
        let branch = generate_branch();

        assert!(branch.starts_with(consts::RFC3261_BRANCH_PREFIX));
        assert_eq!(branch.len(), 30);
        assert_ne!(branch, generate_branch());
    }

    #[test]
    fn retransmit_doubles_and_caps() {
        let now = Instant::now();
        let mut retransmit = Retransmit::new(now, T1, Some(T2));

        assert_eq!(retransmit.at, now + T1);

        let mut intervals = vec![];
        for _ in 0..5 {
            retransmit.next(now);
            intervals.push(retransmit.interval);
        }

        assert_eq!(
            intervals,
            [
                Duration::from_secs(1),
                Duration::from_secs(2),
                T2,
                T2,
                T2
            ]
        );
    }

    #[test]
    fn key_display() {
        let key = TsxKey::server(BytesStr::from_static("z9hG4bKabc"), Method::INVITE);

        assert_eq!(key.to_string(), "server:INVITE:z9hG4bKabc");
        assert_eq!(key.role(), Role::Server);
    }
}
