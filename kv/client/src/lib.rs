//! Discover-the-leader retry client (spec §4.6).
//!
//! Given an ordered list of service addresses, [`KvClient`] rotates through
//! them on transport error, per-attempt timeout, or a `NotLeader` reply,
//! until the caller's own deadline elapses. `FailedCommit` is surfaced to
//! the caller rather than retried automatically, preserving at-most-once
//! submission semantics at this layer (spec §4.6 step 4).

mod config;
mod error;

pub use config::ClientConfig;
pub use error::ClientError;

use raftkv_kvservice::{GetRequest, GetResponse, PutRequest, PutResponse, RespStatus};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Monotonic id tagging each client for log correlation, mirroring the
/// original design's `clientCount` — an explicit counter scoped to this
/// process rather than a registry threaded through every call site, since
/// nothing downstream reads it back.
static CLIENT_COUNT: AtomicU32 = AtomicU32::new(0);

trait StatusResponse {
    fn resp_status(&self) -> RespStatus;
}

impl StatusResponse for PutResponse {
    fn resp_status(&self) -> RespStatus {
        self.resp_status
    }
}

impl StatusResponse for GetResponse {
    fn resp_status(&self) -> RespStatus {
        self.resp_status
    }
}

pub struct KvClient {
    addrs: Vec<String>,
    assumed_leader: AtomicUsize,
    client_id: u32,
    config: ClientConfig,
    http: reqwest::Client,
}

impl KvClient {
    pub fn new(addrs: Vec<String>) -> Self {
        Self::with_config(addrs, ClientConfig::default())
    }

    pub fn with_config(addrs: Vec<String>, config: ClientConfig) -> Self {
        Self {
            addrs,
            assumed_leader: AtomicUsize::new(0),
            client_id: CLIENT_COUNT.fetch_add(1, Ordering::Relaxed),
            config,
            http: reqwest::Client::new(),
        }
    }

    /// `Put(key, value)`, retried under `deadline` until a leader answers.
    /// Returns the previous value and whether the key existed.
    pub async fn put(
        &self,
        key: String,
        value: String,
        deadline: Duration,
    ) -> Result<(Option<String>, bool), ClientError> {
        let req = PutRequest { key, value };
        let resp: PutResponse = self.send("put", &req, deadline).await?;
        let prev_value = if resp.key_found { Some(resp.prev_value) } else { None };
        Ok((prev_value, resp.key_found))
    }

    /// `Get(key)`, retried under `deadline` until a leader answers.
    pub async fn get(&self, key: String, deadline: Duration) -> Result<(Option<String>, bool), ClientError> {
        let req = GetRequest { key };
        let resp: GetResponse = self.send("get", &req, deadline).await?;
        let value = if resp.key_found { Some(resp.value) } else { None };
        Ok((value, resp.key_found))
    }

    fn rotate(&self) {
        if self.addrs.is_empty() {
            return;
        }
        self.assumed_leader
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| Some((i + 1) % self.addrs.len()))
            .ok();
    }

    async fn send<Req, Resp>(&self, route: &str, req: &Req, deadline: Duration) -> Result<Resp, ClientError>
    where
        Req: Serialize,
        Resp: DeserializeOwned + StatusResponse,
    {
        if self.addrs.is_empty() {
            return Err(ClientError::NoAddresses);
        }

        let overall_deadline = Instant::now() + deadline;
        loop {
            let remaining = overall_deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ClientError::DeadlineExceeded);
            }

            let leader = self.assumed_leader.load(Ordering::SeqCst) % self.addrs.len();
            let addr = &self.addrs[leader];
            let url = format!("http://{addr}/{route}/");
            let per_attempt = self.config.per_attempt_deadline.min(remaining);

            debug!(client = self.client_id, %url, "sending request");
            let outcome = self.http.post(&url).json(req).timeout(per_attempt).send().await;

            let response = match outcome {
                Ok(r) => r,
                Err(_) => {
                    debug!(client = self.client_id, leader, "attempt failed; rotating");
                    self.rotate();
                    continue;
                }
            };

            let parsed: Resp = match response.json().await {
                Ok(p) => p,
                Err(_) => {
                    self.rotate();
                    continue;
                }
            };

            match parsed.resp_status() {
                RespStatus::Ok => return Ok(parsed),
                RespStatus::NotLeader => {
                    debug!(client = self.client_id, leader, "not leader; rotating");
                    self.rotate();
                    let remaining = overall_deadline.saturating_duration_since(Instant::now());
                    tokio::time::sleep(self.config.not_leader_backoff.min(remaining)).await;
                }
                RespStatus::FailedCommit => return Err(ClientError::FailedCommit),
                RespStatus::Invalid => {
                    self.rotate();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_are_distinct_and_monotonic() {
        let a = KvClient::new(vec!["x".into()]);
        let b = KvClient::new(vec!["x".into()]);
        assert!(b.client_id > a.client_id);
    }

    #[test]
    fn rotate_wraps_around_address_list() {
        let c = KvClient::new(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(c.assumed_leader.load(Ordering::SeqCst), 0);
        c.rotate();
        assert_eq!(c.assumed_leader.load(Ordering::SeqCst), 1);
        c.rotate();
        c.rotate();
        assert_eq!(c.assumed_leader.load(Ordering::SeqCst), 0);
    }
}
