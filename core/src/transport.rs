//! Blocking `Transport` backed by ureq, answering HTTP Digest challenges.
//!
//! The first request goes out unauthenticated; the 401 challenge it earns is
//! cached and reused (with an incrementing nonce count) for every later
//! request until the server issues a new one.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::auth::{Credentials, DigestChallenge};
use crate::error::{RadiusError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport};

/// Largest response body read into memory. Export result pages can exceed
/// ureq's 10 MB default.
pub const MAX_RESPONSE_BYTES: u64 = 256 * 1024 * 1024;

/// Production transport: ureq agent plus digest credentials.
pub struct DigestTransport {
    agent: ureq::Agent,
    credentials: Credentials,
    challenge: Mutex<Option<DigestChallenge>>,
    max_body: u64,
}

impl DigestTransport {
    pub fn new(credentials: Credentials, timeout: Duration) -> Self {
        // Status codes are interpreted by `RadiusClient`, not by ureq.
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .new_agent();
        Self {
            agent,
            credentials,
            challenge: Mutex::new(None),
            max_body: MAX_RESPONSE_BYTES,
        }
    }

    /// Cap on response body size; larger bodies fail with a transport error.
    pub fn with_max_body(mut self, bytes: u64) -> Self {
        self.max_body = bytes;
        self
    }

    // A panic elsewhere cannot leave the cached challenge half-written, so a
    // poisoned lock is still usable.
    fn cached(&self) -> MutexGuard<'_, Option<DigestChallenge>> {
        self.challenge.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn authorization_for(&self, request: &HttpRequest) -> Result<Option<String>> {
        match self.cached().as_mut() {
            Some(challenge) => challenge
                .authorization(&self.credentials, request.method, request.request_target())
                .map(Some),
            None => Ok(None),
        }
    }

    fn store_challenge(&self, challenge: DigestChallenge) {
        *self.cached() = Some(challenge);
    }

    fn send(&self, request: &HttpRequest, authorization: Option<&str>) -> Result<HttpResponse> {
        debug!(method = request.method.as_str(), url = %request.path, "sending request");

        let mut headers = request.headers.clone();
        if let Some(value) = authorization {
            headers.push(("Authorization".to_string(), value.to_string()));
        }

        let result = match (request.method, request.body.as_deref()) {
            (HttpMethod::Get, _) => {
                let mut builder = self.agent.get(&request.path);
                for (k, v) in &headers {
                    builder = builder.header(k.as_str(), v.as_str());
                }
                builder.call()
            }
            (HttpMethod::Delete, _) => {
                let mut builder = self.agent.delete(&request.path);
                for (k, v) in &headers {
                    builder = builder.header(k.as_str(), v.as_str());
                }
                builder.call()
            }
            (HttpMethod::Post, body) => {
                let mut builder = self.agent.post(&request.path);
                for (k, v) in &headers {
                    builder = builder.header(k.as_str(), v.as_str());
                }
                match body {
                    Some(body) => builder.send(body.as_bytes()),
                    None => builder.send_empty(),
                }
            }
            (HttpMethod::Put, body) => {
                let mut builder = self.agent.put(&request.path);
                for (k, v) in &headers {
                    builder = builder.header(k.as_str(), v.as_str());
                }
                match body {
                    Some(body) => builder.send(body.as_bytes()),
                    None => builder.send_empty(),
                }
            }
        };

        let mut response = result.map_err(|e| RadiusError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = response
            .body_mut()
            .with_config()
            .limit(self.max_body)
            .read_to_string()
            .map_err(|e| RadiusError::Transport(format!("reading response body from {}: {e}", request.path)))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl Transport for DigestTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let cached_auth = self.authorization_for(request)?;
        let had_challenge = cached_auth.is_some();
        let response = self.send(request, cached_auth.as_deref())?;
        if response.status != 401 {
            return Ok(response);
        }

        let header = response.header("www-authenticate").ok_or_else(|| {
            RadiusError::Authentication(format!(
                "401 from {} without a digest challenge",
                request.path
            ))
        })?;
        let challenge = DigestChallenge::parse(header)?;
        // A fresh challenge after a cached one only means the nonce expired.
        if had_challenge {
            debug!(stale = challenge.is_stale(), "digest nonce rejected, re-authenticating");
        }
        self.store_challenge(challenge);

        let authorization = self.authorization_for(request)?;
        let response = self.send(request, authorization.as_deref())?;
        if response.status == 401 {
            return Err(RadiusError::Authentication(format!(
                "credentials for user <{}> rejected by {}",
                self.credentials.username, request.path
            )));
        }
        Ok(response)
    }
}
