//! Credentials and HTTP Digest challenge handling.
//!
//! Challenge parsing and response hashing (RFC 2617 / RFC 7616) are done by
//! `digest_auth`. A `DigestChallenge` keeps the parsed challenge so later
//! requests reuse it with an incrementing nonce count.

use std::fmt;

use digest_auth::{AuthContext, WwwAuthenticateHeader};
use serde::Deserialize;

use crate::error::{RadiusError, Result};
use crate::http::HttpMethod;

/// Username and password for a Radius web-services account.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A parsed `WWW-Authenticate: Digest` challenge and its nonce count.
pub struct DigestChallenge {
    header: WwwAuthenticateHeader,
}

impl fmt::Debug for DigestChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestChallenge")
            .field("stale", &self.header.stale)
            .finish_non_exhaustive()
    }
}

impl DigestChallenge {
    /// Parse the value of a `WWW-Authenticate` header.
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        let is_digest = header
            .split_whitespace()
            .next()
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("digest"));
        if !is_digest {
            return Err(RadiusError::Authentication(format!(
                "server did not offer Digest authentication: {header}"
            )));
        }
        digest_auth::parse(header)
            .map(|header| Self { header })
            .map_err(|e| RadiusError::Authentication(format!("unusable digest challenge <{header}>: {e}")))
    }

    /// True when the server flagged the previous nonce as expired.
    pub fn is_stale(&self) -> bool {
        self.header.stale
    }

    /// `Authorization` header value for one request; bumps the nonce count.
    pub fn authorization(&mut self, credentials: &Credentials, method: HttpMethod, uri: &str) -> Result<String> {
        self.respond(credentials, method, uri, None)
    }

    fn respond(
        &mut self,
        credentials: &Credentials,
        method: HttpMethod,
        uri: &str,
        cnonce: Option<&str>,
    ) -> Result<String> {
        let mut context = AuthContext::new(credentials.username.as_str(), credentials.password.as_str(), uri);
        context.method = digest_auth::HttpMethod::from(method.as_str());
        if let Some(cnonce) = cnonce {
            context.cnonce = Some(cnonce.into());
        }
        self.header
            .respond(&context)
            .map(|answer| answer.to_string())
            .map_err(|e| RadiusError::Authentication(format!("cannot answer digest challenge: {e}")))
    }
}
