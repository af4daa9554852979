//! Session endpoint: where to connect and how to authenticate.
//!
//! The sandbox provisioner hands out a transport URL of the shape
//!
//! ```text
//! <scheme>://<host><basePath>/ws?authorization=<base64(user:secret)>&arg=<token>
//! ```
//!
//! plus an optional secret. The same base64 credential travels twice: in
//! the `authorization` query parameter for the HTTP upgrade, and as the
//! `AuthToken` field of the opening handshake.
//!
//! An endpoint is an immutable value. Pointing a session somewhere else
//! means building a new endpoint and reconnecting, never mutating one that
//! is in use.

// Rust guideline compliant 2026-02

use url::Url;

use crate::constants::{
    ARG_QUERY_PARAM, AUTHORIZATION_QUERY_PARAM, DEFAULT_AUTH_USER, WS_PATH_SEGMENT,
};
use crate::error::TtyError;
use crate::protocol::basic_credential;
use crate::ws::http_to_ws_scheme;

/// Basic-auth style credential for a ttyd endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Username half of `user:secret`.
    pub user: String,
    /// Secret half of `user:secret`.
    pub secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Connection descriptor for one remote shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEndpoint {
    url: Url,
    credentials: Option<Credentials>,
    session_id: Option<String>,
}

impl SessionEndpoint {
    /// Use `transport_url` as-is (http(s) schemes are mapped to ws(s)).
    pub fn new(transport_url: &str) -> Result<Self, TtyError> {
        let url = Url::parse(&http_to_ws_scheme(transport_url)).map_err(|e| {
            TtyError::connection_failed(format!("invalid endpoint URL '{transport_url}': {e}"))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TtyError::connection_failed(format!(
                "unsupported endpoint scheme '{}'",
                url.scheme()
            )));
        }
        Ok(Self {
            url,
            credentials: None,
            session_id: None,
        })
    }

    /// Build from a ttyd base URL, appending the `/ws` path segment.
    pub fn from_base(base_url: &str) -> Result<Self, TtyError> {
        let mut endpoint = Self::new(base_url)?;
        let path = endpoint.url.path().trim_end_matches('/').to_string();
        if !path.ends_with(&format!("/{WS_PATH_SEGMENT}")) {
            endpoint.url.set_path(&format!("{path}/{WS_PATH_SEGMENT}"));
        }
        Ok(endpoint)
    }

    /// Attach a secret, paired with the default username.
    #[must_use]
    pub fn with_secret(self, secret: impl Into<String>) -> Self {
        self.with_credentials(DEFAULT_AUTH_USER, secret)
    }

    /// Attach a full `user:secret` credential.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, secret: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            user: user.into(),
            secret: secret.into(),
        });
        self
    }

    /// Tag the connection with an opaque session id (sent as an extra `arg`).
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Append an opaque `arg` token to the URL (e.g. a pre-shared access token).
    #[must_use]
    pub fn with_arg(mut self, token: &str) -> Self {
        self.url.query_pairs_mut().append_pair(ARG_QUERY_PARAM, token);
        self
    }

    /// The opaque session id, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// The credential, if any.
    #[must_use]
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Whether the URL already carries an `authorization` parameter.
    #[must_use]
    pub fn url_has_authorization(&self) -> bool {
        self.url
            .query_pairs()
            .any(|(key, _)| key == AUTHORIZATION_QUERY_PARAM)
    }

    /// The `AuthToken` value for the handshake.
    ///
    /// Fails with `AUTHENTICATION_FAILED` before any socket is opened when
    /// the URL is gated by an `authorization` parameter but no secret was
    /// supplied, or when the supplied secret is empty.
    pub fn auth_token(&self) -> Result<Option<String>, TtyError> {
        match &self.credentials {
            Some(creds) if creds.secret.is_empty() => Err(TtyError::authentication_failed(
                "handshake secret is empty",
            )),
            Some(creds) => Ok(Some(basic_credential(&creds.user, &creds.secret))),
            None if self.url_has_authorization() => Err(TtyError::authentication_failed(
                "endpoint requires authorization but no secret was supplied",
            )),
            None => Ok(None),
        }
    }

    /// Full URL to open, with credential and session id query parameters.
    #[must_use]
    pub fn connection_url(&self) -> String {
        let mut url = self.url.clone();
        if let Some(creds) = &self.credentials {
            if !self.url_has_authorization() {
                url.query_pairs_mut().append_pair(
                    AUTHORIZATION_QUERY_PARAM,
                    &basic_credential(&creds.user, &creds.secret),
                );
            }
        }
        if let Some(session_id) = &self.session_id {
            url.query_pairs_mut().append_pair(ARG_QUERY_PARAM, session_id);
        }
        url.to_string()
    }

    /// Connection URL with credential and token values masked, for logs.
    #[must_use]
    pub fn redacted_url(&self) -> String {
        let Ok(mut url) = Url::parse(&self.connection_url()) else {
            return String::from("<invalid url>");
        };
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(key, value)| {
                let masked = if key == AUTHORIZATION_QUERY_PARAM || key == ARG_QUERY_PARAM {
                    String::from("***")
                } else {
                    value.into_owned()
                };
                (key.into_owned(), masked)
            })
            .collect();
        if pairs.is_empty() {
            return url.to_string();
        }
        url.query_pairs_mut().clear().extend_pairs(pairs);
        url.to_string()
    }
}
