//! Connection admission: credential validation and the guest path.
//!
//! A connecting client presents an optional credential and an explicit
//! guest-request flag in its handshake. Admission is decided here:
//!
//! | credential | guest | outcome |
//! |---|---|---|
//! | absent | yes | admitted as guest (`guest_<connection-id>`, no role) |
//! | absent | no | rejected: credential required |
//! | present | — | validated against the external identity authority |
//!
//! The authority call is the single suspension point in admission and is
//! bounded by a request timeout. All authority failures — rejection, timeout,
//! network error, malformed response — normalize to the same rejection so an
//! unauthenticated caller cannot tell "the authority is down" from "the
//! credential is bad".
//!
//! The authority itself is abstracted behind [`TokenValidator`] so tests
//! inject a fake instead of making network calls.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::registry::ConnectionId;

/// Default timeout for identity authority requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// The identity a connection is admitted as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// User id, or a synthetic `guest_<connection-id>` for guests.
    pub user_id: String,

    /// Role reported by the authority. Guests carry no role, so they never
    /// join a role room.
    pub role: Option<String>,

    /// True for guest admissions.
    pub anonymous: bool,
}

impl Identity {
    /// Builds the synthetic guest identity for a connection.
    pub fn guest(connection_id: &ConnectionId) -> Self {
        Self {
            user_id: format!("guest_{connection_id}"),
            role: None,
            anonymous: true,
        }
    }
}

/// Why a connection was refused admission.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// No credential was supplied and guest admission was not requested.
    #[error("authentication credential required")]
    CredentialRequired,

    /// The credential was rejected. Deliberately also covers authority
    /// unavailability; see the module docs.
    #[error("invalid or expired credential")]
    InvalidCredential,
}

/// Errors from the external identity authority.
///
/// Granular for logging and tests; admission collapses all of these into
/// [`AdmissionError::InvalidCredential`].
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// The authority rejected the credential.
    #[error("unauthorized: invalid or expired credential")]
    Unauthorized,

    /// The request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The authority is unreachable.
    #[error("identity authority unavailable: {0}")]
    Unavailable(String),

    /// The authority answered with an unexpected status or body.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Client setup problem, such as an invalid base URL.
    #[error("client configuration error: {0}")]
    Configuration(String),
}

/// User ids arrive as numbers from some backends and strings from others.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum UserIdRepr {
    Num(i64),
    Str(String),
}

impl UserIdRepr {
    fn into_string(self) -> String {
        match self {
            Self::Num(n) => n.to_string(),
            Self::Str(s) => s,
        }
    }
}

/// Profile returned by the identity authority for a valid credential.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorityUser {
    id: UserIdRepr,
    role: Option<String>,
    user_type: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl AuthorityUser {
    /// The user id, normalized to a string.
    pub fn id(&self) -> String {
        self.id.clone().into_string()
    }

    /// The effective role: `role` when present, else `user_type`.
    pub fn role(&self) -> Option<&str> {
        self.role.as_deref().or(self.user_type.as_deref())
    }
}

/// The authority may wrap the profile in a `user` envelope or return it bare.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AuthorityResponse {
    Wrapped { user: AuthorityUser },
    Bare(AuthorityUser),
}

impl AuthorityResponse {
    fn into_user(self) -> AuthorityUser {
        match self {
            Self::Wrapped { user } => user,
            Self::Bare(user) => user,
        }
    }
}

/// Capability for validating a handshake credential.
///
/// Production uses [`HttpTokenValidator`]; tests inject fakes.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validates a credential, returning the user profile it belongs to.
    async fn validate(&self, token: &str) -> Result<AuthorityUser, AuthorityError>;
}

/// Validates credentials against the backend identity authority over HTTP.
///
/// Calls `GET {base_url}/auth/me` with the credential as a bearer token.
/// Thread-safe; wrap in `Arc` for sharing.
#[derive(Debug, Clone)]
pub struct HttpTokenValidator {
    http_client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTokenValidator {
    /// Creates a validator for the given authority base URL.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Configuration`] if the HTTP client cannot
    /// be created.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AuthorityError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let http_client = Client::builder().timeout(timeout).build().map_err(|e| {
            AuthorityError::Configuration(format!("failed to create HTTP client: {e}"))
        })?;

        Ok(Self {
            http_client,
            base_url,
            timeout,
        })
    }

    /// Creates a validator with the default request timeout.
    pub fn with_default_timeout(base_url: impl Into<String>) -> Result<Self, AuthorityError> {
        Self::new(base_url, REQUEST_TIMEOUT)
    }

    /// Returns the authority base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl TokenValidator for HttpTokenValidator {
    async fn validate(&self, token: &str) -> Result<AuthorityUser, AuthorityError> {
        let url = format!("{}/auth/me", self.base_url);

        debug!(url = %url, "Validating credential with identity authority");

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AuthorityError::Timeout(self.timeout)
                } else if e.is_connect() {
                    AuthorityError::Unavailable(format!("connection failed: {e}"))
                } else {
                    AuthorityError::Unavailable(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            debug!("Credential validation failed: unauthorized");
            return Err(AuthorityError::Unauthorized);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Unexpected response from identity authority");
            return Err(AuthorityError::InvalidResponse(format!(
                "unexpected status {status}: {body}"
            )));
        }

        let parsed: AuthorityResponse = response.json().await.map_err(|e| {
            AuthorityError::InvalidResponse(format!("failed to parse user response: {e}"))
        })?;

        let user = parsed.into_user();
        debug!(user_id = %user.id(), "Credential validated");

        Ok(user)
    }
}

/// Decides whether, and as whom, a connection may be admitted.
///
/// Guest admission never reaches the authority. Credentialed admission
/// always does; every new connection revalidates, there is no caching.
///
/// # Errors
///
/// - [`AdmissionError::CredentialRequired`] - no credential and no guest flag
/// - [`AdmissionError::InvalidCredential`] - the authority rejected the
///   credential or could not be reached
pub async fn authenticate(
    validator: &dyn TokenValidator,
    credential: Option<&str>,
    guest_requested: bool,
    connection_id: &ConnectionId,
) -> Result<Identity, AdmissionError> {
    let credential = credential.filter(|c| !c.is_empty());

    match credential {
        None if guest_requested => {
            debug!(connection_id = %connection_id, "Admitting guest connection");
            Ok(Identity::guest(connection_id))
        }
        None => {
            warn!(connection_id = %connection_id, "Connection rejected: no credential provided");
            Err(AdmissionError::CredentialRequired)
        }
        Some(token) => match validator.validate(token).await {
            Ok(user) => Ok(Identity {
                user_id: user.id(),
                role: user.role().map(String::from),
                anonymous: false,
            }),
            Err(err) => {
                // Authority-down and credential-bad produce the same caller
                // outcome; the distinction lives only in the logs.
                warn!(
                    connection_id = %connection_id,
                    error = %err,
                    "Connection rejected: credential validation failed"
                );
                Err(AdmissionError::InvalidCredential)
            }
        },
    }
}
