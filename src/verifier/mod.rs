//! Credential verification against the console backend.
//!
//! The backend is an opaque oracle: it receives the operator's email and
//! password and answers with either a token + user payload or a rejection
//! message. An explicit rejection and a transport failure (network error,
//! non-2xx status, unparseable body) are distinct: the session manager
//! words its outcome differently for each, and callers that want to exempt
//! flaky networks from lockout counting can tell them apart.

use crate::config::VerifierConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Login request body sent to the backend.
#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Raw backend response. `success: true` carries `token` + `user`,
/// `success: false` carries `message`.
#[derive(Debug, Deserialize)]
struct VerifyResponse {
    success: bool,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    user: Option<VerifiedUser>,
    #[serde(default)]
    message: Option<String>,
}

/// User payload returned by the backend on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedUser {
    pub id: String,
    pub email: String,
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Successful verification: the opaque token plus the user it belongs to.
#[derive(Debug, Clone)]
pub struct Verification {
    pub token: String,
    pub user: VerifiedUser,
}

/// Why verification did not produce a session.
#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    /// The backend understood the request and said no.
    #[error("{message}")]
    Rejected { message: String },
    /// The backend could not be reached, answered a non-2xx status, or
    /// returned a body that did not parse.
    #[error("Credential service unreachable: {0}")]
    Transport(anyhow::Error),
}

/// Boundary to whatever service actually checks passwords.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, email: &str, password: &str)
        -> Result<Verification, VerifierError>;
}

/// reqwest-based verifier for the console backend's login endpoint.
pub struct HttpCredentialVerifier {
    base_url: String,
    http: reqwest::Client,
}

impl HttpCredentialVerifier {
    /// Build a verifier for the configured backend. The request timeout is
    /// always bounded, so a hung backend surfaces as a transport error
    /// instead of wedging the login flow.
    pub fn new(config: &VerifierConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn login_url(&self) -> String {
        format!("{}/auth/login", self.base_url)
    }
}

#[async_trait]
impl CredentialVerifier for HttpCredentialVerifier {
    async fn verify(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Verification, VerifierError> {
        let resp = self
            .http
            .post(self.login_url())
            .json(&VerifyRequest { email, password })
            .send()
            .await
            .map_err(|e| VerifierError::Transport(e.into()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(VerifierError::Transport(anyhow::anyhow!(
                "Backend answered {status}"
            )));
        }

        let body: VerifyResponse = resp
            .json()
            .await
            .map_err(|e| VerifierError::Transport(e.into()))?;

        if !body.success {
            return Err(VerifierError::Rejected {
                message: body
                    .message
                    .unwrap_or_else(|| "Invalid credentials".to_string()),
            });
        }

        match (body.token, body.user) {
            (Some(token), Some(user)) => Ok(Verification { token, user }),
            _ => Err(VerifierError::Transport(anyhow::anyhow!(
                "Backend success response missing token or user"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn verifier_for(server: &MockServer) -> HttpCredentialVerifier {
        HttpCredentialVerifier::new(&VerifierConfig {
            base_url: server.uri(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn success_yields_token_and_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(body_json(serde_json::json!({
                "email": "ops@example.com",
                "password": "hunter2",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "token": "tok_abc123",
                "user": {
                    "id": "u-1",
                    "email": "ops@example.com",
                    "role": "admin",
                    "permissions": ["products.write"],
                },
            })))
            .mount(&server)
            .await;

        let verification = verifier_for(&server)
            .verify("ops@example.com", "hunter2")
            .await
            .unwrap();

        assert_eq!(verification.token, "tok_abc123");
        assert_eq!(verification.user.email, "ops@example.com");
        assert_eq!(verification.user.permissions, vec!["products.write"]);
    }

    #[tokio::test]
    async fn explicit_rejection_carries_backend_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "message": "Invalid email or password",
            })))
            .mount(&server)
            .await;

        let err = verifier_for(&server)
            .verify("ops@example.com", "wrong")
            .await
            .unwrap_err();

        match err {
            VerifierError::Rejected { message } => {
                assert_eq!(message, "Invalid email or password");
            }
            other => panic!("Expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = verifier_for(&server)
            .verify("ops@example.com", "hunter2")
            .await
            .unwrap_err();
        assert!(matches!(err, VerifierError::Transport(_)));
    }

    #[tokio::test]
    async fn garbage_body_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;

        let err = verifier_for(&server)
            .verify("ops@example.com", "hunter2")
            .await
            .unwrap_err();
        assert!(matches!(err, VerifierError::Transport(_)));
    }

    #[tokio::test]
    async fn success_without_token_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
            })))
            .mount(&server)
            .await;

        let err = verifier_for(&server)
            .verify("ops@example.com", "hunter2")
            .await
            .unwrap_err();
        assert!(matches!(err, VerifierError::Transport(_)));
    }

    #[tokio::test]
    async fn unreachable_backend_is_transport() {
        // Nothing listens on this port
        let verifier = HttpCredentialVerifier::new(&VerifierConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 2,
        })
        .unwrap();

        let err = verifier
            .verify("ops@example.com", "hunter2")
            .await
            .unwrap_err();
        assert!(matches!(err, VerifierError::Transport(_)));
    }

    #[test]
    fn base_url_trailing_slash_normalized() {
        let verifier = HttpCredentialVerifier::new(&VerifierConfig {
            base_url: "https://admin.example.com/".to_string(),
            timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(verifier.login_url(), "https://admin.example.com/auth/login");
    }
}
