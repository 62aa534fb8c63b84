//! Identity providers: Google ID-token verification and a local development
//! provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::models::Identity;

pub const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

/// Error codes a sign-in popup reports when the user closes it.
const CANCELLATION_CODES: [&str; 4] = [
    "popup_closed_by_user",
    "auth/popup-closed-by-user",
    "popup_closed",
    "access_denied",
];

#[derive(Debug, thiserror::Error)]
pub enum SignInError {
    #[error("sign-in cancelled by user")]
    Cancelled,
    #[error("credential rejected: {0}")]
    Rejected(String),
    #[error("identity provider error: {0}")]
    Provider(String),
}

/// What the browser posts after its sign-in popup closes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignInRequest {
    /// Provider-issued credential, e.g. a Google ID token.
    pub credential: Option<String>,
    /// Error code reported by the popup instead of a credential.
    pub error: Option<String>,
    pub display_name: Option<String>,
}

impl SignInRequest {
    /// Map a popup error code to a sign-in error, if one was reported.
    fn popup_error(&self) -> Option<SignInError> {
        let code = self.error.as_deref()?;
        if CANCELLATION_CODES.contains(&code) {
            Some(SignInError::Cancelled)
        } else {
            Some(SignInError::Provider(format!("popup reported {code}")))
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn sign_in(&self, request: &SignInRequest) -> Result<Identity, SignInError>;
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: String,
    iss: String,
    sub: String,
    name: Option<String>,
    email: Option<String>,
    picture: Option<String>,
}

/// Verifies Google ID tokens against the tokeninfo endpoint.
pub struct GoogleIdentityProvider {
    client: Client,
    client_id: String,
    tokeninfo_url: String,
}

impl GoogleIdentityProvider {
    pub fn new(client_id: String, tokeninfo_url: String) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("yildly-chat")
            .build()?;

        Ok(Self {
            client,
            client_id,
            tokeninfo_url,
        })
    }

    async fn fetch_token_info(&self, id_token: &str) -> Result<TokenInfo, SignInError> {
        let response = self
            .client
            .get(&self.tokeninfo_url)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|e| SignInError::Provider(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(SignInError::Rejected(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SignInError::Provider(format!("{status}: {body}")));
        }

        response
            .json::<TokenInfo>()
            .await
            .map_err(|e| SignInError::Provider(e.to_string()))
    }
}

#[async_trait]
impl IdentityProvider for GoogleIdentityProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn sign_in(&self, request: &SignInRequest) -> Result<Identity, SignInError> {
        if let Some(err) = request.popup_error() {
            return Err(err);
        }
        let credential = request
            .credential
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| SignInError::Rejected("missing credential".into()))?;

        let info = self.fetch_token_info(credential).await?;
        if info.aud != self.client_id {
            return Err(SignInError::Rejected("token issued for another client".into()));
        }
        if !GOOGLE_ISSUERS.contains(&info.iss.as_str()) {
            return Err(SignInError::Rejected(format!("unexpected issuer {}", info.iss)));
        }

        debug!(uid = %info.sub, "google token verified");
        let display_name = info
            .name
            .or(info.email)
            .unwrap_or_else(|| info.sub.clone());
        Ok(Identity {
            uid: info.sub,
            display_name,
            photo_url: info.picture,
        })
    }
}

/// Signs anyone in by display name. Only for local runs.
#[derive(Debug, Default)]
pub struct DevIdentityProvider;

impl DevIdentityProvider {
    /// Same name, same uid, so a returning developer gets their conversation back.
    /// Letters and digits of any script are kept; everything else becomes `-`.
    pub fn uid_for(display_name: &str) -> String {
        let slug: String = display_name
            .trim()
            .chars()
            .flat_map(|c| {
                let keep = c.is_alphanumeric();
                c.to_lowercase()
                    .filter(move |_| keep)
                    .chain((!keep).then_some('-'))
            })
            .collect();
        format!("dev-{slug}")
    }
}

#[async_trait]
impl IdentityProvider for DevIdentityProvider {
    fn name(&self) -> &'static str {
        "dev"
    }

    async fn sign_in(&self, request: &SignInRequest) -> Result<Identity, SignInError> {
        if let Some(err) = request.popup_error() {
            return Err(err);
        }
        let name = request
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| SignInError::Rejected("display name required".into()))?;

        Ok(Identity::new(Self::uid_for(name), name))
    }
}
