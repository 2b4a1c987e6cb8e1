//! Dropbox OAuth 2.0 PKCE flow collaborator.
//!
//! Owns everything the authorizer treats as "the SDK": PKCE generation,
//! authorize-URL building, and the code-for-token exchange. The access token
//! itself never appears in logs.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Dropbox OAuth URLs.
const AUTHORIZE_URL: &str = "https://www.dropbox.com/oauth2/authorize";
const TOKEN_URL: &str = "https://api.dropboxapi.com/oauth2/token";

/// PKCE code verifier and challenge.
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

/// Generate a PKCE code verifier and its S256 challenge.
pub fn generate_pkce() -> Pkce {
    // Use two UUIDs (16 bytes each) to get 32 random bytes
    let uuid1 = uuid::Uuid::new_v4();
    let uuid2 = uuid::Uuid::new_v4();
    let mut verifier_bytes = [0u8; 32];
    verifier_bytes[..16].copy_from_slice(uuid1.as_bytes());
    verifier_bytes[16..].copy_from_slice(uuid2.as_bytes());
    let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

    Pkce {
        verifier,
        challenge,
    }
}

/// Whether Dropbox should issue a refresh token alongside the access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenAccessType {
    /// Short-lived access token plus refresh token.
    #[default]
    Offline,
    /// Short-lived access token only.
    Online,
}

impl TokenAccessType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Online => "online",
        }
    }
}

/// Scope-widening behavior for repeated authorizations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncludeGrantedScopes {
    /// Request only the listed scopes.
    #[default]
    None,
    /// Also keep previously granted user scopes.
    User,
    /// Also keep previously granted team scopes.
    Team,
}

impl IncludeGrantedScopes {
    pub fn as_query_value(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::User => Some("user"),
            Self::Team => Some("team"),
        }
    }
}

impl std::str::FromStr for IncludeGrantedScopes {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "user" => Ok(Self::User),
            "team" => Ok(Self::Team),
            other => anyhow::bail!("Unknown include-granted-scopes value: {other}"),
        }
    }
}

/// One authorization attempt's request parameters. Created fresh per attempt.
pub struct AuthorizeRequest {
    pub api_key: String,
    pub redirect_uri: String,
    /// Random correlation token, expected back in the redirect.
    pub state: String,
    pub scopes: Vec<String>,
    pub token_access_type: TokenAccessType,
    pub include_granted_scopes: IncludeGrantedScopes,
}

/// Result of a successful code exchange.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub uid: Option<String>,
    pub account_id: Option<String>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
    /// State echoed back through the redirect. Dropbox does not return it
    /// from the token endpoint, so this comes from the forwarded URI and may
    /// be absent.
    pub state: Option<String>,
}

/// The OAuth SDK boundary the authorizer composes against.
pub trait OAuthFlow {
    /// Builds the provider authorize URL for a request.
    fn build_authorize_url(&self, request: &AuthorizeRequest) -> String;

    /// Exchanges the authorization code carried by `forwarded_uri` (the full
    /// redirect URI forwarded by the trampoline page, fragment included) for
    /// tokens.
    ///
    /// # Errors
    /// Returns an error if the forwarded URI carries no code or the token
    /// request fails.
    fn exchange_code(
        &self,
        forwarded_uri: &str,
        api_key: &str,
        redirect_uri: &str,
    ) -> impl std::future::Future<Output = Result<Authorization>> + Send;
}

/// Parses the code and echoed state out of a forwarded redirect URI.
///
/// The trampoline forwards the full URI including the fragment, so the code
/// normally lives in `#code=...&state=...`; query parameters are accepted as
/// a fallback for providers that redirect with a plain query string.
pub fn parse_forwarded_uri(forwarded_uri: &str) -> Result<(String, Option<String>)> {
    let url = url::Url::parse(forwarded_uri)
        .with_context(|| format!("Invalid forwarded redirect URI: {forwarded_uri}"))?;

    let mut code: Option<String> = None;
    let mut state: Option<String> = None;

    if let Some(fragment) = url.fragment() {
        for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
            match key.as_ref() {
                "code" => code = Some(value.to_string()),
                "state" => state = Some(value.to_string()),
                _ => {}
            }
        }
    }

    if code.is_none() {
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.to_string()),
                "state" => state = Some(value.to_string()),
                _ => {}
            }
        }
    }

    let code = code.ok_or_else(|| {
        anyhow::anyhow!("Forwarded redirect URI carries no authorization code")
    })?;
    Ok((code, state))
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    uid: Option<String>,
    #[serde(default)]
    account_id: Option<String>,
}

/// Real Dropbox PKCE flow. One instance per authorization attempt (it owns
/// the code verifier).
pub struct DropboxFlow {
    client: reqwest::Client,
    pkce: Pkce,
    token_url: String,
}

impl DropboxFlow {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            pkce: generate_pkce(),
            token_url: TOKEN_URL.to_string(),
        }
    }

    /// Overrides the token endpoint (tests point this at a mock server).
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }
}

impl Default for DropboxFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl OAuthFlow for DropboxFlow {
    fn build_authorize_url(&self, request: &AuthorizeRequest) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        serializer
            .append_pair("client_id", &request.api_key)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &request.redirect_uri)
            .append_pair("state", &request.state)
            .append_pair("token_access_type", request.token_access_type.as_str())
            .append_pair("code_challenge", &self.pkce.challenge)
            .append_pair("code_challenge_method", "S256");
        if !request.scopes.is_empty() {
            serializer.append_pair("scope", &request.scopes.join(" "));
        }
        if let Some(value) = request.include_granted_scopes.as_query_value() {
            serializer.append_pair("include_granted_scopes", value);
        }
        let query = serializer.finish();

        format!("{AUTHORIZE_URL}?{query}")
    }

    async fn exchange_code(
        &self,
        forwarded_uri: &str,
        api_key: &str,
        redirect_uri: &str,
    ) -> Result<Authorization> {
        let (code, echoed_state) = parse_forwarded_uri(forwarded_uri)?;

        let params = [
            ("code", code.as_str()),
            ("grant_type", "authorization_code"),
            ("code_verifier", self.pkce.verifier.as_str()),
            ("client_id", api_key),
            ("redirect_uri", redirect_uri),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .context("Failed to send token exchange request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Token exchange failed (HTTP {status}): {body}");
        }

        let token_data: TokenResponse = response
            .json()
            .await
            .context("Failed to parse token response")?;

        let expires_at = token_data
            .expires_in
            .map(|seconds| Utc::now() + Duration::seconds(seconds));

        Ok(Authorization {
            access_token: token_data.access_token,
            refresh_token: token_data.refresh_token,
            expires_at,
            uid: token_data.uid,
            account_id: token_data.account_id,
            scope: token_data.scope,
            token_type: token_data.token_type,
            state: echoed_state,
        })
    }
}
