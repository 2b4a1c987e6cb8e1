//! Loopback OAuth authorizer.
//!
//! Drives the full browser round-trip: bind a loopback listener, open the
//! authorize URL, serve the trampoline page on the provider redirect, wait
//! for the script-forwarded second redirect, then exchange the code and
//! persist the tokens. Collaborators (secret store, prompt, browser, OAuth
//! flow) are injected so the whole flow runs against doubles in tests.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::oauth::{AuthorizeRequest, IncludeGrantedScopes, OAuthFlow, TokenAccessType};
use crate::secrets::{SecretStore, access_token_name, refresh_token_name};

/// Default loopback endpoint. Must match the redirect URI registered for the
/// Dropbox app; update the port if 52475 is taken on your machine.
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 52475;

/// Path receiving the provider redirect (fragment stays in the browser).
pub const REDIRECT_PATH: &str = "/authorize";
/// Path receiving the script-forwarded redirect.
pub const SCRIPT_PATH: &str = "/token";
/// Query parameter the trampoline script uses to forward the full URI.
const FORWARD_PARAM: &str = "url_with_fragment";

/// Served on the provider redirect. Browsers never send the URL fragment to
/// the server, so this page's script re-sends the full URI (fragment
/// included) as a query parameter to the script endpoint.
const TRAMPOLINE_HTML: &str = concat!(
    "<!doctype html><html><head><meta charset=\"utf-8\" />",
    "<title>Finishing authorization</title></head><body>",
    "<p>Finishing authorization...</p>",
    "<script>window.location.replace(\"/token?url_with_fragment=\"",
    " + encodeURIComponent(window.location.href));</script>",
    "</body></html>",
);

const COMPLETE_HTML: &str = concat!(
    "<!doctype html><html><head><meta charset=\"utf-8\" />",
    "<title>Authorization complete</title></head><body>",
    "<p>Authorization complete. Return to your terminal to continue.</p>",
    "</body></html>",
);

/// The two redirect-wait states of the loopback exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RedirectPhase {
    /// Waiting for the provider to redirect the browser to `/authorize`.
    AwaitingProviderRedirect,
    /// Waiting for the trampoline script to call `/token`.
    AwaitingScriptRedirect,
}

impl RedirectPhase {
    fn path(self) -> &'static str {
        match self {
            Self::AwaitingProviderRedirect => REDIRECT_PATH,
            Self::AwaitingScriptRedirect => SCRIPT_PATH,
        }
    }

    fn response_body(self) -> &'static str {
        match self {
            Self::AwaitingProviderRedirect => TRAMPOLINE_HTML,
            Self::AwaitingScriptRedirect => COMPLETE_HTML,
        }
    }
}

/// Console boundary for API key entry.
pub trait ApiKeyPrompt {
    /// Asks the user for an API key. `None` means the user declined.
    ///
    /// # Errors
    /// Returns an error if the underlying input source fails.
    fn prompt_api_key(&mut self) -> Result<Option<String>>;
}

/// Interactive stdin prompt. Re-asks until a non-empty key is entered;
/// a case-insensitive `quit` (or end of input) declines.
pub struct ConsolePrompt;

impl ApiKeyPrompt for ConsolePrompt {
    fn prompt_api_key(&mut self) -> Result<Option<String>> {
        println!("Create a Dropbox app at https://www.dropbox.com/developers/apps.");
        loop {
            print!("Enter the API key (or 'quit' to exit): ");
            io::stdout().flush()?;

            let mut input = String::new();
            let bytes = io::stdin().lock().read_line(&mut input)?;
            if bytes == 0 {
                return Ok(None);
            }

            let value = input.trim();
            if value.eq_ignore_ascii_case("quit") {
                return Ok(None);
            }
            if !value.is_empty() {
                return Ok(Some(value.to_string()));
            }
        }
    }
}

/// Process-launcher boundary for opening the authorize URL.
pub trait BrowserLauncher {
    /// Opens `url` in the system's default browser.
    ///
    /// # Errors
    /// Returns an error if the browser cannot be launched.
    fn open(&self, url: &str) -> Result<()>;
}

/// Default-browser launcher, suppressed by `DROPDRIVE_NO_BROWSER` (tests,
/// headless environments).
pub struct SystemBrowser {
    suppressed: bool,
}

impl SystemBrowser {
    pub fn from_env() -> Self {
        Self {
            suppressed: std::env::var("DROPDRIVE_NO_BROWSER").is_ok(),
        }
    }
}

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        if self.suppressed {
            return Ok(());
        }
        open::that(url).context("launch system browser")
    }
}

/// Loopback listener address. Port 0 binds an ephemeral port, which is then
/// resolved into the redirect URI.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// One-flow-at-a-time loopback authorizer. The listener port is a singleton
/// resource; concurrent invocations would collide on bind.
pub struct LoopbackAuthorizer<F> {
    flow: F,
    secrets: Box<dyn SecretStore>,
    settings: Settings,
    prompt: Box<dyn ApiKeyPrompt>,
    browser: Box<dyn BrowserLauncher>,
    listener: ListenerConfig,
}

impl<F: OAuthFlow> LoopbackAuthorizer<F> {
    pub fn new(
        flow: F,
        secrets: Box<dyn SecretStore>,
        settings: Settings,
        prompt: Box<dyn ApiKeyPrompt>,
        browser: Box<dyn BrowserLauncher>,
    ) -> Self {
        Self {
            flow,
            secrets,
            settings,
            prompt,
            browser,
            listener: ListenerConfig::default(),
        }
    }

    pub fn with_listener(mut self, listener: ListenerConfig) -> Self {
        self.listener = listener;
        self
    }

    pub fn secrets(&self) -> &dyn SecretStore {
        self.secrets.as_ref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Obtains an access token for `drive`, running the full browser flow
    /// unless a cached token exists. Every internal failure is logged and
    /// collapsed into `None`; no error escapes.
    pub async fn obtain_access_token(
        &mut self,
        scopes: &[String],
        include_granted_scopes: IncludeGrantedScopes,
        drive: &str,
    ) -> Option<String> {
        match self.run(scopes, include_granted_scopes, drive).await {
            Ok(token) => token,
            Err(err) => {
                warn!("authorization failed: {err:#}");
                eprintln!("Error: {err:#}");
                None
            }
        }
    }

    /// The linear flow. `Ok(None)` is the user declining to supply an API
    /// key; any other failure is an error.
    async fn run(
        &mut self,
        scopes: &[String],
        include_granted_scopes: IncludeGrantedScopes,
        drive: &str,
    ) -> Result<Option<String>> {
        self.settings.upgrade().context("upgrade settings")?;

        // Fast path: a cached token short-circuits the whole flow.
        let access_name = access_token_name(drive);
        if let Some(token) = self
            .secrets
            .read_secret(&access_name)
            .filter(|token| !token.is_empty())
        {
            return Ok(Some(token));
        }

        let Some(api_key) = self.resolve_api_key()? else {
            println!("An API key is required to connect to Dropbox.");
            return Ok(None);
        };

        let state = uuid::Uuid::new_v4().simple().to_string();

        // Bind before building the URL so an ephemeral port resolves into
        // the redirect URI. A taken port aborts the flow here.
        let bind_addr = format!("{}:{}", self.listener.host, self.listener.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("Loopback port unavailable ({bind_addr})"))?;
        let port = listener
            .local_addr()
            .context("resolve listener address")?
            .port();
        let redirect_uri = format!("http://{}:{port}{REDIRECT_PATH}", self.listener.host);

        let request = AuthorizeRequest {
            api_key: api_key.clone(),
            redirect_uri: redirect_uri.clone(),
            state: state.clone(),
            scopes: scopes.to_vec(),
            token_access_type: TokenAccessType::Offline,
            include_granted_scopes,
        };
        let authorize_url = self.flow.build_authorize_url(&request);

        println!("Waiting for credentials and authorization.");
        println!("Authorization URL:");
        println!("  {authorize_url}");
        if let Err(err) = self.browser.open(&authorize_url) {
            // Non-fatal: the user can navigate to the printed URL manually.
            warn!("failed to open browser: {err:#}");
            println!("Could not open a browser; visit the URL above manually.");
        }

        // Two-hop redirect wait.
        let forwarded_uri = {
            wait_for_path(&listener, RedirectPhase::AwaitingProviderRedirect).await?;
            let script_url =
                wait_for_path(&listener, RedirectPhase::AwaitingScriptRedirect).await?;
            script_url
                .query_pairs()
                .find(|(key, _)| key == FORWARD_PARAM)
                .map(|(_, value)| value.to_string())
                .ok_or_else(|| {
                    anyhow::anyhow!("Script redirect is missing the {FORWARD_PARAM} parameter")
                })?
        };

        // The exchange must not hold the loopback port; the listener is done
        // once the script redirect has been served.
        drop(listener);

        println!("Exchanging code for tokens...");
        let result = self
            .flow
            .exchange_code(&forwarded_uri, &api_key, &redirect_uri)
            .await
            .context("exchange authorization code")?;

        // Known limitation: Dropbox does not reliably echo the state, so a
        // mismatch is logged but does not abort.
        match result.state.as_deref() {
            Some(echoed) if echoed == state => {}
            other => warn!(
                "state in the response does not match the request (expected {state}, got {other:?}); continuing"
            ),
        }

        self.secrets
            .write_secret(&access_name, &result.access_token)
            .context("persist access token")?;
        if let Some(refresh) = result.refresh_token.as_deref() {
            self.secrets
                .write_secret(&refresh_token_name(drive), refresh)
                .context("persist refresh token")?;
        }

        self.settings.apply_authorization(&result);
        self.settings.save().context("save settings")?;
        self.settings.reload().context("reload settings")?;

        println!("OAuth token acquisition complete.");
        Ok(Some(result.access_token))
    }

    /// API key from settings, else from the prompt. A freshly entered key is
    /// written back to settings so the next attempt skips the prompt.
    fn resolve_api_key(&mut self) -> Result<Option<String>> {
        if let Some(key) = self
            .settings
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
        {
            return Ok(Some(key));
        }

        let Some(key) = self.prompt.prompt_api_key()? else {
            return Ok(None);
        };
        self.settings.api_key = Some(key.clone());
        Ok(Some(key))
    }
}

/// Accepts connections until one requests the phase's path, answering it
/// with the phase's page. Anything else (favicon and other browser-issued
/// requests) is answered 404 and drained without advancing the state machine.
async fn wait_for_path(listener: &TcpListener, phase: RedirectPhase) -> Result<url::Url> {
    loop {
        let (mut socket, _) = listener
            .accept()
            .await
            .context("accept loopback connection")?;

        let mut buffer = vec![0u8; 8192];
        let size = socket
            .read(&mut buffer)
            .await
            .context("read loopback request")?;
        if size == 0 {
            continue;
        }

        let request = String::from_utf8_lossy(&buffer[..size]);
        let Some(target) = extract_request_target(&request) else {
            let _ = socket.write_all(plain_response("400 Bad Request", "Bad request").as_bytes()).await;
            continue;
        };

        let Ok(url) = url::Url::parse(&format!("http://localhost{target}")) else {
            let _ = socket.write_all(plain_response("400 Bad Request", "Bad request").as_bytes()).await;
            continue;
        };

        if url.path() != phase.path() {
            debug!("draining request for {} during {phase:?}", url.path());
            let _ = socket.write_all(plain_response("404 Not Found", "Not found").as_bytes()).await;
            continue;
        }

        let body = phase.response_body();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len(),
        );
        socket
            .write_all(response.as_bytes())
            .await
            .context("write loopback response")?;
        let _ = socket.shutdown().await;

        return Ok(url);
    }
}

/// Pulls the request target out of a `GET <target> HTTP/1.1` request line.
fn extract_request_target(request: &str) -> Option<&str> {
    let first = request.lines().next()?;
    let mut parts = first.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    if method != "GET" || target.is_empty() {
        return None;
    }
    Some(target)
}

fn plain_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len(),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::oauth::{Authorization, parse_forwarded_uri};

    /// In-memory secret store double.
    #[derive(Default)]
    struct MemorySecretStore {
        entries: BTreeMap<String, String>,
    }

    impl SecretStore for MemorySecretStore {
        fn read_secret(&self, name: &str) -> Option<String> {
            self.entries.get(name).cloned()
        }

        fn write_secret(&mut self, name: &str, value: &str) -> Result<()> {
            self.entries.insert(name.to_string(), value.to_string());
            Ok(())
        }

        fn remove_secret(&mut self, name: &str) -> Result<bool> {
            Ok(self.entries.remove(name).is_some())
        }
    }

    /// Prompt double returning a fixed answer, recording whether it ran.
    struct FixedPrompt {
        answer: Option<String>,
        asked: Arc<AtomicBool>,
    }

    impl ApiKeyPrompt for FixedPrompt {
        fn prompt_api_key(&mut self) -> Result<Option<String>> {
            self.asked.store(true, Ordering::SeqCst);
            Ok(self.answer.clone())
        }
    }

    /// Browser double that performs the favicon + two-hop redirect sequence
    /// against the real listener, standing in for the user's browser and the
    /// trampoline script.
    struct TwoHopBrowser {
        opened: Arc<AtomicBool>,
        seen_port: Arc<Mutex<Option<u16>>>,
        /// Overrides the state echoed in the fragment (mismatch scenarios).
        tamper_state: Option<String>,
    }

    impl BrowserLauncher for TwoHopBrowser {
        fn open(&self, authorize_url: &str) -> Result<()> {
            self.opened.store(true, Ordering::SeqCst);

            let parsed = url::Url::parse(authorize_url)?;
            let pair = |name: &str| {
                parsed
                    .query_pairs()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| value.to_string())
            };
            let redirect_uri = pair("redirect_uri").expect("authorize URL has redirect_uri");
            let state = self
                .tamper_state
                .clone()
                .or_else(|| pair("state"))
                .expect("authorize URL has state");

            *self.seen_port.lock().unwrap() = url::Url::parse(&redirect_uri)?.port();

            tokio::spawn(async move {
                simulate_browser(&redirect_uri, &state).await;
            });
            Ok(())
        }
    }

    async fn simulate_browser(redirect_uri: &str, state: &str) {
        let url = url::Url::parse(redirect_uri).unwrap();
        let authority = format!(
            "{}:{}",
            url.host_str().unwrap(),
            url.port().expect("redirect URI has a port")
        );

        // Browsers also poke the listener for a favicon; it must be drained.
        send_request(&authority, "/favicon.ico").await;

        // Hop 1: provider redirect. The fragment stays client-side.
        let trampoline = send_request(&authority, url.path()).await;
        assert!(trampoline.contains("url_with_fragment"));

        // Hop 2: what the trampoline script does with the full URI.
        let full = format!("{redirect_uri}#code=XYZ&state={state}");
        let encoded: String = url::form_urlencoded::byte_serialize(full.as_bytes()).collect();
        send_request(&authority, &format!("/token?url_with_fragment={encoded}")).await;
    }

    async fn send_request(authority: &str, target: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(authority).await.unwrap();
        stream
            .write_all(
                format!("GET {target} HTTP/1.1\r\nHost: {authority}\r\nConnection: close\r\n\r\n")
                    .as_bytes(),
            )
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    /// Flow double: authorize URL carries redirect_uri + state; exchange
    /// echoes whatever the forwarded fragment carried and records whether
    /// the redirect port was already free when it ran.
    struct FakeFlow {
        fail_exchange: bool,
        port_free_at_exchange: Arc<Mutex<Option<bool>>>,
    }

    impl OAuthFlow for FakeFlow {
        fn build_authorize_url(&self, request: &AuthorizeRequest) -> String {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("redirect_uri", &request.redirect_uri)
                .append_pair("state", &request.state)
                .finish();
            format!("https://provider.invalid/authorize?{query}")
        }

        async fn exchange_code(
            &self,
            forwarded_uri: &str,
            _api_key: &str,
            redirect_uri: &str,
        ) -> Result<Authorization> {
            let redirect = url::Url::parse(redirect_uri)?;
            let rebind = TcpListener::bind((
                redirect.host_str().unwrap_or(DEFAULT_HOST),
                redirect.port().expect("redirect URI has a port"),
            ))
            .await;
            *self.port_free_at_exchange.lock().unwrap() = Some(rebind.is_ok());

            if self.fail_exchange {
                anyhow::bail!("Token exchange failed (HTTP 400): invalid_grant");
            }
            let (code, state) = parse_forwarded_uri(forwarded_uri)?;
            assert_eq!(code, "XYZ");
            Ok(Authorization {
                access_token: "tok1".to_string(),
                refresh_token: Some("ref1".to_string()),
                expires_at: None,
                uid: Some("12345".to_string()),
                account_id: None,
                scope: None,
                token_type: None,
                state,
            })
        }
    }

    struct Harness {
        _temp: tempfile::TempDir,
        opened: Arc<AtomicBool>,
        asked: Arc<AtomicBool>,
        seen_port: Arc<Mutex<Option<u16>>>,
        port_free_at_exchange: Arc<Mutex<Option<bool>>>,
        authorizer: LoopbackAuthorizer<FakeFlow>,
    }

    fn harness(
        cached_token: Option<&str>,
        api_key_answer: Option<&str>,
        tamper_state: Option<&str>,
        fail_exchange: bool,
    ) -> Harness {
        harness_on_port(cached_token, api_key_answer, tamper_state, fail_exchange, 0)
    }

    fn harness_on_port(
        cached_token: Option<&str>,
        api_key_answer: Option<&str>,
        tamper_state: Option<&str>,
        fail_exchange: bool,
        port: u16,
    ) -> Harness {
        let temp = tempfile::tempdir().unwrap();
        let settings = Settings::load(temp.path().join("settings.toml")).unwrap();

        let mut secrets = MemorySecretStore::default();
        if let Some(token) = cached_token {
            secrets.write_secret(&access_token_name("Work"), token).unwrap();
        }

        let opened = Arc::new(AtomicBool::new(false));
        let asked = Arc::new(AtomicBool::new(false));
        let seen_port = Arc::new(Mutex::new(None));
        let port_free_at_exchange = Arc::new(Mutex::new(None));

        let authorizer = LoopbackAuthorizer::new(
            FakeFlow {
                fail_exchange,
                port_free_at_exchange: Arc::clone(&port_free_at_exchange),
            },
            Box::new(secrets),
            settings,
            Box::new(FixedPrompt {
                answer: api_key_answer.map(str::to_string),
                asked: Arc::clone(&asked),
            }),
            Box::new(TwoHopBrowser {
                opened: Arc::clone(&opened),
                seen_port: Arc::clone(&seen_port),
                tamper_state: tamper_state.map(str::to_string),
            }),
        )
        .with_listener(ListenerConfig {
            host: DEFAULT_HOST.to_string(),
            port,
        });

        Harness {
            _temp: temp,
            opened,
            asked,
            seen_port,
            port_free_at_exchange,
            authorizer,
        }
    }

    fn scopes() -> Vec<String> {
        vec!["files.content.read".to_string()]
    }

    async fn assert_port_released(seen_port: &Mutex<Option<u16>>) {
        let port = seen_port.lock().unwrap().expect("flow reached the listener");
        TcpListener::bind((DEFAULT_HOST, port))
            .await
            .expect("loopback port should be free again");
    }

    /// Test: a cached token returns immediately with no prompt, browser, or
    /// listener activity.
    #[tokio::test]
    async fn test_cached_token_short_circuits() {
        let mut h = harness(Some("cached-tok"), None, None, false);
        let token = h
            .authorizer
            .obtain_access_token(&scopes(), IncludeGrantedScopes::None, "Work")
            .await;

        assert_eq!(token.as_deref(), Some("cached-tok"));
        assert!(!h.asked.load(Ordering::SeqCst));
        assert!(!h.opened.load(Ordering::SeqCst));
    }

    /// Test: declining the API key prompt aborts with None before any
    /// listener or browser activity.
    #[tokio::test]
    async fn test_declined_api_key_returns_none() {
        let mut h = harness(None, None, None, false);
        let token = h
            .authorizer
            .obtain_access_token(&scopes(), IncludeGrantedScopes::None, "Work")
            .await;

        assert_eq!(token, None);
        assert!(h.asked.load(Ordering::SeqCst));
        assert!(!h.opened.load(Ordering::SeqCst));
    }

    /// Test: the full two-hop flow persists both tokens under drive-scoped
    /// names, returns the access token, and releases the port.
    #[tokio::test]
    async fn test_full_flow_persists_and_returns_token() {
        let mut h = harness(None, Some("abc123"), None, false);
        let token = h
            .authorizer
            .obtain_access_token(&scopes(), IncludeGrantedScopes::None, "Work")
            .await;

        assert_eq!(token.as_deref(), Some("tok1"));
        assert_eq!(
            h.authorizer.secrets().read_secret("Work_AccessToken").as_deref(),
            Some("tok1")
        );
        assert_eq!(
            h.authorizer.secrets().read_secret("Work_RefreshToken").as_deref(),
            Some("ref1")
        );
        // Entered key was written back to settings.
        assert_eq!(h.authorizer.settings().api_key.as_deref(), Some("abc123"));
        assert!(h.authorizer.settings().access_token_expiration.is_some());
        assert_port_released(&h.seen_port).await;
    }

    /// Test: the listener is disposed before the code exchange begins, so
    /// the loopback port is already rebindable while the exchange runs.
    #[tokio::test]
    async fn test_listener_disposed_before_exchange() {
        let mut h = harness(None, Some("abc123"), None, false);
        let token = h
            .authorizer
            .obtain_access_token(&scopes(), IncludeGrantedScopes::None, "Work")
            .await;

        assert_eq!(token.as_deref(), Some("tok1"));
        assert_eq!(*h.port_free_at_exchange.lock().unwrap(), Some(true));
    }

    /// Test: a mismatched state is not fatal; tokens are still persisted and
    /// returned.
    #[tokio::test]
    async fn test_mismatched_state_still_persists() {
        let mut h = harness(None, Some("abc123"), Some("not-the-state"), false);
        let token = h
            .authorizer
            .obtain_access_token(&scopes(), IncludeGrantedScopes::None, "Work")
            .await;

        assert_eq!(token.as_deref(), Some("tok1"));
        assert_eq!(
            h.authorizer.secrets().read_secret("Work_AccessToken").as_deref(),
            Some("tok1")
        );
    }

    /// Test: a failing exchange yields None but still releases the port.
    #[tokio::test]
    async fn test_exchange_failure_returns_none_and_releases_port() {
        let mut h = harness(None, Some("abc123"), None, true);
        let token = h
            .authorizer
            .obtain_access_token(&scopes(), IncludeGrantedScopes::None, "Work")
            .await;

        assert_eq!(token, None);
        assert_eq!(h.authorizer.secrets().read_secret("Work_AccessToken"), None);
        assert_port_released(&h.seen_port).await;
    }

    /// Test: an unavailable port aborts the flow before any browser launch.
    #[tokio::test]
    async fn test_port_unavailable_aborts() {
        let blocker = std::net::TcpListener::bind((DEFAULT_HOST, 0)).unwrap();
        let taken_port = blocker.local_addr().unwrap().port();

        let mut h = harness_on_port(None, Some("abc123"), None, false, taken_port);
        let token = h
            .authorizer
            .obtain_access_token(&scopes(), IncludeGrantedScopes::None, "Work")
            .await;

        assert_eq!(token, None);
        assert!(!h.opened.load(Ordering::SeqCst));
    }

    /// Test: request-line parsing accepts GET targets only.
    #[test]
    fn test_extract_request_target() {
        assert_eq!(
            extract_request_target("GET /authorize HTTP/1.1\r\nHost: x\r\n\r\n"),
            Some("/authorize")
        );
        assert_eq!(
            extract_request_target("POST /authorize HTTP/1.1\r\n\r\n"),
            None
        );
        assert_eq!(extract_request_target(""), None);
    }
}
