//! Bot API transport: one call, retried with exponential backoff.
//!
//! Failure classes:
//! - connection errors, timeouts and non-2xx statuses are transient and
//!   retried up to the attempt budget, then surface as
//!   [`Error::TransportExhausted`];
//! - an `ok: false` envelope is a logical refusal (bad parameters, revoked
//!   token, missing rights) and surfaces at once as [`Error::RemoteRejected`].

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::time::sleep;

use tgb_core::{
    admission::AdmissionControl, config::Config, config::DEFAULT_API_URL,
    config::DEFAULT_FILE_URL, errors::Error, logging::mask_token, Result,
};

pub const DEFAULT_ATTEMPTS: u32 = 3;

// ============== Wire types ==============

/// Parameters of one API call. Setting an absent optional leaves the key out
/// of the payload entirely.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, serde_json::Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn set_opt<T: Into<serde_json::Value>>(self, key: &str, value: Option<T>) -> Self {
        match value {
            Some(v) => self.set(key, v),
            None => self,
        }
    }

    /// Overlay raw parameters; later keys win.
    pub fn merge(mut self, extra: &BTreeMap<String, serde_json::Value>) -> Self {
        for (k, v) in extra {
            self.0.insert(k.clone(), v.clone());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

/// A fully shaped call: method name plus parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct EndpointCall {
    pub method: String,
    pub params: Params,
}

impl EndpointCall {
    pub fn new(method: impl Into<String>, params: Params) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Bot API response envelope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<ResponseParameters>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrate_to_chat_id: Option<i64>,
}

impl ApiResponse {
    /// Decode `result` into a typed value.
    pub fn result_as<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self.result.clone().unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(value)?)
    }

    fn retry_after(&self) -> Option<Duration> {
        self.parameters
            .as_ref()
            .and_then(|p| p.retry_after)
            .map(Duration::from_secs)
    }
}

// ============== HTTP seam ==============

/// Raw HTTP reply: status code and body bytes.
#[derive(Clone, Debug)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one HTTP request. `Err` means the request never produced a status
/// (connect error, timeout, reset).
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn post_json(&self, url: &str, body: &Params, timeout: Duration) -> Result<HttpReply>;

    async fn get_bytes(&self, url: &str, timeout: Duration) -> Result<HttpReply>;
}

/// `reqwest`-backed sender with a shared connection pool.
#[derive(Clone, Debug)]
pub struct ReqwestSender {
    http: reqwest::Client,
}

impl ReqwestSender {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::External(format!("http client build failed: {e}")))?;
        Ok(Self { http })
    }

    async fn finish(resp: reqwest::Response) -> Result<HttpReply> {
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(describe_reqwest_error)?;
        Ok(HttpReply {
            status,
            body: body.to_vec(),
        })
    }
}

#[async_trait]
impl HttpSender for ReqwestSender {
    async fn post_json(&self, url: &str, body: &Params, timeout: Duration) -> Result<HttpReply> {
        let resp = self
            .http
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(describe_reqwest_error)?;
        Self::finish(resp).await
    }

    async fn get_bytes(&self, url: &str, timeout: Duration) -> Result<HttpReply> {
        let resp = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(describe_reqwest_error)?;
        Self::finish(resp).await
    }
}

/// reqwest's `Display` includes the request URL, which carries the token.
fn describe_reqwest_error(e: reqwest::Error) -> Error {
    let kind = if e.is_timeout() {
        "timed out"
    } else if e.is_connect() {
        "connection failed"
    } else if e.is_body() || e.is_decode() {
        "body read failed"
    } else {
        "request failed"
    };
    let detail = std::error::Error::source(&e)
        .map(|s| format!(": {s}"))
        .unwrap_or_default();
    Error::External(format!("{kind}{detail}"))
}

// ============== Client ==============

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL the token and method are appended to.
    pub api_url: String,
    pub file_url: String,
    pub http_timeout: Duration,
    pub retry_attempts: u32,
    /// Backoff after attempt `n` is `backoff_unit * 2^(n-1)`.
    pub backoff_unit: Duration,
    pub log_requests: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            file_url: DEFAULT_FILE_URL.to_string(),
            http_timeout: Duration::from_secs(5),
            retry_attempts: DEFAULT_ATTEMPTS,
            backoff_unit: Duration::from_secs(1),
            log_requests: true,
        }
    }
}

impl ClientConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            api_url: cfg.api_url.clone(),
            file_url: cfg.file_url.clone(),
            http_timeout: cfg.http_timeout,
            retry_attempts: cfg.retry_attempts,
            backoff_unit: cfg.backoff_unit,
            log_requests: cfg.log_requests,
        }
    }
}

enum AttemptError {
    Transient {
        error: String,
        retry_after: Option<Duration>,
    },
    Rejected(ApiResponse),
}

/// Bot API client. Owns the credential and the HTTP sender.
#[derive(Clone)]
pub struct BotClient {
    token: String,
    cfg: ClientConfig,
    http: Arc<dyn HttpSender>,
    bot_admission: Option<Arc<AdmissionControl>>,
}

impl std::fmt::Debug for BotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotClient")
            .field("token", &mask_token(&self.token))
            .field("cfg", &self.cfg)
            .field("bot_admission", &self.bot_admission)
            .finish()
    }
}

impl BotClient {
    /// Client over a fresh `reqwest` connection pool.
    pub fn new(token: impl Into<String>, cfg: ClientConfig) -> Result<Self> {
        Ok(Self::with_sender(token, cfg, Arc::new(ReqwestSender::new()?)))
    }

    pub fn with_sender(
        token: impl Into<String>,
        cfg: ClientConfig,
        http: Arc<dyn HttpSender>,
    ) -> Self {
        Self {
            token: token.into(),
            cfg,
            http,
            bot_admission: None,
        }
    }

    /// Gate outbound `sendMessage` calls through a bot-scope limiter.
    pub fn with_bot_admission(mut self, admission: Arc<AdmissionControl>) -> Self {
        self.bot_admission = Some(admission);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.cfg
    }

    /// Same config and sender, different credential.
    pub fn for_token(&self, token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            cfg: self.cfg.clone(),
            http: self.http.clone(),
            bot_admission: self.bot_admission.clone(),
        }
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }

    pub(crate) fn http(&self) -> &Arc<dyn HttpSender> {
        &self.http
    }

    pub(crate) async fn admit_outbound(&self) -> Result<()> {
        let Some(admission) = &self.bot_admission else {
            return Ok(());
        };
        if admission.allow_bot(&self.token).await {
            return Ok(());
        }
        Err(Error::RateLimited {
            scope: admission.scope().as_str().to_string(),
        })
    }

    /// `<api_url><token>/<method>`; the default base ends in `/bot`.
    fn method_url(&self, method: &str) -> String {
        format!("{}{}/{}", self.cfg.api_url, self.token, method)
    }

    fn redact(&self, s: &str) -> String {
        if self.token.is_empty() {
            return s.to_string();
        }
        s.replace(&self.token, "<token>")
    }

    /// Send one API call, retrying transient failures up to `max_attempts`
    /// (at least one attempt is always made).
    pub async fn call(&self, method: &str, params: Params, max_attempts: u32) -> Result<ApiResponse> {
        self.execute(
            &EndpointCall::new(method, params),
            max_attempts,
            self.cfg.http_timeout,
        )
        .await
    }

    /// [`BotClient::call`] with the configured attempt budget.
    pub async fn call_default(&self, method: &str, params: Params) -> Result<ApiResponse> {
        self.call(method, params, self.cfg.retry_attempts).await
    }

    pub(crate) async fn execute(
        &self,
        call: &EndpointCall,
        max_attempts: u32,
        timeout: Duration,
    ) -> Result<ApiResponse> {
        if self.token.trim().is_empty() {
            return Err(Error::Config("bot token is not set".to_string()));
        }

        let url = self.method_url(&call.method);
        let attempts = max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if self.cfg.log_requests {
                tracing::debug!(
                    method = %call.method,
                    params = ?call.params.keys(),
                    attempt,
                    "bot api call"
                );
            }

            let (error, retry_after) = match self.attempt(&url, call, timeout).await {
                Ok(resp) => return Ok(resp),
                Err(AttemptError::Rejected(resp)) => {
                    let description = resp
                        .description
                        .unwrap_or_else(|| "unknown error".to_string());
                    tracing::warn!(
                        method = %call.method,
                        attempt,
                        code = ?resp.error_code,
                        error = %description,
                        "bot api rejected call"
                    );
                    return Err(Error::RemoteRejected {
                        method: call.method.clone(),
                        code: resp.error_code,
                        description,
                    });
                }
                Err(AttemptError::Transient { error, retry_after }) => (error, retry_after),
            };

            if self.cfg.log_requests {
                tracing::warn!(
                    method = %call.method,
                    params = ?call.params.keys(),
                    attempt,
                    max_attempts = attempts,
                    error = %error,
                    "bot api call failed"
                );
            }
            last_error = error;

            if attempt < attempts {
                let backoff = self.cfg.backoff_unit * 2u32.saturating_pow(attempt - 1);
                // Flood control hints win when they ask for a longer pause.
                let wait = retry_after.map_or(backoff, |ra| ra.max(backoff));
                sleep(wait).await;
            }
        }

        Err(Error::TransportExhausted {
            method: call.method.clone(),
            attempts,
            last_error,
        })
    }

    async fn attempt(
        &self,
        url: &str,
        call: &EndpointCall,
        timeout: Duration,
    ) -> std::result::Result<ApiResponse, AttemptError> {
        let reply = self
            .http
            .post_json(url, &call.params, timeout)
            .await
            .map_err(|e| AttemptError::Transient {
                error: self.redact(&e.to_string()),
                retry_after: None,
            })?;

        let envelope = serde_json::from_slice::<ApiResponse>(&reply.body).ok();

        if reply.is_success() {
            return match envelope {
                Some(resp) if resp.ok => Ok(resp),
                Some(resp) => Err(AttemptError::Rejected(resp)),
                None => Err(AttemptError::Transient {
                    error: format!("HTTP {}: undecodable response body", reply.status),
                    retry_after: None,
                }),
            };
        }

        // Telegram answers 4xx with a proper envelope for logical refusals.
        // 429 and 5xx stay transient.
        match envelope {
            Some(resp) if !resp.ok && (400..500).contains(&reply.status) && reply.status != 429 => {
                Err(AttemptError::Rejected(resp))
            }
            envelope => {
                let retry_after = envelope.as_ref().and_then(ApiResponse::retry_after);
                let detail = envelope
                    .and_then(|r| r.description)
                    .unwrap_or_else(|| {
                        String::from_utf8_lossy(&reply.body)
                            .chars()
                            .take(200)
                            .collect()
                    });
                Err(AttemptError::Transient {
                    error: self.redact(&format!("HTTP {}: {detail}", reply.status)),
                    retry_after,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeSender;
    use tokio::time::Instant;

    fn client(sender: Arc<FakeSender>) -> BotClient {
        BotClient::with_sender("123:secret", ClientConfig::default(), sender)
    }

    #[test]
    fn builds_method_url_from_base_token_and_method() {
        let c = client(FakeSender::new());
        assert_eq!(
            c.method_url("sendMessage"),
            "https://api.telegram.org/bot123:secret/sendMessage"
        );

        let mut cfg = ClientConfig::default();
        cfg.api_url = "http://localhost:8081/custom/".to_string();
        let c = BotClient::with_sender("t", cfg, FakeSender::new());
        assert_eq!(c.method_url("getMe"), "http://localhost:8081/custom/t/getMe");
    }

    #[test]
    fn absent_optionals_are_omitted() {
        let p = Params::new()
            .set("chat_id", 1)
            .set_opt::<String>("caption", None)
            .set_opt("text", Some("x"));
        assert!(!p.contains("caption"));
        assert_eq!(
            serde_json::to_string(&p).unwrap(),
            r#"{"chat_id":1,"text":"x"}"#
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transport_failures_with_exponential_backoff() {
        let sender = FakeSender::new();
        sender.push_err("getMe", "connection reset");
        sender.push_status("getMe", 502, "Bad Gateway");
        sender.push_ok("getMe", serde_json::json!({"id": 1, "is_bot": true}));
        let c = client(sender.clone());

        let start = Instant::now();
        let resp = c.call("getMe", Params::new(), 3).await.unwrap();

        assert!(resp.ok);
        assert_eq!(resp.result.unwrap()["id"], 1);
        assert_eq!(sender.calls_to("getMe").len(), 3);
        // 1s after attempt 1, 2s after attempt 2.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        let gaps = sender.gaps("getMe");
        assert_eq!(gaps, vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn logical_rejection_is_not_retried() {
        let sender = FakeSender::new();
        sender.push_json(
            "sendMessage",
            200,
            r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#,
        );
        let c = client(sender.clone());

        let err = c.call("sendMessage", Params::new(), 3).await.unwrap_err();
        match err {
            Error::RemoteRejected {
                method,
                code,
                description,
            } => {
                assert_eq!(method, "sendMessage");
                assert_eq!(code, Some(400));
                assert_eq!(description, "Bad Request: chat not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(sender.calls_to("sendMessage").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn http_400_envelope_is_a_rejection() {
        let sender = FakeSender::new();
        sender.push_json(
            "sendMessage",
            400,
            r#"{"ok":false,"error_code":400,"description":"Bad Request: message text is empty"}"#,
        );
        let c = client(sender.clone());

        let err = c.call("sendMessage", Params::new(), 3).await.unwrap_err();
        assert!(matches!(err, Error::RemoteRejected { code: Some(400), .. }));
        assert_eq!(sender.calls_to("sendMessage").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_attempts_and_reports_last_error() {
        let sender = FakeSender::new();
        for _ in 0..3 {
            sender.push_status("getMe", 500, "Internal Server Error");
        }
        let c = client(sender.clone());

        let err = c.call("getMe", Params::new(), 3).await.unwrap_err();
        match err {
            Error::TransportExhausted {
                method,
                attempts,
                last_error,
            } => {
                assert_eq!(method, "getMe");
                assert_eq!(attempts, 3);
                assert!(last_error.contains("HTTP 500"), "{last_error}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(sender.calls_to("getMe").len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn flood_control_retry_after_extends_backoff() {
        let sender = FakeSender::new();
        sender.push_json(
            "sendMessage",
            429,
            r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 4","parameters":{"retry_after":4}}"#,
        );
        sender.push_ok("sendMessage", serde_json::json!({"message_id": 1}));
        let c = client(sender.clone());

        c.call("sendMessage", Params::new(), 2).await.unwrap();
        assert_eq!(sender.gaps("sendMessage"), vec![Duration::from_secs(4)]);
    }

    #[tokio::test]
    async fn missing_token_fails_without_http() {
        let sender = FakeSender::new();
        let c = BotClient::with_sender("  ", ClientConfig::default(), sender.clone());
        let err = c.call("getMe", Params::new(), 3).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(sender.calls().is_empty());
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let sender = FakeSender::new();
        sender.push_err("getMe", "boom");
        let c = client(sender.clone());
        let err = c.call("getMe", Params::new(), 0).await.unwrap_err();
        assert!(matches!(err, Error::TransportExhausted { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn errors_never_echo_the_token() {
        let sender = FakeSender::new();
        sender.push_err("getMe", "failed to reach https://api.telegram.org/bot123:secret/getMe");
        let c = client(sender);
        let err = c.call("getMe", Params::new(), 1).await.unwrap_err();
        assert!(!err.to_string().contains("123:secret"), "{err}");
    }

    #[test]
    fn debug_masks_token() {
        let c = BotClient::with_sender(
            "123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw",
            ClientConfig::default(),
            FakeSender::new(),
        );
        assert!(!format!("{c:?}").contains("AAHdqTcv"));
    }
}
