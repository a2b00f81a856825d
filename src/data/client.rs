//! Upstream provider transport
//!
//! Every provider response is wrapped in an envelope:
//! `{meta: {message, code, status}, data: array|null}`. The transport checks
//! the API key, the HTTP status and `meta.status`, and hands back the `data`
//! array. Callers decide how failures degrade.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::error;

use crate::config::ProviderConfig;

/// Errors that can occur when talking to the provider
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// No usable API key is configured
    #[error("RajaOngkir API key not configured")]
    MissingApiKey,

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The provider answered with a non-2xx status
    #[error("provider returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The provider answered 2xx but `meta.status` was not "success"
    #[error("provider rejected request: {0}")]
    Rejected(String),

    /// `data` was neither an array nor null
    #[error("unexpected response shape: {0}")]
    Malformed(String),
}

/// Response metadata
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub status: Option<Value>,
}

impl Meta {
    /// `status` is "success"; `accept_true` also admits a boolean `true`,
    /// which only the cost endpoints send
    pub fn is_success(&self, accept_true: bool) -> bool {
        match &self.status {
            Some(Value::String(status)) => status == "success",
            Some(Value::Bool(ok)) => accept_true && *ok,
            _ => false,
        }
    }

    fn describe(&self) -> String {
        let message = self.message.clone().unwrap_or_else(|| "no message".to_string());
        match &self.code {
            Some(code) => format!("{message} ({code})"),
            None => message,
        }
    }
}

/// Response envelope shared by every provider endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub meta: Option<Meta>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl Envelope {
    /// Validates `meta.status` and extracts the `data` array
    ///
    /// A null or absent `data` means "no results" and yields an empty list.
    pub fn into_data(self) -> Result<Vec<Value>, UpstreamError> {
        self.extract(false)
    }

    /// Like [`Envelope::into_data`], also accepting `status: true`
    pub fn into_cost_data(self) -> Result<Vec<Value>, UpstreamError> {
        self.extract(true)
    }

    fn extract(self, accept_true: bool) -> Result<Vec<Value>, UpstreamError> {
        let meta = self.meta.unwrap_or_default();
        if !meta.is_success(accept_true) {
            return Err(UpstreamError::Rejected(meta.describe()));
        }
        match self.data {
            Some(Value::Array(items)) => Ok(items),
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(other) => Err(UpstreamError::Malformed(format!(
                "expected data array, got {}",
                short_kind(&other)
            ))),
        }
    }
}

fn short_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Sends requests to the provider and returns the envelope's `data` array
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `path` with query parameters
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Vec<Value>, UpstreamError>;

    /// POST `path` with a form-encoded body
    async fn post_form(&self, path: &str, form: &[(String, String)]) -> Result<Vec<Value>, UpstreamError>;
}

/// reqwest-backed transport for the RajaOngkir (Komerce) API
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    config: ProviderConfig,
    warned_missing_key: AtomicBool,
}

impl HttpTransport {
    pub fn new(config: ProviderConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    /// Creates a transport with a custom HTTP client
    pub fn with_client(client: Client, config: ProviderConfig) -> Self {
        Self {
            client,
            config,
            warned_missing_key: AtomicBool::new(false),
        }
    }

    /// Returns the API key, logging its absence only once
    fn api_key(&self) -> Result<&str, UpstreamError> {
        match self.config.usable_api_key() {
            Some(key) => Ok(key),
            None => {
                if !self.warned_missing_key.swap(true, Ordering::Relaxed) {
                    error!("RajaOngkir API key not configured; lookups will return no data");
                }
                Err(UpstreamError::MissingApiKey)
            }
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn read_envelope(response: Response, accept_true: bool) -> Result<Vec<Value>, UpstreamError> {
        let status = response.status();
        if !status.is_success() {
            // The body usually carries meta.message; fall back to the reason phrase.
            let message = match response.json::<Envelope>().await {
                Ok(Envelope { meta: Some(meta), .. }) if meta.message.is_some() => meta.describe(),
                _ => status.canonical_reason().unwrap_or("unknown error").to_string(),
            };
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response.json::<Envelope>().await?.extract(accept_true)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Vec<Value>, UpstreamError> {
        let key = self.api_key()?;
        let response = self
            .client
            .get(self.url(path))
            .header("key", key)
            .bearer_auth(key)
            .query(query)
            .send()
            .await?;
        Self::read_envelope(response, false).await
    }

    async fn post_form(&self, path: &str, form: &[(String, String)]) -> Result<Vec<Value>, UpstreamError> {
        let key = self.api_key()?;
        let response = self
            .client
            .post(self.url(path))
            .header("key", key)
            .bearer_auth(key)
            .form(form)
            .send()
            .await?;
        Self::read_envelope(response, true).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-process transport for client tests

    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use super::*;

    /// Replies with canned `data` arrays keyed by path and counts every call
    #[derive(Default)]
    pub struct ScriptedTransport {
        replies: Mutex<HashMap<String, Result<Vec<Value>, String>>>,
        calls: Mutex<Vec<(String, Vec<(String, String)>)>>,
        count: AtomicUsize,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply(&self, path: &str, data: Value) {
            let items = data.as_array().cloned().unwrap_or_default();
            self.replies.lock().unwrap().insert(path.to_string(), Ok(items));
        }

        pub fn fail(&self, path: &str, message: &str) {
            self.replies
                .lock()
                .unwrap()
                .insert(path.to_string(), Err(message.to_string()));
        }

        pub fn call_count(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }

        pub fn calls_to(&self, path: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|(p, _)| p == path).count()
        }

        pub fn last_params(&self) -> Option<Vec<(String, String)>> {
            self.calls.lock().unwrap().last().map(|(_, params)| params.clone())
        }

        fn answer(&self, path: &str, params: &[(String, String)]) -> Result<Vec<Value>, UpstreamError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.calls
                .lock()
                .unwrap()
                .push((path.to_string(), params.to_vec()));
            match self.replies.lock().unwrap().get(path) {
                Some(Ok(items)) => Ok(items.clone()),
                Some(Err(message)) => Err(UpstreamError::Rejected(message.clone())),
                None => Err(UpstreamError::Status {
                    status: 404,
                    message: format!("no scripted reply for {path}"),
                }),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Vec<Value>, UpstreamError> {
            self.answer(path, query)
        }

        async fn post_form(&self, path: &str, form: &[(String, String)]) -> Result<Vec<Value>, UpstreamError> {
            self.answer(path, form)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(value: Value) -> Envelope {
        serde_json::from_value(value).expect("envelope should parse")
    }

    #[test]
    fn test_success_envelope_yields_data() {
        let env = envelope(json!({
            "meta": {"message": "Success Get Provinces", "code": 200, "status": "success"},
            "data": [{"id": 1, "name": "Bali"}]
        }));

        let data = env.into_data().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["name"], "Bali");
    }

    #[test]
    fn test_boolean_true_status_only_accepted_for_costs() {
        let cost = envelope(json!({"meta": {"status": true}, "data": [{"code": "jne"}]}));
        assert_eq!(cost.into_cost_data().unwrap().len(), 1);

        let geo = envelope(json!({"meta": {"status": true}, "data": []}));
        assert!(matches!(geo.into_data(), Err(UpstreamError::Rejected(_))));

        let refused = envelope(json!({"meta": {"status": false}, "data": []}));
        assert!(refused.into_cost_data().is_err());
    }

    #[test]
    fn test_error_status_is_rejected_with_message() {
        let env = envelope(json!({
            "meta": {"message": "Invalid Api key", "code": 401, "status": "error"},
            "data": null
        }));

        let err = env.into_data().unwrap_err();
        assert!(matches!(err, UpstreamError::Rejected(_)));
        assert!(err.to_string().contains("Invalid Api key"));
    }

    #[test]
    fn test_null_data_is_empty() {
        let env = envelope(json!({"meta": {"status": "success"}, "data": null}));
        assert!(env.into_data().unwrap().is_empty());
    }

    #[test]
    fn test_object_data_is_malformed() {
        let env = envelope(json!({"meta": {"status": "success"}, "data": {"id": 1}}));
        assert!(matches!(env.into_data(), Err(UpstreamError::Malformed(_))));
    }

    #[test]
    fn test_missing_meta_is_rejected() {
        let env = envelope(json!({"data": []}));
        assert!(env.into_data().is_err());
    }

    #[tokio::test]
    async fn test_missing_api_key_short_circuits() {
        let transport = HttpTransport::new(ProviderConfig::default());

        let first = transport.get("/destination/province", &[]).await;
        let second = transport.post_form("/calculate/domestic-cost", &[]).await;

        assert!(matches!(first, Err(UpstreamError::MissingApiKey)));
        assert!(matches!(second, Err(UpstreamError::MissingApiKey)));
    }

    #[test]
    fn test_url_joins_base_and_path() {
        let transport = HttpTransport::new(ProviderConfig::new(
            Some("k".into()),
            Some("http://localhost:9/api/v1".into()),
        ));
        assert_eq!(
            transport.url("/destination/province"),
            "http://localhost:9/api/v1/destination/province"
        );
    }
}
