use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// REST client for the platform API. Every call carries the same
/// `Authorization` header derived from the configured token.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    authorization: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, authorization: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            authorization: authorization.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Calls that get no answer within `timeout` fail with a transport error.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn authorization(&self) -> &str {
        &self.authorization
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Authorization", &self.authorization)
            .timeout(self.timeout)
    }

    /// `GET <base>/<path>?<params>`. Returns `None` when the body is empty.
    pub async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<Option<Value>> {
        let builder = self.client.get(self.url(path)).query(params);
        let resp = self.apply_auth(builder).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        check_response(status, &body)
    }

    /// `POST <base>/<path>` with a JSON body. Returns `None` when the body is empty.
    pub async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Option<Value>> {
        let builder = self.client.post(self.url(path)).json(body);
        let resp = self.apply_auth(builder).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        check_response(status, &text)
    }
}

/// Decode a response body. A non-zero `code` field is a platform error;
/// a non-2xx status without one is reported with the status as the code.
pub(crate) fn check_response(status: StatusCode, body: &str) -> Result<Option<Value>> {
    if body.trim().is_empty() {
        if status.is_success() {
            return Ok(None);
        }
        return Err(Error::remote(status.as_u16().into(), status.to_string()));
    }

    let data: Value = match serde_json::from_str(body) {
        Ok(data) => data,
        Err(e) if status.is_success() => return Err(Error::Decode(e)),
        Err(_) => return Err(Error::remote(status.as_u16().into(), body)),
    };

    if let Some(code) = data.get("code").and_then(Value::as_i64) {
        if code != 0 {
            let message = data
                .get("message")
                .or_else(|| data.get("msg"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(Error::Remote { code, message });
        }
    }

    if !status.is_success() {
        return Err(Error::remote(status.as_u16().into(), body));
    }

    Ok(Some(data))
}
