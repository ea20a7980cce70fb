use std::time::Duration;

use anyhow::{anyhow, Context};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value;

const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Thin reqwest wrapper for the IndCloud HTTP API
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

/// Status and decoded body of a finished request
#[derive(Debug)]
pub struct ApiReply {
    pub status: StatusCode,
    pub body: Value,
}

impl ApiReply {
    /// The `data` member of a success envelope, else the whole body
    pub fn data(&self) -> &Value {
        self.body.get("data").unwrap_or(&self.body)
    }
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            http,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.url(path))
    }

    fn authorized(&self, method: Method, path: &str) -> anyhow::Result<RequestBuilder> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| anyhow!("No token set. Pass --token or set INDCLOUD_TOKEN"))?;
        Ok(self.request(method, path).bearer_auth(token))
    }

    pub async fn get(&self, path: &str) -> anyhow::Result<ApiReply> {
        send(self.authorized(Method::GET, path)?).await
    }

    pub async fn post<B: Serialize>(&self, path: &str, body: Option<&B>) -> anyhow::Result<ApiReply> {
        let mut builder = self.authorized(Method::POST, path)?;
        if let Some(body) = body {
            builder = builder.json(body);
        }
        send(builder).await
    }

    /// Unauthenticated GET that keeps non-2xx replies, for /health
    pub async fn probe(&self, path: &str) -> anyhow::Result<ApiReply> {
        let response = self
            .request(Method::GET, path)
            .send()
            .await
            .with_context(|| format!("cannot reach {}", self.base_url))?;
        let status = response.status();
        let body = response.json().await.unwrap_or(Value::Null);
        Ok(ApiReply { status, body })
    }

    /// POST with a device API key instead of a bearer token
    pub async fn post_with_api_key<B: Serialize>(&self, path: &str, key: &str, body: &B) -> anyhow::Result<ApiReply> {
        send(self.request(Method::POST, path).header("X-API-Key", key).json(body)).await
    }
}

async fn send(builder: RequestBuilder) -> anyhow::Result<ApiReply> {
    let response = builder.send().await.context("request failed")?;
    let status = response.status();
    let body = if status == StatusCode::NO_CONTENT {
        Value::Null
    } else {
        response.json().await.unwrap_or(Value::Null)
    };

    if !status.is_success() {
        return Err(anyhow!("{} ({})", error_message(&body), status));
    }
    Ok(ApiReply { status, body })
}

/// `message` of an error body, or the `error` string some replies carry
pub fn error_message(body: &Value) -> String {
    body.get("message")
        .and_then(Value::as_str)
        .or_else(|| body.get("error").and_then(Value::as_str))
        .unwrap_or("request failed")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trailing_slash_is_dropped() {
        let client = ApiClient::new("http://localhost:8080/", None).unwrap();
        assert_eq!(client.url("/health"), "http://localhost:8080/health");
    }

    #[test]
    fn data_unwraps_the_envelope() {
        let wrapped = ApiReply {
            status: StatusCode::OK,
            body: json!({"success": true, "data": [1, 2]}),
        };
        assert_eq!(wrapped.data(), &json!([1, 2]));

        let bare = ApiReply {
            status: StatusCode::OK,
            body: json!({"successCount": 1}),
        };
        assert_eq!(bare.data(), &json!({"successCount": 1}));
    }

    #[test]
    fn error_message_falls_back() {
        assert_eq!(
            error_message(&json!({"error": true, "message": "Invalid API key", "code": "UNAUTHORIZED"})),
            "Invalid API key"
        );
        assert_eq!(error_message(&json!({"success": false, "error": "database unavailable"})), "database unavailable");
        assert_eq!(error_message(&Value::Null), "request failed");
    }
}
