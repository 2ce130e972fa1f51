//! Common utilities for the Grafana API client
//!
//! Wraps `reqwest` with authentication and maps Grafana status codes onto
//! [`GrafanaError`] variants in one place.

use crate::error::GrafanaError;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

/// HTTP client wrapper with basic authentication
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String, username: String, password: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            password,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
    }

    /// Make a GET request
    pub async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, GrafanaError> {
        let url = self.build_url(path);
        debug!("GET {}", url);

        let response = self.authorized(self.client.get(&url)).send().await?;
        Self::decode(path, response).await
    }

    /// Make a POST request with a JSON body
    pub async fn post<B: serde::Serialize + ?Sized, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GrafanaError> {
        let url = self.build_url(path);
        debug!("POST {}", url);

        let response = self
            .authorized(self.client.post(&url))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;
        Self::decode(path, response).await
    }

    /// Make a DELETE request
    pub async fn delete<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, GrafanaError> {
        let url = self.build_url(path);
        debug!("DELETE {}", url);

        let response = self.authorized(self.client.delete(&url)).send().await?;
        Self::decode(path, response).await
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        path: &str,
        response: Response,
    ) -> Result<T, GrafanaError> {
        let status = response.status();
        if status.is_success() {
            let body = response.text().await?;
            return serde_json::from_str(&body).map_err(GrafanaError::Serialization);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify(status, path, body))
    }
}

/// Map a non-success status onto an error variant
pub fn classify(status: StatusCode, path: &str, body: String) -> GrafanaError {
    match status {
        StatusCode::NOT_FOUND => GrafanaError::NotFound(format!("{} - {}", path, body)),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
            GrafanaError::Conflict(format!("{} - {}", path, body))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            GrafanaError::Authentication(format!("{} {} - {}", status, path, body))
        }
        _ => GrafanaError::Api {
            status: status.as_u16(),
            message: format!("{} - {}", path, body),
        },
    }
}
