//! HTTP API client with a shared default `Authorization` header.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use adhders_shared::ApiError;
use reqwest::{header, Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ClientConfig;

/// HTTP client for the adhders backend.
///
/// Clones share the same connection pool and the same default bearer token, so
/// updating the token through any clone affects every request sent afterwards.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    bearer: Arc<RwLock<Option<String>>>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        tracing::info!("API base URL: {}/api", base_url);

        Ok(Self {
            client,
            base_url,
            bearer: Arc::new(RwLock::new(None)),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        Self::new(config.base_url.clone(), config.request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Set or clear the default bearer token attached to every request.
    pub fn set_bearer(&self, token: Option<&str>) {
        if let Ok(mut bearer) = self.bearer.write() {
            *bearer = token.map(str::to_string);
        }
    }

    /// The `Authorization` header value currently attached to requests.
    pub fn default_authorization(&self) -> Option<String> {
        self.bearer
            .read()
            .ok()
            .and_then(|b| b.as_ref().map(|t| format!("Bearer {t}")))
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let path = path.trim_start_matches('/');
        format!("{}/{path}", self.base_url)
    }

    /// Construct the WebSocket URL for a backend path (http→ws, https→wss).
    pub fn ws_url(&self, path: &str) -> String {
        let url = self.url(path);
        if let Some(rest) = url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            url
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut rb = self.client.request(method, self.url(path));
        if let Some(auth) = self.default_authorization() {
            rb = rb.header(header::AUTHORIZATION, auth);
        }
        rb
    }

    /// Send a request, returning the raw body of a successful response.
    async fn send(&self, rb: RequestBuilder) -> Result<String, ApiError> {
        let resp = rb.send().await.map_err(transport_error)?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();

        let text = resp.text().await.map_err(transport_error)?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }

        Ok(text)
    }

    fn decode<TRes: DeserializeOwned>(text: &str) -> Result<TRes, ApiError> {
        if text.is_empty() {
            serde_json::from_str("null").map_err(|e| ApiError::Deserialize(e.to_string()))
        } else {
            serde_json::from_str(text).map_err(|e| ApiError::Deserialize(e.to_string()))
        }
    }

    /// GET request
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let text = self.send(self.request(Method::GET, path)).await?;
        Self::decode(&text)
    }

    /// GET request authorized with an explicit token instead of the default one
    pub async fn get_json_with_token<TRes: DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
    ) -> Result<TRes, ApiError> {
        let rb = self
            .client
            .get(self.url(path))
            .header(header::AUTHORIZATION, format!("Bearer {token}"));
        let text = self.send(rb).await?;
        Self::decode(&text)
    }

    /// GET request with query parameters
    pub async fn get_json_with_query<TRes: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<TRes, ApiError> {
        let text = self.send(self.request(Method::GET, path).query(query)).await?;
        Self::decode(&text)
    }

    /// POST request with JSON body
    pub async fn post_json<TReq: Serialize + ?Sized, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let text = self.send(self.request(Method::POST, path).json(body)).await?;
        Self::decode(&text)
    }

    /// POST request without a body
    pub async fn post_empty<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let text = self.send(self.request(Method::POST, path)).await?;
        Self::decode(&text)
    }

    /// PUT request with JSON body
    pub async fn put_json<TReq: Serialize + ?Sized, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let text = self.send(self.request(Method::PUT, path).json(body)).await?;
        Self::decode(&text)
    }

    /// PATCH request with JSON body
    pub async fn patch_json<TReq: Serialize + ?Sized, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let text = self.send(self.request(Method::PATCH, path).json(body)).await?;
        Self::decode(&text)
    }

    /// DELETE request
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send(self.request(Method::DELETE, path)).await?;
        Ok(())
    }

    /// POST a multipart form. The form sets its own `Content-Type` boundary.
    pub async fn post_multipart<TRes: DeserializeOwned>(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<TRes, ApiError> {
        let text = self.send(self.request(Method::POST, path).multipart(form)).await?;
        Self::decode(&text)
    }
}

fn transport_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else if e.is_decode() {
        ApiError::Deserialize(e.to_string())
    } else {
        ApiError::Network(e.to_string())
    }
}
