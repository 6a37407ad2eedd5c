use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::AUTHORIZATION;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use serde_json::Value;

use crate::config::Config;
use crate::error::InfshErr;
use crate::error::Result;
use crate::transport::AsyncTransport;
use crate::transport::Transport;
use crate::transport::decode_response;

/// User agent sent on API requests.
pub fn user_agent() -> String {
    format!("inferencesh-rs/{}", env!("CARGO_PKG_VERSION"))
}

fn default_headers(api_key: Option<&str>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(key) = api_key {
        let mut value = HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|_| InfshErr::Config("api key contains invalid header characters".into()))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}

fn join_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// [`Transport`] backed by `reqwest::blocking`.
///
/// Must not be used from inside an async runtime worker; wrap calls in
/// `spawn_blocking` there or use [`AsyncHttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    http: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = reqwest::blocking::Client::builder()
            .user_agent(user_agent())
            .default_headers(default_headers(config.api_key.as_deref())?);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            base_url: config.base_url.clone(),
            http: builder.build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Transport for HttpTransport {
    fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = join_url(&self.base_url, path);
        tracing::trace!("{method} {url}");
        let mut req = self.http.request(method, &url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let res = req.send()?;
        let status = res.status();
        let bytes = res.bytes()?;
        decode_response(status, &bytes)
    }
}

/// [`AsyncTransport`] backed by the async reqwest client.
#[derive(Debug, Clone)]
pub struct AsyncHttpTransport {
    base_url: String,
    http: reqwest::Client,
}

impl AsyncHttpTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent())
            .default_headers(default_headers(config.api_key.as_deref())?);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            base_url: config.base_url.clone(),
            http: builder.build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl AsyncTransport for AsyncHttpTransport {
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = join_url(&self.base_url, path);
        tracing::trace!("{method} {url}");
        let mut req = self.http.request(method, &url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let res = req.send().await?;
        let status = res.status();
        let bytes = res.bytes().await?;
        decode_response(status, &bytes)
    }
}
