use std::fs::File;
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::Method;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::HttpConfig;
use crate::error::CladeTimeError;

/// Retry rules applied to every outbound request.
///
/// The default status set includes 401, 403 and 404: S3 and the NCBI API
/// have been seen returning them transiently while a new object version
/// propagates. Operators can narrow the set through the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_factor_secs: f64,
    pub retry_statuses: Vec<u16>,
    pub allowed_methods: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_factor_secs: 1.0,
            retry_statuses: vec![401, 403, 404, 429, 500, 502, 503, 504],
            allowed_methods: vec!["GET".to_string(), "POST".to_string()],
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn allows_method(&self, method: &Method) -> bool {
        self.allowed_methods
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(method.as_str()))
    }

    pub fn should_retry_status(&self, method: &Method, status: u16, attempt: u32) -> bool {
        attempt < self.max_retries
            && self.allows_method(method)
            && self.retry_statuses.contains(&status)
    }

    /// Delay before retry number `attempt + 1`: `factor * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor_secs.max(0.0);
        Duration::from_secs_f64(factor * 2f64.powi(attempt.min(16) as i32))
    }
}

/// Minimal HTTP surface the rest of the crate depends on.
pub trait HttpFetch: Send + Sync {
    fn get_text(&self, url: &str) -> Result<String, CladeTimeError>;
    fn download(&self, url: &str, destination: &Path) -> Result<u64, CladeTimeError>;
}

#[derive(Clone)]
pub struct HttpSession {
    client: Client,
    policy: RetryPolicy,
}

impl HttpSession {
    pub fn new(config: &HttpConfig) -> Result<Self, CladeTimeError> {
        Self::with_headers(config, HeaderMap::new())
    }

    /// Like [`HttpSession::new`], adding `headers` to every request.
    pub fn with_headers(config: &HttpConfig, mut headers: HeaderMap) -> Result<Self, CladeTimeError> {
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("cladetime/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CladeTimeError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| CladeTimeError::Http(err.to_string()))?;
        Ok(Self {
            client,
            policy: config.retry.clone(),
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// POSTs a JSON body and streams the response to `destination`.
    pub fn post_json_to_file(
        &self,
        url: &str,
        body: &serde_json::Value,
        accept: &'static str,
        destination: &Path,
    ) -> Result<u64, CladeTimeError> {
        let response = self.send_with_retries(Method::POST, url, || {
            self.client
                .post(url)
                .header(ACCEPT, HeaderValue::from_static(accept))
                .json(body)
        })?;
        write_response_to_file(response, destination)
    }

    fn send_with_retries<F>(
        &self,
        method: Method,
        url: &str,
        make_req: F,
    ) -> Result<Response, CladeTimeError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if self.policy.should_retry_status(&method, status, attempt) {
                        let delay = self.policy.backoff(attempt);
                        debug!(url, status, attempt, delay_ms = delay.as_millis() as u64, "retrying request");
                        thread::sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    return check_response(url, resp);
                }
                Err(err) => {
                    if attempt < self.policy.max_retries
                        && self.policy.allows_method(&method)
                        && is_retryable_error(&err)
                    {
                        let delay = self.policy.backoff(attempt);
                        warn!(url, attempt, error = %err, "request error, retrying");
                        thread::sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    error!(url, error = %err, "request failed");
                    return Err(CladeTimeError::Http(err.to_string()));
                }
            }
        }
    }
}

impl HttpFetch for HttpSession {
    fn get_text(&self, url: &str) -> Result<String, CladeTimeError> {
        let response = self.send_with_retries(Method::GET, url, || self.client.get(url))?;
        response
            .text()
            .map_err(|err| CladeTimeError::Http(err.to_string()))
    }

    fn download(&self, url: &str, destination: &Path) -> Result<u64, CladeTimeError> {
        let response = self.send_with_retries(Method::GET, url, || self.client.get(url))?;
        write_response_to_file(response, destination)
    }
}

fn check_response(url: &str, response: Response) -> Result<Response, CladeTimeError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| "request failed".to_string());
    error!(url, status, response_text = %message, "unsuccessful API request");
    Err(CladeTimeError::TransportFailure {
        url: url.to_string(),
        status,
        message,
    })
}

fn write_response_to_file(mut response: Response, destination: &Path) -> Result<u64, CladeTimeError> {
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent).map_err(|err| CladeTimeError::Filesystem(err.to_string()))?;
    }
    let mut file =
        File::create(destination).map_err(|err| CladeTimeError::Filesystem(err.to_string()))?;
    std::io::copy(&mut response, &mut file).map_err(|err| CladeTimeError::Filesystem(err.to_string()))
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
