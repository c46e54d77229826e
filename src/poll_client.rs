//! Blocking HTTP client for the content server, with adaptive polling and
//! exponential backoff on error, plus the configured fallback policy for
//! when the server can't be reached at all.

use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::content::{AuthConfig, AuthType, ContentResponse};
use crate::error::ClientError;
use crate::limits::{ClientBackoff, ContentLimits};

pub struct ContentClient {
    endpoint: String,
    auth: AuthConfig,
    http: reqwest::blocking::Client,
    backoff: ClientBackoff,
    content_limits: ContentLimits,

    last_poll_time: Option<Instant>,
    current_interval_ms: u32,
    consecutive_errors: u32,
}

impl ContentClient {
    pub fn new(
        endpoint: String,
        auth: AuthConfig,
        backoff: ClientBackoff,
        content_limits: ContentLimits,
    ) -> Self {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(backoff.timeout_secs))
            .user_agent(concat!("flipdot-driver/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("reqwest client builds with static config");

        Self {
            endpoint,
            auth,
            http,
            backoff,
            content_limits,
            last_poll_time: None,
            current_interval_ms: 30_000,
            consecutive_errors: 0,
        }
    }

    fn apply_auth(&self, builder: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match self.auth.auth_type {
            AuthType::Bearer => {
                if let Some(token) = &self.auth.token {
                    return builder.bearer_auth(token);
                }
                builder
            }
            AuthType::ApiKey => {
                if let Some(key) = &self.auth.key {
                    return builder.header(self.auth.header_name.as_str(), key);
                }
                builder
            }
        }
    }

    /// Poll the server once. Stamps `last_poll_time` *before* issuing the
    /// request so backoff still advances even if the request hangs past
    /// its timeout.
    pub fn fetch(&mut self) -> Option<ContentResponse> {
        self.last_poll_time = Some(Instant::now());

        match self.fetch_inner() {
            Ok(response) => {
                self.current_interval_ms = response.poll_interval_ms;
                self.consecutive_errors = 0;
                info!(
                    "fetched content (status={:?}), next poll in {}ms",
                    response.status, self.current_interval_ms
                );
                Some(response)
            }
            Err(e) => {
                self.consecutive_errors += 1;
                match &e {
                    ClientError::Authentication { status } => {
                        error!("authentication failed ({status})");
                    }
                    ClientError::HttpStatus { status } => {
                        error!("http error {status}");
                    }
                    ClientError::Request(err) => {
                        error!("network error: {err}");
                    }
                    ClientError::InvalidResponse(msg) => {
                        error!("invalid response: {msg}");
                    }
                    ClientError::Content(err) => {
                        error!("content rejected: {err}");
                    }
                }
                None
            }
        }
    }

    fn fetch_inner(&self) -> Result<ContentResponse, ClientError> {
        debug!("fetching content from {}", self.endpoint);
        let builder = self
            .http
            .get(&self.endpoint)
            .header("Content-Type", "application/json");
        let builder = self.apply_auth(builder);

        let response = builder.send()?;
        let status = response.status();

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ClientError::Authentication {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(ClientError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let content_response: ContentResponse = response.json()?;
        content_response
            .validate()
            .map_err(ClientError::Content)?;
        if let Some(content) = &content_response.content {
            content
                .validate(&self.content_limits)
                .map_err(ClientError::Content)?;
        }
        Ok(content_response)
    }

    fn effective_interval_ms(&self) -> u64 {
        if self.consecutive_errors == 0 {
            return self.current_interval_ms as u64;
        }
        let backoff = self.backoff.initial_backoff_ms as f64
            * self
                .backoff
                .backoff_multiplier
                .powi(self.consecutive_errors as i32 - 1);
        let backoff = backoff.min(self.backoff.max_backoff_ms as f64) as u64;
        backoff.max(self.current_interval_ms as u64)
    }

    pub fn should_poll(&self) -> bool {
        match self.last_poll_time {
            None => true,
            Some(last) => last.elapsed().as_millis() as u64 >= self.effective_interval_ms(),
        }
    }

    pub fn next_delay_ms(&self) -> u64 {
        match self.last_poll_time {
            None => 0,
            Some(last) => {
                let elapsed = last.elapsed().as_millis() as u64;
                self.effective_interval_ms().saturating_sub(elapsed)
            }
        }
    }

    /// Force the next tick to poll immediately, e.g. after a push delivers
    /// fresh content so we don't poll redundantly a moment later.
    pub fn reset_poll_timer(&mut self) {
        self.last_poll_time = Some(Instant::now());
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }
}

/// Synthesizes a fallback `ContentResponse` when a poll fails outright.
pub struct ErrorHandler {
    fallback: crate::content::ErrorFallback,
    last_successful: Option<ContentResponse>,
}

impl ErrorHandler {
    pub fn new(fallback: crate::content::ErrorFallback) -> Self {
        Self {
            fallback,
            last_successful: None,
        }
    }

    pub fn set_last_successful(&mut self, response: &ContentResponse) {
        if response.content.is_some() {
            self.last_successful = Some(response.clone());
        }
    }

    pub fn fallback_response(&self) -> Option<ContentResponse> {
        use crate::content::ErrorFallback::*;
        match self.fallback {
            KeepLast => match &self.last_successful {
                Some(r) => {
                    info!("using last successful content as fallback");
                    Some(r.clone())
                }
                None => {
                    warn!("no previous content available for fallback");
                    None
                }
            },
            Blank => {
                info!("fallback: clearing display");
                Some(ContentResponse::clear(30_000))
            }
            ErrorMessage => {
                info!("fallback: shortened retry interval");
                Some(ContentResponse::clear(10_000))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_interval_ignores_backoff_without_errors() {
        let client = ContentClient::new(
            "http://example.invalid".into(),
            AuthConfig::default(),
            ClientBackoff::default(),
            ContentLimits::default(),
        );
        assert_eq!(client.effective_interval_ms(), 30_000);
    }

    #[test]
    fn effective_interval_grows_and_caps_with_errors() {
        let mut client = ContentClient::new(
            "http://example.invalid".into(),
            AuthConfig::default(),
            ClientBackoff::default(),
            ContentLimits::default(),
        );
        client.consecutive_errors = 1;
        assert_eq!(client.effective_interval_ms(), 30_000); // max(30000, 1000)
        client.consecutive_errors = 10;
        assert_eq!(client.effective_interval_ms(), 300_000); // capped at 5 min
    }

    #[test]
    fn should_poll_true_before_first_poll() {
        let client = ContentClient::new(
            "http://example.invalid".into(),
            AuthConfig::default(),
            ClientBackoff::default(),
            ContentLimits::default(),
        );
        assert!(client.should_poll());
    }

    #[test]
    fn error_handler_keep_last_returns_none_when_nothing_seen() {
        let handler = ErrorHandler::new(crate::content::ErrorFallback::KeepLast);
        assert!(handler.fallback_response().is_none());
    }

    #[test]
    fn error_handler_blank_synthesizes_clear() {
        let handler = ErrorHandler::new(crate::content::ErrorFallback::Blank);
        let r = handler.fallback_response().unwrap();
        assert_eq!(r.status, crate::content::ResponseStatus::Clear);
    }

    #[test]
    fn error_handler_error_message_uses_shorter_interval() {
        let handler = ErrorHandler::new(crate::content::ErrorFallback::ErrorMessage);
        let r = handler.fallback_response().unwrap();
        assert_eq!(r.poll_interval_ms, 10_000);
    }
}
