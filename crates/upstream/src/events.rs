//! Domain event sinks.

use std::time::Duration;

use async_trait::async_trait;
use lifecycle::{DomainEventSink, EmitError, LifecycleSignal};
use reqwest::{Client, Url};
use serde::Serialize;
use tracing::{debug, info};

use crate::{parse_base, BuildError};

#[derive(Debug, Serialize)]
struct EventBody<'a> {
    name: &'a str,
    payload: serde_json::Value,
}

fn event_body<'a>(name: &'a str, signal: &LifecycleSignal) -> EventBody<'a> {
    EventBody {
        name,
        payload: signal.payload(),
    }
}

/// Forwards each domain event as `POST {url}` with body `{"name", "payload"}`.
///
/// Any non-2xx answer is an [`EmitError`]; the reconciler reports it as
/// retryable.
#[derive(Debug, Clone)]
pub struct HttpEventForwarder {
    client: Client,
    url: Url,
    access_token: Option<String>,
}

impl HttpEventForwarder {
    /// Creates a forwarder targeting `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is invalid or the HTTP client cannot be built.
    pub fn new(
        url: &str,
        access_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, BuildError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            url: parse_base(url)?,
            access_token,
        })
    }
}

#[async_trait]
impl DomainEventSink for HttpEventForwarder {
    async fn emit(&self, signal: &LifecycleSignal) -> Result<(), EmitError> {
        let name = signal.name();
        let fail = |message: String| EmitError {
            signal_name: name.clone(),
            message,
        };

        let mut req = self
            .client
            .post(self.url.clone())
            .json(&event_body(&name, signal));
        if let Some(token) = &self.access_token {
            req = req.bearer_auth(token);
        }
        let response = req.send().await.map_err(|e| fail(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(fail(format!("status {status}: {body}")));
        }
        debug!(signal = %name, "domain event forwarded");
        Ok(())
    }
}

/// Writes each domain event to the log and nothing else.
///
/// Used when no forwarding URL is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventSink;

#[async_trait]
impl DomainEventSink for LogEventSink {
    async fn emit(&self, signal: &LifecycleSignal) -> Result<(), EmitError> {
        info!(
            signal = %signal.name(),
            payload = %signal.payload(),
            "domain event"
        );
        Ok(())
    }
}
