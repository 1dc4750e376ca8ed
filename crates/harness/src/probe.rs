//! The HTTP request that drives one test run.
//!
//! A [`Probe`] POSTs the test message to the scaffold's ingress and turns
//! the egress response back into a [`Message`]. Attributes travel as
//! request headers; the echoed `test_*` attributes come back as response
//! headers.

use std::time::Duration;

use nifitest_core::message::{attributes, Message};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use url::Url;

use crate::error::HarnessError;

/// Response headers added by the HTTP server rather than the flow.
pub const TRANSPORT_HEADERS: [&str; 3] = ["date", "transfer-encoding", "server"];

/// Sends test messages to a scaffold ingress.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    client: reqwest::Client,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (proxy, TLS roots, ...).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// POST `message` to `url`, routed to the declared input `input_name`.
    ///
    /// The response must be `200 OK`; anything else is reported with its
    /// body so the failing flow can be diagnosed.
    pub async fn send(
        &self,
        url: &Url,
        message: &Message,
        input_name: &str,
        timeout: Duration,
    ) -> Result<Message, HarnessError> {
        let headers = prepare_headers(message, input_name)?;

        tracing::debug!(%url, input_name, ?timeout, "Posting test message");
        let response = self
            .client
            .post(url.clone())
            .headers(headers)
            .body(message.content().to_string())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        let response_headers = response.headers().clone();
        let body = response.text().await.map_err(|e| classify(e, timeout))?;

        if status != StatusCode::OK {
            return Err(HarnessError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response_to_message(&response_headers, body))
    }
}

/// Request headers for a test message: every attribute plus
/// `test_input_name`, which the ingress router matches on.
pub fn prepare_headers(message: &Message, input_name: &str) -> Result<HeaderMap, HarnessError> {
    let mut headers = HeaderMap::with_capacity(message.attributes().len() + 1);
    let pairs = message
        .attributes()
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .chain(std::iter::once((attributes::TEST_INPUT_NAME, input_name)));

    for (name, value) in pairs {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            HarnessError::InvalidArgument(format!("attribute {name:?} is not a valid header name"))
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|_| {
            HarnessError::InvalidArgument(format!(
                "value of attribute {name:?} is not a valid header value"
            ))
        })?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

/// Build the captured message from an egress response.
///
/// Header names arrive lower-cased. Repeated headers are joined with
/// `", "`.
pub fn response_to_message(headers: &HeaderMap, body: String) -> Message {
    let mut captured: Vec<(String, String)> = Vec::with_capacity(headers.len());
    for (name, value) in headers {
        if TRANSPORT_HEADERS.contains(&name.as_str()) {
            continue;
        }
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        match captured.iter_mut().find(|(k, _)| k == name.as_str()) {
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            None => captured.push((name.as_str().to_string(), value)),
        }
    }
    Message::new(body, captured)
}

/// `scheme://host:port/<scaffold>` on the NiFi host behind `api_url`.
pub fn scaffold_url(api_url: &Url, port: u16, scaffold: &str) -> Result<Url, HarnessError> {
    if api_url.host_str().is_none() {
        return Err(HarnessError::InvalidArgument(format!(
            "NiFi API URL {api_url} has no host"
        )));
    }
    let mut url = api_url.clone();
    url.set_port(Some(port)).map_err(|_| {
        HarnessError::InvalidArgument(format!("cannot set port {port} on {api_url}"))
    })?;
    url.set_path(&format!("/{scaffold}"));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn classify(err: reqwest::Error, timeout: Duration) -> HarnessError {
    if err.is_timeout() {
        HarnessError::RequestTimeout(timeout)
    } else {
        HarnessError::Probe(err)
    }
}
