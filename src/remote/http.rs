use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::{blocking::{Client, RequestBuilder}, StatusCode};
use serde_json::Value;

use super::retry::CallError;

/// Blocking client shared by the providers of one batch.
pub fn client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(concat!("gridjoin/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .context("[remote::http] Failed to build HTTP client")
}

/// Send a request and decode its JSON body.
///
/// 401/403 are fatal; every other failure is transient and left to the retry policy.
pub(crate) fn send_json(request: RequestBuilder) -> Result<Value, CallError> {
    let response = request.send()
        .map_err(|err| CallError::Transient(anyhow!(err).context("request failed")))?;

    let status = response.status();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            return Err(CallError::Fatal(anyhow!("provider rejected credentials ({status})")));
        }
        s if !s.is_success() => {
            return Err(CallError::Transient(anyhow!("provider returned {status}")));
        }
        _ => {}
    }

    let text = response.text()
        .map_err(|err| CallError::Transient(anyhow!(err).context("reading body failed")))?;
    serde_json::from_str(&text)
        .map_err(|err| CallError::Transient(anyhow!(err).context("response is not JSON")))
}
