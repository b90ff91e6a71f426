//! Shared HTTP plumbing for the outbound collaborators

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;

use crate::egress::{EgressGuard, EgressViolation};
use crate::error::{CoordinatorError, Result};

/// Build a client with a request timeout whose DNS lookups go through the
/// egress policy
pub(crate) fn client(timeout: Duration, guard: &EgressGuard) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .dns_resolver(Arc::new(guard.dns_resolver()))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// Guarded JSON POST
///
/// The egress check runs first; a violation surfaces as
/// [`CoordinatorError::PermissionDenied`], as does an address refused by the
/// client's guarded resolver at connect time. A request that hits the client
/// timeout becomes [`CoordinatorError::Timeout`]; other transport and status
/// failures become [`CoordinatorError::Backend`] tagged with `service`.
pub(crate) async fn post_json<B, R>(
    client: &reqwest::Client,
    guard: &EgressGuard,
    service: &str,
    url: &str,
    body: &B,
    bearer: Option<&str>,
) -> Result<R>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    guard.assert_safe(url, service).await?;

    let mut request = client.post(url).json(body);
    if let Some(key) = bearer {
        request = request.bearer_auth(key);
    }

    let started = Instant::now();
    let response = request.send().await.map_err(|e| {
        if let Some(violation) = egress_violation(&e) {
            tracing::warn!(service = %service, reason = %violation, "Outbound request blocked");
            CoordinatorError::PermissionDenied(violation)
        } else if e.is_timeout() {
            CoordinatorError::Timeout {
                what: service.to_string(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            }
        } else {
            CoordinatorError::backend(service, e)
        }
    })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(CoordinatorError::backend(
            service,
            format!("{status}: {}", truncate(&body, 200)),
        ));
    }

    response
        .json()
        .await
        .map_err(|e| CoordinatorError::backend(service, format!("malformed response: {e}")))
}

/// Egress violation somewhere in an error's source chain
fn egress_violation(error: &(dyn std::error::Error + 'static)) -> Option<EgressViolation> {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(violation) = err.downcast_ref::<EgressViolation>() {
            return Some(violation.clone());
        }
        current = err.source();
    }
    None
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Join a base URL and a path without doubling slashes
pub(crate) fn join(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
