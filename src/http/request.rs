use crate::types::{ErrorKind, RequestSpec, Sample, Tags};
use reqwest::Client;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Get current time in microseconds since UNIX epoch
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

#[derive(Debug)]
pub struct HttpResponse {
    pub sample: Sample,
    pub body: Option<String>,
}

/// Perform one request. Transport failures come back as a failed `Sample`,
/// never as an `Err`.
pub async fn execute_request(
    client: &Client,
    spec: &RequestSpec,
    tags: &Arc<Tags>,
    capture_body: bool,
) -> HttpResponse {
    let timestamp_us = now_us();
    let start = Instant::now();

    let mut request = client.request(spec.method.clone(), &spec.url);
    if !spec.query.is_empty() {
        request = request.query(&spec.query);
    }
    for (name, value) in &spec.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &spec.body {
        request = request.body(body.clone());
    }

    let (status, error, bytes_received, body) = match request.send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            if capture_body {
                match response.text().await {
                    Ok(text) => (Some(status), None, text.len() as u64, Some(text)),
                    Err(err) => (Some(status), Some(ErrorKind::from_reqwest_error(&err)), 0, None),
                }
            } else {
                // Drain so the connection can go back to the pool
                match response.bytes().await {
                    Ok(bytes) => (Some(status), None, bytes.len() as u64, None),
                    Err(err) => (Some(status), Some(ErrorKind::from_reqwest_error(&err)), 0, None),
                }
            }
        }
        Err(err) => {
            tracing::trace!("Request to {} failed: {}", spec.url, err);
            (None, Some(ErrorKind::from_reqwest_error(&err)), 0, None)
        }
    };

    HttpResponse {
        sample: Sample {
            timestamp_us,
            latency: start.elapsed(),
            status,
            error,
            bytes_received,
            tags: Arc::clone(tags),
        },
        body,
    }
}
