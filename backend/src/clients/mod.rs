// backend/src/clients/mod.rs
//
// Thin HTTP adapters for the regulatory portals. Each adapter speaks one
// upstream's published API and returns a normalized document; each enforces
// its own per-second rate budget and retries idempotent GETs once on
// transient failure.

pub mod aps;
pub mod drs;
pub mod ecfr;

use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Normalized return of a regulatory fetch.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub title: String,
    pub body: String,
    pub citation: String,
    pub metadata: JsonValue,
}

/// Per-second request budget. Callers `acquire` before each upstream call;
/// when the window is spent the caller sleeps into the next one.
pub struct RateBudget {
    per_second: u32,
    window: Mutex<(Instant, u32)>,
}

impl RateBudget {
    pub fn new(per_second: u32) -> Self {
        Self {
            per_second: per_second.max(1),
            window: Mutex::new((Instant::now(), 0)),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let sleep_until = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                if now.duration_since(window.0) >= Duration::from_secs(1) {
                    *window = (now, 0);
                }
                if window.1 < self.per_second {
                    window.1 += 1;
                    return;
                }
                window.0 + Duration::from_secs(1)
            };
            debug!("Rate budget spent, waiting for next window");
            tokio::time::sleep_until(sleep_until).await;
        }
    }
}

/// Retries an idempotent request builder once on connect/timeout failure.
pub(crate) async fn send_idempotent(
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, reqwest::Error> {
    let retry = request.try_clone();
    match request.send().await {
        Ok(response) => Ok(response),
        Err(first) if first.is_timeout() || first.is_connect() => match retry {
            Some(request) => {
                debug!(error = %first, "Transient upstream failure, retrying once");
                request.send().await
            }
            None => Err(first),
        },
        Err(other) => Err(other),
    }
}
