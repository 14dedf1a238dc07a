//! Fixed-window rate limiting for the mutating endpoints.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;

use crate::error::ApiError;
use crate::state::AppState;

const WINDOW: Duration = Duration::from_secs(60);

struct Window {
    started: Instant,
    count: u32,
}

/// Per-client fixed window: the first request opens a window, every request
/// inside it counts against the limit, and the window resets wholesale once
/// its duration has elapsed.
pub struct FixedWindowLimiter {
    windows: DashMap<IpAddr, Window>,
    limit: u32,
    window: Duration,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            windows: DashMap::new(),
            limit,
            window: WINDOW,
        }
    }

    #[cfg(test)]
    fn with_window(limit: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            limit,
            window,
        }
    }

    /// Records the request and reports whether it is within the limit.
    pub fn allow(&self, client: IpAddr) -> bool {
        self.allow_at(client, Instant::now())
    }

    fn allow_at(&self, client: IpAddr, now: Instant) -> bool {
        let mut entry = self.windows.entry(client).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        entry.count += 1;
        entry.count <= self.limit
    }
}

pub async fn limit_requests(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if !state.limiter.allow(addr.ip()) {
        return ApiError::rate_limited().into_response();
    }
    next.run(request).await
}
