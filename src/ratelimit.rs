#![forbid(unsafe_code)]

//! Per-client request limits for the expensive endpoints. Each limited route
//! gets its own keyed GCRA limiter so analyze traffic never eats into the
//! download allowance.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::{
    DefaultKeyedRateLimiter, Quota, RateLimiter,
    clock::{Clock, DefaultClock},
};
use tracing::warn;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitedRoute {
    Analyze,
    Download,
}

impl LimitedRoute {
    fn label(self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::Download => "download",
        }
    }
}

struct ClientLimiter {
    limiter: DefaultKeyedRateLimiter<IpAddr>,
    clock: DefaultClock,
}

impl ClientLimiter {
    /// `None` when the limit is zero, which disables limiting.
    fn per_minute(limit: u32) -> Option<Self> {
        let burst = NonZeroU32::new(limit)?;
        Some(Self {
            limiter: RateLimiter::keyed(Quota::per_minute(burst)),
            clock: DefaultClock::default(),
        })
    }

    fn check(&self, client: IpAddr) -> std::result::Result<(), Duration> {
        self.limiter
            .check_key(&client)
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

pub struct RateLimits {
    analyze: Option<ClientLimiter>,
    download: Option<ClientLimiter>,
}

impl RateLimits {
    pub fn new(analyze_per_minute: u32, download_per_minute: u32) -> Self {
        Self {
            analyze: ClientLimiter::per_minute(analyze_per_minute),
            download: ClientLimiter::per_minute(download_per_minute),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    /// Admits one request from `client` or reports how long it has to wait.
    pub fn check(&self, route: LimitedRoute, client: IpAddr) -> Result<()> {
        let limiter = match route {
            LimitedRoute::Analyze => &self.analyze,
            LimitedRoute::Download => &self.download,
        };
        let Some(limiter) = limiter else {
            return Ok(());
        };
        limiter.check(client).map_err(|wait| {
            let retry_after_secs = wait.as_secs_f64().ceil().max(1.0) as u64;
            warn!(%client, route = route.label(), retry_after_secs, "rate limit exceeded");
            Error::RateLimited { retry_after_secs }
        })
    }

    /// Forgets clients whose allowance has fully refilled.
    pub fn retain_recent(&self) {
        for limiter in [&self.analyze, &self.download].into_iter().flatten() {
            limiter.limiter.retain_recent();
            limiter.limiter.shrink_to_fit();
        }
    }

    pub fn tracked_clients(&self) -> usize {
        [&self.analyze, &self.download]
            .into_iter()
            .flatten()
            .map(|limiter| limiter.limiter.len())
            .sum()
    }
}
