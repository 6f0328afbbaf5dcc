//! Utility helpers shared by the connection machinery
use std::time::Duration;

/// Exponential backoff delay generator.
///
/// Starts at `min` and doubles on every call to [`next_delay`] until it
/// saturates at `max`. [`reset`] rewinds it to `min`.
///
/// [`next_delay`]: ExpBackoff::next_delay
/// [`reset`]: ExpBackoff::reset
#[derive(Debug)]
pub struct ExpBackoff {
    min: Duration,
    max: Duration,
    shift: u32,
}

impl ExpBackoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max, shift: 0 }
    }

    /// Return the current delay and advance to the next step.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self
            .min
            .checked_mul(1u32 << self.shift.min(31))
            .unwrap_or(self.max)
            .min(self.max);
        if delay < self.max {
            self.shift += 1;
        }
        delay
    }

    /// Rewind to the minimum delay.
    pub fn reset(&mut self) {
        self.shift = 0;
    }
}

/// Split an `addr` of the form `host:port` into its parts.
///
/// Tolerates bracketed IPv6 literals (`[::1]:6379`). Returns `None` when no
/// port separator is present or the port is empty.
pub fn split_host_port(addr: &str) -> Option<(String, String)> {
    let (host, port) = addr.rsplit_once(':')?;
    if host.is_empty() || port.is_empty() {
        return None;
    }
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Some((host.to_string(), port.to_string()))
}
