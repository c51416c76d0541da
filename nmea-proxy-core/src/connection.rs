//! Connection state machine and reconnection backoff.
//!
//! This module provides the platform-independent half of the reconnecting
//! TCP client. The I/O layer (tokio in `nmea-proxy-server`) drives the
//! transitions; this module decides what state the client is in and how
//! long to wait before the next attempt.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ConnectionManager (this module)                            │
//! │  - Pure state transitions, no I/O                           │
//! │  - Owns the Backoff schedule                                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                 ┌─────────────────────────┐
//!                 │ ReconnectingClient      │
//!                 │ (nmea-proxy-server)     │
//!                 └─────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use nmea_proxy_core::connection::{ConnectionManager, ConnectionState};
//!
//! let mut conn = ConnectionManager::new();
//!
//! conn.start_connecting(0);
//! let delay = conn.connection_failed(10);
//! assert_eq!(delay.map(|d| d.as_secs_f64()), Some(1.0));
//!
//! conn.backoff_elapsed(1010);
//! conn.start_connecting(1010);
//! conn.connected(1020);
//! assert!(conn.can_send());
//!
//! // Success reset the schedule, a lost connection waits 1 s again
//! let delay = conn.connection_lost(1030);
//! assert_eq!(delay.map(|d| d.as_secs_f64()), Some(1.0));
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle of one outbound TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    /// No transport and no attempt in progress; a connect is due
    #[default]
    Disconnected,
    /// TCP connect in progress
    Connecting,
    /// Transport is live
    Connected,
    /// Last attempt failed, waiting until the given time before retrying
    Backoff { until_ms: u64 },
    /// Explicitly stopped, no more connection attempts
    Stopped,
}

impl ConnectionState {
    /// Check if the transport is usable for sending
    pub fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Check if connection attempt is in progress
    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting)
    }

    /// Check if we should attempt a connection now
    pub fn should_reconnect(&self) -> bool {
        matches!(self, ConnectionState::Disconnected)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, ConnectionState::Stopped)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Backoff { until_ms } => write!(f, "Backoff until {} ms", until_ms),
            ConnectionState::Stopped => write!(f, "Stopped"),
        }
    }
}

// =============================================================================
// Backoff
// =============================================================================

/// Default delay before the first retry, in seconds
pub const INITIAL_DELAY_SECS: f64 = 1.0;

/// Growth factor applied after every consecutive failure
pub const BACKOFF_FACTOR: f64 = 1.5;

/// Upper bound for any retry delay, in seconds (10 minutes)
pub const MAX_DELAY_SECS: f64 = 600.0;

/// Exponential backoff schedule.
///
/// The delay handed out for failure `n` (1-based) is
/// `initial * factor^(n-1)`, clamped to `max`. A successful connection
/// resets the schedule to `initial`.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    initial_secs: f64,
    factor: f64,
    max_secs: f64,
    current_secs: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(INITIAL_DELAY_SECS, BACKOFF_FACTOR, MAX_DELAY_SECS)
    }
}

impl Backoff {
    /// Create a schedule. `initial` is clamped to `max` so no handed out
    /// delay can exceed the ceiling.
    pub fn new(initial_secs: f64, factor: f64, max_secs: f64) -> Self {
        let initial_secs = initial_secs.min(max_secs);
        Backoff {
            initial_secs,
            factor,
            max_secs,
            current_secs: initial_secs,
        }
    }

    /// Delay to use for the next retry, in seconds, without advancing.
    pub fn current_secs(&self) -> f64 {
        self.current_secs
    }

    /// Return the delay for the failure that just happened and advance
    /// the schedule for the following one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_secs;
        self.current_secs = (self.current_secs * self.factor).min(self.max_secs);
        Duration::from_secs_f64(delay)
    }

    pub fn reset(&mut self) {
        self.current_secs = self.initial_secs;
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Manages connection state and retry logic.
///
/// This is a pure state machine with no I/O - the actual connection
/// operations are performed by the platform-specific I/O layer, which
/// passes in a monotonic `current_time_ms`.
#[derive(Debug, Clone, Default)]
pub struct ConnectionManager {
    /// Current connection state
    state: ConnectionState,
    /// Retry schedule
    backoff: Backoff,
    /// Number of consecutive connection failures
    failure_count: u32,
    /// Timestamp of last state change (milliseconds since start)
    last_state_change_ms: u64,
}

impl ConnectionManager {
    /// Create a new connection manager in disconnected state.
    pub fn new() -> Self {
        Self::with_backoff(Backoff::default())
    }

    pub fn with_backoff(backoff: Backoff) -> Self {
        ConnectionManager {
            state: ConnectionState::Disconnected,
            backoff,
            failure_count: 0,
            last_state_change_ms: 0,
        }
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Get number of consecutive failures.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Check if the transport is usable for sending.
    pub fn can_send(&self) -> bool {
        self.state.can_send()
    }

    /// Check if connection attempt is in progress.
    pub fn is_connecting(&self) -> bool {
        self.state.is_connecting()
    }

    /// Check if we should attempt a connection now.
    pub fn should_reconnect(&self) -> bool {
        self.state.should_reconnect()
    }

    /// Calculate time since last state change.
    pub fn time_in_state_ms(&self, current_time_ms: u64) -> u64 {
        current_time_ms.saturating_sub(self.last_state_change_ms)
    }

    // -------------------------------------------------------------------------
    // State Transitions
    // -------------------------------------------------------------------------

    /// Transition to connecting state.
    ///
    /// Call this when starting a connection attempt.
    pub fn start_connecting(&mut self, current_time_ms: u64) {
        if self.state == ConnectionState::Disconnected {
            self.set_state(ConnectionState::Connecting, current_time_ms);
        }
    }

    /// Transition to connected state.
    ///
    /// Resets the failure count and the backoff schedule.
    pub fn connected(&mut self, current_time_ms: u64) {
        if self.state.is_connecting() {
            self.set_state(ConnectionState::Connected, current_time_ms);
            self.failure_count = 0;
            self.backoff.reset();
        }
    }

    /// Record a failed connection attempt.
    ///
    /// Returns the delay to wait before the next attempt, or `None` if the
    /// manager has been stopped.
    pub fn connection_failed(&mut self, current_time_ms: u64) -> Option<Duration> {
        if self.state.is_stopped() {
            return None;
        }
        self.failure_count = self.failure_count.saturating_add(1);
        Some(self.schedule_retry(current_time_ms))
    }

    fn schedule_retry(&mut self, current_time_ms: u64) -> Duration {
        let delay = self.backoff.next_delay();
        let until_ms = current_time_ms.saturating_add(delay.as_millis() as u64);
        self.set_state(ConnectionState::Backoff { until_ms }, current_time_ms);
        delay
    }

    /// The live transport was closed by the peer or failed.
    ///
    /// Schedules a retry like a failed attempt and returns the delay to
    /// wait. Since `connected` reset the schedule, a peer that keeps
    /// accepting and closing is retried once per initial delay.
    /// Returns `None` if there was no live connection.
    pub fn connection_lost(&mut self, current_time_ms: u64) -> Option<Duration> {
        if self.state != ConnectionState::Connected {
            return None;
        }
        Some(self.schedule_retry(current_time_ms))
    }

    /// Backoff delay elapsed, ready to retry.
    pub fn backoff_elapsed(&mut self, current_time_ms: u64) {
        if matches!(self.state, ConnectionState::Backoff { .. }) {
            self.set_state(ConnectionState::Disconnected, current_time_ms);
        }
    }

    /// Transition to the terminal stopped state. No further connection
    /// attempts are made after this.
    pub fn stop(&mut self, current_time_ms: u64) {
        self.set_state(ConnectionState::Stopped, current_time_ms);
    }

    fn set_state(&mut self, new_state: ConnectionState, current_time_ms: u64) {
        if self.state != new_state {
            self.state = new_state;
            self.last_state_change_ms = current_time_ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_default() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connection_state_can_send() {
        assert!(!ConnectionState::Disconnected.can_send());
        assert!(!ConnectionState::Connecting.can_send());
        assert!(ConnectionState::Connected.can_send());
        assert!(!ConnectionState::Backoff { until_ms: 5 }.can_send());
        assert!(!ConnectionState::Stopped.can_send());
    }

    #[test]
    fn test_backoff_sequence() {
        let mut backoff = Backoff::default();
        let expected = [1.0, 1.5, 2.25, 3.375, 5.0625, 7.59375];
        for want in expected {
            assert_eq!(backoff.next_delay().as_secs_f64(), want);
        }
    }

    #[test]
    fn test_backoff_clamps_at_ceiling() {
        let mut backoff = Backoff::default();
        let mut previous = 0.0;
        for failure in 1..=20 {
            let delay = backoff.next_delay().as_secs_f64();
            assert!(delay <= MAX_DELAY_SECS, "failure {} gave {}", failure, delay);
            assert!(delay >= previous);
            previous = delay;
        }
        // 1.5^15 ~ 438, 1.5^16 ~ 657 -> clamped from the 17th failure on
        assert_eq!(previous, MAX_DELAY_SECS);
    }

    #[test]
    fn test_backoff_clamps_initial() {
        let mut backoff = Backoff::new(10.0, 2.0, 5.0);
        assert_eq!(backoff.next_delay().as_secs_f64(), 5.0);
        assert_eq!(backoff.next_delay().as_secs_f64(), 5.0);
    }

    #[test]
    fn test_connection_manager_new() {
        let conn = ConnectionManager::new();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.failure_count(), 0);
        assert!(conn.should_reconnect());
    }

    #[test]
    fn test_connection_lifecycle() {
        let mut conn = ConnectionManager::new();

        conn.start_connecting(100);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.is_connecting());

        conn.connected(200);
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(conn.can_send());

        let delay = conn.connection_lost(300).unwrap();
        assert_eq!(delay.as_secs_f64(), INITIAL_DELAY_SECS);
        assert_eq!(conn.state(), ConnectionState::Backoff { until_ms: 1300 });
        assert!(!conn.should_reconnect());
        assert_eq!(conn.time_in_state_ms(350), 50);
        assert_eq!(conn.connection_lost(400), None);

        conn.backoff_elapsed(1300);
        assert!(conn.should_reconnect());
    }

    #[test]
    fn test_immediate_close_waits_between_attempts() {
        let mut conn = ConnectionManager::new();
        let mut now = 0;

        // Peer accepts then closes straight away, again and again
        for _ in 0..4 {
            conn.start_connecting(now);
            assert!(conn.is_connecting());
            conn.connected(now + 5);
            let delay = conn.connection_lost(now + 10).unwrap();
            assert_eq!(delay.as_secs_f64(), INITIAL_DELAY_SECS);
            assert!(!conn.should_reconnect());

            now += 10 + delay.as_millis() as u64;
            conn.backoff_elapsed(now);
        }
        assert_eq!(now, 4 * 1010);
    }

    #[test]
    fn test_failures_then_success_resets_backoff() {
        let mut conn = ConnectionManager::new();
        let mut now = 0;
        let mut delays = Vec::new();

        for _ in 0..12 {
            conn.start_connecting(now);
            let delay = conn.connection_failed(now).unwrap();
            assert_eq!(
                conn.state(),
                ConnectionState::Backoff {
                    until_ms: now + delay.as_millis() as u64
                }
            );
            now += delay.as_millis() as u64;
            conn.backoff_elapsed(now);
            delays.push(delay.as_secs_f64());
        }
        assert_eq!(conn.failure_count(), 12);
        for pair in delays.windows(2) {
            assert!((pair[1] - pair[0] * 1.5).abs() < 1e-6);
        }

        conn.start_connecting(now);
        conn.connected(now);
        assert_eq!(conn.failure_count(), 0);
        assert_eq!(conn.backoff().current_secs(), INITIAL_DELAY_SECS);

        let delay = conn.connection_lost(now).unwrap();
        assert_eq!(delay.as_secs_f64(), 1.0);
        now += delay.as_millis() as u64;
        conn.backoff_elapsed(now);
        conn.start_connecting(now);
        let delay = conn.connection_failed(now).unwrap();
        assert_eq!(delay.as_secs_f64(), 1.5);
    }

    #[test]
    fn test_stop_is_terminal() {
        let mut conn = ConnectionManager::new();
        conn.start_connecting(0);
        conn.stop(10);
        assert_eq!(conn.state(), ConnectionState::Stopped);

        assert_eq!(conn.connection_failed(20), None);
        conn.start_connecting(30);
        conn.connected(40);
        conn.backoff_elapsed(50);
        assert_eq!(conn.state(), ConnectionState::Stopped);
        assert!(!conn.should_reconnect());
    }

    #[test]
    fn test_connected_only_from_connecting() {
        let mut conn = ConnectionManager::new();
        conn.connected(0);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }
}
