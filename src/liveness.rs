//! Host liveness tracking.
//!
//! Every host slot of the entity cache has a [`HostState`] that records
//! whether vCenter reports the host as connected and whether the host
//! answered its last esxcli-style command. A host that failed a command
//! cools down for a configurable skip duration before it is tried again,
//! so a wedged host does not cost a full command timeout on every cycle.
//!
//! ```text
//!               command fails                 skip elapsed (lazy)
//!  Responding ─────────────────▶ NotResponding ─────────────────▶ Responding
//!      ▲                                │
//!      └────────── command ok ──────────┘
//!
//!  any state ── vCenter reports connection != connected ──▶ Disconnected
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Responsiveness code reported for each host in `vcstat_host_esxcli`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RespondingCode {
    Responding,
    NotConnected,
    NotResponding,
}

impl RespondingCode {
    /// Numeric code: responding 0, not connected 1, not responding 2.
    pub fn code(self) -> i64 {
        match self {
            RespondingCode::Responding => 0,
            RespondingCode::NotConnected => 1,
            RespondingCode::NotResponding => 2,
        }
    }
}

/// Liveness record of one host slot.
#[derive(Debug, Clone, Default)]
pub struct HostState {
    not_connected: bool,
    not_responding: bool,
    last_no_response: Option<Instant>,
    response_time: Duration,
    attempts: u32,
}

impl HostState {
    /// Record the connection state last reported by vCenter.
    pub fn set_not_connected(&mut self, not_connected: bool) {
        self.not_connected = not_connected;
    }

    /// Record the outcome of a command attempt.
    pub fn set_not_responding(&mut self, not_responding: bool) {
        self.set_not_responding_at(not_responding, Instant::now());
    }

    /// Like [`set_not_responding`](Self::set_not_responding) with an explicit clock.
    pub fn set_not_responding_at(&mut self, not_responding: bool, now: Instant) {
        self.not_responding = not_responding;
        if not_responding {
            self.last_no_response = Some(now);
        }
    }

    /// Add the duration of one command attempt to this cycle's total.
    pub fn record_response_time(&mut self, elapsed: Duration) {
        self.response_time += elapsed;
        self.attempts += 1;
    }

    /// Accumulated command time of the current cycle.
    pub fn response_time(&self) -> Duration {
        self.response_time
    }

    /// Mean command time of the current cycle, zero without attempts.
    pub fn mean_response_time(&self) -> Duration {
        if self.attempts == 0 {
            Duration::ZERO
        } else {
            self.response_time / self.attempts
        }
    }

    pub fn reset_response_time(&mut self) {
        self.response_time = Duration::ZERO;
        self.attempts = 0;
    }

    pub fn is_connected(&self) -> bool {
        !self.not_connected
    }

    /// Raw not-responding flag, without the lazy cool-down check.
    pub fn is_not_responding(&self) -> bool {
        self.not_responding
    }

    /// Gate checked before every host command.
    ///
    /// Returns false for a disconnected host. For a connected host whose
    /// last failure is older than `skip`, the not-responding flag is cleared
    /// first so the host gets one retry.
    pub fn is_connected_and_responding(&mut self, skip: Duration) -> bool {
        self.is_connected_and_responding_at(skip, Instant::now())
    }

    pub fn is_connected_and_responding_at(&mut self, skip: Duration, now: Instant) -> bool {
        if self.not_connected {
            return false;
        }
        if let Some(last) = self.last_no_response {
            if self.not_responding && now.saturating_duration_since(last) > skip {
                self.not_responding = false;
            }
        }
        !self.not_responding
    }

    /// Responsiveness code, applying the cool-down check.
    pub fn responding_code(&mut self, skip: Duration) -> RespondingCode {
        if !self.is_connected() {
            RespondingCode::NotConnected
        } else if !self.is_connected_and_responding(skip) {
            RespondingCode::NotResponding
        } else {
            RespondingCode::Responding
        }
    }
}

/// Liveness records for all hosts, indexed by datacenter position and host
/// position, parallel to the cached host lists.
#[derive(Debug, Clone, Default)]
pub struct LivenessTable {
    states: Vec<Vec<HostState>>,
}

impl LivenessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every record and size the outer dimension to `datacenters`.
    pub fn resize(&mut self, datacenters: usize) {
        self.states = vec![Vec::new(); datacenters];
    }

    /// Replace the records of one datacenter with `hosts` fresh ones.
    pub fn reset_datacenter(&mut self, dc: usize, hosts: usize) {
        if let Some(slot) = self.states.get_mut(dc) {
            *slot = vec![HostState::default(); hosts];
        }
    }

    pub fn datacenters(&self) -> usize {
        self.states.len()
    }

    pub fn hosts(&self, dc: usize) -> usize {
        self.states.get(dc).map_or(0, Vec::len)
    }

    pub fn get(&self, dc: usize, host: usize) -> Option<&HostState> {
        self.states.get(dc).and_then(|s| s.get(host))
    }

    pub fn get_mut(&mut self, dc: usize, host: usize) -> Option<&mut HostState> {
        self.states.get_mut(dc).and_then(|s| s.get_mut(host))
    }

    pub fn states_mut(&mut self, dc: usize) -> Option<&mut [HostState]> {
        self.states.get_mut(dc).map(Vec::as_mut_slice)
    }

    /// Number of hosts currently flagged as not responding.
    pub fn not_responding_count(&self) -> usize {
        self.states
            .iter()
            .flatten()
            .filter(|s| s.is_not_responding())
            .count()
    }

    /// Zero the accumulated response times; called at the start of a cycle.
    pub fn reset_response_times(&mut self) {
        for state in self.states.iter_mut().flatten() {
            state.reset_response_time();
        }
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SKIP: Duration = Duration::from_secs(1200);

    #[test]
    fn test_cool_down_boundaries() {
        let t = Instant::now();
        let mut state = HostState::default();
        state.set_not_responding_at(true, t);

        let just_before = t + SKIP - Duration::from_secs(1);
        assert!(!state.is_connected_and_responding_at(SKIP, just_before));

        let just_after = t + SKIP + Duration::from_secs(1);
        assert!(state.is_connected_and_responding_at(SKIP, just_after));
    }

    #[test]
    fn test_failed_retry_restarts_cool_down() {
        let t = Instant::now();
        let mut state = HostState::default();
        state.set_not_responding_at(true, t);

        let retry = t + SKIP + Duration::from_secs(1);
        assert!(state.is_connected_and_responding_at(SKIP, retry));
        state.set_not_responding_at(true, retry);

        let later = retry + SKIP - Duration::from_secs(1);
        assert!(!state.is_connected_and_responding_at(SKIP, later));
        assert!(state.is_connected_and_responding_at(SKIP, retry + SKIP + Duration::from_secs(1)));
    }

    #[test]
    fn test_disconnected_is_never_responding() {
        let mut state = HostState::default();
        state.set_not_connected(true);
        assert!(!state.is_connected_and_responding(SKIP));
        assert_eq!(state.responding_code(SKIP), RespondingCode::NotConnected);
        assert_eq!(state.responding_code(SKIP).code(), 1);
    }

    #[test]
    fn test_success_clears_flag() {
        let mut state = HostState::default();
        state.set_not_responding(true);
        assert_eq!(state.responding_code(SKIP), RespondingCode::NotResponding);
        state.set_not_responding(false);
        assert_eq!(state.responding_code(SKIP), RespondingCode::Responding);
    }

    #[test]
    fn test_response_time_accounting() {
        let mut state = HostState::default();
        state.record_response_time(Duration::from_millis(300));
        state.record_response_time(Duration::from_millis(100));
        assert_eq!(state.response_time(), Duration::from_millis(400));
        assert_eq!(state.mean_response_time(), Duration::from_millis(200));
        state.reset_response_time();
        assert_eq!(state.response_time(), Duration::ZERO);
        assert_eq!(state.mean_response_time(), Duration::ZERO);
    }

    #[test]
    fn test_table_counts_and_resets() {
        let mut table = LivenessTable::new();
        table.resize(2);
        table.reset_datacenter(0, 3);
        table.reset_datacenter(1, 1);
        table.get_mut(0, 2).unwrap().set_not_responding(true);
        table.get_mut(1, 0).unwrap().set_not_responding(true);
        table.get_mut(0, 0).unwrap().record_response_time(Duration::from_secs(2));
        assert_eq!(table.not_responding_count(), 2);

        table.reset_response_times();
        assert_eq!(table.get(0, 0).unwrap().response_time(), Duration::ZERO);

        table.reset_datacenter(0, 4);
        assert_eq!(table.hosts(0), 4);
        assert_eq!(table.not_responding_count(), 1);
        assert!(table.get(0, 4).is_none());
        assert!(table.get(5, 0).is_none());
    }
}
