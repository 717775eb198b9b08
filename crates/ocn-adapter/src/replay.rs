//! Replay protection (spec §4.1): a rolling window of recently-seen
//! control sequence numbers plus a timestamp skew check, tracked per
//! device. Grounded on the device-profile-configurable window/skew
//! described for the hardware adapter's replay contract.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct ReplayPolicy {
    /// Size of the rolling seq window (default 50-100).
    pub window_size: usize,
    /// Maximum allowed clock skew between `ts_ms` and local time, in ms.
    pub max_skew_ms: i64,
}

impl Default for ReplayPolicy {
    fn default() -> Self {
        Self {
            window_size: 64,
            max_skew_ms: 30_000,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReplayVerdict {
    Accept,
    Duplicate,
    ReplayRejected,
}

struct DeviceWindow {
    seen: VecDeque<(String, u64)>,
    seen_set: std::collections::HashSet<(String, u64)>,
}

impl DeviceWindow {
    fn new() -> Self {
        Self {
            seen: VecDeque::new(),
            seen_set: std::collections::HashSet::new(),
        }
    }

    fn push(&mut self, key: (String, u64), window_size: usize) {
        self.seen.push_back(key.clone());
        self.seen_set.insert(key);
        while self.seen.len() > window_size {
            if let Some(old) = self.seen.pop_front() {
                self.seen_set.remove(&old);
            }
        }
    }
}

/// Per-adapter replay guard, keyed by `device_id`.
pub struct ReplayGuard {
    policy: ReplayPolicy,
    windows: Mutex<HashMap<String, DeviceWindow>>,
}

impl ReplayGuard {
    pub fn new(policy: ReplayPolicy) -> Self {
        Self {
            policy,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Check and record `(session_id, seq)` for `device_id`, given the
    /// envelope's `ts_ms` and the current local time.
    pub fn check(&self, device_id: &str, session_id: &str, seq: u64, ts_ms: i64, now_ms: i64) -> ReplayVerdict {
        if (now_ms - ts_ms).abs() > self.policy.max_skew_ms {
            return ReplayVerdict::ReplayRejected;
        }
        let mut windows = self.windows.lock();
        let window = windows.entry(device_id.to_string()).or_insert_with(DeviceWindow::new);
        let key = (session_id.to_string(), seq);
        if window.seen_set.contains(&key) {
            return ReplayVerdict::Duplicate;
        }
        window.push(key, self.policy.window_size);
        ReplayVerdict::Accept
    }
}
