//! Process-wide virtual time source.
//!
//! # Purpose
//! Every time-dependent behavior in the server (resource `created` stamps,
//! idempotency TTLs, billing eligibility, webhook retry backoff) reads the
//! same clock. Concentrating time here lets a test fast-forward thirty days
//! in milliseconds and have every component agree on "now".
//!
//! # Modes
//! - `real`: wall-clock seconds.
//! - `accelerated`: wall time since the mode was set, scaled by an integer
//!   multiplier, plus any manual offset.
//! - `manual`: frozen; advances only via [`VirtualClock::advance`].
//!
//! All operations are serialized through a single mutex so the
//! `(mode, start, offset, multiplier)` tuple is never observed torn.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockMode {
    Real,
    Accelerated,
    Manual,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClockError {
    #[error("advance is not permitted in real mode")]
    AdvanceInRealMode,
    #[error("multiplier must be a positive integer, got {0}")]
    InvalidMultiplier(i64),
}

#[derive(Debug, Clone, Copy)]
struct ClockState {
    mode: ClockMode,
    /// Wall-clock seconds at the moment the current mode was entered.
    start: i64,
    /// Seconds added by `advance` since the mode was entered.
    offset: i64,
    /// Acceleration factor; meaningful only in accelerated mode.
    multiplier: i64,
}

impl ClockState {
    fn now_at(&self, wall: i64) -> i64 {
        match self.mode {
            ClockMode::Real => wall,
            ClockMode::Accelerated => self.start + (wall - self.start) * self.multiplier + self.offset,
            ClockMode::Manual => self.start + self.offset,
        }
    }
}

/// Snapshot of the clock for introspection surfaces.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClockInfo {
    pub mode: ClockMode,
    pub multiplier: i64,
    pub now: i64,
}

#[derive(Debug)]
pub struct VirtualClock {
    state: Mutex<ClockState>,
}

impl VirtualClock {
    /// A clock in real mode.
    pub fn new() -> Self {
        Self::with_mode(ClockMode::Real, 1).expect("multiplier 1 is valid")
    }

    pub fn with_mode(mode: ClockMode, multiplier: i64) -> Result<Self, ClockError> {
        if multiplier < 1 {
            return Err(ClockError::InvalidMultiplier(multiplier));
        }
        Ok(Self {
            state: Mutex::new(ClockState {
                mode,
                start: wall_now(),
                offset: 0,
                multiplier,
            }),
        })
    }

    /// Current virtual time in whole seconds since the Unix epoch.
    pub fn now(&self) -> i64 {
        let state = self.state.lock().expect("clock lock");
        state.now_at(wall_now())
    }

    /// Add `delta` seconds to the clock. Permitted in manual and accelerated
    /// modes; real mode always tracks the wall clock.
    pub fn advance(&self, delta: i64) -> Result<i64, ClockError> {
        let mut state = self.state.lock().expect("clock lock");
        if state.mode == ClockMode::Real {
            return Err(ClockError::AdvanceInRealMode);
        }
        state.offset += delta;
        Ok(state.now_at(wall_now()))
    }

    /// Switch modes. Restarts the epoch at the current wall clock and zeroes
    /// the offset, so the new regime begins from real "now".
    pub fn set_mode(&self, mode: ClockMode, multiplier: i64) -> Result<(), ClockError> {
        if multiplier < 1 {
            return Err(ClockError::InvalidMultiplier(multiplier));
        }
        let mut state = self.state.lock().expect("clock lock");
        state.mode = mode;
        state.multiplier = multiplier;
        state.start = wall_now();
        state.offset = 0;
        Ok(())
    }

    /// Zero the offset and restart the epoch, keeping the current mode.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("clock lock");
        state.start = wall_now();
        state.offset = 0;
    }

    pub fn mode(&self) -> ClockMode {
        self.state.lock().expect("clock lock").mode
    }

    pub fn info(&self) -> ClockInfo {
        let state = self.state.lock().expect("clock lock");
        ClockInfo {
            mode: state.mode,
            multiplier: state.multiplier,
            now: state.now_at(wall_now()),
        }
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

fn wall_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_mode_tracks_wall_clock() {
        let clock = VirtualClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!((a - wall_now()).abs() <= 1);
    }

    #[test]
    fn manual_mode_is_frozen_until_advanced() {
        let clock = VirtualClock::with_mode(ClockMode::Manual, 1).expect("clock");
        let frozen = clock.now();
        assert_eq!(clock.now(), frozen);
        let after = clock.advance(3_600).expect("advance");
        assert_eq!(after, frozen + 3_600);
        assert_eq!(clock.now(), frozen + 3_600);
    }

    #[test]
    fn accelerated_state_scales_elapsed_wall_time() {
        let state = ClockState {
            mode: ClockMode::Accelerated,
            start: 1_000,
            offset: 5,
            multiplier: 60,
        };
        // 10 wall seconds at 60x plus a 5 second offset.
        assert_eq!(state.now_at(1_010), 1_000 + 600 + 5);
    }

    #[test]
    fn advance_rejected_in_real_mode() {
        let clock = VirtualClock::new();
        assert_eq!(clock.advance(10), Err(ClockError::AdvanceInRealMode));
    }

    #[test]
    fn set_mode_resets_offset() {
        let clock = VirtualClock::with_mode(ClockMode::Manual, 1).expect("clock");
        clock.advance(500).expect("advance");
        clock.set_mode(ClockMode::Manual, 1).expect("set_mode");
        assert!((clock.now() - wall_now()).abs() <= 1);
    }

    #[test]
    fn reset_zeroes_offset_and_keeps_mode() {
        let clock = VirtualClock::with_mode(ClockMode::Manual, 1).expect("clock");
        clock.advance(86_400).expect("advance");
        clock.reset();
        assert_eq!(clock.mode(), ClockMode::Manual);
        assert!((clock.now() - wall_now()).abs() <= 1);
    }

    #[test]
    fn invalid_multiplier_is_rejected() {
        assert!(matches!(
            VirtualClock::with_mode(ClockMode::Accelerated, 0),
            Err(ClockError::InvalidMultiplier(0))
        ));
        let clock = VirtualClock::new();
        assert!(clock.set_mode(ClockMode::Accelerated, -5).is_err());
    }

    #[test]
    fn mode_names_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&ClockMode::Accelerated).expect("json"),
            "\"accelerated\""
        );
        let parsed: ClockMode = serde_json::from_str("\"manual\"").expect("json");
        assert_eq!(parsed, ClockMode::Manual);
    }
}
