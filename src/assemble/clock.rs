// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Converts absolute sample timestamps to wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct SampleClock {
    sample_rate_hz: f64,

    /// When sample 0 happened.
    origin: SystemTime,
}

impl SampleClock {
    /// Sample timestamps count samples since the UNIX epoch.
    pub fn new(sample_rate_hz: f64) -> SampleClock {
        SampleClock::with_origin(sample_rate_hz, UNIX_EPOCH)
    }

    pub fn with_origin(sample_rate_hz: f64, origin: SystemTime) -> SampleClock {
        SampleClock {
            sample_rate_hz,
            origin,
        }
    }

    pub fn system_time_of(&self, sample: u64) -> SystemTime {
        self.origin + Duration::from_secs_f64(sample as f64 / self.sample_rate_hz)
    }

    /// The monotonic-clock instant of `sample`.
    pub fn instant_of(&self, sample: u64) -> Instant {
        let now = Instant::now();
        match self.system_time_of(sample).duration_since(SystemTime::now()) {
            Ok(ahead) => now + ahead,
            Err(e) => now.checked_sub(e.duration()).unwrap_or(now),
        }
    }

    /// The timestamp of the sample happening now.
    pub fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.origin)
            .map(|d| (d.as_secs_f64() * self.sample_rate_hz) as u64)
            .unwrap_or(0)
    }
}
