// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Miscellaneous things.

use std::time::{Duration, Instant};

use log::debug;

/// Throttles a repeated log message. Anomalies such as out-of-window packets
/// can arrive thousands of times a second; counting them is cheap, logging
/// each one is not.
#[derive(Debug)]
pub(crate) struct RateLimited {
    interval: Duration,
    last: Option<Instant>,
    suppressed: u64,
}

impl RateLimited {
    pub(crate) fn new(interval: Duration) -> RateLimited {
        RateLimited {
            interval,
            last: None,
            suppressed: 0,
        }
    }

    /// Should the message be logged now? If so, the number of occurrences
    /// suppressed since the last time is returned.
    pub(crate) fn check(&mut self) -> Option<u64> {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => {
                self.suppressed += 1;
                None
            }
            _ => {
                self.last = Some(now);
                Some(std::mem::take(&mut self.suppressed))
            }
        }
    }
}

/// Ask the OS to schedule the calling thread ahead of ordinary work. Needs
/// privileges most of the time; not getting them is logged and ignored.
pub(crate) fn raise_thread_priority() {
    #[cfg(target_os = "linux")]
    {
        // With `PRIO_PROCESS` and a thread ID, Linux adjusts only this thread.
        let result = unsafe {
            let tid = libc::syscall(libc::SYS_gettid) as libc::id_t;
            libc::setpriority(libc::PRIO_PROCESS, tid, -10)
        };
        if result != 0 {
            debug!(
                "Couldn't raise thread priority: {}",
                std::io::Error::last_os_error()
            );
        }
    }

    #[cfg(not(target_os = "linux"))]
    debug!("Raising thread priority isn't supported on this platform");
}
