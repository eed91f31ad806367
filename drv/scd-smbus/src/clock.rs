// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wall-clock time for hosted builds.

use crate::Clock;
use std::time::{Duration, Instant};

/// A [`Clock`] backed by the operating system: time comes from a monotonic
/// [`Instant`] and sleeping parks the calling thread.
#[derive(Copy, Clone, Debug)]
pub struct StdClock {
    epoch: Instant,
}

impl StdClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now_us(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    fn sleep_us(&self, us: u64) {
        std::thread::sleep(Duration::from_micros(us));
    }
}
