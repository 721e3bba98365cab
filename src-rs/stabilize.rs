use anyhow::Result;
use std::time::Duration;

/// Bounded poll-until-stable over the navigation URL. Two identical
/// consecutive samples count as "settled"; that is a heuristic, the view may
/// still be transitioning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilizationWaiter {
    pub interval: Duration,
    /// Upper bound on samples taken, including the first one.
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stabilized {
    pub url: String,
    pub polls: u32,
    pub settled: bool,
}

impl StabilizationWaiter {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// `sample` reads the current URL; `pause` sleeps on the caller's thread.
    /// One extra `interval` pause always follows the last sample.
    pub fn wait(
        &self,
        mut sample: impl FnMut() -> Result<String>,
        mut pause: impl FnMut(Duration),
    ) -> Result<Stabilized> {
        let max_attempts = self.max_attempts.max(1);
        let mut previous = sample()?;
        let mut polls = 1;
        let mut settled = false;

        while polls < max_attempts {
            pause(self.interval);
            let current = sample()?;
            polls += 1;
            if current == previous {
                settled = true;
                break;
            }
            previous = current;
        }

        pause(self.interval);
        if !settled {
            log::debug!("url still changing after {polls} polls");
        }
        Ok(Stabilized {
            url: previous,
            polls,
            settled,
        })
    }
}
