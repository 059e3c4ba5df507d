use std::time::{Duration, Instant};

use serde::Serialize;

/// Milliseconds spent in each phase of one layer build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseTimings {
    pub pre_clean_ms: u64,
    pub install_ms: u64,
    pub archive_ms: u64,
    pub post_clean_ms: u64,
}

impl PhaseTimings {
    #[must_use]
    pub fn phases_ms(&self) -> u64 {
        self.pre_clean_ms
            .saturating_add(self.install_ms)
            .saturating_add(self.archive_ms)
            .saturating_add(self.post_clean_ms)
    }

    fn slot(&mut self, phase: Phase) -> &mut u64 {
        match phase {
            Phase::PreClean => &mut self.pre_clean_ms,
            Phase::Install => &mut self.install_ms,
            Phase::Archive => &mut self.archive_ms,
            Phase::PostClean => &mut self.post_clean_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    PreClean,
    Install,
    Archive,
    PostClean,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::PreClean => "pre_clean",
            Phase::Install => "install",
            Phase::Archive => "archive",
            Phase::PostClean => "post_clean",
        }
    }
}

/// Records phase durations for a build report; logs each phase when `log` is set.
#[derive(Debug)]
pub(crate) struct PhaseClock {
    log: bool,
    timings: PhaseTimings,
}

impl PhaseClock {
    pub(crate) fn new(log: bool) -> Self {
        Self {
            log,
            timings: PhaseTimings::default(),
        }
    }

    pub(crate) fn time<T>(&mut self, phase: Phase, run: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let value = run();
        let elapsed_ms = millis(started.elapsed());
        *self.timings.slot(phase) = elapsed_ms;
        if self.log {
            tracing::info!(pylayer_timing = phase.label(), elapsed_ms, "timing");
        }
        value
    }

    pub(crate) fn finish(self) -> PhaseTimings {
        self.timings
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
