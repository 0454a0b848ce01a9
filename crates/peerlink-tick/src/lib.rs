//! Fixed-rate frame clock for Peerlink.
//!
//! Outbound events are batched per frame and flushed once per tick, so the
//! tick rate is the network send rate. [`TickScheduler`] sleeps until the
//! next frame is due and hands back the frame number and fixed `dt`.
//!
//! ```ignore
//! let mut ticks = TickScheduler::with_rate(30);
//! loop {
//!     let frame = ticks.wait_for_tick().await;
//!     game.update(frame.dt);
//!     net.pump().await;
//!     ticks.record_tick_end();
//! }
//! ```
//!
//! A rate of 0 never fires, for games that call `pump` from their own loop.

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

/// Frame rate used when none is given.
pub const DEFAULT_TICK_RATE_HZ: u32 = 30;

/// Highest accepted frame rate; larger values are clamped.
pub const MAX_TICK_RATE_HZ: u32 = 240;

/// Frame rate setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickConfig {
    /// Frames per second. 0 = never fires.
    pub tick_rate_hz: u32,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self::with_rate(DEFAULT_TICK_RATE_HZ)
    }
}

impl TickConfig {
    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self { tick_rate_hz }
    }

    /// Length of one frame after clamping, or `None` at rate 0.
    pub fn tick_duration(&self) -> Option<Duration> {
        match self.tick_rate_hz.min(MAX_TICK_RATE_HZ) {
            0 => None,
            hz => Some(Duration::from_secs(1) / hz),
        }
    }
}

/// One fired frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickInfo {
    /// Frame number, starting at 1.
    pub tick: u64,
    /// Fixed frame length.
    pub dt: Duration,
    /// Whole frames dropped because the loop woke up late.
    pub ticks_skipped: u64,
}

/// Counters since the scheduler was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub total_ticks: u64,
    pub total_skipped: u64,
    /// Longest gap between a tick firing and `record_tick_end`.
    pub slowest_frame: Duration,
}

/// Paces the game loop at a fixed rate, skipping frames it is too late for.
#[derive(Debug)]
pub struct TickScheduler {
    dt: Option<Duration>,
    next_tick: Instant,
    frame_start: Option<Instant>,
    stats: TickStats,
}

impl TickScheduler {
    pub fn new(config: TickConfig) -> Self {
        if config.tick_rate_hz > MAX_TICK_RATE_HZ {
            warn!(
                rate = config.tick_rate_hz,
                max = MAX_TICK_RATE_HZ,
                "tick rate clamped"
            );
        }
        let dt = config.tick_duration();
        debug!(?dt, "tick scheduler created");

        Self {
            dt,
            next_tick: Instant::now() + dt.unwrap_or_default(),
            frame_start: None,
            stats: TickStats::default(),
        }
    }

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(tick_rate_hz))
    }

    /// Sleeps until the next frame. Pends forever at rate 0.
    ///
    /// When the loop is a whole frame or more behind, the missed frames are
    /// dropped and the next one is scheduled a full `dt` from now.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let Some(dt) = self.dt else {
            return std::future::pending().await;
        };

        time::sleep_until(self.next_tick).await;
        let now = Instant::now();
        let late_by = now.saturating_duration_since(self.next_tick);

        let ticks_skipped = (late_by.as_nanos() / dt.as_nanos()) as u64;
        self.next_tick = if ticks_skipped > 0 {
            warn!(skipped = ticks_skipped, ?late_by, "network frame late, skipping ahead");
            now + dt
        } else {
            self.next_tick + dt
        };

        self.frame_start = Some(now);
        self.stats.total_ticks += 1;
        self.stats.total_skipped += ticks_skipped;
        trace!(tick = self.stats.total_ticks, "tick");

        TickInfo {
            tick: self.stats.total_ticks,
            dt,
            ticks_skipped,
        }
    }

    /// Marks the end of the current frame's work.
    pub fn record_tick_end(&mut self) {
        let Some(start) = self.frame_start.take() else {
            return;
        };
        let elapsed = start.elapsed();
        self.stats.slowest_frame = self.stats.slowest_frame.max(elapsed);

        if self.dt.is_some_and(|dt| elapsed > dt) {
            warn!(?elapsed, "frame took longer than one tick");
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.stats.total_ticks
    }

    pub fn stats(&self) -> &TickStats {
        &self.stats
    }

    pub fn tick_duration(&self) -> Option<Duration> {
        self.dt
    }
}
