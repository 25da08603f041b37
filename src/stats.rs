//! Pacing statistics

use std::time::{Duration, Instant};

/// Statistics for the frame-pacing loop
///
/// Drift (wall-clock elapsed minus expected elapsed) is observed for
/// diagnostics only; the tick interval is never adjusted from it.
#[derive(Debug, Clone)]
pub struct PacingStats {
    /// Frames emitted since the loop started
    pub frames_sent: u64,
    /// When the pacing loop started
    started_at: Option<Instant>,
    /// Configured frame rate
    fps: u32,
}

impl PacingStats {
    pub fn new(fps: u32) -> Self {
        Self {
            frames_sent: 0,
            started_at: None,
            fps: fps.max(1),
        }
    }

    /// Mark the start of a pacing run, resetting counters
    pub fn start(&mut self) {
        self.frames_sent = 0;
        self.started_at = Some(Instant::now());
    }

    /// Record one emitted frame; returns the new count
    pub fn on_frame(&mut self) -> u64 {
        self.frames_sent += 1;
        self.frames_sent
    }

    /// Wall-clock time since the run started
    pub fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Elapsed time the frame counter implies at the configured rate
    pub fn expected_elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.frames_sent as f64 / f64::from(self.fps))
    }

    /// Wall elapsed minus expected elapsed, in seconds
    pub fn drift_secs(&self) -> f64 {
        self.elapsed().as_secs_f64() - self.expected_elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_counting() {
        let mut stats = PacingStats::new(30);
        stats.start();

        assert_eq!(stats.on_frame(), 1);
        assert_eq!(stats.on_frame(), 2);
        assert_eq!(stats.frames_sent, 2);
    }

    #[test]
    fn test_start_resets() {
        let mut stats = PacingStats::new(30);
        stats.start();
        stats.on_frame();
        stats.start();

        assert_eq!(stats.frames_sent, 0);
    }

    #[test]
    fn test_expected_elapsed() {
        let mut stats = PacingStats::new(30);
        stats.start();
        for _ in 0..60 {
            stats.on_frame();
        }

        assert!((stats.expected_elapsed().as_secs_f64() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_unstarted_has_no_elapsed() {
        let stats = PacingStats::new(30);
        assert_eq!(stats.elapsed(), Duration::ZERO);
    }
}
