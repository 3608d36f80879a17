// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

/// Measures the wall time between consecutive `tick` calls.
#[derive(Debug)]
pub struct FrameTimer {
    last: Instant,
}

impl FrameTimer {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Seconds elapsed since the previous tick (or since construction).
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let dt = now.duration_since(self.last);
        self.last = now;
        dt.as_secs_f32()
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Averages frame times over a fixed window and publishes the result once
/// per window.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    window: f32,
    accum: f32,
    frames: u32,
    fps: u32,
    frame_time: f32,
}

impl FpsCounter {
    pub fn new(window_secs: f32) -> Self {
        Self {
            window: window_secs.max(f32::EPSILON),
            accum: 0.0,
            frames: 0,
            fps: 0,
            frame_time: 0.0,
        }
    }

    /// Feed one frame's delta; returns true when a new average was published.
    pub fn update(&mut self, dt: f32) -> bool {
        self.accum += dt;
        self.frames += 1;
        if self.accum < self.window {
            return false;
        }
        self.frame_time = self.accum / self.frames as f32;
        self.fps = (self.frames as f32 / self.accum).round() as u32;
        self.accum = 0.0;
        self.frames = 0;
        true
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn frame_time(&self) -> Duration {
        Duration::from_secs_f32(self.frame_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishes_once_window_elapses() {
        let mut fps = FpsCounter::new(0.5);
        // 1/64 s is exact in binary, so 32 frames land on the window edge.
        for _ in 0..31 {
            assert!(!fps.update(1.0 / 64.0));
        }
        assert!(fps.update(1.0 / 64.0));
        assert_eq!(fps.fps(), 64);
        let ms = fps.frame_time().as_secs_f32() * 1000.0;
        assert!((ms - 15.625).abs() < 0.001, "frame time {ms}");
    }

    #[test]
    fn resets_between_windows() {
        let mut fps = FpsCounter::new(1.0);
        assert!(fps.update(1.0));
        assert_eq!(fps.fps(), 1);
        assert!(!fps.update(0.25));
        assert!(fps.update(0.75));
        assert_eq!(fps.fps(), 2);
    }

    #[test]
    fn timer_is_monotonic() {
        let mut t = FrameTimer::new();
        assert!(t.tick() >= 0.0);
        assert!(t.tick() >= 0.0);
    }
}
