use std::sync::LazyLock;

use regex::{Captures, Regex};

static DURATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap());

static OUT_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap());

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub out_time_secs: f64,
    pub duration_secs: Option<f64>,
    pub percent: Option<f64>,
}

/// Follows ffmpeg's stderr: remembers the first input `Duration:` and turns
/// each `time=` marker into a [`Progress`].
#[derive(Debug, Default)]
pub struct ProgressTracker {
    duration: Option<f64>,
}

impl ProgressTracker {
    pub fn observe(&mut self, line: &str) -> Option<Progress> {
        if self.duration.is_none() {
            if let Some(caps) = DURATION.captures(line) {
                self.duration = seconds(&caps).filter(|d| *d > 0.0);
            }
        }

        let out_time = OUT_TIME.captures(line).and_then(|caps| seconds(&caps))?;
        let percent = self
            .duration
            .map(|total| (out_time / total * 100.0).clamp(0.0, 100.0));
        Some(Progress {
            out_time_secs: out_time,
            duration_secs: self.duration,
            percent,
        })
    }
}

fn seconds(caps: &Captures<'_>) -> Option<f64> {
    let h: f64 = caps.get(1)?.as_str().parse().ok()?;
    let m: f64 = caps.get(2)?.as_str().parse().ok()?;
    let s: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + s)
}
