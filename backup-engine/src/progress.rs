// SPDX-License-Identifier: GPL-3.0-only

//! Coarse copy progress, an observability signal only

use std::time::{Duration, Instant};

use tracing::info;

pub fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    ((done as f64 / total as f64) * 100.0).clamp(0.0, 100.0)
}

pub fn eta(done: u64, total: u64, elapsed: Duration) -> Option<Duration> {
    if done == 0 || elapsed.is_zero() {
        return None;
    }
    if done >= total {
        return Some(Duration::ZERO);
    }

    let rate = done as f64 / elapsed.as_secs_f64();
    Some(Duration::from_secs_f64((total - done) as f64 / rate))
}

pub fn format_eta(eta: Option<Duration>) -> String {
    let Some(eta) = eta else {
        return "--:--:--".to_string();
    };
    let secs = eta.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Logs every `every_chunks` chunks of a fixed-length copy
#[derive(Debug)]
pub struct ChunkProgress {
    total: u64,
    every_chunks: u64,
    chunks: u64,
    started: Instant,
}

impl ChunkProgress {
    pub fn new(total: u64, every_chunks: u64) -> Self {
        Self {
            total,
            every_chunks: every_chunks.max(1),
            chunks: 0,
            started: Instant::now(),
        }
    }

    /// Count one chunk; returns true when a progress line was due
    pub fn chunk_done(&mut self, offset: u64) -> bool {
        self.chunks += 1;
        if self.chunks % self.every_chunks != 0 {
            return false;
        }

        info!(
            copied = %format_bytes(offset),
            total = %format_bytes(self.total),
            percent = format_args!("{:.1}", percent(offset, self.total)),
            eta = %format_eta(eta(offset, self.total, self.started.elapsed())),
            "block copy progress"
        );
        true
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_counts_as_done() {
        assert_eq!(percent(0, 0), 100.0);
        assert_eq!(percent(512, 1024), 50.0);
        assert_eq!(eta(0, 1024, Duration::from_secs(1)), None);
        assert_eq!(eta(1024, 1024, Duration::from_secs(1)), Some(Duration::ZERO));
    }

    #[test]
    fn formats_human_sizes_and_eta() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MiB");
        assert_eq!(format_eta(Some(Duration::from_secs(3725))), "01:02:05");
        assert_eq!(format_eta(None), "--:--:--");
    }

    #[test]
    fn reports_every_nth_chunk() {
        let mut progress = ChunkProgress::new(10, 4);
        let due: Vec<bool> = (1..=8).map(|chunk| progress.chunk_done(chunk)).collect();
        assert_eq!(due, [false, false, false, true, false, false, false, true]);
        assert_eq!(progress.chunks(), 8);
    }
}
