//! Pipeline-side progress reporting.
//!
//! Stages write [`PipelineProgress`] into a channel owned by the job
//! handler; the handler forwards to the broker. Pipeline code never
//! touches broker I/O, and a full or closed channel never fails a stage.

use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc;

/// One progress tick at a stage boundary (or inside the encode band).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineProgress {
    pub stage: &'static str,
    /// Cumulative completion, 0-100.
    pub percent: u8,
    pub message: String,
}

/// Monotonic progress emitter handed to every stage.
///
/// Percentages never regress: a tick below the high-water mark is lifted
/// to it, so consumers see a non-decreasing sequence even when encode
/// sub-progress estimates jitter.
#[derive(Debug)]
pub struct ProgressSink {
    tx: mpsc::Sender<PipelineProgress>,
    high_water: AtomicU8,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<PipelineProgress>) -> Self {
        Self {
            tx,
            high_water: AtomicU8::new(0),
        }
    }

    pub async fn emit(
        &self,
        stage: &'static str,
        percent: u8,
        message: impl Into<String>,
    ) {
        let clamped = percent.min(100);
        let level = self.high_water.fetch_max(clamped, Ordering::AcqRel);
        let percent = clamped.max(level);
        // Best-effort; a closed receiver never aborts the pipeline.
        let _ = self
            .tx
            .send(PipelineProgress {
                stage,
                percent,
                message: message.into(),
            })
            .await;
    }

    /// Current high-water mark.
    pub fn level(&self) -> u8 {
        self.high_water.load(Ordering::Acquire)
    }
}

/// Maps a 0.0-1.0 fraction into a percent band.
pub fn band_percent(band: (u8, u8), fraction: f64) -> u8 {
    let (start, end) = band;
    let span = end.saturating_sub(start) as f64;
    let offset = (span * fraction.clamp(0.0, 1.0)).round() as u8;
    (start + offset).min(end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn progress_never_regresses() {
        let (tx, mut rx) = mpsc::channel(16);
        let sink = ProgressSink::new(tx);

        sink.emit("probe", 10, "probing").await;
        sink.emit("encode", 40, "encoding").await;
        // A late, lower estimate is lifted to the high-water mark.
        sink.emit("encode", 35, "encoding").await;

        let percents: Vec<u8> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .iter()
        .map(|p| p.percent)
        .collect();
        assert_eq!(percents, vec![10, 40, 40]);
    }

    #[tokio::test]
    async fn closed_receiver_is_tolerated() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = ProgressSink::new(tx);
        sink.emit("fetch", 5, "staging").await;
        assert_eq!(sink.level(), 5);
    }

    #[test]
    fn band_mapping() {
        assert_eq!(band_percent((10, 85), 0.0), 10);
        assert_eq!(band_percent((10, 85), 0.5), 48);
        assert_eq!(band_percent((10, 85), 1.0), 85);
        assert_eq!(band_percent((10, 85), 2.0), 85);
        assert_eq!(band_percent((88, 96), 0.5), 92);
    }
}
