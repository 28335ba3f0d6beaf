//! Scratch-disk monitoring and back-pressure.
//!
//! Samples the scratch partition on an interval and maps usage into
//! bands. The warning band triggers the temp cleaner; the critical band
//! pauses the consumer (in-flight handlers finish, nothing new is
//! fetched); the emergency band additionally runs an aggressive cleanup.
//! Dropping back below critical resumes the consumer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vidra_config::DiskConfig;

use crate::pipeline::scratch::SCRATCH_DIR_PREFIX;

/// One reading of the scratch partition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiskSample {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl DiskSample {
    pub fn used_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        used as f64 * 100.0 / self.total_bytes as f64
    }
}

/// Capacity probe; a trait so tests can inject synthetic readings.
pub trait DiskProbe: Send + Sync {
    fn sample(&self, path: &Path) -> std::io::Result<DiskSample>;
}

/// Real probe over the filesystem holding `path`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl DiskProbe for FsProbe {
    fn sample(&self, path: &Path) -> std::io::Result<DiskSample> {
        Ok(DiskSample {
            total_bytes: fs2::total_space(path)?,
            available_bytes: fs2::available_space(path)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskBand {
    Normal,
    Warning,
    Critical,
    Emergency,
}

pub fn band_for(used_percent: f64, config: &DiskConfig) -> DiskBand {
    if used_percent >= config.emergency_percent {
        DiskBand::Emergency
    } else if used_percent >= config.critical_percent {
        DiskBand::Critical
    } else if used_percent >= config.warning_percent {
        DiskBand::Warning
    } else {
        DiskBand::Normal
    }
}

/// What the consumer and the heartbeat observe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiskState {
    pub used_percent: f64,
    pub paused: bool,
}

impl Default for DiskState {
    fn default() -> Self {
        Self {
            used_percent: 0.0,
            paused: false,
        }
    }
}

pub struct DiskMonitor {
    config: DiskConfig,
    probe: Arc<dyn DiskProbe>,
    scratch_root: PathBuf,
    state_tx: watch::Sender<DiskState>,
}

impl std::fmt::Debug for DiskMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskMonitor")
            .field("scratch_root", &self.scratch_root)
            .finish_non_exhaustive()
    }
}

impl DiskMonitor {
    pub fn new(
        config: DiskConfig,
        probe: Arc<dyn DiskProbe>,
        scratch_root: PathBuf,
    ) -> (Self, watch::Receiver<DiskState>) {
        let (state_tx, state_rx) = watch::channel(DiskState::default());
        (
            Self {
                config,
                probe,
                scratch_root,
                state_tx,
            },
            state_rx,
        )
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_secs(
            self.config.sample_interval_secs.max(1),
        ));
        info!(
            "Disk monitor watching {:?} (warning {}%, critical {}%, emergency {}%)",
            self.scratch_root,
            self.config.warning_percent,
            self.config.critical_percent,
            self.config.emergency_percent
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.tick().await,
            }
        }
    }

    pub async fn tick(&self) {
        let sample = match self.probe.sample(&self.scratch_root) {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Disk sample failed for {:?}: {e}", self.scratch_root);
                return;
            }
        };
        let used_percent = sample.used_percent();
        let band = band_for(used_percent, &self.config);
        let was_paused = self.state_tx.borrow().paused;

        let paused = match band {
            DiskBand::Normal => false,
            DiskBand::Warning => {
                warn!(
                    "Scratch disk at {used_percent:.1}% (warning); cleaning aged scratch"
                );
                self.clean(Duration::from_secs(self.config.temp_max_age_secs))
                    .await;
                false
            }
            DiskBand::Critical => {
                if !was_paused {
                    warn!(
                        "Scratch disk at {used_percent:.1}% (critical); pausing consumer"
                    );
                }
                true
            }
            DiskBand::Emergency => {
                error!(
                    "Scratch disk at {used_percent:.1}% (emergency); aggressive cleanup"
                );
                self.clean(Duration::ZERO).await;
                true
            }
        };

        if was_paused && !paused {
            info!("Scratch disk recovered at {used_percent:.1}%; resuming consumer");
        }
        let _ = self.state_tx.send(DiskState {
            used_percent,
            paused,
        });
    }

    async fn clean(&self, max_age: Duration) {
        match clean_scratch(&self.scratch_root, max_age).await {
            Ok(0) => {}
            Ok(removed) => info!("Temp cleaner removed {removed} scratch tree(s)"),
            Err(e) => warn!("Temp cleaner failed: {e}"),
        }
    }
}

/// Picks the scratch root: the ramdisk when enabled and roomy enough,
/// otherwise the configured temp path.
pub fn select_scratch_root(
    temp_path: &Path,
    ramdisk: &vidra_config::RamdiskConfig,
) -> PathBuf {
    if !ramdisk.enabled {
        return temp_path.to_path_buf();
    }
    match FsProbe.sample(&ramdisk.path) {
        Ok(sample)
            if sample.available_bytes >= ramdisk.min_free_mb * 1024 * 1024 =>
        {
            info!("Using ramdisk scratch at {:?}", ramdisk.path);
            ramdisk.path.clone()
        }
        Ok(sample) => {
            warn!(
                "Ramdisk below {} MiB free ({} available); using {:?}",
                ramdisk.min_free_mb, sample.available_bytes, temp_path
            );
            temp_path.to_path_buf()
        }
        Err(e) => {
            warn!("Ramdisk probe failed ({e}); using {:?}", temp_path);
            temp_path.to_path_buf()
        }
    }
}

/// Removes orphaned job scratch trees older than `max_age`. Only
/// directories carrying the scratch prefix are touched.
pub async fn clean_scratch(
    root: &Path,
    max_age: Duration,
) -> std::io::Result<usize> {
    let mut removed = 0;
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let now = SystemTime::now();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(SCRATCH_DIR_PREFIX) {
            continue;
        }
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let modified = entry.metadata().await?.modified()?;
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age >= max_age {
            debug!("Removing orphaned scratch {:?}", entry.path());
            tokio::fs::remove_dir_all(entry.path()).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProbe {
        percent: std::sync::Mutex<f64>,
    }

    impl FakeProbe {
        fn new(percent: f64) -> Arc<Self> {
            Arc::new(Self {
                percent: std::sync::Mutex::new(percent),
            })
        }

        fn set(&self, percent: f64) {
            *self.percent.lock().unwrap() = percent;
        }
    }

    impl DiskProbe for FakeProbe {
        fn sample(&self, _path: &Path) -> std::io::Result<DiskSample> {
            let percent = *self.percent.lock().unwrap();
            Ok(DiskSample {
                total_bytes: 1000,
                available_bytes: (1000.0 - percent * 10.0) as u64,
            })
        }
    }

    fn config() -> DiskConfig {
        DiskConfig {
            warning_percent: 75.0,
            critical_percent: 88.0,
            emergency_percent: 95.0,
            sample_interval_secs: 1,
            temp_max_age_secs: 3600,
        }
    }

    #[test]
    fn bands_partition_the_percentage() {
        let config = config();
        assert_eq!(band_for(10.0, &config), DiskBand::Normal);
        assert_eq!(band_for(75.0, &config), DiskBand::Warning);
        assert_eq!(band_for(88.0, &config), DiskBand::Critical);
        assert_eq!(band_for(95.0, &config), DiskBand::Emergency);
    }

    #[tokio::test]
    async fn critical_pauses_and_recovery_resumes() {
        let probe = FakeProbe::new(90.0);
        let tmp = tempfile::tempdir().unwrap();
        let (monitor, state_rx) = DiskMonitor::new(
            config(),
            probe.clone(),
            tmp.path().to_path_buf(),
        );

        monitor.tick().await;
        assert!(state_rx.borrow().paused);

        // Still critical: stays paused.
        probe.set(89.0);
        monitor.tick().await;
        assert!(state_rx.borrow().paused);

        // Back under critical: resumes.
        probe.set(50.0);
        monitor.tick().await;
        assert!(!state_rx.borrow().paused);
        assert!((state_rx.borrow().used_percent - 50.0).abs() < 1.0);
    }

    #[tokio::test]
    async fn emergency_cleans_all_scratch_trees() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = tmp.path().join(format!("{SCRATCH_DIR_PREFIX}stale"));
        tokio::fs::create_dir_all(&scratch).await.unwrap();
        tokio::fs::write(scratch.join("partial.ts"), b"x").await.unwrap();
        let keep = tmp.path().join("unrelated");
        tokio::fs::create_dir_all(&keep).await.unwrap();

        let probe = FakeProbe::new(97.0);
        let (monitor, state_rx) =
            DiskMonitor::new(config(), probe, tmp.path().to_path_buf());
        monitor.tick().await;

        assert!(state_rx.borrow().paused);
        assert!(!scratch.exists());
        assert!(keep.exists());
    }

    #[tokio::test]
    async fn cleaner_respects_age_threshold() {
        let tmp = tempfile::tempdir().unwrap();
        let fresh = tmp.path().join(format!("{SCRATCH_DIR_PREFIX}fresh"));
        tokio::fs::create_dir_all(&fresh).await.unwrap();

        // A fresh tree survives an age-gated sweep but not an aggressive one.
        let removed = clean_scratch(tmp.path(), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert!(fresh.exists());

        let removed = clean_scratch(tmp.path(), Duration::ZERO).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!fresh.exists());
    }

    #[test]
    fn sample_percent() {
        let sample = DiskSample {
            total_bytes: 1000,
            available_bytes: 250,
        };
        assert!((sample.used_percent() - 75.0).abs() < f64::EPSILON);
        let empty = DiskSample {
            total_bytes: 0,
            available_bytes: 0,
        };
        assert_eq!(empty.used_percent(), 0.0);
    }
}
