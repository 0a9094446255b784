use std::path::PathBuf;

use chrono_tz::Tz;

/// Engine configuration, read from `TUTORGRID_*` environment variables.
///
/// Instants are stored in UTC; `display_tz` is the single timezone the
/// presentation boundary converts into. Calendar days ("today", start of day)
/// are also evaluated in `display_tz`.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub display_tz: Tz,
    /// WAL appends between background compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            display_tz: Tz::UTC,
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("TUTORGRID_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            display_tz: std::env::var("TUTORGRID_DISPLAY_TZ")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.display_tz),
            compact_threshold: std::env::var("TUTORGRID_COMPACT_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            metrics_port: std::env::var("TUTORGRID_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}
