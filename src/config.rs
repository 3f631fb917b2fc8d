use std::env;
use std::path::PathBuf;

/// Browser window size applied at launch.
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 900,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Directories scanned for recordings; the first one also holds the
    /// persistent store file.
    pub base_dirs: Vec<PathBuf>,
    pub snapshot_dir: PathBuf,
    pub headless: bool,
    pub screenshots: bool,
    pub delay_ms: u64,
    pub delay_factor: u64,
    pub viewport: Viewport,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            base_dirs: vec![PathBuf::from(
                env::var("RECPLAY_BASE_DIR").unwrap_or_else(|_| ".".to_string()),
            )],
            snapshot_dir: PathBuf::from(
                env::var("RECPLAY_SNAPSHOT_DIR").unwrap_or_else(|_| "./snapshots".to_string()),
            ),
            headless: env::var("RECPLAY_HEADED").is_err(),
            screenshots: env::var("RECPLAY_SCREENSHOTS").is_ok(),
            delay_ms: env::var("RECPLAY_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            delay_factor: env::var("RECPLAY_DELAY_FACTOR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            viewport: Viewport::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dirs: vec![PathBuf::from(".")],
            snapshot_dir: PathBuf::from("./snapshots"),
            headless: true,
            screenshots: false,
            delay_ms: 500,
            delay_factor: 1,
            viewport: Viewport::default(),
        }
    }
}
