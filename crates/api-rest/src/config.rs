//! Service configuration resolved once at startup.
//!
//! Environment variables are read here and nowhere else; request handlers
//! only ever see the resolved values.

use std::path::PathBuf;
use std::time::Duration;

/// Default bind address for the REST server.
pub const DEFAULT_ADDR: &str = "0.0.0.0:3000";

/// Default cap on one upload request's streamed bytes (512 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 512 * 1024 * 1024;

/// Runtime configuration for the datapack service.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Address the HTTP server binds
    pub addr: String,
    /// Root of the datapack storage tree
    pub data_dir: PathBuf,
    /// Path of the encryption executable's jar
    pub encryption_jar: PathBuf,
    /// Bound on a single encryption run
    pub encrypt_timeout: Duration,
    /// Cap on one upload request's total streamed bytes
    pub max_upload_bytes: u64,
    /// Workshops the static registry reports as active
    pub active_workshops: Vec<u32>,
}

impl ServiceConfig {
    /// Resolves the configuration from the environment.
    ///
    /// # Environment Variables
    /// - `GEOCHART_REST_ADDR`: bind address (default `0.0.0.0:3000`)
    /// - `GEOCHART_DATA_DIR`: storage root (required)
    /// - `GEOCHART_ENCRYPT_JAR`: encryption jar path (required)
    /// - `GEOCHART_ENCRYPT_TIMEOUT_SECS`: encryption timeout (default 300)
    /// - `GEOCHART_MAX_UPLOAD_BYTES`: upload cap (default 512 MiB)
    /// - `GEOCHART_ACTIVE_WORKSHOPS`: comma-separated workshop ids
    ///
    /// # Errors
    ///
    /// Fails if a required variable is missing, a numeric variable does
    /// not parse, or the data directory does not exist.
    pub fn from_env() -> anyhow::Result<Self> {
        let addr = std::env::var("GEOCHART_REST_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.into());

        let data_dir = PathBuf::from(
            std::env::var("GEOCHART_DATA_DIR")
                .map_err(|_| anyhow::anyhow!("GEOCHART_DATA_DIR is not set"))?,
        );
        if !data_dir.is_dir() {
            anyhow::bail!("Data directory does not exist: {}", data_dir.display());
        }

        let encryption_jar = PathBuf::from(
            std::env::var("GEOCHART_ENCRYPT_JAR")
                .map_err(|_| anyhow::anyhow!("GEOCHART_ENCRYPT_JAR is not set"))?,
        );

        let encrypt_timeout = match std::env::var("GEOCHART_ENCRYPT_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(raw.parse()?),
            Err(_) => geochart_encrypt::DEFAULT_ENCRYPT_TIMEOUT,
        };

        let max_upload_bytes = match std::env::var("GEOCHART_MAX_UPLOAD_BYTES") {
            Ok(raw) => raw.parse()?,
            Err(_) => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let active_workshops = match std::env::var("GEOCHART_ACTIVE_WORKSHOPS") {
            Ok(raw) => raw
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().parse())
                .collect::<Result<Vec<u32>, _>>()?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            addr,
            data_dir,
            encryption_jar,
            encrypt_timeout,
            max_upload_bytes,
            active_workshops,
        })
    }
}
