use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

/// Bytes in one MiB, used to turn `--max-file-size-mb` into a byte count.
pub const MIB: usize = 1024 * 1024;

/// Log directives used when `RUST_LOG` is unset. Access logs from the
/// `TraceLayer` are emitted at INFO, so they pass this filter.
pub const DEFAULT_LOG_DIRECTIVES: &str = "info,piece_classifier=info";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

// CLI argument structure, every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "piece-classifier")]
#[command(about = "Chess piece image classifier served over HTTP")]
pub struct Args {
    // Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    // Where to fetch the model artifact from when it is not on disk yet
    #[arg(long, env = "MODEL_URL")]
    pub model_url: Option<String>,

    // Local path of the cached model artifact
    #[arg(long, env = "MODEL_PATH", default_value = "models/export.onnx")]
    pub model_path: PathBuf,

    // Expected hex SHA-256 of a freshly downloaded artifact
    #[arg(long, env = "MODEL_SHA256")]
    pub model_sha256: Option<String>,

    // Model download timeout in seconds
    #[arg(long, env = "MODEL_DOWNLOAD_TIMEOUT_SECS", default_value_t = 300)]
    pub model_download_timeout: u64,

    // Origins allowed to make cross-origin calls (comma-separated)
    // Example: "http://localhost:5000,https://chess.example.com"
    #[arg(
        long,
        env = "ALLOWED_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:5000"
    )]
    pub allowed_origins: Vec<String>,

    // Host header values the API answers to (comma-separated, `*.domain` allowed)
    #[arg(
        long,
        env = "ALLOWED_HOSTS",
        value_delimiter = ',',
        default_value = "localhost,127.0.0.1,*.onrender.com"
    )]
    pub allowed_hosts: Vec<String>,

    // Maximum upload size in MiB
    #[arg(long, env = "MAX_FILE_SIZE_MB", default_value_t = 10)]
    pub max_file_size_mb: usize,

    // Rate limit max requests per client per minute
    #[arg(long, env = "RATE_LIMIT_PER_MINUTE", default_value_t = 30)]
    pub rate_limit_per_minute: usize,

    // How often idle rate limit entries are evicted, in seconds
    #[arg(long, env = "RATE_LIMIT_SWEEP_SECS", default_value_t = 300)]
    pub rate_limit_sweep_interval: u64,

    // Directory served under /static
    #[arg(long, env = "STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,

    /// Sets the log format used for all logs.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::default())]
    pub log_format: LogFormat,
}

/// Loads `.env` from the working directory or one of its parents.
/// Variables already set in the process environment are not overridden.
/// A missing file is `Ok(None)`; a file that exists but cannot be parsed is an error.
pub fn load_env_file() -> Result<Option<PathBuf>, dotenvy::Error> {
    optional_env_file(dotenvy::dotenv())
}

fn optional_env_file(
    loaded: Result<PathBuf, dotenvy::Error>,
) -> Result<Option<PathBuf>, dotenvy::Error> {
    match loaded {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

impl Args {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_file_size_mb.saturating_mul(MIB)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.model_download_timeout)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit_sweep_interval.max(1))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["piece-classifier"]).unwrap();
        assert_eq!(args.port, 5000);
        assert_eq!(args.max_upload_bytes(), 10 * MIB);
        assert_eq!(args.rate_limit_per_minute, 30);
        assert_eq!(args.allowed_origins, vec!["http://localhost:5000"]);
        assert_eq!(
            args.allowed_hosts,
            vec!["localhost", "127.0.0.1", "*.onrender.com"]
        );
        assert_eq!(args.download_timeout(), Duration::from_secs(300));
        assert_eq!(args.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_comma_separated_lists() {
        let args = Args::try_parse_from([
            "piece-classifier",
            "--allowed-origins",
            "https://a.example,https://b.example",
            "--max-file-size-mb",
            "2",
        ])
        .unwrap();
        assert_eq!(
            args.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(args.max_upload_bytes(), 2 * MIB);
    }

    #[test]
    fn test_missing_env_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let loaded = optional_env_file(dotenvy::from_path(&path).map(|()| path.clone()));
        assert!(matches!(loaded, Ok(None)));
    }

    #[test]
    fn test_env_file_values_reach_the_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "PIECE_CLASSIFIER_ENV_FILE_CHECK=from-dotenv\n").unwrap();

        let loaded = optional_env_file(dotenvy::from_path(&path).map(|()| path.clone()));
        assert_eq!(loaded.unwrap(), Some(path));
        assert_eq!(
            std::env::var("PIECE_CLASSIFIER_ENV_FILE_CHECK").unwrap(),
            "from-dotenv"
        );
    }

    #[test]
    fn test_malformed_env_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "NOT A VALID LINE\n").unwrap();

        let loaded = optional_env_file(dotenvy::from_path(&path).map(|()| path.clone()));
        assert!(loaded.is_err());
    }
}
