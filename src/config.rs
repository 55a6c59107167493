//! Server configuration from command-line flags and environment variables.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "calculations", version, about = "Calculations web application server")]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "CALC_BIND", default_value = "127.0.0.1:8000")]
    pub bind: String,

    /// Directory holding users.json and the calculation snapshot
    #[arg(long, env = "CALC_DATA_DIR", default_value = "database")]
    pub data_dir: PathBuf,

    /// Lifetime of a login session in seconds
    #[arg(long, env = "CALC_SESSION_TTL_SECS", default_value_t = 1800)]
    pub session_ttl_secs: u64,

    /// Allowed CORS origin; repeat the flag or comma-separate. `*` allows any
    #[arg(
        long = "cors-origin",
        env = "CALC_CORS_ORIGINS",
        value_delimiter = ',',
        default_value = "*"
    )]
    pub cors_origins: Vec<String>,

    /// Directory served under /static
    #[arg(long, env = "CALC_STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,
}

impl ServerConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn calculations_path(&self) -> PathBuf {
        self.data_dir.join("calculations.bin.gz")
    }
}
