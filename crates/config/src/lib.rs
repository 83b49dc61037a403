//! portalsink configuration
use clap::Parser;
use dotenvy::dotenv;
use url::Url;

use primitives::TableOptions;

/// Load environment variables from the file named by `ENV_FILE`, or from the
/// default `.env` (ignored if absent). Call before parsing [`Opts`].
pub fn load_env() -> Result<(), dotenvy::Error> {
    if let Ok(custom_env_file) = std::env::var("ENV_FILE") {
        dotenvy::from_filename(custom_env_file)?;
    } else {
        dotenv().ok();
    }
    Ok(())
}

/// Clickhouse database configuration options
#[derive(Debug, Clone, Parser)]
pub struct ClickhouseOpts {
    /// Clickhouse URL
    #[clap(long, env = "CLICKHOUSE_URL")]
    pub url: Url,
    /// Clickhouse database
    #[clap(long, env = "CLICKHOUSE_DB")]
    pub db: String,
    /// Clickhouse username
    #[clap(long, env = "CLICKHOUSE_USERNAME")]
    pub username: String,
    /// Clickhouse password
    #[clap(long, env = "CLICKHOUSE_PASSWORD", default_value = "")]
    pub password: String,
}

/// Buffering configuration options
#[derive(Debug, Clone, Parser)]
pub struct BufferOpts {
    /// Default low watermark: minimum buffered rows before a table flush
    #[clap(long, env = "BUFFER_LOW_WATERMARK", default_value = "8192")]
    pub low_watermark: u32,
    /// Default high watermark: maximum buffered rows before backpressure
    #[clap(long, env = "BUFFER_HIGH_WATERMARK", default_value = "32768")]
    pub high_watermark: u32,
}

impl BufferOpts {
    /// The per-table options these defaults describe.
    pub const fn table_options(&self) -> TableOptions {
        TableOptions { low_watermark: self.low_watermark, high_watermark: self.high_watermark }
    }
}

/// CLI options for a portalsink pipeline
#[derive(Debug, Clone, Parser)]
pub struct Opts {
    /// Clickhouse database configuration
    #[clap(flatten)]
    pub clickhouse: ClickhouseOpts,

    /// Buffering configuration
    #[clap(flatten)]
    pub buffers: BufferOpts,
}

#[cfg(test)]
mod tests {
    use super::Opts;

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        Opts::command().debug_assert()
    }
}
