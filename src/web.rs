#![cfg(not(tarpaulin_include))]

use sheetplot::{ServerConfig, app};

/// Main entry point for the web application
///
/// Sets up logging and serves the upload page on the default address until
/// the process is stopped.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::default();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_filter()))
        .init();

    app::run(config).await
}
