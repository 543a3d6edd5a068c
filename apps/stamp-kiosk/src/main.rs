//! # Stamp Kiosk Entry Point
//!
//! ```text
//! stamp-kiosk [config.toml]
//!
//!   STAMP_CAMERAS_DIR=/var/lib/stamp/cameras \
//!   STAMP_TOKEN=eyJhbGciOi... \
//!   STAMP_API_URL=https://passport.example.org \
//!   stamp-kiosk
//! ```
//!
//! Exit codes: 0 visit registered or operator quit, 2 bad configuration,
//! 3 login required, 1 anything else.

use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

use stamp_scan::{LeaveReason, ScanConfig};

#[tokio::main]
async fn main() -> ExitCode {
    stamp_kiosk::init_tracing();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match ScanConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid scanner configuration");
            return ExitCode::from(2);
        }
    };

    match stamp_kiosk::run(config).await {
        Ok(None) | Ok(Some(LeaveReason::Visited)) => ExitCode::SUCCESS,
        Ok(Some(reason)) => {
            eprintln!("Inicia sesión para registrar lugares ({}).", reason);
            ExitCode::from(3)
        }
        Err(e) if e.is_config_error() => {
            error!(error = %e, "Kiosk not configured");
            ExitCode::from(2)
        }
        Err(e) => {
            error!(error = %e, "Kiosk failed");
            ExitCode::FAILURE
        }
    }
}
