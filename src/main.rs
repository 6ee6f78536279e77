//! Session Guardian binary
//!
//! One end-to-end run: restore the FL.ru session, check for unread
//! notifications, alert Telegram when one is present.
//!
//! Configuration comes from the environment (optionally via a `.env` file);
//! see `GuardConfig` for the variable list. Exits non-zero with the error
//! text on any failure.

use tracing::{error, info};

use session_guardian::{guardian, init_logging, GuardConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let _guard = init_logging();

    info!("Starting Session Guardian");
    if let Some(dir) = session_guardian::log_dir() {
        info!("Log files saved to: {}", dir.display());
    }

    let config = GuardConfig::from_env();

    if let Err(e) = guardian::run(&config).await {
        error!("Run aborted: {}", e);
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
