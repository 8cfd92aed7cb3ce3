//! Binary entry point: load settings, set up logging, run the bot.

use anime_discord::{logging, BotConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config = match BotConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    let log_guard = match logging::init(&config.log_path) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };
    info!(profile = ?config.profile, log_file = %config.log_path.display(), "starting bot");

    if let Err(e) = anime_discord::run(config).await {
        error!(error = %e, "bot stopped");
        // exit() skips destructors, so flush the log file first.
        drop(log_guard);
        std::process::exit(1);
    }
}
