use clap::Parser;

use magpie_bot::config::Config;
use magpie_bot::error::MagpieBotError;
use magpie_bot::{daemon, logging, runtime_paths, Result};

#[derive(Parser, Debug)]
#[command(name = "magpie-bot")]
#[command(about = "Personal assistant bot with a durable reminder scheduler")]
struct Cli {
    #[arg(long, default_value_t = runtime_paths::default_config_path())]
    config: String,

    /// Override the reminders snapshot file from the config.
    #[arg(long)]
    reminders_path: Option<String>,

    #[arg(long, env = "MAGPIE_TELEGRAM_TOKEN")]
    token: Option<String>,

    #[arg(long, env = "MAGPIE_ALLOWED_CHAT_ID")]
    allowed_chat_id: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing("magpie_bot");
    let cli = Cli::parse();

    let mut config = Config::load_or_default(&cli.config)?;
    if let Some(path) = cli.reminders_path {
        let reminders = config
            .reminders
            .get_or_insert_with(|| magpie_bot::config::RemindersConfig {
                path: None,
                poll_timeout_seconds: None,
            });
        reminders.path = Some(path);
    }

    let token = cli
        .token
        .or_else(|| config.telegram.as_ref().and_then(|t| t.token.clone()))
        .ok_or_else(|| {
            MagpieBotError::Config(
                "telegram token is required (--token, MAGPIE_TELEGRAM_TOKEN, or config file)"
                    .to_string(),
            )
        })?;
    let allowed_chat_id = cli
        .allowed_chat_id
        .or_else(|| config.telegram.as_ref().and_then(|t| t.allowed_chat_id))
        .ok_or_else(|| {
            MagpieBotError::Config(
                "allowed chat id is required (--allowed-chat-id, MAGPIE_ALLOWED_CHAT_ID, or config file)"
                    .to_string(),
            )
        })?;

    tracing::info!("magpie-bot is online");
    daemon::run(config, token, allowed_chat_id).await
}
