//! Telegram surface for hhwatch: commands, inline menus, outbound notifications.

pub mod handlers;
pub mod keyboards;

use std::sync::Arc;

use async_trait::async_trait;
use hhwatch_storage::StateStore;
use hhwatch_sync::{MessageFormat, Notifier, OutgoingMessage, VacancyChecker};
use teloxide::prelude::*;
use teloxide::types::{LinkPreviewOptions, ParseMode, UserId as TgUserId};
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};

pub use handlers::Command;

pub const CRATE_NAME: &str = "hhwatch-bot";

/// Dependencies shared by every update handler.
pub struct BotApp {
    pub store: Arc<StateStore>,
    pub checker: Arc<VacancyChecker>,
}

impl BotApp {
    pub fn new(checker: Arc<VacancyChecker>) -> Self {
        Self {
            store: checker.store().clone(),
            checker,
        }
    }
}

fn no_link_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, user_id: hhwatch_core::UserId, message: OutgoingMessage) -> anyhow::Result<()> {
        let chat_id = ChatId::from(TgUserId(user_id));
        let request = self.bot.send_message(chat_id, message.text);
        match message.format {
            MessageFormat::Plain => request.await?,
            MessageFormat::Html => {
                request
                    .parse_mode(ParseMode::Html)
                    .link_preview_options(no_link_preview())
                    .await?
            }
        };
        Ok(())
    }
}

/// Registers the command menu and runs the update dispatcher until Ctrl-C.
pub async fn run_bot(bot: Bot, app: Arc<BotApp>) {
    if let Err(err) = bot.set_my_commands(Command::bot_commands()).await {
        warn!(error = %err, "failed to register bot commands");
    }

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(handlers::handle_command),
        )
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback));

    info!("starting Telegram dispatcher");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![app])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use hhwatch_adapters::{AdapterError, SearchAdapter};
    use hhwatch_core::Posting;
    use tempfile::tempdir;

    struct NoopAdapter;

    #[async_trait]
    impl SearchAdapter for NoopAdapter {
        fn source_id(&self) -> &'static str {
            "noop"
        }

        async fn search(&self, _keyword: &str) -> Result<Vec<Posting>, AdapterError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn app_shares_the_checker_store() {
        let dir = tempdir().expect("tempdir");
        let store = Arc::new(StateStore::open(dir.path().join("user_data.json"), 3600).await);
        let notifier = Arc::new(TelegramNotifier::new(Bot::new("123:test")));
        let checker = Arc::new(VacancyChecker::new(store.clone(), Arc::new(NoopAdapter), notifier));
        let app = BotApp::new(checker);
        assert!(Arc::ptr_eq(&app.store, &store));
    }

    #[test]
    fn digests_disable_link_previews() {
        assert!(no_link_preview().is_disabled);
    }
}
