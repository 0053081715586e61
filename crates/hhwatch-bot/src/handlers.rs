use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use hhwatch_core::parse_keywords;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, ParseMode};
use teloxide::utils::command::BotCommands;
use tracing::{debug, info, warn};

use crate::keyboards::{self, CallbackAction};
use crate::BotApp;

pub const START_TEXT: &str = "👋 Привет! Я бот для отслеживания вакансий на hh.ru.\n\n\
🔍 Чтобы начать поиск, добавьте ключевые слова с помощью команды /add_keywords.\n\
📋 Вы можете посмотреть текущие настройки через /settings.\n\
ℹ️ Для получения справки используйте /help.";

pub const HELP_TEXT: &str = "📚 <b>Доступные команды:</b>\n\n\
/start - Перезапуск бота\n\
/add_keywords - Добавить ключевые слова для поиска\n\
/remove_keywords - Удалить ключевые слова\n\
/list_keywords - Показать текущие ключевые слова\n\
/search - Выполнить поиск вакансий сейчас\n\
/settings - Настройки уведомлений\n\
/help - Показать эту справку\n\n\
🔍 Бот автоматически ищет вакансии в режиме удаленной работы по всем городам и странам.";

pub const ADD_KEYWORDS_USAGE: &str = "Укажите ключевые слова через пробел или в кавычках.\n\
Пример: /add_keywords python django\n\
Или: /add_keywords \"python разработчик\" java";

pub const ADD_KEYWORDS_FAILED: &str = "❌ Не удалось добавить ключевые слова. Проверьте формат ввода.";
pub const NO_KEYWORDS_TO_REMOVE: &str = "У вас нет сохраненных ключевых слов.";
pub const NO_KEYWORDS_TO_LIST: &str =
    "У вас нет сохраненных ключевых слов. Добавьте их с помощью /add_keywords.";

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "snake_case", description = "Доступные команды:")]
pub enum Command {
    #[command(description = "перезапуск бота")]
    Start,
    #[command(description = "показать справку")]
    Help,
    #[command(description = "добавить ключевые слова для поиска")]
    AddKeywords(String),
    #[command(description = "удалить ключевые слова")]
    RemoveKeywords,
    #[command(description = "показать текущие ключевые слова")]
    ListKeywords,
    #[command(description = "выполнить поиск вакансий сейчас")]
    Search,
    #[command(description = "настройки уведомлений")]
    Settings,
}

pub async fn handle_command(bot: Bot, msg: Message, cmd: Command, app: Arc<BotApp>) -> Result<()> {
    let Some(user_id) = msg.from.as_ref().map(|user| user.id.0) else {
        debug!(chat_id = %msg.chat.id, "ignoring command without sender");
        return Ok(());
    };
    let chat_id = msg.chat.id;
    let record = app.store.get_or_create(user_id).await;

    match cmd {
        Command::Start => {
            bot.send_message(chat_id, START_TEXT).await?;
        }
        Command::Help => {
            bot.send_message(chat_id, HELP_TEXT)
                .parse_mode(ParseMode::Html)
                .await?;
        }
        Command::AddKeywords(args) => {
            if args.trim().is_empty() {
                bot.send_message(chat_id, ADD_KEYWORDS_USAGE).await?;
                return Ok(());
            }
            let parsed = parse_keywords(&args);
            if parsed.is_empty() {
                bot.send_message(chat_id, ADD_KEYWORDS_FAILED).await?;
                return Ok(());
            }

            let (added, keywords) = app
                .store
                .update(user_id, |r| (r.add_keywords(parsed), r.keywords.clone()))
                .await;
            info!(user_id, added, total = keywords.len(), "keywords added");

            bot.send_message(
                chat_id,
                format!(
                    "✅ Ключевые слова успешно добавлены!\n\n🔍 Текущие ключевые слова:\n{}\n\n🔄 Выполняю поиск вакансий...",
                    keyboards::keyword_list(&keywords)
                ),
            )
            .await?;
            app.checker.search_and_report(user_id, Utc::now()).await?;
        }
        Command::RemoveKeywords => {
            if record.keywords.is_empty() {
                bot.send_message(chat_id, NO_KEYWORDS_TO_REMOVE).await?;
            } else {
                bot.send_message(chat_id, keyboards::REMOVE_PROMPT)
                    .reply_markup(keyboards::removal_keyboard(&record.keywords))
                    .await?;
            }
        }
        Command::ListKeywords => {
            if record.keywords.is_empty() {
                bot.send_message(chat_id, NO_KEYWORDS_TO_LIST).await?;
            } else {
                bot.send_message(
                    chat_id,
                    format!(
                        "🔍 Ваши ключевые слова:\n{}",
                        keyboards::keyword_list(&record.keywords)
                    ),
                )
                .await?;
            }
        }
        Command::Search => {
            app.checker.search_and_report(user_id, Utc::now()).await?;
        }
        Command::Settings => {
            bot.send_message(chat_id, keyboards::SETTINGS_TITLE)
                .reply_markup(keyboards::settings_keyboard(&record))
                .await?;
        }
    }
    Ok(())
}

async fn edit_menu(
    bot: &Bot,
    chat_id: ChatId,
    message_id: teloxide::types::MessageId,
    text: &str,
    markup: Option<InlineKeyboardMarkup>,
) -> Result<()> {
    let request = bot.edit_message_text(chat_id, message_id, text);
    match markup {
        Some(markup) => request.reply_markup(markup).await?,
        None => request.await?,
    };
    Ok(())
}

pub async fn handle_callback(bot: Bot, q: CallbackQuery, app: Arc<BotApp>) -> Result<()> {
    bot.answer_callback_query(q.id.clone()).await?;

    let user_id = q.from.id.0;
    let Some(message) = q.message.as_ref() else {
        return Ok(());
    };
    let (chat_id, message_id) = (message.chat().id, message.id());
    let Some(action) = q.data.as_deref().and_then(CallbackAction::parse) else {
        debug!(user_id, data = ?q.data, "ignoring unknown callback data");
        return Ok(());
    };

    match action {
        CallbackAction::RemoveKeyword { index, tag } => {
            let keywords = app
                .store
                .update(user_id, |r| {
                    match keyboards::removal_target(&r.keywords, index, tag).map(str::to_string) {
                        Some(keyword) => {
                            r.remove_keyword(&keyword);
                            info!(user_id, keyword = %keyword, "keyword removed");
                        }
                        None => debug!(user_id, index, "stale keyword removal ignored"),
                    }
                    r.keywords.clone()
                })
                .await;
            if keywords.is_empty() {
                edit_menu(&bot, chat_id, message_id, keyboards::KEYWORDS_NOW_EMPTY, None).await?;
            } else {
                edit_menu(
                    &bot,
                    chat_id,
                    message_id,
                    keyboards::REMOVE_PROMPT,
                    Some(keyboards::removal_keyboard(&keywords)),
                )
                .await?;
            }
        }
        CallbackAction::RemoveDone => {
            edit_menu(&bot, chat_id, message_id, keyboards::REMOVE_FINISHED, None).await?;
        }
        CallbackAction::ToggleNotifications => {
            let record = app
                .store
                .update(user_id, |r| {
                    r.toggle_notifications();
                    r.clone()
                })
                .await;
            info!(user_id, enabled = record.notifications_enabled, "notifications toggled");
            edit_menu(
                &bot,
                chat_id,
                message_id,
                keyboards::SETTINGS_TITLE,
                Some(keyboards::settings_keyboard(&record)),
            )
            .await?;
        }
        CallbackAction::ChangeInterval => {
            edit_menu(
                &bot,
                chat_id,
                message_id,
                keyboards::INTERVAL_PROMPT,
                Some(keyboards::interval_keyboard()),
            )
            .await?;
        }
        CallbackAction::SetInterval(hours) => {
            let updated = app
                .store
                .update(user_id, |r| r.set_check_interval_hours(hours).map(|()| r.clone()))
                .await;
            match updated {
                Ok(record) => {
                    info!(user_id, hours, "check interval changed");
                    edit_menu(
                        &bot,
                        chat_id,
                        message_id,
                        keyboards::SETTINGS_TITLE,
                        Some(keyboards::settings_keyboard(&record)),
                    )
                    .await?;
                }
                Err(err) => warn!(user_id, error = %err, "rejected interval change"),
            }
        }
        CallbackAction::BackToSettings => {
            let record = app.store.get_or_create(user_id).await;
            edit_menu(
                &bot,
                chat_id,
                message_id,
                keyboards::SETTINGS_TITLE,
                Some(keyboards::settings_keyboard(&record)),
            )
            .await?;
        }
        CallbackAction::SettingsDone => {
            edit_menu(&bot, chat_id, message_id, keyboards::SETTINGS_SAVED, None).await?;
        }
    }
    Ok(())
}
