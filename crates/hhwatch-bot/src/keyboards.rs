//! Inline keyboards, their callback tokens, and the menu texts that go with them.

use hhwatch_core::{UserRecord, INTERVAL_PRESETS_HOURS};
use sha2::{Digest, Sha256};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

pub const REMOVE_PROMPT: &str = "Выберите ключевые слова для удаления:";
pub const REMOVE_FINISHED: &str = "✅ Готово!";
pub const KEYWORDS_NOW_EMPTY: &str = "Список ключевых слов пуст.";
pub const SETTINGS_TITLE: &str = "⚙️ Настройки:";
pub const SETTINGS_SAVED: &str = "✅ Настройки сохранены!";
pub const INTERVAL_PROMPT: &str = "⏱ Выберите интервал проверки новых вакансий:";

const INTERVALS_PER_ROW: usize = 3;

/// Parsed `callback_data`. Keyword buttons carry an index plus a short hash of
/// the keyword, because Telegram limits callback data to 64 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    RemoveKeyword { index: usize, tag: u32 },
    RemoveDone,
    ToggleNotifications,
    ChangeInterval,
    SetInterval(u32),
    BackToSettings,
    SettingsDone,
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "kw:done" => Some(Self::RemoveDone),
            "st:toggle" => Some(Self::ToggleNotifications),
            "st:interval" => Some(Self::ChangeInterval),
            "st:back" => Some(Self::BackToSettings),
            "st:done" => Some(Self::SettingsDone),
            _ => {
                if let Some(rest) = data.strip_prefix("kw:rm:") {
                    let (index, tag) = rest.split_once(':')?;
                    if tag.len() != 8 || !tag.bytes().all(|b| b.is_ascii_hexdigit()) {
                        return None;
                    }
                    return Some(Self::RemoveKeyword {
                        index: index.parse().ok()?,
                        tag: u32::from_str_radix(tag, 16).ok()?,
                    });
                }
                let hours: u32 = data.strip_prefix("st:set:")?.parse().ok()?;
                INTERVAL_PRESETS_HOURS
                    .contains(&hours)
                    .then_some(Self::SetInterval(hours))
            }
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::RemoveKeyword { index, tag } => format!("kw:rm:{index}:{tag:08x}"),
            Self::RemoveDone => "kw:done".to_string(),
            Self::ToggleNotifications => "st:toggle".to_string(),
            Self::ChangeInterval => "st:interval".to_string(),
            Self::SetInterval(hours) => format!("st:set:{hours}"),
            Self::BackToSettings => "st:back".to_string(),
            Self::SettingsDone => "st:done".to_string(),
        }
    }
}

/// First four bytes of the keyword's SHA-256.
pub fn keyword_tag(keyword: &str) -> u32 {
    let digest = Sha256::digest(keyword.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// The keyword a removal button still points at, or `None` when the list has
/// shifted since the button was drawn.
pub fn removal_target(keywords: &[String], index: usize, tag: u32) -> Option<&str> {
    keywords
        .get(index)
        .filter(|keyword| keyword_tag(keyword) == tag)
        .map(String::as_str)
}

fn button(label: impl Into<String>, action: CallbackAction) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(label, action.encode())
}

pub fn keyword_list(keywords: &[String]) -> String {
    keywords
        .iter()
        .map(|k| format!("• {k}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One removal button per keyword, then "done".
pub fn removal_keyboard(keywords: &[String]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = keywords
        .iter()
        .enumerate()
        .map(|(index, keyword)| {
            vec![button(
                format!("❌ {keyword}"),
                CallbackAction::RemoveKeyword {
                    index,
                    tag: keyword_tag(keyword),
                },
            )]
        })
        .collect();
    rows.push(vec![button("✅ Готово", CallbackAction::RemoveDone)]);
    InlineKeyboardMarkup::new(rows)
}

pub fn settings_keyboard(record: &UserRecord) -> InlineKeyboardMarkup {
    let notifications = if record.notifications_enabled {
        "🔔 Уведомления: включены"
    } else {
        "🔕 Уведомления: выключены"
    };
    InlineKeyboardMarkup::new(vec![
        vec![button(notifications, CallbackAction::ToggleNotifications)],
        vec![button(
            format!("⏱ Интервал проверки: {} ч", record.check_interval_hours()),
            CallbackAction::ChangeInterval,
        )],
        vec![button("✅ Готово", CallbackAction::SettingsDone)],
    ])
}

pub fn interval_keyboard() -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = INTERVAL_PRESETS_HOURS
        .chunks(INTERVALS_PER_ROW)
        .map(|chunk| {
            chunk
                .iter()
                .map(|hours| button(format!("{hours} ч"), CallbackAction::SetInterval(*hours)))
                .collect()
        })
        .collect();
    rows.push(vec![button("↩️ Назад", CallbackAction::BackToSettings)]);
    InlineKeyboardMarkup::new(rows)
}
