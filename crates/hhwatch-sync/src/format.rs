//! Chat message rendering for vacancy digests.

use chrono::{DateTime, FixedOffset};
use hhwatch_core::{Posting, Salary};

/// Postings per outgoing message; keeps digests well under Telegram's size cap.
pub const POSTINGS_PER_MESSAGE: usize = 10;

pub const SALARY_NOT_SPECIFIED: &str = "Зарплата не указана";

pub const NO_KEYWORDS_FOR_SEARCH: &str =
    "❌ У вас нет сохраненных ключевых слов.\nДобавьте их с помощью команды /add_keywords.";
pub const SEARCH_STARTED: &str = "🔍 Ищу вакансии на hh.ru...";
pub const NOTHING_FOUND: &str = "🔍 По вашим ключевым словам не найдено вакансий в режиме удаленной работы.\nЯ буду уведомлять вас, когда появятся новые вакансии.";
pub const SEARCH_FINISHED: &str = "✅ Поиск завершен! Я буду уведомлять вас о новых вакансиях.\nВы можете изменить настройки уведомлений с помощью /settings.";

pub fn found_header(count: usize) -> String {
    format!("🔍 Найдено {count} вакансий:")
}

pub fn new_postings_header(count: usize) -> String {
    format!("🔔 Найдено {count} новых вакансий по вашим запросам!")
}

pub fn format_salary(salary: Option<&Salary>) -> String {
    let Some(salary) = salary else {
        return SALARY_NOT_SPECIFIED.to_string();
    };
    let from = salary.from.filter(|v| *v > 0.0);
    let to = salary.to.filter(|v| *v > 0.0);
    let currency = salary.currency.as_deref().unwrap_or_default();
    let text = match (from, to) {
        (Some(from), Some(to)) => format!("{from} - {to} {currency}"),
        (Some(from), None) => format!("от {from} {currency}"),
        (None, Some(to)) => format!("до {to} {currency}"),
        (None, None) => return SALARY_NOT_SPECIFIED.to_string(),
    };
    text.trim_end().to_string()
}

/// `dd.mm.YYYY HH:MM` in the posting's own offset.
pub fn format_published_at(published_at: &DateTime<FixedOffset>) -> String {
    published_at.format("%d.%m.%Y %H:%M").to_string()
}

/// Escapes `"` as well as `& < >`, since posting urls land inside an `href` attribute.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn render_posting(posting: &Posting) -> String {
    format!(
        "<a href=\"{}\">{}</a>\n🏢 {}\n💰 {}\n📅 {}",
        escape_html(&posting.url),
        escape_html(&posting.title),
        escape_html(&posting.employer_name),
        escape_html(&format_salary(posting.salary.as_ref())),
        format_published_at(&posting.published_at),
    )
}

/// HTML message bodies, each covering at most [`POSTINGS_PER_MESSAGE`] postings.
pub fn render_batches(postings: &[Posting]) -> Vec<String> {
    postings
        .chunks(POSTINGS_PER_MESSAGE)
        .map(|chunk| {
            chunk
                .iter()
                .map(render_posting)
                .collect::<Vec<_>>()
                .join("\n\n")
        })
        .collect()
}
