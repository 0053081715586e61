use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use hhwatch_adapters::{fetch_or_empty, HhVacancyAdapter, SearchAdapter};
use hhwatch_bot::{run_bot, BotApp, TelegramNotifier};
use hhwatch_core::merge_postings;
use hhwatch_storage::{HttpFetcher, StateStore};
use hhwatch_sync::{build_scheduler, format, BotConfig, VacancyChecker};
use teloxide::Bot;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "hhwatch")]
#[command(about = "Telegram bot that watches hh.ru for new remote vacancies")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the bot together with the background check job
    Run,
    /// Run a single background check over all users and exit
    Check,
    /// Print merged postings for the given keywords; user state is untouched
    Search {
        #[arg(required = true)]
        keywords: Vec<String>,
    },
}

async fn build_checker(config: &BotConfig, adapter: Arc<dyn SearchAdapter>, bot: Bot) -> Arc<VacancyChecker> {
    let store = Arc::new(StateStore::open(&config.data_file, config.default_check_interval_secs).await);
    let notifier = Arc::new(TelegramNotifier::new(bot));
    Arc::new(VacancyChecker::new(store, adapter, notifier))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = BotConfig::from_env().context("reading configuration from environment")?;
    let http = HttpFetcher::new(config.http_client_config())?;
    let adapter: Arc<dyn SearchAdapter> = Arc::new(HhVacancyAdapter::new(http, config.hh_api_url.clone()));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let bot = Bot::new(config.telegram_token()?);
            let checker = build_checker(&config, adapter, bot.clone()).await;

            let mut scheduler = build_scheduler(checker.clone(), config.check_tick()).await?;
            scheduler.start().await.context("starting check scheduler")?;
            info!(tick_secs = config.check_tick_secs, "background checks scheduled");

            run_bot(bot, Arc::new(BotApp::new(checker))).await;

            scheduler
                .shutdown()
                .await
                .context("stopping check scheduler")?;
        }
        Commands::Check => {
            let bot = Bot::new(config.telegram_token()?);
            let checker = build_checker(&config, adapter, bot).await;
            if let Some(summary) = checker.run_tick(Utc::now()).await {
                println!(
                    "check complete: tick_id={} users={} checked={} notified={} new_postings={} delivery_failures={}",
                    summary.tick_id,
                    summary.users,
                    summary.checked,
                    summary.notified,
                    summary.new_postings,
                    summary.delivery_failures
                );
            }
        }
        Commands::Search { keywords } => {
            let mut per_keyword = Vec::with_capacity(keywords.len());
            for keyword in &keywords {
                per_keyword.push(fetch_or_empty(adapter.as_ref(), keyword).await);
            }
            let postings = merge_postings(per_keyword);
            for posting in &postings {
                println!(
                    "{}  {:>10}  {}  [{}]  {}  {}",
                    format::format_published_at(&posting.published_at),
                    posting.id,
                    posting.title,
                    posting.employer_name,
                    format::format_salary(posting.salary.as_ref()),
                    posting.url
                );
            }
            eprintln!("{} postings for {} keyword(s)", postings.len(), keywords.len());
        }
    }

    Ok(())
}
