use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use tgb_core::{
    admission::{AdmissionControl, Scope},
    config::Config,
    formatting::escape_markdown_v2,
    messaging::{
        keyboard::{InlineButton, InlineKeyboard},
        queue::SendOptions,
        types::{CallbackQuery, Message},
    },
    store::{CounterStore, MemoryCounterStore},
};
use tgb_telegram::{
    api::EditOptions, BotClient, BotManager, Dispatcher, Poller, PollingConfig, UpdateGate,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tgb_core::logging::init("tgb")?;

    let cfg = Config::load()?;
    let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());

    let manager = BotManager::from_config(&cfg)?.with_bot_admission(&cfg, store.clone());
    let client = manager.get(cfg.active_bot.as_deref())?;

    match client.get_me().await {
        Ok(me) => tracing::info!(
            username = me.username.as_deref().unwrap_or("?"),
            bot = cfg.active_bot_name(),
            "bot started"
        ),
        Err(e) => tracing::warn!(error = %e, "getMe failed; polling anyway"),
    }

    let users = AdmissionControl::new(
        Scope::User,
        cfg.user_rate_limit,
        cfg.user_rate_window,
        cfg.rate_limit_policy,
        Some(store),
    );
    let gate = Arc::new(UpdateGate::new(
        Arc::new(build_dispatcher()),
        Arc::new(users),
    ));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("ctrl-c received, stopping");
            }
            cancel.cancel();
        });
    }

    let mut poller = Poller::new(
        client.as_ref().clone(),
        gate,
        PollingConfig::from_config(&cfg),
    );
    poller.run(cancel).await;
    Ok(())
}

fn build_dispatcher() -> Dispatcher {
    let mut d = Dispatcher::new();
    d.on_command("/start", start)
        .on_command("/help", help)
        .on_command("/default", unknown_command)
        .on_callback("stats", stats)
        .on_callback("schedule", schedule)
        .on_callback("/callback", unknown_callback);
    d
}

async fn start(message: Message, client: BotClient) -> anyhow::Result<()> {
    let keyboard = InlineKeyboard::new(vec![vec![
        InlineButton::callback("📊 Stats", "stats"),
        InlineButton::callback("📅 Schedule", "schedule"),
    ]]);
    client
        .send_message(
            message.chat_id(),
            &escape_markdown_v2("Welcome! Use /help to see commands"),
            &SendOptions::with_markup(keyboard),
        )
        .await?;
    Ok(())
}

async fn help(message: Message, client: BotClient) -> anyhow::Result<()> {
    client
        .send_message(
            message.chat_id(),
            &escape_markdown_v2("Available commands:\n/start - Start bot\n/help - Show help"),
            &SendOptions::default(),
        )
        .await?;
    Ok(())
}

async fn unknown_command(message: Message, client: BotClient) -> anyhow::Result<()> {
    client
        .send_message(
            message.chat_id(),
            &escape_markdown_v2("Unknown command. Type /start or /help"),
            &SendOptions::default(),
        )
        .await?;
    Ok(())
}

async fn stats(query: CallbackQuery, client: BotClient) -> anyhow::Result<()> {
    show_panel(&query, &client, "📊 Stats:\n\nUsers: 100\nMessages: 500", "Stats shown").await
}

async fn schedule(query: CallbackQuery, client: BotClient) -> anyhow::Result<()> {
    show_panel(
        &query,
        &client,
        "📅 Schedule:\n\nMonday: 09:00\nWednesday: 14:00",
        "Schedule shown",
    )
    .await
}

async fn show_panel(
    query: &CallbackQuery,
    client: &BotClient,
    text: &str,
    ack: &str,
) -> anyhow::Result<()> {
    let target = query
        .message_ref()
        .context("callback has no originating message")?;
    client
        .edit_message_text(
            target.chat_id,
            target.message_id,
            &escape_markdown_v2(text),
            &EditOptions::default(),
        )
        .await?;
    client.answer_callback_query(&query.id, Some(ack), false).await?;
    Ok(())
}

async fn unknown_callback(query: CallbackQuery, client: BotClient) -> anyhow::Result<()> {
    client
        .answer_callback_query(&query.id, Some("Unknown action"), false)
        .await?;
    Ok(())
}
