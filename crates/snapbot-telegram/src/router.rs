use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tracing::{info, warn};

use snapbot_core::messaging::throttled::{ThrottleConfig, ThrottledMessenger};
use snapbot_core::{
    commands::CommandRouter, config::Config, dialogue::Dialogues,
    messaging::port::MessagingPort, notifier::Notifier, ports::ProposalSource,
    scheduler::ScheduleManager, store::SubscriptionStore,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<CommandRouter>,
}

pub async fn run_polling(cfg: Arc<Config>, source: Arc<dyn ProposalSource>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), "snapbot started"),
        Err(e) => warn!(error = %e, "get_me failed"),
    }

    let store = Arc::new(SubscriptionStore::load(&cfg.subscriptions_file)?);

    // Daily jobs send one message per watched space back to back; the throttle keeps
    // us under Telegram's flood limits. RetryAfter is still handled in the adapter.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let notifier = Arc::new(Notifier::new(
        store.clone(),
        source,
        messenger.clone(),
        cfg.snapshot_web_host.clone(),
    ));
    let scheduler = ScheduleManager::new(notifier, store.clone(), cfg.run_once_delay);
    let restored = scheduler.restore().await;
    info!(restored, path = %store.path().display(), "scheduler ready");

    let router = Arc::new(CommandRouter::new(
        store.clone(),
        scheduler.clone(),
        Dialogues::new(cfg.conversation_timeout),
        messenger,
        cfg.daily_time,
    ));
    let state = Arc::new(AppState { router });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("dispatcher stopped, shutting down scheduler");
    scheduler.shutdown().await;
    if let Err(e) = store.save() {
        warn!(error = %e, "final subscriptions flush failed");
    }
    Ok(())
}
