//! Command router: turns incoming updates into store and scheduler calls.
//!
//! Each update runs one step of the chat's dialogue (see `dialogue`), performs the
//! resulting action and sends the reply. Store and validation errors end up as chat
//! replies here; only delivery failures are returned to the transport.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::{
    dialogue::{Action, ChatFacts, DialogueEvent, DialogueState, Dialogues, Notice},
    domain::{ChatId, DailyTime},
    errors::Error,
    formatting::format_watch_list,
    messaging::{port::MessagingPort, types::IncomingUpdate},
    scheduler::{DailyOutcome, ScheduleManager},
    store::SubscriptionStore,
    Result,
};

const WELCOME: &str = "Welcome!\n\
Please send a .eth address to save.\n\
To add additional address use the /reg command";

const HELP: &str = "Commands:\n\
/start - register this chat and add a first address\n\
/reg - add an address to watch\n\
/rem - remove a watched address\n\
/list - show watched addresses\n\
/run - check proposals now\n\
/rund [HH:MM] - check proposals every day (UTC, default 09:00)\n\
/status - show scheduled checks\n\
/stop or /del - remove this chat and all its data\n\
/cancel - abort the current step";

pub struct CommandRouter {
    store: Arc<SubscriptionStore>,
    scheduler: ScheduleManager,
    dialogues: Dialogues,
    messenger: Arc<dyn MessagingPort>,
    default_daily: DailyTime,
}

impl CommandRouter {
    pub fn new(
        store: Arc<SubscriptionStore>,
        scheduler: ScheduleManager,
        dialogues: Dialogues,
        messenger: Arc<dyn MessagingPort>,
        default_daily: DailyTime,
    ) -> Self {
        Self {
            store,
            scheduler,
            dialogues,
            messenger,
            default_daily,
        }
    }

    pub fn dialogue_state(&self, chat_id: ChatId) -> DialogueState {
        self.dialogues.state(chat_id)
    }

    /// Handle one update for its chat. Errors are delivery failures only.
    pub async fn handle(&self, update: IncomingUpdate) -> Result<()> {
        let chat_id = update.chat_id();
        let facts = ChatFacts {
            registered: self.store.is_registered(chat_id),
            watching: self.store.list(chat_id).len(),
        };

        let state = match self.dialogues.take(chat_id) {
            Ok(state) => state,
            Err(expired) => {
                debug!(chat_id = chat_id.0, state = ?expired, "dialogue expired");
                expired.step(facts, DialogueEvent::Timeout).next
            }
        };

        let event = match &update {
            IncomingUpdate::Command(c) => DialogueEvent::Command {
                name: &c.name,
                args: &c.args,
            },
            IncomingUpdate::Text(t) => DialogueEvent::Text(&t.text),
        };
        let transition = state.step(facts, event);
        debug!(
            chat_id = chat_id.0,
            from = ?state,
            to = ?transition.next,
            action = ?transition.action,
            "dialogue step"
        );

        let (next, reply) = match self.perform(chat_id, transition.action).await {
            Ok(reply) => (transition.next, reply),
            Err(e) => (DialogueState::Idle, Some(error_reply(chat_id, &e))),
        };
        self.dialogues.set(chat_id, next);

        if let Some(text) = reply {
            self.messenger.send_text(chat_id, &text).await?;
        }
        Ok(())
    }

    async fn perform(&self, chat_id: ChatId, action: Action) -> Result<Option<String>> {
        let reply = match action {
            Action::Register => {
                self.store.register(chat_id)?;
                info!(chat_id = chat_id.0, "chat registered");
                WELCOME.to_string()
            }
            Action::PromptAdd => "Send .eth to watch".to_string(),
            Action::PromptRemove => format!(
                "{}\n\nSend the address to remove",
                format_watch_list(&self.store.list(chat_id))
            ),
            Action::AddWatch(raw) => {
                let name = self.store.add_watch(chat_id, &raw)?;
                info!(chat_id = chat_id.0, %name, "address added");
                format!("Address '{name}' added to your list.")
            }
            Action::RemoveWatch(raw) => {
                let name = self.store.remove_watch(chat_id, &raw)?;
                info!(chat_id = chat_id.0, %name, "address removed");
                format!("Address '{name}' removed from your list.")
            }
            Action::Cancelled => "Cancelled".to_string(),
            Action::ShowList => {
                let names = self.store.list(chat_id);
                if names.is_empty() {
                    "No addresses in your list".to_string()
                } else {
                    format_watch_list(&names)
                }
            }
            Action::Unsubscribe => {
                // Jobs stay armed unless the chat is really gone from the file.
                self.store.unregister(chat_id)?;
                let cancelled = self.scheduler.cancel(chat_id).await;
                info!(chat_id = chat_id.0, cancelled, "chat unregistered");
                "Your addresses and this chat have been removed".to_string()
            }
            Action::RunOnce => {
                // Reply first so the acknowledgement precedes the results.
                self.messenger
                    .send_text(chat_id, "Checking proposals…")
                    .await?;
                self.scheduler.run_once(chat_id).await;
                return Ok(None);
            }
            Action::RunDaily { time_arg } => {
                let at = match time_arg {
                    Some(arg) => arg.parse::<DailyTime>()?,
                    None => self.default_daily,
                };
                match self.scheduler.run_daily(chat_id, at).await? {
                    DailyOutcome::Started => format!("Daily check scheduled at {at} UTC"),
                    DailyOutcome::Replaced { previous } => {
                        format!("Daily check moved from {previous} to {at} UTC")
                    }
                }
            }
            Action::Status => self.status_text(chat_id).await,
            Action::Help => HELP.to_string(),
            Action::Notice(notice) => notice_text(notice).to_string(),
            Action::None => return Ok(None),
        };
        Ok(Some(reply))
    }

    async fn status_text(&self, chat_id: ChatId) -> String {
        if !self.store.is_registered(chat_id) {
            return notice_text(Notice::NotRegistered).to_string();
        }
        let jobs = self.scheduler.status(chat_id).await;
        let daily = jobs
            .daily
            .map(|at| format!("{at} UTC"))
            .unwrap_or_else(|| "off".to_string());
        format!(
            "Addresses: {}\nPending runs: {}\nDaily check: {daily}",
            self.store.list(chat_id).len(),
            jobs.pending_runs
        )
    }
}

fn notice_text(notice: Notice) -> &'static str {
    match notice {
        Notice::AlreadyRegistered => "You already have addresses registered",
        Notice::NotRegistered => "You are not registered",
        Notice::NoAddresses => "No addresses in your list",
        Notice::NothingToCancel => "Nothing to cancel",
        Notice::EmptyAddress => "Please send a non-empty address, or /cancel",
        Notice::UnknownMessage => "Unknown message",
        Notice::UnknownCommand => "Unknown command, see /help",
    }
}

fn error_reply(chat_id: ChatId, e: &Error) -> String {
    match e {
        Error::AlreadyRegistered(_) => notice_text(Notice::AlreadyRegistered).to_string(),
        Error::NotRegistered(_) => notice_text(Notice::NotRegistered).to_string(),
        Error::NotFound(name) => format!("Address '{name}' is not in your list."),
        Error::AlreadyWatching(name) => format!("Address '{name}' is already in your list."),
        Error::InvalidAddress(raw) => {
            format!("'{}' is not a valid address (send a single name like alice.eth)", raw.trim())
        }
        Error::InvalidTime(raw) => format!("Invalid time '{raw}', expected HH:MM (UTC)"),
        other => {
            error!(chat_id = chat_id.0, error = %other, "command failed");
            "Something went wrong, please try again later.".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        notifier::Notifier,
        testing::{proposal, FakeMessenger, FakeSource},
    };

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<SubscriptionStore>,
        source: Arc<FakeSource>,
        messenger: Arc<FakeMessenger>,
        scheduler: ScheduleManager,
        router: CommandRouter,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(SubscriptionStore::load(dir.path().join("subs.json")).unwrap());
            let source = Arc::new(FakeSource::default());
            let messenger = Arc::new(FakeMessenger::default());
            let notifier = Arc::new(Notifier::new(
                store.clone(),
                source.clone(),
                messenger.clone(),
                "snapshot.org",
            ));
            let scheduler =
                ScheduleManager::new(notifier, store.clone(), Duration::from_secs(1));
            let router = CommandRouter::new(
                store.clone(),
                scheduler.clone(),
                Dialogues::new(Duration::from_secs(60)),
                messenger.clone(),
                DailyTime::default(),
            );
            Self {
                _dir: dir,
                store,
                source,
                messenger,
                scheduler,
                router,
            }
        }

        async fn say(&self, chat: i64, text: &str) -> Option<String> {
            let before = self.messenger.sent().len();
            self.router
                .handle(IncomingUpdate::from_text(ChatId(chat), text))
                .await
                .unwrap();
            let sent = self.messenger.texts();
            (sent.len() > before).then(|| sent[sent.len() - 1].clone())
        }
    }

    #[tokio::test]
    async fn start_address_list_flow() {
        let h = Harness::new();

        assert_eq!(h.say(42, "/start").await.as_deref(), Some(WELCOME));
        assert_eq!(
            h.router.dialogue_state(ChatId(42)),
            DialogueState::AwaitingAddAddress
        );

        assert_eq!(
            h.say(42, "alice.eth").await.as_deref(),
            Some("Address 'alice.eth' added to your list.")
        );
        assert_eq!(h.router.dialogue_state(ChatId(42)), DialogueState::Idle);

        assert_eq!(
            h.say(42, "/list").await.as_deref(),
            Some("Your addresses (1):\n• alice.eth")
        );
        assert_eq!(h.store.list(ChatId(42)), vec!["alice.eth".to_string()]);

        assert_eq!(
            h.say(42, "/start").await.as_deref(),
            Some("You already have addresses registered")
        );
    }

    #[tokio::test]
    async fn reg_when_unregistered_opens_no_dialogue() {
        let h = Harness::new();

        assert_eq!(
            h.say(7, "/reg").await.as_deref(),
            Some("You are not registered")
        );
        assert_eq!(h.router.dialogue_state(ChatId(7)), DialogueState::Idle);
        assert_eq!(h.say(7, "alice.eth").await.as_deref(), Some("Unknown message"));
        assert!(!h.store.is_registered(ChatId(7)));
    }

    #[tokio::test]
    async fn removing_unknown_address_reports_and_returns_to_idle() {
        let h = Harness::new();
        h.say(1, "/start").await;
        h.say(1, "alice.eth").await;

        let prompt = h.say(1, "/rem").await.unwrap();
        assert!(prompt.contains("• alice.eth"));

        assert_eq!(
            h.say(1, "bob.eth").await.as_deref(),
            Some("Address 'bob.eth' is not in your list.")
        );
        assert_eq!(h.router.dialogue_state(ChatId(1)), DialogueState::Idle);
        assert_eq!(h.store.list(ChatId(1)), vec!["alice.eth".to_string()]);

        h.say(1, "/rem").await;
        assert_eq!(
            h.say(1, "alice.eth").await.as_deref(),
            Some("Address 'alice.eth' removed from your list.")
        );
        assert!(h.store.list(ChatId(1)).is_empty());
        assert_eq!(
            h.say(1, "/rem").await.as_deref(),
            Some("No addresses in your list")
        );
    }

    #[tokio::test]
    async fn duplicates_and_invalid_names_are_rejected() {
        let h = Harness::new();
        h.say(3, "/start").await;
        h.say(3, "alice.eth").await;

        h.say(3, "/reg").await;
        assert_eq!(
            h.say(3, " alice.eth ").await.as_deref(),
            Some("Address 'alice.eth' is already in your list.")
        );

        h.say(3, "/reg").await;
        let reply = h.say(3, "two words").await.unwrap();
        assert!(reply.contains("not a valid address"));
        assert_eq!(h.store.list(ChatId(3)), vec!["alice.eth".to_string()]);
    }

    #[tokio::test]
    async fn cancel_aborts_pending_input() {
        let h = Harness::new();
        h.say(5, "/start").await;

        assert_eq!(h.say(5, "/cancel").await.as_deref(), Some("Cancelled"));
        assert_eq!(h.say(5, "alice.eth").await.as_deref(), Some("Unknown message"));
        assert_eq!(h.say(5, "/cancel").await.as_deref(), Some("Nothing to cancel"));
        assert!(h.store.list(ChatId(5)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_input_expires_silently() {
        let h = Harness::new();
        h.say(6, "/start").await;

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(h.say(6, "alice.eth").await.as_deref(), Some("Unknown message"));
        assert!(h.store.list(ChatId(6)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_acknowledges_then_notifies() {
        let h = Harness::new();
        h.say(8, "/start").await;
        h.say(8, "alice.eth").await;
        h.source
            .set("alice.eth", Ok(vec![proposal("p1", "Upgrade", 1_700_000_000)]));

        assert_eq!(h.say(8, "/run").await.as_deref(), Some("Checking proposals…"));
        assert_eq!(h.scheduler.status(ChatId(8)).await.pending_runs, 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let last = h.messenger.last_text().unwrap();
        assert!(last.starts_with("Proposals in: alice.eth"));
        assert!(last.contains("Upgrade"));
        assert!(h.scheduler.status(ChatId(8)).await.is_idle());
    }

    #[tokio::test]
    async fn rund_schedules_replaces_and_validates() {
        let h = Harness::new();
        h.say(9, "/start").await;
        assert_eq!(
            h.say(9, "/rund").await.as_deref(),
            Some("No addresses in your list")
        );
        h.say(9, "/reg").await;
        h.say(9, "alice.eth").await;
        assert_eq!(h.store.list(ChatId(9)), vec!["alice.eth".to_string()]);

        assert_eq!(
            h.say(9, "/rund").await.as_deref(),
            Some("Daily check scheduled at 09:00 UTC")
        );
        assert_eq!(
            h.say(9, "/rund 18:30").await.as_deref(),
            Some("Daily check moved from 09:00 to 18:30 UTC")
        );
        assert_eq!(
            h.say(9, "/rund 25:00").await.as_deref(),
            Some("Invalid time '25:00', expected HH:MM (UTC)")
        );
        assert_eq!(h.store.daily(ChatId(9)), DailyTime::new(18, 30));

        let status = h.say(9, "/status").await.unwrap();
        assert!(status.contains("Daily check: 18:30 UTC"));
        h.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn stop_cancels_jobs_and_forgets_the_chat() {
        let h = Harness::new();
        h.say(10, "/start").await;
        h.say(10, "alice.eth").await;
        h.say(10, "/rund").await;

        assert_eq!(
            h.say(10, "/stop").await.as_deref(),
            Some("Your addresses and this chat have been removed")
        );
        assert!(!h.store.is_registered(ChatId(10)));
        assert_eq!(h.store.daily(ChatId(10)), None);
        assert!(h.scheduler.status(ChatId(10)).await.is_idle());

        assert_eq!(
            h.say(10, "/del").await.as_deref(),
            Some("You are not registered")
        );
    }

    #[tokio::test]
    async fn failed_stop_keeps_the_daily_job() {
        let h = Harness::new();
        h.say(13, "/start").await;
        h.say(13, "alice.eth").await;
        h.say(13, "/rund 07:00").await;

        std::fs::remove_file(h.store.path()).unwrap();
        std::fs::create_dir(h.store.path()).unwrap();

        assert_eq!(
            h.say(13, "/stop").await.as_deref(),
            Some("Something went wrong, please try again later.")
        );
        assert!(h.store.is_registered(ChatId(13)));
        assert_eq!(h.store.daily(ChatId(13)), DailyTime::new(7, 0));
        assert_eq!(
            h.scheduler.status(ChatId(13)).await.daily,
            DailyTime::new(7, 0)
        );
        h.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn command_abandons_pending_input() {
        let h = Harness::new();
        h.say(14, "/start").await;

        assert_eq!(
            h.say(14, "/list").await.as_deref(),
            Some("No addresses in your list")
        );
        assert_eq!(h.router.dialogue_state(ChatId(14)), DialogueState::Idle);
        assert_eq!(h.say(14, "alice.eth").await.as_deref(), Some("Unknown message"));
        assert!(h.store.list(ChatId(14)).is_empty());
    }

    #[tokio::test]
    async fn write_failure_gets_a_generic_reply() {
        let h = Harness::new();
        // A directory at the store path makes the final rename fail.
        std::fs::create_dir(h.store.path()).unwrap();

        assert_eq!(
            h.say(11, "/start").await.as_deref(),
            Some("Something went wrong, please try again later.")
        );
        assert!(!h.store.is_registered(ChatId(11)));
        assert_eq!(h.router.dialogue_state(ChatId(11)), DialogueState::Idle);
    }

    #[tokio::test]
    async fn unknown_command_and_help() {
        let h = Harness::new();
        assert_eq!(
            h.say(12, "/frobnicate").await.as_deref(),
            Some("Unknown command, see /help")
        );
        assert!(h.say(12, "/help").await.unwrap().contains("/rund [HH:MM]"));
    }
}
