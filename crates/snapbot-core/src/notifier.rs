use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    domain::ChatId,
    formatting::{format_notification, split_message},
    messaging::port::MessagingPort,
    ports::ProposalSource,
    store::SubscriptionStore,
};

/// The notification pipeline run by scheduled jobs: store -> fetch -> format -> send.
pub struct Notifier {
    store: Arc<SubscriptionStore>,
    source: Arc<dyn ProposalSource>,
    messenger: Arc<dyn MessagingPort>,
    link_host: String,
}

impl Notifier {
    pub fn new(
        store: Arc<SubscriptionStore>,
        source: Arc<dyn ProposalSource>,
        messenger: Arc<dyn MessagingPort>,
        link_host: impl Into<String>,
    ) -> Self {
        Self {
            store,
            source,
            messenger,
            link_host: link_host.into(),
        }
    }

    /// Send one notification per watched space, in watch-list order.
    ///
    /// The list is read when the job fires. A failed fetch becomes that space's
    /// message; a failed send is logged and the loop moves on. Returns the number of
    /// spaces whose notification was delivered.
    pub async fn notify_chat(&self, chat_id: ChatId) -> usize {
        let spaces = self.store.list(chat_id);
        if spaces.is_empty() {
            info!(chat_id = chat_id.0, "nothing watched, skipping run");
            return 0;
        }

        let limit = self.messenger.capabilities().max_message_len;
        let mut delivered = 0usize;
        for space in &spaces {
            let result = self.source.open_proposals(space).await;
            match &result {
                Ok(p) => info!(chat_id = chat_id.0, %space, count = p.len(), "proposals fetched"),
                Err(e) => warn!(chat_id = chat_id.0, %space, error = %e, "proposal fetch failed"),
            }

            let text = format_notification(space, &result, &self.link_host);
            let mut ok = true;
            for chunk in split_message(&text, limit) {
                if let Err(e) = self.messenger.send_text(chat_id, &chunk).await {
                    warn!(chat_id = chat_id.0, %space, error = %e, "failed to deliver notification");
                    ok = false;
                    break;
                }
            }
            if ok {
                delivered += 1;
            }
        }

        info!(chat_id = chat_id.0, delivered, total = spaces.len(), "run finished");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::FetchError,
        testing::{proposal, FakeMessenger, FakeSource},
    };

    fn setup(
        dir: &tempfile::TempDir,
        messenger: Arc<FakeMessenger>,
    ) -> (Arc<SubscriptionStore>, Arc<FakeSource>, Notifier) {
        let store = Arc::new(SubscriptionStore::load(dir.path().join("s.json")).unwrap());
        let source = Arc::new(FakeSource::default());
        let notifier = Notifier::new(store.clone(), source.clone(), messenger, "snapshot.org");
        (store, source, notifier)
    }

    #[tokio::test]
    async fn sends_one_message_per_space_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let messenger = Arc::new(FakeMessenger::default());
        let (store, source, notifier) = setup(&dir, messenger.clone());
        store.register(ChatId(42)).unwrap();
        for s in ["alice.eth", "bad.eth", "carol.eth"] {
            store.add_watch(ChatId(42), s).unwrap();
        }
        source.set("alice.eth", Ok(vec![proposal("p1", "Upgrade", 1_700_000_000)]));
        source.set("bad.eth", Err(FetchError::new("hub returned 502")));

        let delivered = notifier.notify_chat(ChatId(42)).await;

        assert_eq!(delivered, 3);
        assert_eq!(source.calls(), vec!["alice.eth", "bad.eth", "carol.eth"]);
        let texts = messenger.texts();
        assert_eq!(texts.len(), 3);
        assert!(texts[0].starts_with("Proposals in: alice.eth"));
        assert!(texts[0].contains("alice.eth/proposal/p1"));
        assert_eq!(texts[1], "Error retrieving proposals for bad.eth: hub returned 502");
        assert_eq!(texts[2], "No proposals in: carol.eth");
        assert!(messenger.sent().iter().all(|(c, _)| *c == ChatId(42)));
    }

    #[tokio::test]
    async fn empty_or_unknown_chat_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let messenger = Arc::new(FakeMessenger::default());
        let (store, source, notifier) = setup(&dir, messenger.clone());
        store.register(ChatId(1)).unwrap();

        assert_eq!(notifier.notify_chat(ChatId(1)).await, 0);
        assert_eq!(notifier.notify_chat(ChatId(2)).await, 0);
        assert!(source.calls().is_empty());
        assert!(messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn send_failure_does_not_abort_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let messenger = Arc::new(FakeMessenger::default());
        let (store, source, notifier) = setup(&dir, messenger.clone());
        store.register(ChatId(5)).unwrap();
        store.add_watch(ChatId(5), "a.eth").unwrap();
        store.add_watch(ChatId(5), "b.eth").unwrap();
        messenger.fail_sends_to(ChatId(5));

        assert_eq!(notifier.notify_chat(ChatId(5)).await, 0);
        assert_eq!(source.calls(), vec!["a.eth", "b.eth"]);
    }

    #[tokio::test]
    async fn long_notifications_are_split() {
        let dir = tempfile::tempdir().unwrap();
        let messenger = Arc::new(FakeMessenger::with_max_len(120));
        let (store, source, notifier) = setup(&dir, messenger.clone());
        store.register(ChatId(9)).unwrap();
        store.add_watch(ChatId(9), "big.eth").unwrap();
        source.set(
            "big.eth",
            Ok((0..5)
                .map(|i| proposal(&format!("p{i}"), "A fairly long proposal title", 0))
                .collect()),
        );

        assert_eq!(notifier.notify_chat(ChatId(9)).await, 1);
        let texts = messenger.texts();
        assert!(texts.len() > 1);
        assert!(texts.iter().all(|t| t.len() <= 120));
        assert!(texts[0].starts_with("Proposals in: big.eth"));
    }
}
