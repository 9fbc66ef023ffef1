//! In-crate fakes for the ports, shared by unit tests.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef, Proposal},
    errors::{Error, FetchError},
    messaging::{port::MessagingPort, types::MessagingCapabilities},
    ports::ProposalSource,
    Result,
};

#[derive(Default)]
pub struct FakeMessenger {
    next_id: Mutex<i32>,
    sends: Mutex<Vec<(ChatId, String)>>,
    fail_for: Mutex<Option<ChatId>>,
    max_len: Option<usize>,
}

impl FakeMessenger {
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len: Some(max_len),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(ChatId, String)> {
        self.sends.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, t)| t).collect()
    }

    pub fn last_text(&self) -> Option<String> {
        self.texts().pop()
    }

    pub fn fail_sends_to(&self, chat_id: ChatId) {
        *self.fail_for.lock().unwrap() = Some(chat_id);
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            max_message_len: self.max_len.unwrap_or(4096),
        }
    }

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        if *self.fail_for.lock().unwrap() == Some(chat_id) {
            return Err(Error::External("fake send failure".to_string()));
        }
        self.sends.lock().unwrap().push((chat_id, text.to_string()));
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(*id),
        })
    }
}

/// Canned responses per space; unknown spaces have no open proposals.
#[derive(Default)]
pub struct FakeSource {
    responses: Mutex<HashMap<String, std::result::Result<Vec<Proposal>, FetchError>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn set(&self, space: &str, resp: std::result::Result<Vec<Proposal>, FetchError>) {
        self.responses
            .lock()
            .unwrap()
            .insert(space.to_string(), resp);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProposalSource for FakeSource {
    async fn open_proposals(&self, space: &str) -> std::result::Result<Vec<Proposal>, FetchError> {
        self.calls.lock().unwrap().push(space.to_string());
        self.responses
            .lock()
            .unwrap()
            .get(space)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

pub fn proposal(id: &str, title: &str, end: i64) -> Proposal {
    Proposal {
        id: id.to_string(),
        title: title.to_string(),
        end,
    }
}
