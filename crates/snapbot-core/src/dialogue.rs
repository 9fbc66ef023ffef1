//! Per-chat conversation state machine for the multi-step `/start`, `/reg` and `/rem`
//! flows.
//!
//! `DialogueState::step` is a pure transition function: given the current state, a
//! few facts about the chat and an event, it returns the next state and the action
//! the router must perform. `Dialogues` stores the state per chat and expires it
//! after a period of inactivity.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::time::Instant;

use crate::domain::ChatId;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DialogueState {
    #[default]
    Idle,
    AwaitingAddAddress,
    AwaitingRemoveAddress,
}

impl DialogueState {
    pub fn is_awaiting(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// What the chat looks like in the store when the event arrives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChatFacts {
    pub registered: bool,
    pub watching: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DialogueEvent<'a> {
    /// A command name (lowercase, no slash) and its argument string.
    Command { name: &'a str, args: &'a str },
    Text(&'a str),
    Timeout,
}

/// Side effect requested by a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Register,
    PromptAdd,
    PromptRemove,
    AddWatch(String),
    RemoveWatch(String),
    Cancelled,
    ShowList,
    Unsubscribe,
    RunOnce,
    RunDaily { time_arg: Option<String> },
    Status,
    Help,
    Notice(Notice),
    /// Nothing to say (e.g. a silent expiry).
    None,
}

/// Fixed replies that need no store access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notice {
    AlreadyRegistered,
    NotRegistered,
    NoAddresses,
    NothingToCancel,
    EmptyAddress,
    UnknownMessage,
    UnknownCommand,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub next: DialogueState,
    pub action: Action,
}

impl Transition {
    fn stay(state: DialogueState, action: Action) -> Self {
        Self {
            next: state,
            action,
        }
    }

    fn idle(action: Action) -> Self {
        Self::stay(DialogueState::Idle, action)
    }

    fn to(next: DialogueState, action: Action) -> Self {
        Self { next, action }
    }
}

impl DialogueState {
    pub fn step(self, facts: ChatFacts, event: DialogueEvent<'_>) -> Transition {
        use DialogueState::*;

        match (self, event) {
            (_, DialogueEvent::Timeout) => Transition::idle(Action::None),

            (Idle, DialogueEvent::Command { name: "cancel", .. }) => {
                Transition::idle(Action::Notice(Notice::NothingToCancel))
            }
            (_, DialogueEvent::Command { name: "cancel", .. }) => {
                Transition::idle(Action::Cancelled)
            }
            // Any other command abandons a pending dialogue.
            (_, DialogueEvent::Command { name, args }) => idle_command(facts, name, args),

            (Idle, DialogueEvent::Text(_)) => Transition::idle(Action::Notice(Notice::UnknownMessage)),
            (state, DialogueEvent::Text(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    return Transition::stay(state, Action::Notice(Notice::EmptyAddress));
                }
                let action = if state == AwaitingAddAddress {
                    Action::AddWatch(text.to_string())
                } else {
                    Action::RemoveWatch(text.to_string())
                };
                Transition::idle(action)
            }
        }
    }
}

fn idle_command(facts: ChatFacts, name: &str, args: &str) -> Transition {
    use DialogueState::*;

    match name {
        "start" if facts.registered => Transition::idle(Action::Notice(Notice::AlreadyRegistered)),
        "start" => Transition::to(AwaitingAddAddress, Action::Register),

        "reg" if facts.registered => Transition::to(AwaitingAddAddress, Action::PromptAdd),
        "reg" => Transition::idle(Action::Notice(Notice::NotRegistered)),

        "rem" if !facts.registered => Transition::idle(Action::Notice(Notice::NotRegistered)),
        "rem" if facts.watching == 0 => Transition::idle(Action::Notice(Notice::NoAddresses)),
        "rem" => Transition::to(AwaitingRemoveAddress, Action::PromptRemove),

        "list" => Transition::idle(Action::ShowList),

        "stop" | "del" if facts.registered => Transition::idle(Action::Unsubscribe),
        "stop" | "del" => Transition::idle(Action::Notice(Notice::NotRegistered)),

        "run" => Transition::idle(Action::RunOnce),

        "rund" if facts.registered && facts.watching > 0 => {
            let time_arg = Some(args.trim())
                .filter(|a| !a.is_empty())
                .map(str::to_string);
            Transition::idle(Action::RunDaily { time_arg })
        }
        "rund" => Transition::idle(Action::Notice(Notice::NoAddresses)),

        "status" => Transition::idle(Action::Status),
        "help" => Transition::idle(Action::Help),

        _ => Transition::idle(Action::Notice(Notice::UnknownCommand)),
    }
}

struct Pending {
    state: DialogueState,
    since: Instant,
}

/// Dialogue states per chat with an inactivity timeout.
///
/// Idle chats have no entry. Expiry is lazy: an expired entry reads as `None` from
/// `take` so the caller can feed a `Timeout` event first.
pub struct Dialogues {
    timeout: Duration,
    pending: Mutex<HashMap<ChatId, Pending>>,
}

impl Dialogues {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Current state, `Idle` if none or expired. Does not consume it.
    pub fn state(&self, chat_id: ChatId) -> DialogueState {
        let map = self.lock();
        match map.get(&chat_id) {
            Some(p) if p.since.elapsed() < self.timeout => p.state,
            _ => DialogueState::Idle,
        }
    }

    /// Remove and return the chat's state.
    ///
    /// `Ok(state)` for a live entry (or `Idle`), `Err(state)` when the entry existed
    /// but has expired.
    pub fn take(&self, chat_id: ChatId) -> Result<DialogueState, DialogueState> {
        let mut map = self.lock();
        match map.remove(&chat_id) {
            None => Ok(DialogueState::Idle),
            Some(p) if p.since.elapsed() < self.timeout => Ok(p.state),
            Some(p) => Err(p.state),
        }
    }

    /// Store the chat's next state; `Idle` clears the entry.
    pub fn set(&self, chat_id: ChatId, state: DialogueState) {
        let mut map = self.lock();
        if state.is_awaiting() {
            map.insert(
                chat_id,
                Pending {
                    state,
                    since: Instant::now(),
                },
            );
        } else {
            map.remove(&chat_id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ChatId, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
