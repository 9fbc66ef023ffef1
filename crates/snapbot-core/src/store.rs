//! Per-chat subscription store.
//!
//! Owns the in-memory chat -> watch list mapping together with its JSON file.
//! Every mutation is applied to a copy, written to disk (temp file + rename) and
//! only then committed, so memory and file never disagree after an error.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    domain::{ChatId, DailyTime},
    errors::Error,
    Result,
};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    chats: BTreeMap<ChatId, Vec<String>>,
    /// Daily delivery time per chat; re-armed on startup.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    daily: BTreeMap<ChatId, DailyTime>,
}

pub struct SubscriptionStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl SubscriptionStore {
    /// Load the store from `path`. A missing or empty file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = read_store_file(&path)?;
        info!(
            path = %path.display(),
            chats = data.chats.len(),
            daily = data.daily.len(),
            "subscriptions loaded"
        );
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the full in-memory mapping to disk, replacing the file.
    ///
    /// Mutations already write through; this is the explicit flush used on shutdown.
    pub fn save(&self) -> Result<()> {
        let data = self.lock();
        write_store_file(&self.path, &data)
    }

    pub fn register(&self, chat: ChatId) -> Result<()> {
        self.mutate(|d| {
            if d.chats.contains_key(&chat) {
                return Err(Error::AlreadyRegistered(chat));
            }
            d.chats.insert(chat, Vec::new());
            Ok(())
        })?;
        info!(chat_id = chat.0, "chat registered");
        Ok(())
    }

    /// Append `name` to the chat's watch list. Returns the normalized name.
    pub fn add_watch(&self, chat: ChatId, name: &str) -> Result<String> {
        let name = normalize_name(name)?;
        let added = name.clone();
        self.mutate(move |d| {
            let list = d.chats.get_mut(&chat).ok_or(Error::NotRegistered(chat))?;
            if list.iter().any(|n| *n == name) {
                return Err(Error::AlreadyWatching(name));
            }
            list.push(name);
            Ok(())
        })?;
        info!(chat_id = chat.0, space = %added, "watch added");
        Ok(added)
    }

    /// Remove the first exact match of `name`. Returns the removed name.
    pub fn remove_watch(&self, chat: ChatId, name: &str) -> Result<String> {
        let name = name.trim().to_string();
        let removed = self.mutate(move |d| {
            let list = d.chats.get_mut(&chat).ok_or(Error::NotRegistered(chat))?;
            let idx = list
                .iter()
                .position(|n| *n == name)
                .ok_or_else(|| Error::NotFound(name.clone()))?;
            Ok(list.remove(idx))
        })?;
        info!(chat_id = chat.0, space = %removed, "watch removed");
        Ok(removed)
    }

    /// Delete the chat entirely, including its daily preference.
    pub fn unregister(&self, chat: ChatId) -> Result<()> {
        self.mutate(|d| {
            d.chats.remove(&chat).ok_or(Error::NotRegistered(chat))?;
            d.daily.remove(&chat);
            Ok(())
        })?;
        info!(chat_id = chat.0, "chat unregistered");
        Ok(())
    }

    /// Current watch list, or empty when the chat is unknown.
    pub fn list(&self, chat: ChatId) -> Vec<String> {
        self.lock().chats.get(&chat).cloned().unwrap_or_default()
    }

    pub fn is_registered(&self, chat: ChatId) -> bool {
        self.lock().chats.contains_key(&chat)
    }

    /// Set or clear the chat's daily delivery time.
    pub fn set_daily(&self, chat: ChatId, at: Option<DailyTime>) -> Result<()> {
        self.mutate(|d| {
            if !d.chats.contains_key(&chat) {
                return Err(Error::NotRegistered(chat));
            }
            match at {
                Some(t) => d.daily.insert(chat, t),
                None => d.daily.remove(&chat),
            };
            Ok(())
        })
    }

    pub fn daily(&self, chat: ChatId) -> Option<DailyTime> {
        self.lock().daily.get(&chat).copied()
    }

    /// All persisted daily preferences, ordered by chat id.
    pub fn daily_schedules(&self) -> Vec<(ChatId, DailyTime)> {
        self.lock().daily.iter().map(|(c, t)| (*c, *t)).collect()
    }

    fn lock(&self) -> MutexGuard<'_, StoreData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate<T>(&self, op: impl FnOnce(&mut StoreData) -> Result<T>) -> Result<T> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let out = op(&mut next)?;
        write_store_file(&self.path, &next)?;
        *guard = next;
        Ok(out)
    }
}

/// Trim and validate a watched name. No format check beyond "one token".
pub fn normalize_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(Error::InvalidAddress(raw.to_string()));
    }
    Ok(name.to_string())
}

fn read_store_file(path: &Path) -> Result<StoreData> {
    if !path.exists() {
        debug!(path = %path.display(), "no subscriptions file, starting empty");
        return Ok(StoreData::default());
    }
    let txt = fs::read_to_string(path).map_err(|e| persistence(path, e))?;
    if txt.trim().is_empty() {
        return Ok(StoreData::default());
    }
    serde_json::from_str(&txt).map_err(|e| persistence(path, e))
}

fn write_store_file(path: &Path, data: &StoreData) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| persistence(parent, e))?;
    }

    let txt = serde_json::to_string_pretty(data).map_err(|e| persistence(path, e))?;
    let tmp = temp_path(path);
    fs::write(&tmp, txt).map_err(|e| persistence(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        persistence(path, e)
    })?;
    debug!(path = %path.display(), chats = data.chats.len(), "subscriptions saved");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "subscriptions.json".into());
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

fn persistence(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Persistence {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
