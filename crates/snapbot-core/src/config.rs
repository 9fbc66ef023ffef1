use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{domain::DailyTime, errors::Error, Result};

pub const DEFAULT_GRAPHQL_URL: &str = "https://hub.snapshot.org/graphql";
pub const DEFAULT_WEB_HOST: &str = "snapshot.org";

/// Typed configuration, read from the environment (and `.env` if present).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,

    // Storage
    pub subscriptions_file: PathBuf,

    // Snapshot hub
    pub snapshot_graphql_url: String,
    pub snapshot_web_host: String,
    pub proposal_limit: usize,
    pub fetch_timeout: Duration,

    // Scheduling
    pub daily_time: DailyTime,
    pub run_once_delay: Duration,

    // Conversations
    pub conversation_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let subscriptions_file =
            env_path("SUBSCRIPTIONS_FILE").unwrap_or_else(|| PathBuf::from("subscriptions.json"));

        let snapshot_graphql_url = env_str("SNAPSHOT_GRAPHQL_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_GRAPHQL_URL.to_string());
        let snapshot_web_host = env_str("SNAPSHOT_WEB_HOST")
            .and_then(non_empty)
            .map(|h| h.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_WEB_HOST.to_string());
        let proposal_limit = env_parse::<usize>("PROPOSAL_LIMIT")?.unwrap_or(5);
        if proposal_limit == 0 {
            return Err(Error::Config("PROPOSAL_LIMIT must be > 0".to_string()));
        }
        let fetch_timeout =
            Duration::from_millis(env_parse::<u64>("FETCH_TIMEOUT_MS")?.unwrap_or(10_000));

        let daily_time = match env_str("DAILY_RUN_UTC").and_then(non_empty) {
            Some(v) => v
                .parse::<DailyTime>()
                .map_err(|e| Error::Config(format!("DAILY_RUN_UTC: {e}")))?,
            None => DailyTime::default(),
        };
        let run_once_delay =
            Duration::from_millis(env_parse::<u64>("RUN_ONCE_DELAY_MS")?.unwrap_or(1_000));

        let conversation_timeout =
            Duration::from_secs(env_parse::<u64>("CONVERSATION_TIMEOUT_SECS")?.unwrap_or(60));

        Ok(Self {
            telegram_bot_token,
            subscriptions_file,
            snapshot_graphql_url,
            snapshot_web_host,
            proposal_limit,
            fetch_timeout,
            daily_time,
            run_once_delay,
            conversation_timeout,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Parse a typed env var. Unset or blank is `None`; garbage is a config error.
fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    let Some(raw) = env_str(key).and_then(non_empty) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key}: invalid value {raw:?}")))
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim().trim_start_matches("export ").trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
