//! Telegram update handlers.
//!
//! Translates teloxide messages into core `IncomingUpdate`s. All behavior lives in
//! the core command router; non-text messages are ignored.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};
use tracing::{debug, warn};

use snapbot_core::{domain::ChatId, messaging::types::IncomingUpdate};

use crate::router::AppState;

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let chat_id = ChatId(msg.chat.id.0);

    let Some(update) = to_update(chat_id, msg.text()) else {
        debug!(chat_id = chat_id.0, "ignoring non-text message");
        return Ok(());
    };

    if let Err(e) = state.router.handle(update).await {
        warn!(chat_id = chat_id.0, error = %e, "failed to handle message");
    }
    Ok(())
}

fn to_update(chat_id: ChatId, text: Option<&str>) -> Option<IncomingUpdate> {
    let text = text?;
    if text.trim().is_empty() {
        return None;
    }
    Some(IncomingUpdate::from_text(chat_id, text))
}
