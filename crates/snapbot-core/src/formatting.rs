//! Plain-text rendering of notifications and watch lists.

use chrono::{DateTime, Utc};

use crate::{domain::Proposal, errors::FetchError};

/// Render the notification for one watched space.
///
/// Deterministic: the same inputs always produce the same text.
pub fn format_notification(
    space: &str,
    result: &Result<Vec<Proposal>, FetchError>,
    link_host: &str,
) -> String {
    let proposals = match result {
        Ok(p) => p,
        Err(e) => return format!("Error retrieving proposals for {space}: {}", e.cause),
    };

    if proposals.is_empty() {
        return format!("No proposals in: {space}");
    }

    let mut text = format!("Proposals in: {space}");
    for p in proposals {
        text.push_str(&format!(
            "\n\nName: {}\nEnd date: {}\nLink: {}",
            p.title.trim(),
            format_end_date(p.end),
            proposal_link(link_host, space, &p.id)
        ));
    }
    text
}

/// `https://{host}/#/{space}/proposal/{id}`
pub fn proposal_link(host: &str, space: &str, id: &str) -> String {
    format!("https://{host}/#/{space}/proposal/{id}")
}

/// UTC epoch seconds -> `YYYY-MM-DD HH:MM UTC`.
pub fn format_end_date(end: i64) -> String {
    match DateTime::<Utc>::from_timestamp(end, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M UTC").to_string(),
        None => format!("unknown ({end})"),
    }
}

pub fn format_watch_list(names: &[String]) -> String {
    let mut lines = vec![format!("Your addresses ({}):", names.len())];
    lines.extend(names.iter().map(|n| format!("• {n}")));
    lines.join("\n")
}

/// Split `text` into chunks of at most `limit` bytes, preferring line boundaries.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    if text.len() <= limit {
        return vec![text.to_string()];
    }

    let mut out = Vec::new();
    let mut chunk = String::new();
    for line in text.split('\n') {
        let needed = if chunk.is_empty() {
            line.len()
        } else {
            chunk.len() + 1 + line.len()
        };
        if needed <= limit {
            if !chunk.is_empty() {
                chunk.push('\n');
            }
            chunk.push_str(line);
            continue;
        }

        if !chunk.is_empty() {
            out.push(std::mem::take(&mut chunk));
        }

        // A single line longer than the limit is hard-split on char boundaries.
        let mut rest = line;
        while rest.len() > limit {
            let (head, tail) = split_utf8_prefix(rest, limit);
            out.push(head.to_string());
            rest = tail;
        }
        chunk.push_str(rest);
    }
    if !chunk.is_empty() {
        out.push(chunk);
    }
    out
}

fn split_utf8_prefix(s: &str, max_bytes: usize) -> (&str, &str) {
    let mut idx = max_bytes.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    if idx == 0 {
        // Limit smaller than the first char; take the char anyway to make progress.
        idx = s.chars().next().map(char::len_utf8).unwrap_or(s.len());
    }
    s.split_at(idx)
}
