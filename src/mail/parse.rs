//! RFC 5322 message → [`Message`].

use chrono::{DateTime, Utc};
use mail_parser::MessageParser;

use crate::error::FetchError;
use crate::pipeline::types::{ContentType, Message};

/// Plain bodies shorter than this lose to an HTML alternative.
const MIN_PLAIN_CHARS: usize = 50;

/// Parse a raw message fetched from the provider.
///
/// `fallback_id` is used when the message carries no `Message-ID`.
/// `received` stands in for a missing or unparsable `Date` header.
pub fn parse_message(
    raw: &[u8],
    fallback_id: &str,
    received: DateTime<Utc>,
) -> Result<Message, FetchError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| FetchError::Malformed {
            id: fallback_id.to_string(),
            reason: "not an RFC 5322 message".to_string(),
        })?;

    let id = parsed
        .message_id()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| fallback_id.to_string());

    let sender = extract_sender(&parsed).ok_or_else(|| FetchError::Malformed {
        id: id.clone(),
        reason: "no sender address".to_string(),
    })?;

    let subject = parsed.subject().unwrap_or("").trim().to_string();

    let timestamp = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or(received);

    let (body, content_type) = select_body(&parsed);

    Ok(Message {
        id,
        sender,
        subject,
        timestamp,
        body,
        content_type,
    })
}

/// The sender address from `From`, falling back to `Sender`.
fn extract_sender(parsed: &mail_parser::Message) -> Option<String> {
    parsed
        .from()
        .or_else(|| parsed.sender())
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Longest plain part, unless it is too short and an HTML part exists.
fn select_body(parsed: &mail_parser::Message) -> (String, ContentType) {
    let plain = longest(
        parsed
            .text_bodies()
            .filter(|p| matches!(p.body, mail_parser::PartType::Text(_)))
            .filter_map(|p| p.text_contents()),
    );
    let html = longest(
        parsed
            .html_bodies()
            .filter(|p| matches!(p.body, mail_parser::PartType::Html(_)))
            .filter_map(|p| p.text_contents()),
    );

    let plain_len = plain.map(|s| s.trim().chars().count()).unwrap_or(0);
    match (plain, html) {
        (_, Some(html)) if plain_len < MIN_PLAIN_CHARS => (html.to_string(), ContentType::Html),
        (Some(plain), _) => (plain.to_string(), ContentType::Plain),
        (None, None) => (String::new(), ContentType::Plain),
        // Unreachable: a missing plain part has length zero.
        (None, Some(html)) => (html.to_string(), ContentType::Html),
    }
}

fn longest<'a>(parts: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    parts.max_by_key(|s| s.trim().chars().count())
}
