//! Discord embed messages for captured logs.

use chrono::{DateTime, SecondsFormat};
use serde::Serialize;

use crate::model::{Log, LogKind};

const HTTP_COLOR: u32 = 0x3b82f6;
const DNS_COLOR: u32 = 0x10b981;

/// Embed field values are capped at 1024 chars; the code fence takes 8.
const MAX_RAW_CHARS: usize = 1024 - 8;
const MAX_ADDRESS_CHARS: usize = 1024;
const MAX_FOOTER_CHARS: usize = 2048;
const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Serialize)]
pub struct DiscordMessage {
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    pub title: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub footer: EmbedFooter,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: &'static str,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

/// Build the notification posted for `log`.
pub fn build_message(log: &Log) -> DiscordMessage {
    let kind = log.kind.as_str().to_uppercase();
    let color = match log.kind {
        LogKind::Http => HTTP_COLOR,
        LogKind::Dns => DNS_COLOR,
    };

    let embed = Embed {
        title: format!("{} Log Received", kind),
        color,
        fields: vec![
            EmbedField {
                name: "Type",
                value: kind,
                inline: true,
            },
            EmbedField {
                name: "Address",
                value: truncate_with_ellipsis(&log.address, MAX_ADDRESS_CHARS),
                inline: true,
            },
            EmbedField {
                name: "Timestamp",
                value: format_timestamp(log.timestamp),
                inline: false,
            },
            EmbedField {
                name: "Raw Content",
                value: format!("```\n{}\n```", truncate_with_ellipsis(&log.raw, MAX_RAW_CHARS)),
                inline: false,
            },
        ],
        footer: EmbedFooter {
            text: format!("Instance: {}", log.instance_id)
                .chars()
                .take(MAX_FOOTER_CHARS)
                .collect(),
        },
    };

    DiscordMessage { embeds: vec![embed] }
}

/// Cut `s` to at most `max_chars`, ending in `...` when shortened.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(ELLIPSIS.len())).collect();
    out.push_str(ELLIPSIS);
    out
}

fn format_timestamp(ms: u64) -> String {
    DateTime::from_timestamp_millis(ms as i64)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log(raw: &str) -> Log {
        let mut log = Log::http("abc", "203.0.113.9", raw);
        log.timestamp = 1_700_000_000_123;
        log
    }

    #[test]
    fn embed_layout() {
        let message = build_message(&sample_log("GET / HTTP/1.1\r\n\r\n"));
        let embed = &message.embeds[0];

        assert_eq!(embed.title, "HTTP Log Received");
        assert_eq!(embed.color, HTTP_COLOR);
        assert_eq!(embed.fields[0].value, "HTTP");
        assert_eq!(embed.fields[1].value, "203.0.113.9");
        assert_eq!(embed.fields[2].value, "2023-11-14T22:13:20.123Z");
        assert_eq!(embed.fields[3].value, "```\nGET / HTTP/1.1\r\n\r\n\n```");
        assert_eq!(embed.footer.text, "Instance: abc");
    }

    #[test]
    fn long_raw_content_is_truncated_with_marker() {
        let raw = "a".repeat(5000);
        let message = build_message(&sample_log(&raw));
        let value = &message.embeds[0].fields[3].value;

        assert_eq!(value.chars().count(), MAX_RAW_CHARS + 8);
        assert!(value.ends_with("...\n```"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "é".repeat(10);
        let cut = truncate_with_ellipsis(&s, 5);
        assert_eq!(cut, "éé...");
        assert_eq!(truncate_with_ellipsis("short", 5), "short");
    }

    #[test]
    fn serializes_as_discord_payload() {
        let json = serde_json::to_value(build_message(&sample_log("x"))).unwrap();
        assert_eq!(json["embeds"][0]["fields"][1]["name"], "Address");
        assert_eq!(json["embeds"][0]["fields"][1]["inline"], true);
    }
}
