//! Message content and its flattened text rendering.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;

/// Content of a message, reduced to the fields shown to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text { text: String },
    Photo { caption: String },
    Video { caption: String },
    Document { file_name: String },
    Sticker { emoji: String },
    VoiceNote,
    Audio { title: String },
    Animation,
    Location { latitude: f64, longitude: f64 },
    Contact { phone_number: String },
    Poll { question: String },
    /// Any other kind, keyed by its `@type`
    Other(String),
}

impl MessageContent {
    fn from_value(value: &Value) -> Self {
        let kind = value.get("@type").and_then(Value::as_str).unwrap_or("unknown");
        match kind {
            "messageText" => Self::Text {
                text: text_at(value, &["text"]),
            },
            "messagePhoto" => Self::Photo {
                caption: text_at(value, &["caption"]),
            },
            "messageVideo" => Self::Video {
                caption: text_at(value, &["caption"]),
            },
            "messageDocument" => Self::Document {
                file_name: text_at(value, &["document", "file_name"]),
            },
            "messageSticker" => Self::Sticker {
                emoji: text_at(value, &["sticker", "emoji"]),
            },
            "messageVoiceNote" => Self::VoiceNote,
            "messageAudio" => Self::Audio {
                title: text_at(value, &["audio", "title"]),
            },
            "messageAnimation" => Self::Animation,
            "messageLocation" => Self::Location {
                latitude: number_at(value, &["location", "latitude"]),
                longitude: number_at(value, &["location", "longitude"]),
            },
            "messageContact" => Self::Contact {
                phone_number: text_at(value, &["contact", "phone_number"]),
            },
            "messagePoll" => Self::Poll {
                question: text_at(value, &["poll", "question"]),
            },
            other => Self::Other(other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for MessageContent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

impl fmt::Display for MessageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text { text } => f.write_str(text),
            Self::Photo { caption } => write!(f, "[Photo] {caption}"),
            Self::Video { caption } => write!(f, "[Video] {caption}"),
            Self::Document { file_name } => write!(f, "[Document: {file_name}]"),
            Self::Sticker { emoji } => write!(f, "[Sticker: {emoji}]"),
            Self::VoiceNote => f.write_str("[Voice message]"),
            Self::Audio { title } => write!(f, "[Audio: {title}]"),
            Self::Animation => f.write_str("[GIF]"),
            Self::Location {
                latitude,
                longitude,
            } => write!(f, "[Location: {latitude}, {longitude}]"),
            Self::Contact { phone_number } => write!(f, "[Contact: {phone_number}]"),
            Self::Poll { question } => write!(f, "[Poll: {question}]"),
            Self::Other(kind) => write!(f, "[{kind}]"),
        }
    }
}

/// Resolve a string at `path`; formatted text objects yield their `text`.
fn text_at(value: &Value, path: &[&str]) -> String {
    let mut current = value;
    for key in path {
        match current.get(key) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }
    match current {
        Value::String(s) => s.clone(),
        Value::Object(_) => current
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

fn number_at(value: &Value, path: &[&str]) -> f64 {
    let mut current = value;
    for key in path {
        match current.get(key) {
            Some(next) => current = next,
            None => return 0.0,
        }
    }
    current.as_f64().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> MessageContent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_text_passes_through() {
        let content = parse(json!({
            "@type": "messageText",
            "text": {"@type": "formattedText", "text": "hello there", "entities": []}
        }));
        assert_eq!(content.to_string(), "hello there");
    }

    #[test]
    fn test_media_renders_bracketed_tags() {
        let photo = parse(json!({
            "@type": "messagePhoto",
            "caption": {"@type": "formattedText", "text": "sunset"}
        }));
        assert_eq!(photo.to_string(), "[Photo] sunset");

        let doc = parse(json!({
            "@type": "messageDocument",
            "document": {"@type": "document", "file_name": "report.pdf"}
        }));
        assert_eq!(doc.to_string(), "[Document: report.pdf]");

        let voice = parse(json!({"@type": "messageVoiceNote"}));
        assert_eq!(voice.to_string(), "[Voice message]");

        let gif = parse(json!({"@type": "messageAnimation"}));
        assert_eq!(gif.to_string(), "[GIF]");
    }

    #[test]
    fn test_location_renders_coordinates() {
        let content = parse(json!({
            "@type": "messageLocation",
            "location": {"@type": "location", "latitude": 50.45, "longitude": 30.5}
        }));
        assert_eq!(content.to_string(), "[Location: 50.45, 30.5]");
    }

    #[test]
    fn test_poll_question_accepts_plain_and_formatted_text() {
        let plain = parse(json!({"@type": "messagePoll", "poll": {"question": "Lunch?"}}));
        let formatted = parse(json!({
            "@type": "messagePoll",
            "poll": {"question": {"@type": "formattedText", "text": "Lunch?"}}
        }));
        assert_eq!(plain.to_string(), "[Poll: Lunch?]");
        assert_eq!(formatted, plain);
    }

    #[test]
    fn test_unrecognized_content_falls_back_to_kind() {
        let content = parse(json!({"@type": "messageDice", "value": 6}));
        assert_eq!(content, MessageContent::Other("messageDice".into()));
        assert_eq!(content.to_string(), "[messageDice]");
    }
}
