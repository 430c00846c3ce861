//! Domain entities. Pure data structures for the core business.
//!
//! No Telegram/IO types here — these are mapped from adapters.

use serde::{Deserialize, Serialize};

/// Represents a Telegram chat (user, bot, group, or channel).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub title: String,
    pub username: Option<String>,
    pub kind: ChatType,
    /// Heuristic from the dialog's top message id; used for progress totals.
    pub approx_message_count: Option<i32>,
}

impl Chat {
    /// Public chats (groups/channels) carry a public username.
    pub fn is_public(&self) -> bool {
        self.username.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Private,
    Bot,
    Group,
    Supergroup,
    Channel,
}

/// A single archived message. Immutable once emitted by the scanner; appended
/// to the chat's message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: i32,
    pub chat_id: i64,
    /// Unix timestamp (seconds).
    pub date: i64,
    pub from_user_id: Option<i64>,
    pub reply_to_msg_id: Option<i32>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<EntitySpan>,
    /// Service messages (joins, pins, title changes) carry no media.
    #[serde(default)]
    pub service: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaNote>,
}

/// A formatting/link span inside a message's text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySpan {
    pub kind: EntityKind,
    pub offset: i32,
    pub length: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Link,
    Mention,
    Hashtag,
    Bold,
    Italic,
    Code,
    Pre,
    Other,
}

/// Media summary embedded in the message record (the full download state
/// lives in the queue item).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaNote {
    pub media_type: MediaType,
    pub file_name: Option<String>,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Photo,
    Video,
    Voice,
    VideoNote,
    Audio,
    Sticker,
    Animation,
    Document,
}

impl MediaType {
    /// Subdirectory under `<chat>/` for this media type.
    pub fn dir_name(self) -> &'static str {
        match self {
            MediaType::Photo => "photos",
            MediaType::Video => "video_files",
            MediaType::Voice => "voice_messages",
            MediaType::VideoNote => "round_video_messages",
            MediaType::Audio => "audio_files",
            MediaType::Sticker => "stickers",
            MediaType::Animation => "gifs",
            MediaType::Document => "files",
        }
    }

    /// Extension for synthesised file names when the wire protocol does not
    /// supply one.
    pub fn fallback_ext(self) -> &'static str {
        match self {
            MediaType::Photo => "jpg",
            MediaType::Video | MediaType::VideoNote | MediaType::Animation => "mp4",
            MediaType::Voice | MediaType::Audio => "ogg",
            MediaType::Sticker => "webp",
            MediaType::Document => "pdf",
        }
    }
}

/// The short-lived tuple the messaging service requires for each file chunk
/// request. Must be refreshed from the owning message when it expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaRefKind,
    pub id: i64,
    pub access_hash: i64,
    pub file_reference: Vec<u8>,
    /// Photo size type to request; empty for documents.
    #[serde(default)]
    pub thumb_size: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaRefKind {
    Photo,
    Document,
}

/// One message as produced by the gateway's history iteration: the archival
/// record plus any downloadable media attached to it.
#[derive(Debug, Clone)]
pub struct ScannedMessage {
    pub record: MessageRecord,
    pub media: Vec<ScannedMedia>,
}

/// A downloadable media object discovered on a message.
#[derive(Debug, Clone)]
pub struct ScannedMedia {
    /// Slot index within the message (albums expose several).
    pub slot: u8,
    pub media_type: MediaType,
    pub size: u64,
    /// Original file name, when the wire protocol supplies one.
    pub file_name: Option<String>,
    pub media_ref: MediaRef,
}

/// Builds the on-disk file name: `{messageId}-{chatId}-{originalName}`,
/// falling back to `{messageId}-{chatId}-media.{ext}` keyed by media type.
pub fn media_file_name(
    message_id: i32,
    chat_id: i64,
    original: Option<&str>,
    media_type: MediaType,
) -> String {
    match original.filter(|n| !n.is_empty()) {
        Some(name) => format!("{}-{}-{}", message_id, chat_id.unsigned_abs(), sanitize(name)),
        None => format!(
            "{}-{}-media.{}",
            message_id,
            chat_id.unsigned_abs(),
            media_type.fallback_ext()
        ),
    }
}

/// Replaces path-hostile characters and truncates to a sane length.
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect();
    cleaned.chars().take(100).collect()
}
