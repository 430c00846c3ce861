//! Map Grammers types to domain entities.
//!
//! Extracts chat descriptors, message records, and media access references
//! from grammers_client tl types.

use crate::domain::{
    ChatType, EntityKind, EntitySpan, MediaNote, MediaRef, MediaRefKind, MediaType, MessageRecord,
    ScannedMedia, ScannedMessage,
};
use grammers_client::peer::Peer;
use grammers_client::tl;

/// Map a grammers Peer to domain ChatType.
///
/// * `Peer::User` → Private, or Bot when the account is a bot.
/// * `Peer::Group` → Group or Supergroup (Supergroup when megagroup).
/// * `Peer::Channel` → Channel (broadcast).
pub fn chat_type_from_peer(peer: &Peer) -> ChatType {
    match peer {
        Peer::User(u) => {
            if u.is_bot() {
                ChatType::Bot
            } else {
                ChatType::Private
            }
        }
        Peer::Group(g) => {
            if g.is_megagroup() {
                ChatType::Supergroup
            } else {
                ChatType::Group
            }
        }
        Peer::Channel(_) => ChatType::Channel,
    }
}

/// Map a raw history message into a scanned message: the archival record
/// plus any downloadable media found on it. Empty placeholders yield `None`;
/// service messages yield a record flagged as such with no media.
pub fn message_to_scanned(msg: &tl::enums::Message, chat_id: i64) -> Option<ScannedMessage> {
    match msg {
        tl::enums::Message::Empty(_) => None,
        tl::enums::Message::Service(s) => Some(ScannedMessage {
            record: MessageRecord {
                id: s.id,
                chat_id,
                date: s.date as i64,
                from_user_id: peer_user_id(s.from_id.as_ref()),
                reply_to_msg_id: reply_to_id(s.reply_to.as_ref()),
                text: String::new(),
                entities: Vec::new(),
                service: true,
                media: None,
            },
            media: Vec::new(),
        }),
        tl::enums::Message::Message(m) => {
            let media = extract_media(m);
            let record = MessageRecord {
                id: m.id,
                chat_id,
                date: m.date as i64,
                from_user_id: peer_user_id(m.from_id.as_ref()),
                reply_to_msg_id: reply_to_id(m.reply_to.as_ref()),
                text: m.message.clone(),
                entities: m
                    .entities
                    .as_deref()
                    .map(map_entities)
                    .unwrap_or_default(),
                service: false,
                media: media.as_ref().map(|m| MediaNote {
                    media_type: m.media_type,
                    file_name: m.file_name.clone(),
                    size: m.size,
                }),
            };
            Some(ScannedMessage {
                record,
                media: media.into_iter().collect(),
            })
        }
    }
}

fn peer_user_id(from: Option<&tl::enums::Peer>) -> Option<i64> {
    match from {
        Some(tl::enums::Peer::User(u)) => Some(u.user_id),
        _ => None,
    }
}

fn reply_to_id(reply: Option<&tl::enums::MessageReplyHeader>) -> Option<i32> {
    match reply {
        Some(tl::enums::MessageReplyHeader::Header(h)) => h.reply_to_msg_id,
        _ => None,
    }
}

fn map_entities(entities: &[tl::enums::MessageEntity]) -> Vec<EntitySpan> {
    entities.iter().filter_map(map_entity).collect()
}

fn map_entity(entity: &tl::enums::MessageEntity) -> Option<EntitySpan> {
    use tl::enums::MessageEntity as E;
    let (kind, offset, length) = match entity {
        E::Url(e) => (EntityKind::Link, e.offset, e.length),
        E::TextUrl(e) => (EntityKind::Link, e.offset, e.length),
        E::Mention(e) => (EntityKind::Mention, e.offset, e.length),
        E::Hashtag(e) => (EntityKind::Hashtag, e.offset, e.length),
        E::Bold(e) => (EntityKind::Bold, e.offset, e.length),
        E::Italic(e) => (EntityKind::Italic, e.offset, e.length),
        E::Code(e) => (EntityKind::Code, e.offset, e.length),
        E::Pre(e) => (EntityKind::Pre, e.offset, e.length),
        E::Email(e) => (EntityKind::Other, e.offset, e.length),
        E::Phone(e) => (EntityKind::Other, e.offset, e.length),
        _ => return None,
    };
    Some(EntitySpan {
        kind,
        offset,
        length,
    })
}

/// Pull the downloadable object off a message, with the access reference
/// tuple the file API needs. Slot 0; albums arrive as separate messages on
/// the wire.
pub fn extract_media(m: &tl::types::Message) -> Option<ScannedMedia> {
    match m.media.as_ref()? {
        tl::enums::MessageMedia::Photo(p) => {
            let tl::enums::Photo::Photo(photo) = p.photo.as_ref()? else {
                return None;
            };
            let (thumb_size, size) = largest_photo_size(&photo.sizes)?;
            Some(ScannedMedia {
                slot: 0,
                media_type: MediaType::Photo,
                size,
                file_name: None,
                media_ref: MediaRef {
                    kind: MediaRefKind::Photo,
                    id: photo.id,
                    access_hash: photo.access_hash,
                    file_reference: photo.file_reference.clone(),
                    thumb_size,
                },
            })
        }
        tl::enums::MessageMedia::Document(d) => {
            let tl::enums::Document::Document(doc) = d.document.as_ref()? else {
                return None;
            };
            let (media_type, file_name) = classify_document(doc);
            Some(ScannedMedia {
                slot: 0,
                media_type,
                size: doc.size.max(0) as u64,
                file_name,
                media_ref: MediaRef {
                    kind: MediaRefKind::Document,
                    id: doc.id,
                    access_hash: doc.access_hash,
                    file_reference: doc.file_reference.clone(),
                    thumb_size: String::new(),
                },
            })
        }
        _ => None,
    }
}

/// Pick the photo size variant with the most bytes; its type string goes
/// into the file location request.
fn largest_photo_size(sizes: &[tl::enums::PhotoSize]) -> Option<(String, u64)> {
    sizes
        .iter()
        .filter_map(|s| match s {
            tl::enums::PhotoSize::Size(s) => Some((s.r#type.clone(), s.size.max(0) as u64)),
            tl::enums::PhotoSize::Progressive(p) => Some((
                p.r#type.clone(),
                p.sizes.iter().copied().max().unwrap_or(0).max(0) as u64,
            )),
            _ => None,
        })
        .max_by_key(|(_, size)| *size)
}

/// Media type from document attributes, with the mime type as tie-breaker.
fn classify_document(doc: &tl::types::Document) -> (MediaType, Option<String>) {
    let mut media_type = if doc.mime_type.starts_with("video/") {
        MediaType::Video
    } else if doc.mime_type.starts_with("audio/") {
        MediaType::Audio
    } else {
        MediaType::Document
    };
    let mut file_name = None;
    for attr in &doc.attributes {
        match attr {
            tl::enums::DocumentAttribute::Filename(f) => {
                file_name = Some(f.file_name.clone());
            }
            tl::enums::DocumentAttribute::Video(v) => {
                media_type = if v.round_message {
                    MediaType::VideoNote
                } else {
                    MediaType::Video
                };
            }
            tl::enums::DocumentAttribute::Audio(a) => {
                media_type = if a.voice {
                    MediaType::Voice
                } else {
                    MediaType::Audio
                };
            }
            tl::enums::DocumentAttribute::Sticker(_) => media_type = MediaType::Sticker,
            tl::enums::DocumentAttribute::Animated => media_type = MediaType::Animation,
            _ => {}
        }
    }
    (media_type, file_name)
}
