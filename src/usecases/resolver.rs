//! Chat resolver: turns a job's filter into a concrete ordered chat list.
//!
//! Explicit ids are normalised (channel prefix supplied when the operator
//! passes the raw numeric form) and resolved individually; otherwise all
//! dialogs are enumerated and filtered by the type mask. Public groups and
//! channels are told apart from private ones by their public username.

use crate::domain::{Chat, ChatType, DomainError, ExportFilter};
use crate::ports::TgGateway;
use std::sync::Arc;
use tracing::{info, warn};

/// Bot-API marker prefix for channel/supergroup ids on the wire.
const CHANNEL_ID_OFFSET: i64 = -1_000_000_000_000;

/// Normalise an operator-provided chat id: channel/supergroup ids must carry
/// the `-100` prefix; raw positive forms above the offset magnitude get it
/// prepended.
pub fn normalize_chat_id(id: i64) -> i64 {
    if id > 0 && id > -CHANNEL_ID_OFFSET / 1000 {
        // A bare 10-digit channel id like 1234567890 → -1001234567890.
        CHANNEL_ID_OFFSET - id
    } else {
        id
    }
}

pub struct ChatResolver {
    gateway: Arc<dyn TgGateway>,
}

impl ChatResolver {
    pub fn new(gateway: Arc<dyn TgGateway>) -> Self {
        Self { gateway }
    }

    /// Resolve the filter into an ordered chat list. Unresolvable explicit
    /// ids are logged and skipped; an empty result is valid and makes the
    /// job complete with zero totals.
    pub async fn resolve(&self, filter: &ExportFilter) -> Result<Vec<Chat>, DomainError> {
        if !filter.specific_chats.is_empty() {
            let mut chats = Vec::with_capacity(filter.specific_chats.len());
            for &raw_id in &filter.specific_chats {
                let id = normalize_chat_id(raw_id);
                match self.gateway.resolve_chat(id).await {
                    Ok(chat) => chats.push(chat),
                    Err(e) => {
                        warn!(chat_id = id, error = %e, "cannot resolve chat, skipping");
                    }
                }
            }
            info!(requested = filter.specific_chats.len(), resolved = chats.len(), "explicit chat list resolved");
            return Ok(chats);
        }

        let dialogs = self.gateway.get_dialogs().await?;
        let chats: Vec<Chat> = dialogs
            .into_iter()
            .filter(|chat| Self::matches(filter, chat))
            .collect();
        info!(count = chats.len(), "dialogs filtered by type mask");
        Ok(chats)
    }

    fn matches(filter: &ExportFilter, chat: &Chat) -> bool {
        match chat.kind {
            ChatType::Private => filter.private_chats,
            ChatType::Bot => filter.bot_chats,
            ChatType::Group => filter.private_groups,
            ChatType::Supergroup => {
                if chat.is_public() {
                    filter.public_groups
                } else {
                    filter.private_groups
                }
            }
            ChatType::Channel => {
                if chat.is_public() {
                    filter.public_channels
                } else {
                    filter.private_channels
                }
            }
        }
    }
}
