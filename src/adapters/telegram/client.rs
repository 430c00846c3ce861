//! Implements TgGateway using grammers Client.
//!
//! Uses raw invoke for GetHistory (ascending pages via a negative
//! add_offset) and upload.GetFile (chunked downloads at explicit offsets).
//! Every outbound call passes through the session's rate gate; a single
//! mutex admits one MTProto call at a time, which `download_chunk` holds for
//! the chunk duration.

use crate::adapters::telegram::mapper;
use crate::adapters::telegram::rate_limit::RateGate;
use crate::domain::{Chat, DomainError, MediaRef, MediaRefKind, ScannedMessage};
use crate::ports::TgGateway;
use async_trait::async_trait;
use grammers_client::tl;
use grammers_client::Client;
use grammers_client::InvocationError;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Attempts made inside the adapter when a metadata call hits FloodWait.
const FLOOD_RETRIES: u32 = 3;

/// Telegram gateway adapter. Wraps the grammers Client shared by every job
/// of one authenticated user.
pub struct GrammersTgGateway {
    client: Mutex<Client>,
    gate: RateGate,
    /// Cache InputPeer by chat_id so dialog enumeration is not repeated for
    /// every request (that path is a FLOOD_WAIT magnet).
    peer_cache: Mutex<HashMap<i64, tl::enums::InputPeer>>,
    me_cache: Mutex<Option<i64>>,
}

impl GrammersTgGateway {
    pub fn new(client: Client) -> Self {
        Self {
            client: Mutex::new(client),
            gate: RateGate::for_user_session(),
            peer_cache: Mutex::new(HashMap::new()),
            me_cache: Mutex::new(None),
        }
    }

    /// Map grammers invocation errors onto the domain's error kinds.
    fn map_invocation(e: InvocationError) -> DomainError {
        match e {
            InvocationError::Rpc(rpc) => {
                if rpc.code == 420 {
                    return DomainError::FloodWait {
                        seconds: rpc.value.unwrap_or(60) as u64,
                    };
                }
                if rpc.name.starts_with("FILE_REFERENCE") {
                    return DomainError::ReferenceExpired;
                }
                match rpc.name.as_str() {
                    "AUTH_KEY_UNREGISTERED" | "AUTH_KEY_INVALID" | "SESSION_REVOKED"
                    | "SESSION_EXPIRED" | "USER_DEACTIVATED" => {
                        DomainError::Fatal(rpc.name.clone())
                    }
                    _ if rpc.code == 400 || rpc.code == 403 => DomainError::Permanent(rpc.name),
                    _ => DomainError::Transient(rpc.name),
                }
            }
            other => DomainError::Transient(other.to_string()),
        }
    }

    /// Error post-processing shared by every call site: FloodWait holds the
    /// gate so no other worker slips into the cooldown.
    async fn raise(&self, e: InvocationError) -> DomainError {
        let err = Self::map_invocation(e);
        if let DomainError::FloodWait { seconds } = err {
            self.gate.hold(seconds).await;
        }
        err
    }

    /// Resolve chat_id to InputPeer, using the cache to avoid repeated
    /// getDialogs round-trips.
    async fn resolve_input_peer(&self, chat_id: i64) -> Result<tl::enums::InputPeer, DomainError> {
        {
            let cache = self.peer_cache.lock().await;
            if let Some(peer) = cache.get(&chat_id) {
                return Ok(peer.clone());
            }
        }
        let peer = {
            self.gate.acquire().await;
            let guard = self.client.lock().await;
            let mut dialogs = guard.iter_dialogs();
            let mut found = None;
            while let Some(dialog) = dialogs
                .next()
                .await
                .map_err(|e| DomainError::TgGateway(e.to_string()))?
            {
                let p = dialog.peer();
                if p.id().bot_api_dialog_id() == Some(chat_id) {
                    found = Some(p.clone());
                    break;
                }
            }
            found.ok_or_else(|| {
                DomainError::NotFound(format!("peer {} not found in dialogs", chat_id))
            })?
        };
        let peer_ref = peer
            .to_ref()
            .await
            .map_err(|e| DomainError::TgGateway(e.to_string()))?
            .ok_or_else(|| DomainError::TgGateway("peer not in session cache".into()))?;
        let input_peer: tl::enums::InputPeer = peer_ref.into();
        self.peer_cache
            .lock()
            .await
            .insert(chat_id, input_peer.clone());
        Ok(input_peer)
    }

    fn chat_from_peer(peer: &grammers_client::peer::Peer) -> Chat {
        let id = peer.id().bot_api_dialog_id_unchecked();
        Chat {
            id,
            title: peer
                .name()
                .map(String::from)
                .unwrap_or_else(|| id.to_string()),
            username: peer.username().map(String::from),
            kind: mapper::chat_type_from_peer(peer),
            approx_message_count: None,
        }
    }

    fn location_for(media: &MediaRef) -> tl::enums::InputFileLocation {
        match media.kind {
            MediaRefKind::Photo => tl::types::InputPhotoFileLocation {
                id: media.id,
                access_hash: media.access_hash,
                file_reference: media.file_reference.clone(),
                thumb_size: media.thumb_size.clone(),
            }
            .into(),
            MediaRefKind::Document => tl::types::InputDocumentFileLocation {
                id: media.id,
                access_hash: media.access_hash,
                file_reference: media.file_reference.clone(),
                thumb_size: String::new(),
            }
            .into(),
        }
    }

    /// Raw GetHistory page. `add_offset = -limit` turns the platform's
    /// newest-first default into "the `limit` messages immediately newer
    /// than `after_id`", which is what an ascending scan needs.
    async fn fetch_history_page(
        &self,
        input_peer: tl::enums::InputPeer,
        chat_id: i64,
        after_id: i32,
        limit: i32,
    ) -> Result<Vec<ScannedMessage>, DomainError> {
        use tl::enums::messages::Messages;

        for attempt in 0..FLOOD_RETRIES {
            self.gate.acquire().await;
            let guard = self.client.lock().await;
            let req = tl::functions::messages::GetHistory {
                peer: input_peer.clone(),
                offset_id: after_id,
                offset_date: 0,
                add_offset: -limit,
                limit,
                max_id: 0,
                min_id: after_id,
                hash: 0,
            };
            match guard.invoke(&req).await {
                Ok(raw) => {
                    let messages = match raw {
                        Messages::Messages(m) => m.messages,
                        Messages::Slice(m) => m.messages,
                        Messages::ChannelMessages(m) => m.messages,
                        Messages::NotModified(_) => return Ok(vec![]),
                    };
                    let mut page: Vec<ScannedMessage> = messages
                        .iter()
                        .filter_map(|msg| mapper::message_to_scanned(msg, chat_id))
                        .filter(|s| s.record.id > after_id)
                        .collect();
                    page.sort_by_key(|s| s.record.id);
                    return Ok(page);
                }
                Err(e) => {
                    drop(guard);
                    let err = self.raise(e).await;
                    if let DomainError::FloodWait { seconds } = err {
                        warn!(attempt, seconds, chat_id, "flood wait during history page");
                        self.gate.acquire().await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
        Err(DomainError::Transient("flood wait retries exhausted".into()))
    }
}

#[async_trait]
impl TgGateway for GrammersTgGateway {
    async fn me(&self) -> Result<i64, DomainError> {
        {
            let cached = self.me_cache.lock().await;
            if let Some(id) = *cached {
                return Ok(id);
            }
        }
        self.gate.acquire().await;
        let me = {
            let guard = self.client.lock().await;
            guard
                .get_me()
                .await
                .map_err(|e| DomainError::Fatal(e.to_string()))?
        };
        let id = me.id().bot_api_dialog_id_unchecked();
        *self.me_cache.lock().await = Some(id);
        Ok(id)
    }

    async fn get_dialogs(&self) -> Result<Vec<Chat>, DomainError> {
        self.gate.acquire().await;
        let guard = self.client.lock().await;
        let mut dialogs = guard.iter_dialogs();
        let mut chats = Vec::new();
        while let Some(dialog) = dialogs
            .next()
            .await
            .map_err(|e| DomainError::TgGateway(e.to_string()))?
        {
            chats.push(Self::chat_from_peer(dialog.peer()));
        }
        debug!(count = chats.len(), "dialogs enumerated");
        Ok(chats)
    }

    async fn resolve_chat(&self, chat_id: i64) -> Result<Chat, DomainError> {
        // Warm the peer cache as a side effect; the chat itself comes from
        // the same dialog walk.
        self.resolve_input_peer(chat_id).await?;
        let guard = self.client.lock().await;
        let mut dialogs = guard.iter_dialogs();
        while let Some(dialog) = dialogs
            .next()
            .await
            .map_err(|e| DomainError::TgGateway(e.to_string()))?
        {
            let peer = dialog.peer();
            if peer.id().bot_api_dialog_id() == Some(chat_id) {
                return Ok(Self::chat_from_peer(peer));
            }
        }
        Err(DomainError::NotFound(format!("chat {chat_id}")))
    }

    async fn history_page(
        &self,
        chat_id: i64,
        after_id: i32,
        limit: i32,
    ) -> Result<Vec<ScannedMessage>, DomainError> {
        let input_peer = self.resolve_input_peer(chat_id).await?;
        self.fetch_history_page(input_peer, chat_id, after_id, limit)
            .await
    }

    async fn download_chunk(
        &self,
        media: &MediaRef,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<u8>, DomainError> {
        self.gate.acquire().await;
        let guard = self.client.lock().await;
        let req = tl::functions::upload::GetFile {
            precise: true,
            cdn_supported: false,
            location: Self::location_for(media),
            offset: offset as i64,
            limit: limit as i32,
        };
        match guard.invoke(&req).await {
            Ok(tl::enums::upload::File::File(file)) => Ok(file.bytes),
            Ok(tl::enums::upload::File::CdnRedirect(_)) => Err(DomainError::Permanent(
                "CDN-redirected file downloads are not supported".into(),
            )),
            Err(e) => {
                drop(guard);
                Err(self.raise(e).await)
            }
        }
    }

    async fn refresh_reference(
        &self,
        chat_id: i64,
        message_id: i32,
    ) -> Result<MediaRef, DomainError> {
        let input_peer = self.resolve_input_peer(chat_id).await?;
        // Fetch just the owning message again; its media carries a fresh
        // file reference.
        let page = self
            .fetch_history_page(input_peer, chat_id, message_id - 1, 1)
            .await?;
        let scanned = page
            .into_iter()
            .find(|s| s.record.id == message_id)
            .ok_or_else(|| {
                DomainError::Permanent(format!("message {message_id} no longer exists"))
            })?;
        scanned
            .media
            .into_iter()
            .next()
            .map(|m| m.media_ref)
            .ok_or_else(|| DomainError::Permanent("message no longer carries media".into()))
    }
}
