use std::sync::Arc;

use tracing::{debug, error, info};

use courier_db::Database;
use courier_db::models::{ChatRow, MessageRow, NewMessage};
use courier_types::api::{ChatSummary, MessagePayload};
use courier_types::events::{SendMessage, ServerEvent};
use courier_types::models::{ChatId, ChatPair, UserId, UserProfile};

use crate::auth::Authenticator;
use crate::codec;
use crate::dispatcher::{ConnectionHandle, Dispatcher};
use crate::error::ChatError;
use crate::media::MediaStore;

/// Chat and message operations shared by the live gateway and the HTTP API.
///
/// Store access runs on the blocking pool; fan-out goes through the
/// [`Dispatcher`].
#[derive(Clone)]
pub struct Messenger {
    inner: Arc<MessengerInner>,
}

struct MessengerInner {
    db: Arc<Database>,
    auth: Authenticator,
    media: MediaStore,
    dispatcher: Dispatcher,
}

impl Messenger {
    pub fn new(db: Arc<Database>, auth: Authenticator, media: MediaStore, dispatcher: Dispatcher) -> Self {
        Self {
            inner: Arc::new(MessengerInner {
                db,
                auth,
                media,
                dispatcher,
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.inner.auth
    }

    pub fn media(&self) -> &MediaStore {
        &self.inner.media
    }

    /// Run `f` against the store on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T, ChatError>
    where
        F: FnOnce(&Database, &MediaStore) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        let out = tokio::task::spawn_blocking(move || f(inner.db.as_ref(), &inner.media)).await??;
        Ok(out)
    }

    /// Canonical-pair get-or-create. Returns the chat and whether it is new.
    pub async fn get_or_create_chat(&self, a: UserId, b: UserId) -> Result<(ChatRow, bool), ChatError> {
        let pair = ChatPair::new(a, b).ok_or(ChatError::SelfChat)?;
        self.blocking(move |db, _| db.get_or_create_chat(pair)).await
    }

    /// Persist a message in `chat`. The sender must be one of its participants.
    pub async fn create_message(&self, chat: &ChatRow, draft: NewMessage) -> Result<MessageRow, ChatError> {
        if !chat.has_participant(draft.sender_id) {
            return Err(ChatError::NotParticipant(draft.sender_id, chat.id));
        }
        let draft = NewMessage {
            chat_id: chat.id,
            ..draft
        };
        self.blocking(move |db, _| db.insert_message(&draft)).await
    }

    pub async fn chat_list(&self, user_id: UserId) -> Result<Vec<ChatSummary>, ChatError> {
        self.blocking(move |db, _| codec::serialize_chat_list(db, user_id)).await
    }

    /// History of `chat_id`, oldest first. Only participants may read it.
    pub async fn messages_in_chat(
        &self,
        user_id: UserId,
        chat_id: ChatId,
    ) -> Result<Vec<MessagePayload>, ChatError> {
        let chat = self
            .blocking(move |db, _| db.get_chat(chat_id))
            .await?
            .ok_or(ChatError::ChatNotFound)?;
        if !chat.has_participant(user_id) {
            return Err(ChatError::NotParticipant(user_id, chat_id));
        }

        self.blocking(move |db, media| {
            let rows = db.messages_for_chat(chat_id)?;
            codec::serialize_messages(db, media, &rows)
        })
        .await
    }

    /// History of the chat between `user_id` and `counterpart_id`.
    pub async fn messages_with(
        &self,
        user_id: UserId,
        counterpart_id: UserId,
    ) -> Result<(ChatId, Vec<MessagePayload>), ChatError> {
        let pair = ChatPair::new(user_id, counterpart_id).ok_or(ChatError::SelfChat)?;
        let chat = self
            .blocking(move |db, _| db.find_chat(pair))
            .await?
            .ok_or(ChatError::ChatNotFound)?;
        let messages = self.messages_in_chat(user_id, chat.id).await?;
        Ok((chat.id, messages))
    }

    /// Get or create the chat between `user` and `counterpart_id`, rendered
    /// for `user`. A newly created chat is announced to both participants.
    pub async fn open_chat(
        &self,
        user: &UserProfile,
        counterpart_id: UserId,
    ) -> Result<(ChatSummary, bool), ChatError> {
        if user.id == counterpart_id {
            return Err(ChatError::SelfChat);
        }
        if self.inner.auth.lookup_user(counterpart_id).await?.is_none() {
            return Err(ChatError::RecipientNotFound(counterpart_id));
        }

        let (chat, created) = self.get_or_create_chat(user.id, counterpart_id).await?;
        let (mine, theirs) = self.render_for_both(&chat, user.id, counterpart_id).await?;

        if created {
            info!("chat {} opened between {} and {}", chat.id, user.id, counterpart_id);
            self.inner
                .dispatcher
                .publish(user.id, ServerEvent::NewChat { chat: mine.clone() })
                .await;
            self.inner
                .dispatcher
                .publish(counterpart_id, ServerEvent::NewChat { chat: theirs })
                .await;
        }

        Ok((mine, created))
    }

    /// The send transaction: validate, resolve the recipient, get or create
    /// the chat, ingest media, persist, then fan out.
    ///
    /// Nothing is published unless the message was persisted. `origin`, when
    /// given, receives the sender's own copy of the `new_message` event.
    pub async fn send_message(
        &self,
        sender: &UserProfile,
        origin: Option<&ConnectionHandle>,
        req: SendMessage,
    ) -> Result<MessagePayload, ChatError> {
        let recipient_id = req.validate()?;
        if recipient_id == sender.id {
            return Err(ChatError::SelfChat);
        }

        if self.inner.auth.lookup_user(recipient_id).await?.is_none() {
            return Err(ChatError::RecipientNotFound(recipient_id));
        }

        let (chat, _) = self.get_or_create_chat(sender.id, recipient_id).await?;

        let kind = req.kind();
        let media_ref = match req.media.as_deref().filter(|m| !m.is_empty()) {
            Some(encoded) => Some(self.inner.media.ingest(encoded, kind).await?),
            None => None,
        };

        if !chat.has_participant(sender.id) {
            return Err(ChatError::NotParticipant(sender.id, chat.id));
        }
        let draft = NewMessage {
            chat_id: chat.id,
            sender_id: sender.id,
            kind: kind.as_str().to_string(),
            text: req.text().to_string(),
            media_ref,
            duration: req.duration,
            waveform: req.waveform,
        };

        let sender_id = sender.id;
        let chat_for_render = chat.clone();
        let (message, sender_view, recipient_view) = self
            .blocking(move |db, media| {
                persist_rendered(db, &draft, |row| {
                    let message = codec::serialize_message(db, media, row)?;
                    let sender_view = codec::serialize_chat(db, &chat_for_render, sender_id)?;
                    let recipient_view = codec::serialize_chat(db, &chat_for_render, recipient_id)?;
                    Ok((message, sender_view, recipient_view))
                })
            })
            .await?;

        let dispatcher = &self.inner.dispatcher;
        let delivered = dispatcher
            .publish(
                recipient_id,
                ServerEvent::NewMessage {
                    chat_id: chat.id,
                    message: message.clone(),
                },
            )
            .await;

        if let Some(origin) = origin {
            origin.send(ServerEvent::NewMessage {
                chat_id: chat.id,
                message: message.clone(),
            });
        }

        dispatcher
            .publish(recipient_id, ServerEvent::NewChatActivity { chat: recipient_view })
            .await;
        dispatcher
            .publish(sender_id, ServerEvent::NewChatActivity { chat: sender_view })
            .await;

        info!(
            "message {} in chat {}: {} -> {} ({} live connections)",
            message.id, chat.id, sender_id, recipient_id, delivered
        );
        Ok(message)
    }

    async fn render_for_both(
        &self,
        chat: &ChatRow,
        a: UserId,
        b: UserId,
    ) -> Result<(ChatSummary, ChatSummary), ChatError> {
        let chat = chat.clone();
        let rendered = self
            .blocking(move |db, _| {
                Ok((
                    codec::serialize_chat(db, &chat, a)?,
                    codec::serialize_chat(db, &chat, b)?,
                ))
            })
            .await?;
        debug!("rendered chat {} for {} and {}", rendered.0.id, a, b);
        Ok(rendered)
    }
}

/// Insert `draft` and render it in one step. A render failure removes the
/// message again, so a send either fully succeeds or leaves nothing behind.
fn persist_rendered<R>(
    db: &Database,
    draft: &NewMessage,
    render: impl FnOnce(&MessageRow) -> anyhow::Result<R>,
) -> anyhow::Result<R> {
    let row = db.insert_message(draft)?;
    render(&row).inspect_err(|_| {
        if let Err(e) = db.delete_message(row.id) {
            error!("could not remove unrendered message {}: {:?}", row.id, e);
        }
    })
}
