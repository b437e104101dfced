use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use courier_types::events::{ClientAction, ServerEvent};
use courier_types::models::UserProfile;

use crate::dispatcher::ConnectionHandle;
use crate::error::ChatError;
use crate::messenger::Messenger;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Serve one authenticated live connection until either side goes away.
///
/// The connection is registered before the initial chat list is built, so
/// nothing published in between is lost; it is unregistered on every exit
/// path before this returns.
pub async fn handle_connection(socket: WebSocket, messenger: Messenger, user: UserProfile) {
    let (mut sender, mut receiver) = socket.split();
    let dispatcher = messenger.dispatcher().clone();
    let (handle, mut rx) = dispatcher.register(user.id).await;
    let conn_id = handle.id();

    info!("{} ({}) connected [{}]", user.display_name, user.id, conn_id);

    let initial = match messenger.chat_list(user.id).await {
        Ok(chats) => ServerEvent::ChatList { chats },
        Err(e) => {
            error!("chat list for {} failed: {:?}", user.id, e);
            ServerEvent::error(e.to_string())
        }
    };
    if send_event(&mut sender, &initial).await.is_err() {
        dispatcher.unregister(user.id, conn_id).await;
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_user = user.clone();
    let recv_messenger = messenger.clone();
    let mut recv_task = tokio::spawn(async move {
        // Actions from one connection are handled strictly in arrival order.
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text(&recv_messenger, &recv_user, &handle, text.as_str()).await;
                }
                Message::Binary(_) => {
                    handle.send(ServerEvent::error("binary frames are not supported"));
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister(user.id, conn_id).await;
    info!("{} ({}) disconnected [{}]", user.display_name, user.id, conn_id);
}

async fn handle_text(messenger: &Messenger, user: &UserProfile, handle: &ConnectionHandle, text: &str) {
    let action = match ClientAction::parse(text) {
        Ok(action) => action,
        Err(e) => {
            warn!(
                "{} ({}) bad action: {} -- raw: {}",
                user.display_name,
                user.id,
                e,
                truncate(text, 200)
            );
            handle.send(ServerEvent::error(e.to_string()));
            return;
        }
    };

    let result = match action {
        ClientAction::FetchChats => messenger
            .chat_list(user.id)
            .await
            .map(|chats| ServerEvent::ChatList { chats }),
        ClientAction::FetchMessages { chat_id } => messenger
            .messages_in_chat(user.id, chat_id)
            .await
            .map(|messages| ServerEvent::MessagesList { chat_id, messages }),
        // The echo and fan-out are sent by the messenger itself.
        ClientAction::SendMessage(req) => {
            match messenger.send_message(user, Some(handle), req).await {
                Ok(message) => {
                    debug!("{} sent message {}", user.id, message.id);
                    return;
                }
                Err(e) => Err(e),
            }
        }
    };

    match result {
        Ok(event) => {
            handle.send(event);
        }
        Err(e) => report(user, handle, e),
    }
}

fn report(user: &UserProfile, handle: &ConnectionHandle, e: ChatError) {
    if e.is_client_error() {
        warn!("{} ({}) action rejected: {}", user.display_name, user.id, e);
    } else {
        error!("{} ({}) action failed: {:?}", user.display_name, user.id, e);
    }
    handle.send(ServerEvent::error(e.to_string()));
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &ServerEvent) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("failed to encode event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
