use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

use courier_db::Database;
use courier_gateway::messenger::Messenger;
use courier_server::config::ServerConfig;
use courier_types::models::UserProfile;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    messenger: Messenger,
    db_path: PathBuf,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    async fn start() -> Self {
        let dir = std::env::temp_dir().join(format!("courier-e2e-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let db_file = dir.join("courier.db");
        let db_path = db_file.display().to_string();
        let media_dir = dir.join("media").display().to_string();

        let config = ServerConfig::from_lookup(|key| match key {
            "COURIER_JWT_SECRET" => Some("e2e-test-secret".into()),
            "COURIER_DB_PATH" => Some(db_path.clone()),
            "COURIER_MEDIA_DIR" => Some(media_dir.clone()),
            _ => None,
        })
        .unwrap();

        let messenger = courier_server::build_messenger(&config).await.unwrap();
        let app = courier_server::app(messenger.clone(), config.max_media_bytes);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            messenger,
            db_path: db_file,
            _shutdown: shutdown_tx,
        }
    }

    fn token(&self, id: i64, name: &str) -> String {
        let profile = UserProfile {
            id,
            display_name: name.into(),
            avatar_url: None,
        };
        self.messenger
            .authenticator()
            .issue_token(&profile, chrono::Duration::hours(1))
            .unwrap()
    }

    async fn connect(&self, token: &str) -> Ws {
        let url = format!("ws://{}/gateway?token={}", self.addr, token);
        let (ws, _) = connect_async(url).await.expect("ws connect");
        ws
    }

    /// Connect and consume the initial chat list.
    async fn connect_ready(&self, token: &str) -> (Ws, Value) {
        let mut ws = self.connect(token).await;
        let first = next_event(&mut ws).await;
        assert_eq!(first["type"], "chat_list", "first event must be the chat list");
        (ws, first)
    }
}

async fn next_event(ws: &mut Ws) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for an event")
            .expect("connection closed")
            .expect("ws error");
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

async fn send(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn two_users_exchange_a_message() {
    let server = TestServer::start().await;
    let (mut alice, list) = server.connect_ready(&server.token(1, "Alice")).await;
    assert_eq!(list["chats"], json!([]));
    let (mut bob, _) = server.connect_ready(&server.token(2, "Bob")).await;

    send(&mut alice, json!({"recipient_id": 2, "text": "hi"})).await;

    let delivered = next_event(&mut bob).await;
    assert_eq!(delivered["type"], "new_message");
    assert_eq!(delivered["message"]["text"], "hi");
    assert_eq!(delivered["message"]["type"], "text");
    assert_eq!(delivered["message"]["sender"]["id"], 1);
    assert_eq!(delivered["message"]["sender"]["display_name"], "Alice");
    let chat_id = delivered["chat_id"].clone();
    assert_eq!(delivered["message"]["chat_id"], chat_id);

    let activity = next_event(&mut bob).await;
    assert_eq!(activity["type"], "new_chat_activity");
    assert_eq!(activity["chat"]["id"], chat_id);
    assert_eq!(activity["chat"]["counterpart"]["id"], 1);
    assert_eq!(activity["chat"]["last_message"]["text"], "hi");

    let echo = next_event(&mut alice).await;
    assert_eq!(echo["type"], "new_message");
    assert_eq!(echo["chat_id"], chat_id);
    assert_eq!(echo["message"]["id"], delivered["message"]["id"]);

    let own_activity = next_event(&mut alice).await;
    assert_eq!(own_activity["type"], "new_chat_activity");
    assert_eq!(own_activity["chat"]["counterpart"]["id"], 2);
}

#[tokio::test]
async fn unauthenticated_upgrade_is_refused() {
    let server = TestServer::start().await;

    for url in [
        format!("ws://{}/gateway", server.addr),
        format!("ws://{}/gateway?token=not-a-jwt", server.addr),
    ] {
        match connect_async(url).await {
            Err(tungstenite::Error::Http(resp)) => assert_eq!(resp.status(), 401),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("upgrade should have been refused"),
        }
    }

    assert!(!server.messenger.dispatcher().is_online(1).await);
}

#[tokio::test]
async fn offline_recipient_finds_message_later() {
    let server = TestServer::start().await;
    let bob_token = server.token(2, "Bob");
    // Bob is known to the directory but has no live connection.
    server
        .messenger
        .authenticator()
        .authenticate(&bob_token)
        .await
        .unwrap();

    let (mut alice, _) = server.connect_ready(&server.token(1, "Alice")).await;
    send(&mut alice, json!({"recipient_id": 2, "text": "see you later"})).await;
    let echo = next_event(&mut alice).await;
    assert_eq!(echo["type"], "new_message");
    let chat_id = echo["chat_id"].as_i64().unwrap();

    let (mut bob, list) = server.connect_ready(&bob_token).await;
    assert_eq!(list["chats"][0]["id"], chat_id);
    assert_eq!(list["chats"][0]["last_message"]["text"], "see you later");

    send(&mut bob, json!({"action": "fetch_messages", "chat_id": chat_id})).await;
    let history = next_event(&mut bob).await;
    assert_eq!(history["type"], "messages_list");
    assert_eq!(history["chat_id"], chat_id);
    assert_eq!(history["messages"].as_array().unwrap().len(), 1);
    assert_eq!(history["messages"][0]["text"], "see you later");
}

#[tokio::test]
async fn concurrent_first_contact_shares_one_chat() {
    let server = TestServer::start().await;
    let (mut alice, _) = server.connect_ready(&server.token(1, "Alice")).await;
    let (mut bob, _) = server.connect_ready(&server.token(2, "Bob")).await;

    tokio::join!(
        send(&mut alice, json!({"recipient_id": 2, "text": "hey bob"})),
        send(&mut bob, json!({"recipient_id": 1, "text": "hey alice"})),
    );

    let mut chat_ids = Vec::new();
    for ws in [&mut alice, &mut bob] {
        // own echo + activity, peer's message + activity
        for _ in 0..4 {
            let event = next_event(ws).await;
            if event["type"] == "new_message" {
                chat_ids.push(event["chat_id"].as_i64().unwrap());
            }
        }
    }
    assert_eq!(chat_ids.len(), 4);
    assert!(chat_ids.iter().all(|id| *id == chat_ids[0]));

    send(&mut alice, json!({"action": "fetch_chats"})).await;
    let list = next_event(&mut alice).await;
    assert_eq!(list["type"], "chat_list");
    assert_eq!(list["chats"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn bad_actions_get_an_error_and_the_connection_survives() {
    let server = TestServer::start().await;
    let (mut alice, _) = server.connect_ready(&server.token(1, "Alice")).await;
    server
        .messenger
        .authenticator()
        .authenticate(&server.token(2, "Bob"))
        .await
        .unwrap();

    alice.send(Message::Text("not json".into())).await.unwrap();
    let err = next_event(&mut alice).await;
    assert_eq!(err["type"], "error");
    assert!(err["error"].as_str().unwrap().starts_with("malformed payload"));

    send(&mut alice, json!({"recipient_id": 99, "text": "anyone?"})).await;
    let err = next_event(&mut alice).await;
    assert_eq!(err["error"], "recipient not found: 99");

    send(&mut alice, json!({"recipient_id": 2, "text": ""})).await;
    let err = next_event(&mut alice).await;
    assert_eq!(err["type"], "error");

    send(&mut alice, json!({"recipient_id": 2, "text": "still here"})).await;
    let echo = next_event(&mut alice).await;
    assert_eq!(echo["type"], "new_message");
    assert_eq!(echo["message"]["text"], "still here");
}

#[tokio::test]
async fn closing_the_socket_unregisters_it() {
    let server = TestServer::start().await;
    let token = server.token(1, "Alice");
    let (first, _) = server.connect_ready(&token).await;
    let (_second, _) = server.connect_ready(&token).await;
    assert_eq!(server.messenger.dispatcher().connection_count(1).await, 2);

    drop(first);
    for _ in 0..50 {
        if server.messenger.dispatcher().connection_count(1).await == 1 {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("closed connection was never unregistered");
}

#[tokio::test]
async fn store_failure_is_reported_and_the_connection_stays_open() {
    let server = TestServer::start().await;
    let (mut alice, _) = server.connect_ready(&server.token(1, "Alice")).await;
    let (mut bob, _) = server.connect_ready(&server.token(2, "Bob")).await;

    // Break the store from a second connection to the same file.
    let side = Database::open(&server.db_path).unwrap();
    side.with_conn(|c| Ok(c.execute_batch("DROP TABLE messages;")?))
        .unwrap();

    send(&mut alice, json!({"recipient_id": 2, "text": "into the void"})).await;
    let err = next_event(&mut alice).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["error"], "storage unavailable");

    // Later actions on the same socket are still served.
    send(&mut alice, json!({"recipient_id": 99, "text": "anyone?"})).await;
    let err = next_event(&mut alice).await;
    assert_eq!(err["error"], "recipient not found: 99");

    assert!(
        timeout(Duration::from_millis(200), bob.next()).await.is_err(),
        "recipient must not hear about a message that was never stored"
    );
}
