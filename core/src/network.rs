//! Network layer for Harvest Chat - HTTP API and live WebSocket client

use crate::error::{Error, Result};
use crate::models::*;
use crate::protocol::*;
use crate::ClientConfig;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

// ============================================================================
// HTTP API Client
// ============================================================================

pub struct ApiClient {
    client: Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, token: &str) -> Result<Self> {
        let client = Client::builder().build()?;

        Ok(Self {
            client,
            base_url: config.http_url(),
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("Authorization", format!("Bearer {}", self.token))
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = check(self.authed(req).send().await?).await?;
        Ok(resp.json().await?)
    }

    pub async fn me(&self) -> Result<User> {
        self.send_json(self.client.get(self.url("/users/me"))).await
    }

    pub async fn list_conversations(&self, query: &ConversationQuery) -> Result<Vec<Conversation>> {
        let filter = match query.filter {
            ConversationFilter::All => "all",
            ConversationFilter::Unread => "unread",
            ConversationFilter::Archived => "archived",
        };
        let mut params = vec![("filter", filter.to_string())];
        if let Some(q) = &query.q {
            params.push(("q", q.clone()));
        }
        self.send_json(self.client.get(self.url("/conversations")).query(&params))
            .await
    }

    pub async fn create_conversation(&self, req: &CreateConversationRequest) -> Result<String> {
        let resp: CreateConversationResponse = self
            .send_json(self.client.post(self.url("/conversations")).json(req))
            .await?;
        Ok(resp.conversation_id)
    }

    pub async fn mark_as_read(&self, conversation_id: &str) -> Result<bool> {
        let resp: MarkReadResponse = self
            .send_json(
                self.client
                    .post(self.url(&format!("/conversations/{}/read", conversation_id))),
            )
            .await?;
        Ok(resp.updated)
    }

    pub async fn set_archived(&self, conversation_id: &str, archived: bool) -> Result<Conversation> {
        self.send_json(
            self.client
                .post(self.url(&format!("/conversations/{}/archive", conversation_id)))
                .json(&FlagRequest { value: archived }),
        )
        .await
    }

    pub async fn set_muted(&self, conversation_id: &str, muted: bool) -> Result<Conversation> {
        self.send_json(
            self.client
                .post(self.url(&format!("/conversations/{}/mute", conversation_id)))
                .json(&FlagRequest { value: muted }),
        )
        .await
    }

    pub async fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.send_json(
            self.client
                .get(self.url(&format!("/conversations/{}/messages", conversation_id))),
        )
        .await
    }

    pub async fn send_message(&self, req: &SendMessageRequest) -> Result<Message> {
        self.send_json(self.client.post(self.url("/messages")).json(req))
            .await
    }

    pub async fn edit_message(&self, message_id: &str, content: &str) -> Result<Message> {
        self.send_json(
            self.client
                .put(self.url(&format!("/messages/{}", message_id)))
                .json(&EditMessageRequest {
                    content: content.to_string(),
                }),
        )
        .await
    }

    pub async fn delete_message(&self, message_id: &str) -> Result<()> {
        let req = self
            .client
            .delete(self.url(&format!("/messages/{}", message_id)));
        check(self.authed(req).send().await?).await?;
        Ok(())
    }

    pub async fn add_reaction(&self, message_id: &str, emoji: &str) -> Result<Message> {
        self.send_json(
            self.client
                .post(self.url(&format!("/messages/{}/reactions", message_id)))
                .json(&ReactionRequest {
                    emoji: emoji.to_string(),
                }),
        )
        .await
    }

    pub async fn remove_reaction(&self, message_id: &str, emoji: &str) -> Result<Message> {
        self.send_json(
            self.client
                .delete(self.url(&format!("/messages/{}/reactions", message_id)))
                .json(&ReactionRequest {
                    emoji: emoji.to_string(),
                }),
        )
        .await
    }

    pub async fn quick_replies(&self) -> Result<Vec<String>> {
        let resp: QuickRepliesResponse = self.send_json(self.client.get(self.url("/quick-replies"))).await?;
        Ok(resp.replies)
    }

    pub async fn check_health(&self) -> Result<bool> {
        let resp = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await;

        match resp {
            Ok(r) => Ok(r.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

/// Turn a non-2xx response into `Error::Api` using the server's error body.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body: serde_json::Value = resp.json().await.unwrap_or_default();
    Err(Error::Api {
        status: status.as_u16(),
        code: body["error"]["code"].as_str().unwrap_or("UNKNOWN").to_string(),
        message: body["error"]["message"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
    })
}

// ============================================================================
// Live (WebSocket) Client
// ============================================================================

type Routes = Arc<Mutex<HashMap<Topic, Vec<(u64, mpsc::UnboundedSender<WsServerMessage>)>>>>;

pub struct LiveClient {
    user_id: String,
    sender: mpsc::UnboundedSender<WsClientMessage>,
    routes: Routes,
    next_route: Arc<AtomicU64>,
    connected: Arc<Mutex<bool>>,
}

impl LiveClient {
    /// Connect and authenticate. Fails if the server rejects the token.
    pub async fn connect(config: &ClientConfig, token: &str) -> Result<Self> {
        let url = url::Url::parse(&config.ws_url())?;
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        let auth = WsClientMessage::Authenticate {
            token: token.to_string(),
        };
        write.send(WsMessage::Text(serde_json::to_string(&auth)?)).await?;

        let user_id = loop {
            match read.next().await {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<WsServerMessage>(&text)? {
                    WsServerMessage::Authenticated { user_id } => break user_id,
                    WsServerMessage::Error { .. } => return Err(Error::NotAuthenticated),
                    _ => continue,
                },
                Some(Ok(WsMessage::Close(_))) | None => return Err(Error::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<WsClientMessage>();
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(Mutex::new(true));

        let routes_clone = routes.clone();
        let connected_clone = connected.clone();

        // Receive task
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<WsServerMessage>(&text) {
                        Ok(frame) => route_frame(&routes_clone, frame),
                        Err(e) => log::warn!("Unparseable frame from server: {}", e),
                    },
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            *connected_clone.lock() = false;
            // Dropping the routes ends every subscription stream.
            routes_clone.lock().clear();
        });

        // Send task
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(_) => continue,
                };
                if write.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        log::info!("Live connection established for {}", user_id);

        Ok(Self {
            user_id,
            sender: tx,
            routes,
            next_route: Arc::new(AtomicU64::new(1)),
            connected,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Start receiving snapshots for `topic`. Dropping the handle unsubscribes.
    pub fn subscribe(&self, topic: Topic) -> Result<LiveSubscription> {
        if !self.is_connected() {
            return Err(Error::Closed);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let route_id = self.next_route.fetch_add(1, Ordering::Relaxed);
        self.routes
            .lock()
            .entry(topic.clone())
            .or_default()
            .push((route_id, tx));

        self.sender
            .send(WsClientMessage::Subscribe { topic: topic.clone() })
            .map_err(|_| Error::Closed)?;

        Ok(LiveSubscription {
            topic,
            route_id,
            rx,
            sender: self.sender.clone(),
            routes: self.routes.clone(),
        })
    }

    pub fn send_typing(&self, conversation_id: &str, is_typing: bool) -> Result<()> {
        self.sender
            .send(WsClientMessage::Typing {
                conversation_id: conversation_id.to_string(),
                is_typing,
            })
            .map_err(|_| Error::Closed)
    }

    pub fn ping(&self) -> Result<()> {
        self.sender.send(WsClientMessage::Ping).map_err(|_| Error::Closed)
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.lock()
    }
}

fn route_frame(routes: &Routes, frame: WsServerMessage) {
    match frame.topic() {
        Some(topic) => {
            let mut routes = routes.lock();
            if let Some(subscribers) = routes.get_mut(&topic) {
                subscribers.retain(|(_, tx)| tx.send(frame.clone()).is_ok());
            }
        }
        None => {
            if let WsServerMessage::Error { code, message } = frame {
                log::warn!("Server error {}: {}", code, message);
            }
        }
    }
}

/// Disposable handle for one live topic.
pub struct LiveSubscription {
    topic: Topic,
    route_id: u64,
    rx: mpsc::UnboundedReceiver<WsServerMessage>,
    sender: mpsc::UnboundedSender<WsClientMessage>,
    routes: Routes,
}

impl LiveSubscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Next full snapshot, or `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<WsServerMessage> {
        self.rx.recv().await
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        let mut routes = self.routes.lock();
        let last = match routes.get_mut(&self.topic) {
            Some(subscribers) => {
                subscribers.retain(|(id, _)| *id != self.route_id);
                subscribers.is_empty()
            }
            None => false,
        };
        if last {
            routes.remove(&self.topic);
            let _ = self.sender.send(WsClientMessage::Unsubscribe {
                topic: self.topic.clone(),
            });
        }
    }
}
