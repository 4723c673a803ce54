//! Test doubles shared by the connection and session tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use shared::{
    domain::{ChatSummary, Participant, Role, UserId},
    protocol::{CreateChatRequest, SendMessageRequest},
};
use tokio::{net::TcpListener, sync::mpsc, time::Instant};
use url::Url;

use crate::transport::{Connector, TransportEvent, TransportLink};

pub enum Attempt {
    Refuse,
    Accept(ScriptedLink),
}

/// Connector that plays back a fixed list of connection attempts; once the
/// script runs out every attempt is refused.
#[derive(Default)]
pub struct ScriptedConnector {
    attempts: Mutex<VecDeque<Attempt>>,
    calls: Mutex<Vec<(Instant, Url)>>,
}

impl ScriptedConnector {
    pub fn new(attempts: Vec<Attempt>) -> Arc<Self> {
        Arc::new(Self {
            attempts: Mutex::new(attempts.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    pub fn urls(&self) -> Vec<Url> {
        self.calls.lock().unwrap().iter().map(|(_, u)| u.clone()).collect()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn TransportLink>> {
        self.calls.lock().unwrap().push((Instant::now(), url.clone()));
        let next = self.attempts.lock().unwrap().pop_front();
        match next {
            Some(Attempt::Accept(link)) => Ok(Box::new(link)),
            Some(Attempt::Refuse) | None => Err(anyhow!("connection refused")),
        }
    }
}

pub struct ScriptedLink {
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    outbound: mpsc::UnboundedSender<String>,
    closes: Arc<Mutex<Vec<u16>>>,
}

/// Test side of a `ScriptedLink`.
pub struct LinkHandle {
    pub inbound: mpsc::UnboundedSender<TransportEvent>,
    pub outbound: mpsc::UnboundedReceiver<String>,
    pub closes: Arc<Mutex<Vec<u16>>>,
}

impl LinkHandle {
    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.inbound.send(TransportEvent::Text(text.into()));
    }

    pub fn push_close(&self, code: u16) {
        let _ = self.inbound.send(TransportEvent::Closed {
            code,
            reason: String::new(),
        });
    }

    /// Drains frames written so far, decoded as JSON.
    pub fn sent_frames(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = self.outbound.try_recv() {
            frames.push(serde_json::from_str(&text).unwrap());
        }
        frames
    }
}

pub fn scripted_link() -> (ScriptedLink, LinkHandle) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let closes = Arc::new(Mutex::new(Vec::new()));
    (
        ScriptedLink {
            inbound: inbound_rx,
            outbound: outbound_tx,
            closes: Arc::clone(&closes),
        },
        LinkHandle {
            inbound: inbound_tx,
            outbound: outbound_rx,
            closes,
        },
    )
}

#[async_trait]
impl TransportLink for ScriptedLink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.outbound
            .send(text)
            .map_err(|_| anyhow!("test side dropped"))
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }

    async fn close(&mut self, code: u16) -> Result<()> {
        self.closes.lock().unwrap().push(code);
        Ok(())
    }
}

/// In-memory REST backend served by axum.
#[derive(Default)]
pub struct BackendState {
    pub chats: Vec<ChatSummary>,
    pub created: Vec<CreateChatRequest>,
    /// Page number -> response body.
    pub pages: HashMap<u32, Value>,
    /// Upcoming page requests answered with 503.
    pub page_failures: u32,
    pub page_requests: Vec<u32>,
    pub sent: Vec<SendMessageRequest>,
    /// Overrides the send-message response.
    pub send_error: Option<(u16, Value)>,
    pub mark_read_error: Option<(u16, Value)>,
    pub mark_read_calls: u32,
    pub authorization: Vec<Option<String>>,
    pub next_message_id: i64,
}

pub struct FakeBackend {
    pub base: Url,
    pub state: Arc<Mutex<BackendState>>,
}

type Shared = Arc<Mutex<BackendState>>;
type Reply = (StatusCode, Json<Value>);

fn record_auth(state: &Shared, headers: &HeaderMap) {
    let value = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.lock().unwrap().authorization.push(value);
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap()
}

async fn list_chats(State(state): State<Shared>, headers: HeaderMap) -> Reply {
    record_auth(&state, &headers);
    let chats = state.lock().unwrap().chats.clone();
    (StatusCode::OK, Json(json!({ "count": chats.len(), "results": chats })))
}

async fn create_chat(
    State(state): State<Shared>,
    Json(request): Json<CreateChatRequest>,
) -> Reply {
    let mut guard = state.lock().unwrap();
    let id = 100 + guard.chats.len() as i64;
    let participants = [
        request.student_id.map(|id| (id, Role::Student)),
        request.admin_id.map(|id| (id, Role::Admin)),
    ]
    .into_iter()
    .flatten()
    .map(|(id, role)| Participant {
        id,
        name: format!("user-{id}"),
        role,
    })
    .collect::<Vec<_>>();
    let chat = json!({ "id": id, "title": request.title, "participants": participants });
    guard.created.push(request);
    (StatusCode::CREATED, Json(json!({ "chat": chat })))
}

#[derive(Deserialize)]
struct PageQuery {
    page: u32,
}

async fn messages(
    State(state): State<Shared>,
    Path(_chat_id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> Reply {
    let mut guard = state.lock().unwrap();
    guard.page_requests.push(query.page);
    if guard.page_failures > 0 {
        guard.page_failures -= 1;
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "detail": "upstream busy" })),
        );
    }
    let body = guard
        .pages
        .get(&query.page)
        .cloned()
        .unwrap_or_else(|| json!({ "results": [], "next": null }));
    (StatusCode::OK, Json(body))
}

async fn send_message(
    State(state): State<Shared>,
    Path(_chat_id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<SendMessageRequest>,
) -> Reply {
    record_auth(&state, &headers);
    let mut guard = state.lock().unwrap();
    if let Some((code, body)) = guard.send_error.clone() {
        return (status(code), Json(body));
    }
    guard.next_message_id += 1;
    let id = 41 + guard.next_message_id;
    let body = json!({
        "id": id,
        "sender_id": 7,
        "sender_name": "Sam",
        "sender_role": "student",
        "content": request.content,
        "timestamp": Utc::now().to_rfc3339(),
        "reply_to": request.reply_to,
    });
    guard.sent.push(request);
    (StatusCode::CREATED, Json(body))
}

async fn mark_read(State(state): State<Shared>, Path(_chat_id): Path<i64>) -> Reply {
    let mut guard = state.lock().unwrap();
    guard.mark_read_calls += 1;
    match guard.mark_read_error.clone() {
        Some((code, body)) => (status(code), Json(body)),
        None => (StatusCode::OK, Json(json!({ "status": "ok" }))),
    }
}

pub async fn spawn_backend(state: BackendState) -> FakeBackend {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(Mutex::new(state));
    let app = Router::new()
        .route("/api/live-chats/", get(list_chats).post(create_chat))
        .route("/api/live-chats/:chat_id/messages/", get(messages))
        .route("/api/live-chats/:chat_id/send-message/", post(send_message))
        .route("/api/live-chats/:chat_id/mark-read/", post(mark_read))
        .with_state(Arc::clone(&state));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    FakeBackend {
        base: Url::parse(&format!("http://{addr}/api")).unwrap(),
        state,
    }
}

pub fn participant(id: i64, role: Role) -> Participant {
    Participant {
        id: UserId(id),
        name: format!("user-{id}"),
        role,
    }
}
