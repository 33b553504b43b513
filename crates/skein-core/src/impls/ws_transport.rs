//! WsTransport - WebSocket による双方向トランスポート
//!
//! strand ごとに WebSocket 接続を 1 本持つ。1 envelope = 1 テキストフレーム（JSON）。
//! 接続ごとの読み取りタスクがフレームを strand の inbox に積み、
//! `receive_message` はその inbox から取り出す。
//!
//! # ライフサイクル
//! - `connect`: `ws://<addr>/<strand>` に接続し strand に紐づける
//! - `accept`: 1 本の接続を受け入れ、リクエストパスを strand 名として紐づける
//! - 相手が切断すると send は `NoConnection`、receiver は inbox を読み切ったあと `Closed`
//!
//! # 上限
//! - 受信メッセージは `max_message` バイトまで（超えると接続を切る）

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{Mutex, mpsc};
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::WebSocketStream;

use crate::domain::{Msg, TransportError, validate_strand_id};
use crate::ports::Transport;

pub const DEFAULT_INBOX_CAPACITY: usize = 100;

/// 1 メッセージの上限（バイト）
pub const DEFAULT_MAX_MESSAGE: usize = 1 << 20;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

struct Link {
    /// 再接続と、終了した読み取りタスクが属していた接続を区別する
    generation: u64,
    writer: Arc<Mutex<WsSink>>,
}

#[derive(Default)]
struct WsState {
    next_generation: u64,
    links: HashMap<String, Link>,
    inboxes: HashMap<String, Arc<Mutex<mpsc::Receiver<Msg>>>>,
}

/// 読み取りタスクの abort ハンドル。await をまたいで保持しないので std の Mutex で足りる
type Readers = Arc<std::sync::Mutex<HashMap<String, (u64, AbortHandle)>>>;

pub struct WsTransport {
    inbox_capacity: usize,
    max_message: usize,
    state: Arc<Mutex<WsState>>,
    readers: Readers,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_INBOX_CAPACITY, DEFAULT_MAX_MESSAGE)
    }

    /// `inbox_capacity` は strand ごとの受信バッファ、`max_message` は受信フレームの上限
    pub fn with_limits(inbox_capacity: usize, max_message: usize) -> Self {
        Self {
            inbox_capacity: inbox_capacity.max(1),
            max_message: max_message.max(1),
            state: Arc::new(Mutex::new(WsState::default())),
            readers: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    fn config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .max_message_size(Some(self.max_message))
            .max_frame_size(Some(self.max_message))
    }

    /// `addr` に接続し、`ws://<addr>/<strand>` でハンドシェイクする
    pub async fn connect(
        &self,
        strand: &str,
        addr: impl ToSocketAddrs,
    ) -> Result<(), TransportError> {
        let stream = TcpStream::connect(addr).await?;
        let peer = stream.peer_addr()?;
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(strand, error = %err, "could not disable nagle");
        }

        let url = format!("ws://{peer}/{strand}");
        let (socket, _) =
            tokio_tungstenite::client_async_with_config(url.as_str(), stream, Some(self.config()))
                .await?;
        tracing::info!(strand, %peer, "websocket connected");
        self.attach(strand, socket).await;
        Ok(())
    }

    /// 接続を 1 本受け入れ、リクエストパス（`/<strand>`）の strand に紐づける
    pub async fn accept(&self, listener: &TcpListener) -> Result<String, TransportError> {
        let (stream, peer) = listener.accept().await?;
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %err, "could not disable nagle");
        }

        let mut strand = String::new();
        let on_request = |request: &Request, response: Response| {
            let requested = request.uri().path().trim_start_matches('/');
            match validate_strand_id(requested) {
                Ok(()) => {
                    strand = requested.to_string();
                    Ok(response)
                }
                Err(reason) => {
                    let mut rejection = ErrorResponse::new(Some(reason.to_string()));
                    *rejection.status_mut() = StatusCode::BAD_REQUEST;
                    Err(rejection)
                }
            }
        };
        let socket = tokio_tungstenite::accept_hdr_async_with_config(
            stream,
            on_request,
            Some(self.config()),
        )
        .await?;

        tracing::info!(strand, %peer, "websocket accepted");
        self.attach(&strand, socket).await;
        Ok(strand)
    }

    /// 確立済みの WebSocket を `strand` に紐づける（既存の接続は置き換え）
    pub async fn attach(&self, strand: &str, socket: WebSocketStream<TcpStream>) {
        let (sink, source) = socket.split();
        let (tx, rx) = mpsc::channel(self.inbox_capacity);

        let mut state = self.state.lock().await;
        state.next_generation += 1;
        let generation = state.next_generation;

        let reader = tokio::spawn(read_frames(
            strand.to_string(),
            generation,
            source,
            tx,
            Arc::clone(&self.state),
            Arc::clone(&self.readers),
        ));
        let previous = self
            .readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(strand.to_string(), (generation, reader.abort_handle()));
        if let Some((_, old)) = previous {
            old.abort();
        }

        state.links.insert(
            strand.to_string(),
            Link {
                generation,
                writer: Arc::new(Mutex::new(sink)),
            },
        );
        state
            .inboxes
            .insert(strand.to_string(), Arc::new(Mutex::new(rx)));
    }

    /// `strand` の接続を閉じる。待っている receiver は `Closed` を受け取る
    pub async fn disconnect(&self, strand: &str) {
        let link = {
            let mut state = self.state.lock().await;
            state.inboxes.remove(strand);
            state.links.remove(strand)
        };
        if let Some((_, reader)) = self
            .readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(strand)
        {
            reader.abort();
        }
        if let Some(link) = link {
            if let Err(err) = link.writer.lock().await.close().await {
                tracing::debug!(strand, error = %err, "websocket close failed");
            }
            tracing::info!(strand, "websocket dropped");
        }
    }

    pub async fn is_connected(&self, strand: &str) -> bool {
        self.state.lock().await.links.contains_key(strand)
    }

    /// 自分が張った接続のときだけ外す（再接続後の古い接続の後始末で新しい接続を消さない）
    async fn drop_link(&self, strand: &str, generation: u64) {
        let mut state = self.state.lock().await;
        if state
            .links
            .get(strand)
            .is_some_and(|link| link.generation == generation)
        {
            state.links.remove(strand);
        }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        let readers = self.readers.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, reader) in readers.values() {
            reader.abort();
        }
    }
}

async fn read_frames(
    strand: String,
    generation: u64,
    mut source: WsSource,
    tx: mpsc::Sender<Msg>,
    state: Arc<Mutex<WsState>>,
    readers: Readers,
) {
    while let Some(frame) = source.next().await {
        let decoded = match frame {
            Ok(Message::Text(text)) => serde_json::from_str::<Msg>(text.as_str()),
            Ok(Message::Binary(bytes)) => serde_json::from_slice::<Msg>(&bytes),
            Ok(Message::Close(_)) => {
                tracing::info!(strand, "websocket closed by peer");
                break;
            }
            Ok(_) => continue,
            Err(err) => {
                tracing::warn!(strand, error = %err, "websocket read error");
                break;
            }
        };

        match decoded {
            Ok(msg) if msg.strand() != strand => {
                tracing::warn!(strand, got = msg.strand(), "dropping frame for another strand");
            }
            Ok(msg) => {
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(strand, error = %err, "failed to decode websocket frame");
            }
        }
    }

    {
        let mut state = state.lock().await;
        if state
            .links
            .get(&strand)
            .is_some_and(|link| link.generation == generation)
        {
            state.links.remove(&strand);
        }
    }
    let mut readers = readers.lock().unwrap_or_else(PoisonError::into_inner);
    if readers
        .get(&strand)
        .is_some_and(|(current, _)| *current == generation)
    {
        readers.remove(&strand);
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_message(&self, msg: &Msg) -> Result<(), TransportError> {
        let strand = msg.strand();
        let (generation, writer) = {
            let state = self.state.lock().await;
            let link = state.links.get(strand).ok_or_else(|| {
                tracing::warn!(strand, "no websocket connection for strand");
                TransportError::NoConnection(strand.to_string())
            })?;
            (link.generation, Arc::clone(&link.writer))
        };

        let frame = serde_json::to_string(msg)?;
        let sent = writer.lock().await.send(Message::text(frame)).await;

        if let Err(err) = sent {
            tracing::error!(strand, error = %err, "failed to send websocket frame");
            self.drop_link(strand, generation).await;
            return Err(err.into());
        }

        tracing::debug!(strand, msg_id = msg.id(), "message sent via websocket");
        Ok(())
    }

    async fn receive_message(&self, strand: &str) -> Result<Msg, TransportError> {
        let inbox = {
            let state = self.state.lock().await;
            state
                .inboxes
                .get(strand)
                .cloned()
                .ok_or_else(|| TransportError::NoConnection(strand.to_string()))?
        };

        let received = inbox.lock().await.recv().await;
        match received {
            Some(msg) => {
                tracing::debug!(strand, msg_id = msg.id(), "message received via websocket");
                Ok(msg)
            }
            None => {
                let mut state = self.state.lock().await;
                if state
                    .inboxes
                    .get(strand)
                    .is_some_and(|current| Arc::ptr_eq(current, &inbox))
                {
                    state.inboxes.remove(strand);
                }
                Err(TransportError::Closed(strand.to_string()))
            }
        }
    }
}
