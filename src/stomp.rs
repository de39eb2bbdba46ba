//! STOMP client over WebSocket.
//!
//! [`StompConnection`] performs the WebSocket upgrade and the STOMP
//! `CONNECT` handshake, then hands incoming `MESSAGE` frames to the
//! [`Subscription`] they belong to from a background reader task. The
//! connection is considered dead as soon as the reader observes a close,
//! an `ERROR` frame or a transport error.
//!
//! [`StompConnector`] opens connections for a
//! [`SessionChannel`](crate::session::SessionChannel), authenticating them
//! with the stored access token.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Serialize;
use tokio::{
    net::TcpStream,
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;
use uuid::Uuid;

use crate::{
    config::Config,
    error::{Error, Result},
    protocol::stomp::{self, Command, Frame, Incoming},
    session::{Connection, Connector},
    tokens::TokenStore,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Subscribers = Arc<Mutex<HashMap<String, mpsc::Sender<Frame>>>>;

/// Frames received for one subscription.
#[derive(Debug)]
pub struct Subscription {
    pub id: String,
    pub destination: String,
    receiver: mpsc::Receiver<Frame>,
}

impl Subscription {
    /// Waits for the next `MESSAGE` frame. Returns `None` once the
    /// subscription or the connection has ended.
    pub async fn next(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }
}

pub struct StompConnection {
    url: Url,
    ws_tx: Mutex<SplitSink<WsStream, Message>>,
    subscribers: Subscribers,
    alive: Arc<AtomicBool>,
    disconnected: AtomicBool,
    reader: JoinHandle<()>,
}

impl StompConnection {
    /// Protocol version negotiated in `CONNECT`.
    const ACCEPT_VERSION: &'static str = "1.2";

    /// Frames buffered per subscription before the reader waits.
    const SUBSCRIPTION_CAPACITY: usize = 64;

    /// Messages larger than this are dropped unparsed.
    const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

    /// Opens a WebSocket to `url` and completes the STOMP handshake.
    ///
    /// `headers` are added to the `CONNECT` frame after `accept-version`
    /// and `host`.
    ///
    /// # Errors
    ///
    /// * `DeadlineExceeded` if the handshake does not complete in `timeout`
    /// * `Unavailable` if the server refuses or closes the connection
    pub async fn connect(
        url: &Url,
        headers: Vec<(String, String)>,
        timeout: Duration,
    ) -> Result<Self> {
        let handshake = Self::handshake(url, headers);
        let (ws_tx, ws_rx) = tokio::time::timeout(timeout, handshake).await??;

        let subscribers = Subscribers::default();
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(Self::read(
            url.clone(),
            ws_rx,
            Arc::clone(&subscribers),
            Arc::clone(&alive),
        ));

        Ok(Self {
            url: url.clone(),
            ws_tx: Mutex::new(ws_tx),
            subscribers,
            alive,
            disconnected: AtomicBool::new(false),
            reader,
        })
    }

    async fn handshake(
        url: &Url,
        headers: Vec<(String, String)>,
    ) -> Result<(SplitSink<WsStream, Message>, SplitStream<WsStream>)> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let mut connect = Frame::new(Command::Connect)
            .header("accept-version", Self::ACCEPT_VERSION)
            .header("host", url.host_str().unwrap_or("localhost"));
        for (name, value) in headers {
            connect = connect.header(name, value);
        }
        ws_tx.send(message(&connect)).await?;

        while let Some(received) = ws_rx.next().await {
            let received = received?;
            if !(received.is_text() || received.is_binary()) {
                continue;
            }

            match stomp::decode(&received.into_data())? {
                Incoming::Heartbeat => continue,
                Incoming::Frame(frame) => match frame.command {
                    Command::Connected => {
                        debug!(
                            "STOMP session established (version {}, heart-beat {})",
                            frame.get("version").unwrap_or("unknown"),
                            frame.get(Frame::HEART_BEAT).unwrap_or("0,0")
                        );
                        return Ok((ws_tx, ws_rx));
                    }
                    Command::Error => {
                        return Err(Error::unavailable(format!(
                            "server refused connection: {}",
                            frame.get("message").unwrap_or("no reason given")
                        )));
                    }
                    command => trace!("ignoring {command} frame during handshake"),
                },
            }
        }

        Err(Error::unavailable("connection closed during handshake"))
    }

    /// Routes incoming frames until the connection ends.
    async fn read(
        url: Url,
        mut ws_rx: SplitStream<WsStream>,
        subscribers: Subscribers,
        alive: Arc<AtomicBool>,
    ) {
        while let Some(received) = ws_rx.next().await {
            let received = match received {
                Ok(received) => received,
                Err(e) => {
                    error!("error receiving message: {e}");
                    break;
                }
            };

            match &received {
                Message::Text(_) | Message::Binary(_) => {}
                Message::Close(payload) => {
                    debug!("connection closed by server: {payload:?}");
                    break;
                }
                _ => continue,
            }

            // Do not parse exceedingly large messages to prevent out of
            // memory conditions.
            let message_size = received.len();
            if message_size > Self::MAX_MESSAGE_SIZE {
                error!("ignoring oversized message with {message_size} bytes");
                continue;
            }

            let frame = match stomp::decode(&received.into_data()) {
                Ok(Incoming::Heartbeat) => {
                    trace!("heartbeat received");
                    continue;
                }
                Ok(Incoming::Frame(frame)) => frame,
                Err(e) => {
                    error!("error parsing frame: {e}");
                    continue;
                }
            };

            match frame.command {
                Command::Message => Self::dispatch(&subscribers, frame).await,
                Command::Error => {
                    error!(
                        "server error: {}",
                        frame.get("message").unwrap_or("no reason given")
                    );
                    break;
                }
                command => trace!("ignoring {command} frame"),
            }
        }

        alive.store(false, Ordering::Release);

        // Ends every subscription stream.
        subscribers.lock().await.clear();
        debug!("connection to {url} ended");
    }

    async fn dispatch(subscribers: &Subscribers, frame: Frame) {
        let Some(id) = frame.get(Frame::SUBSCRIPTION).map(ToOwned::to_owned) else {
            warn!("ignoring message without subscription");
            return;
        };

        let tx = subscribers.lock().await.get(&id).cloned();
        match tx {
            // A full buffer drops the message instead of stalling the reader.
            Some(tx) => match tx.try_send(frame) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("subscription {id} is not keeping up; dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("subscription {id} dropped by receiver");
                    subscribers.lock().await.remove(&id);
                }
            },
            None => trace!("ignoring message for unknown subscription {id}"),
        }
    }

    /// The endpoint this connection was opened to.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.disconnected.load(Ordering::Acquire)
    }

    async fn send_message(&self, message: Message) -> Result<()> {
        if !self.is_alive() {
            return Err(Error::unavailable(format!(
                "connection to {} is closed",
                self.url
            )));
        }
        self.ws_tx.lock().await.send(message).await.map_err(Into::into)
    }

    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        trace!("sending {} frame", frame.command);
        self.send_message(message(frame)).await
    }

    /// Subscribes to `/topic<path>`.
    pub async fn subscribe(&self, path: &str) -> Result<Subscription> {
        let id = Uuid::new_v4().to_string();
        let destination = format!("/topic{path}");
        let (tx, receiver) = mpsc::channel(Self::SUBSCRIPTION_CAPACITY);
        self.subscribers.lock().await.insert(id.clone(), tx);

        let frame = Frame::new(Command::Subscribe)
            .header(Frame::ID, &id)
            .header(Frame::DESTINATION, &destination)
            .header("ack", "auto");
        if let Err(e) = self.send_frame(&frame).await {
            self.subscribers.lock().await.remove(&id);
            return Err(e);
        }

        debug!("subscribed to {destination} as {id}");
        Ok(Subscription {
            id,
            destination,
            receiver,
        })
    }

    pub async fn unsubscribe(&self, id: &str) -> Result<()> {
        self.subscribers.lock().await.remove(id);
        self.send_frame(&Frame::new(Command::Unsubscribe).header(Frame::ID, id))
            .await
    }

    /// Sends `payload` as JSON to `destination`.
    pub async fn send_json<T>(&self, destination: &str, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(payload)?;
        let frame = Frame::new(Command::Send)
            .header(Frame::DESTINATION, destination)
            .header(Frame::CONTENT_TYPE, "application/json")
            .with_body(body);
        self.send_frame(&frame).await
    }

    pub async fn heartbeat(&self) -> Result<()> {
        self.send_message(Message::text(Frame::HEARTBEAT)).await
    }

    /// Sends `DISCONNECT` and closes the socket.
    pub async fn disconnect(&self) -> Result<()> {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut ws_tx = self.ws_tx.lock().await;
        let mut result = Ok(());
        if self.alive.load(Ordering::Acquire) {
            let frame = Frame::new(Command::Disconnect);
            result = ws_tx.send(message(&frame)).await.map_err(Error::from);
        }
        if let Err(e) = ws_tx.close().await {
            trace!("closing socket: {e}");
        }

        self.alive.store(false, Ordering::Release);
        self.reader.abort();
        debug!("disconnected from {}", self.url);

        result
    }
}

impl Drop for StompConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Connection for StompConnection {
    fn is_alive(&self) -> bool {
        StompConnection::is_alive(self)
    }

    async fn heartbeat(&self) -> Result<()> {
        StompConnection::heartbeat(self).await
    }

    async fn disconnect(&self) -> Result<()> {
        StompConnection::disconnect(self).await
    }
}

/// Sends frames as text when they are valid UTF-8.
fn message(frame: &Frame) -> Message {
    match String::from_utf8(frame.encode()) {
        Ok(text) => Message::text(text),
        Err(e) => Message::binary(e.into_bytes()),
    }
}

/// Opens authenticated [`StompConnection`]s.
#[derive(Debug)]
pub struct StompConnector {
    tokens: TokenStore,
    heartbeat: (u32, u32),
    timeout: Duration,
}

impl StompConnector {
    #[must_use]
    pub fn new(config: &Config, tokens: TokenStore) -> Self {
        Self {
            tokens,
            heartbeat: config.heartbeat_negotiation,
            timeout: config.connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for StompConnector {
    type Connection = StompConnection;

    async fn connect(&self, url: &Url) -> Result<StompConnection> {
        let (outgoing, incoming) = self.heartbeat;
        let mut headers = vec![(
            Frame::HEART_BEAT.to_owned(),
            format!("{outgoing},{incoming}"),
        )];

        match self.tokens.load().await {
            Some(auth) => headers.push(("Authorization".to_owned(), auth.bearer())),
            None => debug!("connecting to {url} without access token"),
        }

        StompConnection::connect(url, headers, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::{error::ErrorKind, protocol::auth::Auth, store::MemoryStore};

    /// Accepts one WebSocket client and plays the server side of `script`.
    async fn server<F, Fut>(script: F) -> Url
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            script(ws).await;
        });
        format!("ws://{addr}/ws").parse().unwrap()
    }

    async fn next_frame(ws: &mut WebSocketStream<TcpStream>) -> Frame {
        loop {
            let received = ws.next().await.unwrap().unwrap();
            if let Ok(Incoming::Frame(frame)) = stomp::decode(&received.into_data()) {
                return frame;
            }
        }
    }

    fn reply(frame: &Frame) -> Message {
        message(frame)
    }

    #[tokio::test]
    async fn handshake_subscribe_and_receive() {
        let url = server(|mut ws| async move {
            let connect = next_frame(&mut ws).await;
            assert_eq!(connect.command, Command::Connect);
            assert_eq!(connect.get("accept-version"), Some("1.2"));
            assert_eq!(connect.get("heart-beat"), Some("10000,10000"));
            assert_eq!(connect.get("Authorization"), Some("Bearer access"));
            ws.send(reply(&Frame::new(Command::Connected).header("version", "1.2")))
                .await
                .unwrap();

            let subscribe = next_frame(&mut ws).await;
            assert_eq!(subscribe.command, Command::Subscribe);
            assert_eq!(subscribe.get("destination"), Some("/topic/orders"));
            let id = subscribe.get("id").unwrap().to_owned();

            let message = Frame::new(Command::Message)
                .header("subscription", id)
                .header("destination", "/topic/orders")
                .with_body(r#"{"id":1}"#);
            ws.send(reply(&message)).await.unwrap();

            let send = next_frame(&mut ws).await;
            assert_eq!(send.command, Command::Send);
            assert_eq!(send.get("content-type"), Some("application/json"));
            assert_eq!(send.body_str().unwrap(), r#"{"ok":true}"#);

            assert_eq!(next_frame(&mut ws).await.command, Command::Disconnect);
        })
        .await;

        let tokens = TokenStore::new(Arc::new(MemoryStore::new()));
        let auth: Auth = serde_json::from_value(serde_json::json!({
            "access_token": "access",
            "refresh_token": "refresh",
            "expires_in": 300,
        }))
        .unwrap();
        tokens.save(&auth).await.unwrap();

        let flow: crate::credential::OidcAuthenticationFlow = toml::from_str(
            r#"
            flow = "direct_grant"
            token_endpoint = "https://id.example.com/token"
            client_id = "mobile"
            client_secret = "secret"
            grant_type = "password"
            "#,
        )
        .unwrap();
        let config = Config::new(url.clone(), flow).unwrap();
        let connection = StompConnector::new(&config, tokens)
            .connect(&url)
            .await
            .unwrap();
        assert!(connection.is_alive());

        let mut subscription = connection.subscribe("/orders").await.unwrap();
        let frame = subscription.next().await.unwrap();
        assert_eq!(frame.body_str().unwrap(), r#"{"id":1}"#);

        connection
            .send_json("/app/ack", &serde_json::json!({"ok": true}))
            .await
            .unwrap();

        connection.disconnect().await.unwrap();
        connection.disconnect().await.unwrap();
        assert!(!connection.is_alive());
        assert_eq!(
            connection.heartbeat().await.unwrap_err().kind,
            ErrorKind::Unavailable
        );
    }

    #[tokio::test]
    async fn stalled_subscription_does_not_block_others() {
        let url = server(|mut ws| async move {
            next_frame(&mut ws).await;
            ws.send(reply(&Frame::new(Command::Connected))).await.unwrap();

            let slow = next_frame(&mut ws).await.get("id").unwrap().to_owned();
            let fast = next_frame(&mut ws).await.get("id").unwrap().to_owned();

            for n in 0..=StompConnection::SUBSCRIPTION_CAPACITY * 2 {
                let message = Frame::new(Command::Message)
                    .header("subscription", &slow)
                    .with_body(n.to_string());
                ws.send(reply(&message)).await.unwrap();
            }
            let message = Frame::new(Command::Message)
                .header("subscription", &fast)
                .with_body("fast");
            ws.send(reply(&message)).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let connection = StompConnection::connect(&url, Vec::new(), Duration::from_secs(5))
            .await
            .unwrap();
        let mut slow = connection.subscribe("/slow").await.unwrap();
        let mut fast = connection.subscribe("/fast").await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(5), fast.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.body_str().unwrap(), "fast");

        tokio::time::timeout(Duration::from_secs(5), async {
            while connection.is_alive() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let mut buffered = 0;
        while slow.next().await.is_some() {
            buffered += 1;
        }
        assert_eq!(buffered, StompConnection::SUBSCRIPTION_CAPACITY);
    }

    #[tokio::test]
    async fn error_frame_refuses_connection() {
        let url = server(|mut ws| async move {
            next_frame(&mut ws).await;
            let error = Frame::new(Command::Error).header("message", "bad credentials");
            ws.send(reply(&error)).await.unwrap();
        })
        .await;

        let err = StompConnection::connect(&url, Vec::new(), Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn server_close_marks_connection_dead() {
        let url = server(|mut ws| async move {
            next_frame(&mut ws).await;
            ws.send(reply(&Frame::new(Command::Connected))).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let connection = StompConnection::connect(&url, Vec::new(), Duration::from_secs(5))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while connection.is_alive() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(connection.subscribe("/orders").await.is_err());
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            std::future::pending::<()>().await;
        });

        let url: Url = format!("ws://{addr}/ws").parse().unwrap();
        let err = StompConnection::connect(&url, Vec::new(), Duration::from_millis(200))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::DeadlineExceeded);
    }
}
