//! Realtime wallet notifications over socket.io.
//!
//! Speaks just enough of the socket.io v4 / Engine.IO v4 websocket framing to
//! join the default namespace, answer pings and receive events. Each event has
//! a single handler slot; registering again replaces the previous handler.

use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::http::header::AUTHORIZATION;
use tungstenite::http::HeaderValue;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use super::cart::CartStore;
use super::client::Client;
use super::Transaction;
use crate::balance::{AmountScale, BackendAmount};
use crate::errors::{BeCoinError, Result};

pub const BALANCE_UPDATED: &str = "balanceUpdated";
pub const TRANSACTION_RECEIVED: &str = "transactionReceived";
pub const PAYMENT_SUCCESS: &str = "payment-success";

/// How often the reader wakes up to check for `disconnect()`.
const READ_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BalanceUpdate {
    #[serde(alias = "newBalance")]
    pub balance: BackendAmount,
    #[serde(default, alias = "walletId")]
    pub wallet_id: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PaymentSuccess {
    #[serde(default, alias = "cartId")]
    pub cart_id: Option<Value>,
    #[serde(default, alias = "transactionId")]
    pub transaction_id: Option<Value>,
    #[serde(default)]
    pub amount: BackendAmount,
}

type Handler<T> = Box<dyn Fn(T) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    balance_updated: Option<Handler<BalanceUpdate>>,
    transaction_received: Option<Handler<Transaction>>,
    payment_success: Option<Handler<PaymentSuccess>>,
}

/// One decoded websocket frame.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Packet {
    Open(Value),
    Close,
    Ping,
    Pong,
    Noop,
    Connected,
    Disconnected,
    ConnectError(Value),
    Event { name: String, payload: Value },
    /// Acks and binary packets; never sent to this client.
    Ignored,
}

/// Decodes an Engine.IO text frame and, for messages, the socket.io packet inside.
pub(crate) fn parse_packet(text: &str) -> Option<Packet> {
    let mut chars = text.chars();
    let engine = chars.next()?;
    let rest = chars.as_str();

    match engine {
        '0' => Some(Packet::Open(serde_json::from_str(rest).unwrap_or(Value::Null))),
        '1' => Some(Packet::Close),
        '2' => Some(Packet::Ping),
        '3' => Some(Packet::Pong),
        '6' => Some(Packet::Noop),
        '4' => parse_socket_packet(rest),
        _ => None,
    }
}

fn parse_socket_packet(text: &str) -> Option<Packet> {
    let mut chars = text.chars();
    let kind = chars.next()?;
    let mut body = chars.as_str();

    // "/namespace," prefix
    if body.starts_with('/') {
        body = body.split_once(',').map_or("", |(_, rest)| rest);
    }
    // ack id
    let body = body.trim_start_matches(|c: char| c.is_ascii_digit());

    match kind {
        '0' => Some(Packet::Connected),
        '1' => Some(Packet::Disconnected),
        '2' => {
            let mut args = match serde_json::from_str::<Value>(body).ok()? {
                Value::Array(args) => args.into_iter(),
                _ => return None,
            };
            let name = args.next()?.as_str()?.to_string();
            let payload = args.next().unwrap_or(Value::Null);
            Some(Packet::Event { name, payload })
        }
        '4' => Some(Packet::ConnectError(
            serde_json::from_str(body).unwrap_or(Value::Null),
        )),
        _ => Some(Packet::Ignored),
    }
}

/// The websocket endpoint for a socket.io server at `ws_url`.
pub fn socket_url(ws_url: &str) -> Result<Url> {
    let mut url = Url::parse(ws_url).map_err(|_| BeCoinError::InvalidBaseUrl(ws_url.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(BeCoinError::InvalidBaseUrl(ws_url.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| BeCoinError::InvalidBaseUrl(ws_url.to_string()))?;
    url.set_path("/socket.io/");
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url)
}

struct Connection {
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

/// Pushes wallet events from the backend into registered callbacks.
pub struct BalanceNotifier {
    ws_url: String,
    handlers: Arc<Mutex<Handlers>>,
    connection: Option<Connection>,
}

impl BalanceNotifier {
    pub fn new(ws_url: &str) -> Self {
        Self {
            ws_url: ws_url.to_string(),
            handlers: Arc::new(Mutex::new(Handlers::default())),
            connection: None,
        }
    }

    fn handlers(&self) -> MutexGuard<'_, Handlers> {
        lock_handlers(&self.handlers)
    }

    /// Replaces the `balanceUpdated` handler.
    pub fn on_balance_updated(&self, handler: impl Fn(BalanceUpdate) + Send + Sync + 'static) {
        self.handlers().balance_updated = Some(Box::new(handler));
    }

    /// Replaces the `transactionReceived` handler.
    pub fn on_transaction_received(&self, handler: impl Fn(Transaction) + Send + Sync + 'static) {
        self.handlers().transaction_received = Some(Box::new(handler));
    }

    /// Replaces the `payment-success` handler.
    pub fn on_payment_success(&self, handler: impl Fn(PaymentSuccess) + Send + Sync + 'static) {
        self.handlers().payment_success = Some(Box::new(handler));
    }

    /// Writes every balance update into `store`, normalized with `scale`.
    /// Takes the `balanceUpdated` slot.
    pub fn bind_store(&self, store: CartStore, scale: AmountScale) {
        self.on_balance_updated(move |update| {
            store.set_becoins_balance(scale.balance(&update.balance));
        });
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| !c.reader.is_finished())
    }

    /// Opens the socket with bearer auth and starts delivering events.
    /// An existing connection is closed first.
    pub fn connect(&mut self, token: &str) -> Result<()> {
        self.disconnect();

        let url = socket_url(&self.ws_url)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| BeCoinError::Socket(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| BeCoinError::Socket("token is not a valid header value".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (mut socket, _) = tungstenite::connect(request).map_err(|e| {
            error!(error = %e, "socket connection failed");
            BeCoinError::Socket(e.to_string())
        })?;
        set_read_timeout(&socket, READ_POLL);

        socket
            .send(Message::Text(format!("40{}", json!({ "token": token }))))
            .map_err(|e| {
                error!(error = %e, "socket handshake failed");
                BeCoinError::Socket(e.to_string())
            })?;
        info!(url = %url, "socket connected");

        let cancel = CancellationToken::new();
        let handlers = Arc::clone(&self.handlers);
        let reader_cancel = cancel.clone();
        let reader = thread::Builder::new()
            .name("becoins-socket".to_string())
            .spawn(move || read_loop(socket, &handlers, &reader_cancel))
            .map_err(|e| BeCoinError::Socket(e.to_string()))?;

        self.connection = Some(Connection { cancel, reader });
        Ok(())
    }

    /// Closes the socket and waits for the reader to stop.
    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.cancel.cancel();
            if connection.reader.join().is_err() {
                warn!("socket reader panicked");
            }
            info!("socket disconnected");
        }
    }

    fn dispatch(&self, name: &str, payload: Value) {
        dispatch(&self.handlers, name, payload);
    }
}

impl Client {
    /// A notifier for this client's websocket URL. Not connected yet.
    pub fn balance_notifier(&self) -> BalanceNotifier {
        BalanceNotifier::new(&self.config.ws_url)
    }
}

impl Drop for BalanceNotifier {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn lock_handlers(handlers: &Mutex<Handlers>) -> MutexGuard<'_, Handlers> {
    handlers.lock().unwrap_or_else(|e| e.into_inner())
}

fn set_read_timeout(socket: &WebSocket<MaybeTlsStream<TcpStream>>, timeout: Duration) {
    let result = match socket.get_ref() {
        MaybeTlsStream::Plain(stream) => stream.set_read_timeout(Some(timeout)),
        MaybeTlsStream::NativeTls(stream) => stream.get_ref().set_read_timeout(Some(timeout)),
        _ => Ok(()),
    };
    if let Err(e) = result {
        warn!(error = %e, "could not set socket read timeout");
    }
}

fn read_loop(
    mut socket: WebSocket<MaybeTlsStream<TcpStream>>,
    handlers: &Mutex<Handlers>,
    cancel: &CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            let _ = socket.close(None);
            let _ = socket.flush();
            return;
        }

        match socket.read() {
            Ok(Message::Text(text)) => match parse_packet(&text) {
                Some(Packet::Ping) => {
                    if let Err(e) = socket.send(Message::Text("3".to_string())) {
                        error!(error = %e, "failed to answer ping");
                        return;
                    }
                }
                Some(Packet::Open(handshake)) => debug!(%handshake, "engine.io open"),
                Some(Packet::Connected) => debug!("namespace joined"),
                Some(Packet::ConnectError(reason)) => {
                    error!(%reason, "socket connection refused");
                    return;
                }
                Some(Packet::Event { name, payload }) => dispatch(handlers, &name, payload),
                Some(Packet::Close) | Some(Packet::Disconnected) => {
                    info!("socket closed by server");
                    return;
                }
                Some(_) => {}
                None => debug!(frame = %text, "unrecognized frame"),
            },
            Ok(Message::Close(_)) => {
                info!("socket closed by server");
                return;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                return;
            }
            Err(e) => {
                error!(error = %e, "socket read failed");
                return;
            }
        }
    }
}

fn dispatch(handlers: &Mutex<Handlers>, name: &str, payload: Value) {
    let handlers = lock_handlers(handlers);
    match name {
        BALANCE_UPDATED => deliver(&handlers.balance_updated, name, payload),
        TRANSACTION_RECEIVED => deliver(&handlers.transaction_received, name, payload),
        PAYMENT_SUCCESS => deliver(&handlers.payment_success, name, payload),
        _ => debug!(event = name, "no handler for event"),
    }
}

fn deliver<T: for<'de> Deserialize<'de>>(handler: &Option<Handler<T>>, name: &str, payload: Value) {
    let Some(handler) = handler else {
        debug!(event = name, "event received with no handler registered");
        return;
    };
    match serde_json::from_value::<T>(payload) {
        Ok(event) => handler(event),
        Err(e) => warn!(event = name, error = %e, "dropping malformed event"),
    }
}
