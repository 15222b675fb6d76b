use std::{sync::Arc, time::Duration};

use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch, Notify},
    task::{AbortHandle, JoinHandle},
    time::timeout,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{info, trace, warn};
use url::Url;

use crate::{
    dispatch::{decode_frame, LiveEvent},
    error::{SyncError, SyncResult},
};

pub const DEFAULT_LIVE_URL: &str = "wss://wss-primary.slack.com/";
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct LiveStreamConfig {
    pub url: String,
    pub token: Option<String>,
    pub cookie: Option<String>,
    pub idle_timeout: Duration,
    pub write_timeout: Duration,
}

impl LiveStreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            cookie: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn ping_interval(&self) -> Duration {
        self.idle_timeout * 9 / 10
    }
}

/// `Connecting -> Open -> Closed`, with `Closed` final.
///
/// `Connecting` only lasts while [`LiveEventStream::connect`] awaits the
/// handshake, so a stream handed back to a caller is already `Open` (or
/// `Closed`, if the server went away immediately). A failed handshake never
/// yields a stream at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    ServerClosed,
    IdleTimeout,
    ReadError(String),
    Shutdown,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServerClosed => f.write_str("closed by server"),
            Self::IdleTimeout => f.write_str("idle timeout"),
            Self::ReadError(err) => write!(f, "read error: {err}"),
            Self::Shutdown => f.write_str("shut down"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Event(LiveEvent),
    Closed(CloseReason),
}

/// One websocket connection feeding decoded events into a sink.
///
/// There is no internal reconnect: once [`StreamState::Closed`] is reached
/// the stream is finished and a new one must be connected.
pub struct LiveEventStream {
    state: watch::Receiver<StreamState>,
    shutdown: Arc<Notify>,
    reader: JoinHandle<()>,
}

impl LiveEventStream {
    pub async fn connect<T>(config: LiveStreamConfig, sink: mpsc::UnboundedSender<T>) -> SyncResult<Self>
    where
        T: From<StreamEvent> + Send + 'static,
    {
        let (state_tx, state_rx) = watch::channel(StreamState::Connecting);
        let request = handshake_request(&config)?;
        let (socket, _) = connect_async(request)
            .await
            .map_err(|err| SyncError::Handshake(err.to_string()))?;
        state_tx.send_replace(StreamState::Open);
        info!(idle_timeout_ms = config.idle_timeout.as_millis() as u64, "live: connected");

        let (writer, reader) = socket.split();
        let pinger = tokio::spawn(keep_alive(writer, config.ping_interval(), config.write_timeout));
        let shutdown = Arc::new(Notify::new());
        let reader = tokio::spawn(read_loop(
            reader,
            sink,
            config.idle_timeout,
            state_tx,
            Arc::clone(&shutdown),
            pinger.abort_handle(),
        ));

        Ok(Self {
            state: state_rx,
            shutdown,
            reader,
        })
    }

    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Closes the connection and waits for the read loop to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.reader.await {
            warn!(error = %err, "live: read loop ended abnormally");
        }
    }
}

fn handshake_request(
    config: &LiveStreamConfig,
) -> SyncResult<tokio_tungstenite::tungstenite::handshake::client::Request> {
    let mut url = Url::parse(&config.url).map_err(|err| SyncError::Handshake(err.to_string()))?;
    if let Some(token) = &config.token {
        url.query_pairs_mut().append_pair("token", token);
    }
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|err| SyncError::Handshake(err.to_string()))?;
    if let Some(cookie) = &config.cookie {
        let value = HeaderValue::from_str(&format!("d={cookie}"))
            .map_err(|err| SyncError::Handshake(err.to_string()))?;
        request.headers_mut().insert("Cookie", value);
    }
    Ok(request)
}

async fn read_loop<T>(
    mut reader: futures::stream::SplitStream<Socket>,
    sink: mpsc::UnboundedSender<T>,
    idle_timeout: Duration,
    state: watch::Sender<StreamState>,
    shutdown: Arc<Notify>,
    pinger: AbortHandle,
) where
    T: From<StreamEvent> + Send + 'static,
{
    let reason = loop {
        let next = tokio::select! {
            _ = shutdown.notified() => None,
            next = timeout(idle_timeout, reader.next()) => Some(next),
        };
        let Some(next) = next else {
            break CloseReason::Shutdown;
        };
        match next {
            Err(_) => break CloseReason::IdleTimeout,
            Ok(None) => break CloseReason::ServerClosed,
            Ok(Some(Err(err))) => break CloseReason::ReadError(err.to_string()),
            Ok(Some(Ok(WsMessage::Close(_)))) => break CloseReason::ServerClosed,
            Ok(Some(Ok(WsMessage::Text(text)))) => match decode_frame(&text) {
                Ok(LiveEvent::Unknown { kind }) => {
                    trace!(kind = %kind, "live: dropping unknown frame");
                }
                Ok(event) => {
                    if sink.send(StreamEvent::Event(event).into()).is_err() {
                        break CloseReason::Shutdown;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "live: dropping malformed frame");
                }
            },
            Ok(Some(Ok(_))) => {}
        }
    };

    pinger.abort();
    state.send_replace(StreamState::Closed);
    info!(reason = ?reason, "live: closed");
    let _ = sink.send(StreamEvent::Closed(reason).into());
}

async fn keep_alive(
    mut writer: SplitSink<Socket, WsMessage>,
    interval: Duration,
    write_timeout: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match timeout(write_timeout, writer.send(WsMessage::Ping(Vec::new()))).await {
            Ok(Ok(())) => trace!("live: ping sent"),
            Ok(Err(err)) => {
                warn!(error = %err, "live: ping failed; keep-alive stopped");
                return;
            }
            Err(_) => {
                warn!("live: ping write timed out; keep-alive stopped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pings_at_nine_tenths_of_the_idle_timeout() {
        let config = LiveStreamConfig::new("wss://example.invalid/ws");
        assert_eq!(config.ping_interval(), Duration::from_secs(54));
        assert_eq!(config.write_timeout, Duration::from_secs(10));
    }

    #[test]
    fn handshake_carries_token_and_session_cookie() {
        let config = LiveStreamConfig {
            token: Some("xoxc-1".to_string()),
            cookie: Some("abc".to_string()),
            ..LiveStreamConfig::new("wss://example.invalid/ws")
        };
        let request = handshake_request(&config).expect("request");
        assert_eq!(request.uri().query(), Some("token=xoxc-1"));
        assert_eq!(
            request.headers().get("Cookie").and_then(|value| value.to_str().ok()),
            Some("d=abc")
        );
    }

    #[test]
    fn invalid_url_is_a_handshake_error() {
        let err = handshake_request(&LiveStreamConfig::new("not a url")).expect_err("bad url");
        assert!(matches!(err, SyncError::Handshake(_)));
    }
}
