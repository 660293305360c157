//! WebSocket session lifecycle.
//!
//! One manager owns one logical connection: it dials, authenticates
//! via the challenge handshake, replays registered subscriptions,
//! then runs a single receive loop that demuxes frames onto bounded
//! channels. Any failure tears the session down and reconnects with
//! bounded exponential backoff.

use crate::error::{WsError, WsResult};
use crate::heartbeat::Heartbeat;
use crate::message::{parse_frame, ChallengeRequest, Route, SubscribeRequest, WsMessage};
use crate::sequence::{SeqCheck, SeqTracker};
use crate::subscription::SubscriptionManager;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use krf_auth::Signer;
use krf_core::Symbol;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    pub reconnect_max_delay_ms: u64,
    /// Idle threshold before a protocol ping is sent.
    pub ping_interval_ms: u64,
    /// Pong must arrive within this after a ping.
    pub pong_timeout_ms: u64,
    /// Challenge response deadline during authentication.
    pub challenge_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "wss://futures.kraken.com/ws/v1".to_string(),
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 60_000,
            ping_interval_ms: 60_000,
            pong_timeout_ms: 10_000,
            challenge_timeout_ms: 10_000,
        }
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribing,
    Active,
}

/// A demuxed frame, tagged with its sequence check when the feed
/// carries sequence numbers.
#[derive(Debug)]
pub struct FeedFrame {
    pub message: WsMessage,
    pub seq_check: Option<SeqCheck>,
}

/// Outbound channels of the demux.
pub struct FeedChannels {
    /// Book snapshots and deltas.
    pub book: mpsc::Sender<FeedFrame>,
    /// Private account feeds.
    pub private: mpsc::Sender<FeedFrame>,
    /// Everything else.
    pub generic: mpsc::Sender<FeedFrame>,
}

/// Challenge pair held for the session.
struct SessionAuth {
    original: String,
    signed: String,
}

/// WebSocket connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    signer: Option<Arc<Signer>>,
    state: Arc<RwLock<SessionState>>,
    subscriptions: Arc<SubscriptionManager>,
    seq: SeqTracker,
    heartbeat: Heartbeat,
    channels: FeedChannels,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    /// Create a manager. Pass a signer to enable private feeds; a
    /// public-only consumer passes `None`.
    pub fn new(
        config: ConnectionConfig,
        signer: Option<Arc<Signer>>,
        channels: FeedChannels,
    ) -> Self {
        let heartbeat = Heartbeat::new(config.ping_interval_ms, config.pong_timeout_ms);
        Self {
            config,
            signer,
            state: Arc::new(RwLock::new(SessionState::Disconnected)),
            subscriptions: Arc::new(SubscriptionManager::new()),
            seq: SeqTracker::new(),
            heartbeat,
            channels,
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a feed subscription. Sent on the next (re)connect.
    pub fn subscribe(&self, feed: impl Into<String>, product_ids: Vec<Symbol>) {
        self.subscriptions.register(feed, product_ids);
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Signal graceful shutdown; the run loop exits promptly.
    pub fn shutdown(&self) {
        info!("connection shutdown requested");
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Connect and serve until shutdown, reconnecting on failure.
    pub async fn run(&self) -> WsResult<()> {
        let mut attempt = 0u32;

        loop {
            if self.is_shutdown() {
                *self.state.write() = SessionState::Disconnected;
                return Ok(());
            }

            *self.state.write() = SessionState::Connecting;

            match self.session(&mut attempt).await {
                Ok(()) => info!("WebSocket session closed"),
                Err(e) => error!(?e, "WebSocket session error"),
            }
            *self.state.write() = SessionState::Disconnected;

            if self.is_shutdown() {
                return Ok(());
            }

            attempt += 1;
            if self.config.max_reconnect_attempts > 0
                && attempt >= self.config.max_reconnect_attempts
            {
                error!(attempt, "max reconnection attempts reached");
                return Err(WsError::ConnectionFailed(
                    "max reconnection attempts reached".to_string(),
                ));
            }

            let delay = self.backoff_delay(attempt);
            warn!(attempt, delay_ms = delay.as_millis(), "reconnecting");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown.cancelled() => {
                    *self.state.write() = SessionState::Disconnected;
                    return Ok(());
                }
            }

            // Session-scoped state does not survive a reconnect.
            self.seq.reset();
        }
    }

    async fn session(&self, attempt: &mut u32) -> WsResult<()> {
        info!(url = %self.config.url, "connecting");
        let (ws_stream, _response) =
            connect_async_tls_with_config(&self.config.url, None, true, None).await?;
        *attempt = 0;
        let (mut write, mut read) = ws_stream.split();
        info!("connected");

        let auth = match &self.signer {
            Some(signer) => {
                *self.state.write() = SessionState::Authenticating;
                Some(self.authenticate(signer, &mut write, &mut read).await?)
            }
            None => None,
        };

        *self.state.write() = SessionState::Subscribing;
        self.subscriptions.reset_for_reconnect();
        self.send_subscriptions(&mut write, auth.as_ref()).await?;

        self.heartbeat.reset();
        if self.subscriptions.all().is_empty() {
            *self.state.write() = SessionState::Active;
        }

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("shutdown signal received in receive loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(?e, "failed to send close frame during shutdown");
                    }
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.heartbeat.record_message();
                            if let Err(e) = self.handle_text(&text).await {
                                warn!(?e, "dropping malformed frame");
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_pong();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "normal close".to_string()));
                            warn!(code, %reason, "closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(?e, "read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!("stream ended");
                            return Err(WsError::ConnectionClosed {
                                code: 1006,
                                reason: "stream ended".to_string(),
                            });
                        }
                        _ => {}
                    }
                }

                _ = self.heartbeat.tick() => {
                    if self.heartbeat.is_timed_out() {
                        error!("heartbeat timeout");
                        return Err(WsError::HeartbeatTimeout);
                    }
                    if self.heartbeat.should_ping() {
                        write.send(Message::Ping(Vec::new())).await?;
                        self.heartbeat.record_ping();
                        debug!("sent protocol ping");
                    }
                }
            }
        }
    }

    /// Challenge handshake: request a challenge UUID, sign it, keep
    /// the pair for private subscribes this session.
    async fn authenticate(
        &self,
        signer: &Signer,
        write: &mut WsSink,
        read: &mut WsStream,
    ) -> WsResult<SessionAuth> {
        let request = serde_json::to_string(&ChallengeRequest::new(signer.api_key()))?;
        write.send(Message::Text(request)).await?;

        let deadline = Duration::from_millis(self.config.challenge_timeout_ms);
        let original = tokio::time::timeout(deadline, async {
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => match parse_frame(&text) {
                        Ok(WsMessage::Challenge { message }) => return Ok(message),
                        Ok(WsMessage::Info { version }) => {
                            debug!(version, "server info");
                        }
                        Ok(other) => debug!(?other, "frame before challenge, ignored"),
                        Err(e) => warn!(?e, "dropping malformed frame during auth"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(WsError::from(e)),
                    None => {
                        return Err(WsError::ConnectionClosed {
                            code: 1006,
                            reason: "stream ended during auth".to_string(),
                        })
                    }
                }
            }
        })
        .await
        .map_err(|_| WsError::AuthenticationFailed("challenge timed out".to_string()))??;

        let signed = signer.sign_challenge(&original)?;
        info!("challenge signed");
        Ok(SessionAuth { original, signed })
    }

    async fn send_subscriptions(
        &self,
        write: &mut WsSink,
        auth: Option<&SessionAuth>,
    ) -> WsResult<()> {
        let subs = self.subscriptions.all();
        info!(count = subs.len(), "sending subscriptions");

        for sub in subs {
            let request = if sub.is_private() {
                let (Some(signer), Some(auth)) = (&self.signer, auth) else {
                    warn!(feed = %sub.feed, "private feed without credentials, skipped");
                    self.subscriptions.mark_failed(&sub.feed, "no credentials");
                    continue;
                };
                SubscribeRequest::private(
                    sub.feed.clone(),
                    signer.api_key(),
                    &auth.original,
                    &auth.signed,
                )
            } else {
                SubscribeRequest::public(sub.feed.clone(), &sub.product_ids)
            };
            let text = serde_json::to_string(&request)?;
            write.send(Message::Text(text)).await?;
            debug!(feed = %sub.feed, "subscribe sent");
        }
        Ok(())
    }

    /// Parse and demux one text frame.
    async fn handle_text(&self, text: &str) -> WsResult<()> {
        let message = parse_frame(text)?;

        match &message {
            WsMessage::Subscribed { feed, .. } => {
                self.subscriptions.mark_active(feed);
                if self.subscriptions.all_active() {
                    *self.state.write() = SessionState::Active;
                    info!("all subscriptions active");
                }
                return Ok(());
            }
            WsMessage::Unsubscribed { feed, .. } => {
                debug!(feed, "unsubscribed");
                return Ok(());
            }
            WsMessage::SubscribeError {
                feed: Some(feed),
                message,
            } => {
                self.subscriptions.mark_failed(feed, message);
                return Ok(());
            }
            WsMessage::SubscribeError { feed: None, message } => {
                warn!(%message, "unscoped error event");
                return Ok(());
            }
            WsMessage::Info { version } => {
                debug!(version, "server info");
                return Ok(());
            }
            // Liveness was already recorded for any inbound frame.
            WsMessage::Heartbeat => return Ok(()),
            WsMessage::Challenge { .. } => return Ok(()),
            _ => {}
        }

        // Seq check for feeds that number their frames. Gaps are
        // tagged and forwarded; the consumer decides how to resync.
        let seq_check = match (message.feed(), message.product_id(), message.seq()) {
            (Some(feed), Some(product_id), Some(seq)) => {
                let check = self.seq.observe(feed, product_id, seq);
                if let SeqCheck::Gap { expected, got } = check {
                    warn!(feed, %product_id, expected, got, "sequence gap");
                }
                Some(check)
            }
            _ => None,
        };

        let route = message.route();
        let frame = FeedFrame { message, seq_check };
        let tx = match route {
            Route::Book => &self.channels.book,
            Route::Private => &self.channels.private,
            Route::Generic => &self.channels.generic,
        };
        if tx.send(frame).await.is_err() {
            warn!(?route, "feed receiver dropped");
        }
        Ok(())
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.reconnect_base_delay_ms;
        let max = self.config.reconnect_max_delay_ms;

        // base * 2^(attempt-1), capped
        let exponent = attempt.saturating_sub(1).min(10);
        let delay = base.saturating_mul(1u64 << exponent).min(max);

        Duration::from_millis(delay + rand_jitter())
    }
}

/// Random jitter (0-1000ms) so a fleet does not reconnect in lockstep.
fn rand_jitter() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as u64
}
