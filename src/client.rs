//! Connection lifecycle and sentence dispatch for a GPSD daemon
//!
//! A [`GpsdClient`] owns one background task per connection attempt chain.
//! The task connects, sends the configured `?WATCH` command, reads the
//! daemon's output line by line, decodes every line into a
//! [`SentenceRecord`] and hands it to the subscribers through a
//! [`Dispatcher`]. When the connection drops the task reconnects with an
//! exponential backoff until [`GpsdClient::close`] is called.
//!
//! # Example
//!
//! ```no_run
//! use gpsd_dispatch::client::{ClientOptions, GpsdClient};
//! use gpsd_dispatch::protocol::v3::{SentenceKind, SentenceRecord};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = GpsdClient::new(ClientOptions::default());
//! let mut gst = client.subscribe(SentenceKind::Gst)?;
//! client.connect("127.0.0.1:2947")?;
//!
//! while let Some(SentenceRecord::Gst(record)) = gst.recv().await {
//!     println!("rms {} lat err {} lon err {}", record.rms, record.lat, record.lon);
//! }
//! client.close().await;
//! # Ok(())
//! # }
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    Result,
    error::{DecodeError, GpsdError},
    protocol::{
        GpsdJsonRequest, decode_line,
        v3::{self, RequestMessage, SentenceKinds, SentenceRecord},
    },
};

/// Fan-out of decoded records to subscribers
pub mod dispatch;

/// Client configuration
pub mod options;

/// Line framing over async byte streams
pub mod reader;

pub use dispatch::{Dispatcher, Subscription, SubscriptionId};
pub use options::{ClientOptions, DEFAULT_PORT, ReconnectPolicy};
pub use reader::LineReader;

/// Outbound commands waiting for the connection task
const COMMAND_QUEUE: usize = 16;

/// Where the client is in its connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection, either before the first attempt or between retries
    Disconnected,
    Connecting,
    Connected,
    /// [`GpsdClient::close`] was called; terminal
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        })
    }
}

/// Lifecycle notifications delivered to [`GpsdClient::events`] observers
#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    /// A connection attempt failed or timed out
    ConnectFailed {
        /// Consecutive failed attempts, starting at 1
        attempt: u32,
        error: Arc<io::Error>,
        /// Delay before the next attempt, `None` when reconnecting is disabled
        retry_in: Option<Duration>,
    },
    /// An established connection was lost
    ///
    /// `error` is `None` when the daemon closed the stream cleanly.
    Disconnected { error: Option<Arc<io::Error>> },
    /// The daemon announced a protocol this crate does not speak
    ProtocolMismatch {
        major: Option<i64>,
        minor: Option<i64>,
    },
    /// A line could not be decoded and was skipped
    Decode(DecodeError),
}

/// Opens the byte stream to a daemon
///
/// Called once per connection attempt. Implement it to run the client over
/// something other than TCP, such as a Unix socket or an in-memory pipe.
pub trait Connector: Send + Sync + 'static {
    type Stream: futures_io::AsyncRead + futures_io::AsyncWrite + Unpin + Send + 'static;

    fn connect(&self) -> impl std::future::Future<Output = io::Result<Self::Stream>> + Send;
}

/// Connects over TCP with tokio
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    /// # Arguments
    /// * `addr` - Address of the daemon (e.g., "127.0.0.1:2947")
    pub fn new(addr: impl Into<String>) -> Self {
        TcpConnector { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Connector for TcpConnector {
    type Stream = tokio_util::compat::Compat<tokio::net::TcpStream>;

    async fn connect(&self) -> io::Result<Self::Stream> {
        use tokio_util::compat::TokioAsyncReadCompatExt;

        let stream = tokio::net::TcpStream::connect(self.addr.as_str()).await?;
        stream.set_nodelay(true)?;
        Ok(stream.compat())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State and event channels shared by the client and its task
struct Signals {
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ClientEvent>,
}

impl Signals {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::info!(from = %previous, to = %state, "connection state changed");
            self.emit(ClientEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: ClientEvent) {
        // no observers is fine
        let _ = self.events.send(event);
    }
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// GPSD client managing one daemon connection and its subscribers
///
/// Subscriptions may be registered before or after [`GpsdClient::connect`]
/// and survive reconnects. Connection problems never surface as errors from
/// these methods; observe them through [`GpsdClient::events`] and
/// [`GpsdClient::state_changes`].
pub struct GpsdClient {
    options: ClientOptions,
    dispatcher: Dispatcher,
    signals: Arc<Signals>,
    commands: Mutex<Option<mpsc::Sender<String>>>,
    worker: Mutex<Option<Worker>>,
    closed: AtomicBool,
}

impl GpsdClient {
    pub fn new(options: ClientOptions) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(options.event_capacity.max(1));

        GpsdClient {
            dispatcher: Dispatcher::new(options.subscriber_capacity),
            signals: Arc::new(Signals { state, events }),
            commands: Mutex::new(None),
            worker: Mutex::new(None),
            closed: AtomicBool::new(false),
            options,
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Starts connecting to a daemon over TCP
    ///
    /// Returns as soon as the connection task is spawned; must be called from
    /// within a tokio runtime.
    ///
    /// # Example
    /// ```no_run
    /// # use gpsd_dispatch::client::{ClientOptions, GpsdClient};
    /// # async fn example() -> gpsd_dispatch::Result<()> {
    /// let client = GpsdClient::new(ClientOptions::default());
    /// client.connect("127.0.0.1:2947")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn connect(&self, addr: impl Into<String>) -> Result<()> {
        self.connect_with(TcpConnector::new(addr))
    }

    /// Starts the connection task over a custom transport
    ///
    /// Fails with [`GpsdError::Shutdown`] after [`GpsdClient::close`] and with
    /// [`GpsdError::AlreadyConnected`] while a previous task is still running
    /// and with [`GpsdError::NoRuntime`] outside a tokio runtime.
    pub fn connect_with<C: Connector>(&self, connector: C) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| GpsdError::NoRuntime)?;
        let watch = RequestMessage::Watch(Some(self.options.watch.clone())).to_command()?;

        let mut worker = lock(&self.worker);
        if self.closed.load(Ordering::Acquire) {
            return Err(GpsdError::Shutdown);
        }
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return Err(GpsdError::AlreadyConnected);
        }

        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let link = Link {
            options: self.options.clone(),
            dispatcher: self.dispatcher.clone(),
            signals: Arc::clone(&self.signals),
            token: token.clone(),
        };
        let handle = runtime.spawn(link.run(connector, watch, rx));

        *lock(&self.commands) = Some(tx);
        *worker = Some(Worker { token, handle });
        Ok(())
    }

    /// Subscribes a channel to the given sentence kinds
    pub fn subscribe(&self, kinds: impl Into<SentenceKinds>) -> Result<Subscription> {
        self.dispatcher.subscribe(kinds)
    }

    /// Subscribes a callback to the given sentence kinds
    ///
    /// See [`Dispatcher::subscribe_fn`].
    pub fn subscribe_fn<F, E>(
        &self,
        kinds: impl Into<SentenceKinds>,
        callback: F,
    ) -> Result<SubscriptionId>
    where
        F: FnMut(SentenceRecord) -> core::result::Result<(), E> + Send + 'static,
        E: std::fmt::Display + 'static,
    {
        self.dispatcher.subscribe_fn(kinds, callback)
    }

    /// Removes a subscription; returns `false` if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    /// Queues a command for the daemon
    ///
    /// Commands are written in order on the current connection, or on the
    /// next one if the client is between connections.
    pub async fn send(&self, request: &RequestMessage) -> Result<()> {
        let command = request.to_command()?;
        let tx = lock(&self.commands).clone();
        let Some(tx) = tx else {
            return Err(if self.closed.load(Ordering::Acquire) {
                GpsdError::Shutdown
            } else {
                GpsdError::ConnectionClosed
            });
        };
        tx.send(command)
            .await
            .map_err(|_| GpsdError::ConnectionClosed)
    }

    /// Stops the connection task and ends every subscription
    ///
    /// No record is delivered after this returns, and callbacks that were
    /// running have returned. Calling it again is a no-op.
    pub async fn close(&self) {
        let worker = {
            let mut worker = lock(&self.worker);
            self.closed.store(true, Ordering::Release);
            worker.take()
        };
        lock(&self.commands).take();

        if let Some(Worker { token, handle }) = worker {
            token.cancel();
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "connection task failed");
            }
        }

        self.dispatcher.shutdown().await;
        self.signals.set_state(ConnectionState::Closed);
    }

    pub fn state(&self) -> ConnectionState {
        *self.signals.state.borrow()
    }

    /// Watches the connection state
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.signals.state.subscribe()
    }

    /// Receives lifecycle events emitted from now on
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.signals.events.subscribe()
    }
}

impl Drop for GpsdClient {
    fn drop(&mut self) {
        if let Some(worker) = lock(&self.worker).as_ref() {
            worker.token.cancel();
        }
    }
}

impl std::fmt::Debug for GpsdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpsdClient")
            .field("state", &self.state())
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

/// Retry delay that doubles up to a ceiling
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(policy: &ReconnectPolicy) -> Self {
        Backoff {
            initial: policy.initial_backoff,
            max: policy.max_backoff.max(policy.initial_backoff),
            current: policy.initial_backoff,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

enum SessionEnd {
    Cancelled,
    Lost(Option<Arc<io::Error>>),
}

/// Everything the connection task needs from its client
struct Link {
    options: ClientOptions,
    dispatcher: Dispatcher,
    signals: Arc<Signals>,
    token: CancellationToken,
}

impl Link {
    async fn run<C: Connector>(
        self,
        connector: C,
        watch: String,
        mut commands: mpsc::Receiver<String>,
    ) {
        let mut backoff = Backoff::new(&self.options.reconnect);
        let mut attempt = 0u32;

        loop {
            self.signals.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                result = tokio::time::timeout(self.options.connect_timeout, connector.connect()) => {
                    result.unwrap_or_else(|_| {
                        Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))
                    })
                }
            };

            let retry_in = match connected {
                Ok(stream) => {
                    attempt = 0;
                    backoff.reset();
                    self.signals.set_state(ConnectionState::Connected);

                    let error = match self.session(stream, &watch, &mut commands).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Lost(error) => error,
                    };
                    match &error {
                        Some(e) => tracing::warn!(error = %e, "connection lost"),
                        None => tracing::info!("daemon closed the connection"),
                    }
                    self.signals.set_state(ConnectionState::Disconnected);
                    self.signals.emit(ClientEvent::Disconnected { error });
                    self.options.reconnect.enabled.then(|| backoff.next_delay())
                }
                Err(error) => {
                    attempt = attempt.saturating_add(1);
                    let retry_in = self.options.reconnect.enabled.then(|| backoff.next_delay());
                    tracing::warn!(attempt, error = %error, retry_in = ?retry_in, "connect failed");
                    self.signals.set_state(ConnectionState::Disconnected);
                    self.signals.emit(ClientEvent::ConnectFailed {
                        attempt,
                        error: Arc::new(error),
                        retry_in,
                    });
                    retry_in
                }
            };

            let Some(delay) = retry_in else {
                tracing::info!("reconnect disabled, connection task exiting");
                break;
            };
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn session<S>(
        &self,
        stream: S,
        watch: &str,
        commands: &mut mpsc::Receiver<String>,
    ) -> SessionEnd
    where
        S: futures_io::AsyncRead + futures_io::AsyncWrite + Unpin,
    {
        let (reader, mut writer) = stream.split();
        let mut lines = LineReader::with_max_line_len(reader, self.options.max_line_len);

        if let Some(end) = self.write_command(&mut writer, watch).await {
            return end;
        }

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return SessionEnd::Cancelled,
                Some(command) = commands.recv() => {
                    if let Some(end) = self.write_command(&mut writer, &command).await {
                        return end;
                    }
                }
                line = lines.next_line() => match line {
                    Ok(line) => self.handle_line(&line),
                    Err(GpsdError::Decode(e)) => self.report_decode(e),
                    Err(GpsdError::ConnectionClosed) => return SessionEnd::Lost(None),
                    Err(GpsdError::IoError(e)) => return SessionEnd::Lost(Some(e)),
                    Err(other) => {
                        return SessionEnd::Lost(Some(Arc::new(io::Error::other(other.to_string()))));
                    }
                },
            }
        }
    }

    /// Writes one command; `Some` ends the session
    async fn write_command<W>(&self, writer: &mut W, command: &str) -> Option<SessionEnd>
    where
        W: futures_io::AsyncWrite + Unpin,
    {
        tracing::debug!(command, "sending command");
        let written = async {
            writer.write_all(command.as_bytes()).await?;
            writer.flush().await
        };
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Some(SessionEnd::Cancelled),
            result = written => result.err().map(|e| SessionEnd::Lost(Some(Arc::new(e)))),
        }
    }

    fn handle_line(&self, line: &str) {
        let record = match decode_line(line) {
            Ok(record) => record,
            Err(e) => return self.report_decode(e),
        };

        if let SentenceRecord::Version(version) = &record {
            match v3::ensure_compatible(version) {
                Ok(()) => tracing::info!(
                    release = ?version.release,
                    proto_major = ?version.proto_major,
                    proto_minor = ?version.proto_minor,
                    "daemon version"
                ),
                Err(e) => {
                    tracing::warn!(error = %e, expected = v3::API_VERSION_MAJOR, "protocol mismatch");
                    self.signals.emit(ClientEvent::ProtocolMismatch {
                        major: version.proto_major,
                        minor: version.proto_minor,
                    });
                }
            }
        }

        let delivered = self.dispatcher.dispatch(&record);
        tracing::trace!(kind = %record.kind(), delivered, "dispatched");
    }

    fn report_decode(&self, error: DecodeError) {
        match &error {
            DecodeError::UnknownVariant { raw_class } => {
                tracing::debug!(class = ?raw_class, "skipping unknown sentence");
            }
            _ => tracing::warn!(error = %error, "skipping undecodable line"),
        }
        self.signals.emit(ClientEvent::Decode(error));
    }
}
