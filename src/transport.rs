//! The physical connection to a receiver and the task that multiplexes channels over it.

use anyhow::{bail, format_err};
use crate::{
    channel::ChannelKey,
    codec::CastMessageCodec,
    config::Config,
    error::{CastError, Error, Result},
    message::CastMessage,
    util::named,
};
use futures::{
    future::{self, Either},
    Sink, SinkExt, Stream, StreamExt,
};
use pin_project_lite::pin_project;
use std::{
    collections::HashMap,
    fmt::{self, Debug},
    net::IpAddr,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    pin,
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};

/// Owner of the connection. Only the owner can close it.
pub struct Transport {
    handle: TransportHandle,

    /// Some(_) until `.close()` is called.
    task_join_handle: Option<JoinHandle<Result<()>>>,
}

/// Cheap, clonable, non-owning handle used by channels to send and to register
/// for inbound messages.
#[derive(Clone)]
pub struct TransportHandle {
    task_cmd_tx: mpsc::Sender<TaskCmd>,
    shared: Arc<Shared>,
}

/// Data shared between `TransportHandle`s and the `Task`.
struct Shared {
    routes: Mutex<HashMap<RouteId, Route>>,
    next_route_id: AtomicU64,
    closed_tx: watch::Sender<bool>,
}

pub(crate) type RouteId = u64;

struct Route {
    key: ChannelKey,
    tx: mpsc::UnboundedSender<CastMessage>,
}

pin_project! {
    struct Task<Si, St> {
        #[pin]
        conn_sink: Si,

        #[pin]
        conn_stream: St,

        #[pin]
        task_cmd_rx: tokio_stream::wrappers::ReceiverStream<TaskCmd>,

        need_flush: bool,

        shared: Arc<Shared>,
    }
}

enum TaskCmd {
    Send {
        msg: CastMessage,
        result_tx: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        result_tx: oneshot::Sender<()>,
    },
}

#[derive(Debug)]
enum TaskEvent {
    Cmd(TaskCmd),
    Flush(Result<()>),
    MessageRead(Result<CastMessage>),
    ConnectionClosed,
}

pub trait TokioAsyncStream: AsyncRead + AsyncWrite + Unpin {}

impl<T> TokioAsyncStream for T
where T: AsyncRead + AsyncWrite + Unpin
{}

/// Duration for the Task to do something locally. (Probably a bit high).
const LOCAL_TASK_COMMAND_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(1_000);

/// Duration to write one message into the connection's send buffer.
const SEND_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(5_000);

const DATA_BUFFER_LEN: usize = 64 * 1024;

const TASK_CMD_CHANNEL_CAPACITY: usize = 16;

impl Transport {
    /// Connects over TLS to `config.addr`.
    pub async fn connect(config: &Config) -> Result<Transport> {
        let conn = tls_connect(config).await?;

        let conn_framed = tokio_util::codec::Framed::with_capacity(
            conn, CastMessageCodec, DATA_BUFFER_LEN);

        let (conn_sink, conn_stream) = conn_framed.split();

        Ok(Transport::spawn(conn_sink, conn_stream))
    }

    /// Runs the transport task over an already established message sink and stream.
    pub fn spawn<Si, St>(conn_sink: Si, conn_stream: St) -> Transport
    where Si: Sink<CastMessage, Error = Error> + Send + 'static,
          St: Stream<Item = Result<CastMessage>> + Send + 'static,
    {
        let (task_cmd_tx, task_cmd_rx) = mpsc::channel(TASK_CMD_CHANNEL_CAPACITY);

        let shared = Arc::new(Shared {
            routes: Mutex::new(HashMap::new()),
            next_route_id: AtomicU64::new(1),
            closed_tx: watch::Sender::new(false),
        });

        let task = Task {
            conn_sink,
            conn_stream,
            task_cmd_rx: tokio_stream::wrappers::ReceiverStream::new(task_cmd_rx),
            need_flush: false,
            shared: Arc::clone(&shared),
        };

        let task_join_handle = Some(tokio::spawn(task.main()));

        Transport {
            handle: TransportHandle {
                task_cmd_tx,
                shared,
            },
            task_join_handle,
        }
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    /// Flips to `true` once the connection is gone, whether closed locally or by the peer.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.handle.closed()
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Flushes outstanding messages, closes the connection and waits for the task.
    ///
    /// Every channel registered on this transport is closed as a result.
    #[named]
    pub async fn close(mut self) -> Result<()> {
        const METHOD_PATH: &str = method_path!("Transport");

        let Some(join_handle) = self.task_join_handle.take() else {
            return Ok(());
        };

        let (result_tx, result_rx) = oneshot::channel();
        let cmd = TaskCmd::Shutdown { result_tx };

        // An error here means the task has already stopped; join it below.
        if self.handle.task_cmd_tx.send_timeout(cmd, LOCAL_TASK_COMMAND_TIMEOUT).await.is_ok() {
            let _ = tokio::time::timeout(LOCAL_TASK_COMMAND_TIMEOUT, result_rx).await;
        }

        let res = tokio::time::timeout(LOCAL_TASK_COMMAND_TIMEOUT, join_handle).await;

        tracing::debug!(target: METHOD_PATH,
                        ?res,
                        "transport task joined");

        res.map_err(|_elapsed| format_err!("{METHOD_PATH}: timeout joining task"))???;

        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        let Some(join_handle) = self.task_join_handle.take() else {
            return;
        };

        if !join_handle.is_finished() {
            tracing::error!("Transport: task not stopped before drop.\n\
                             Use Transport::close to dispose of Transport.");
            join_handle.abort();
        }

        self.handle.shared.shutdown();
    }
}

impl Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Transport")
         .field("task", if self.task_join_handle.is_some() { &"Some" } else { &"None" })
         .field("closed", &self.is_closed())
         .finish_non_exhaustive()
    }
}

impl TransportHandle {
    /// Queues `msg` for sending. Returns once the message is in the connection's
    /// send buffer.
    #[named]
    pub async fn send(&self, msg: CastMessage) -> Result<()> {
        const METHOD_PATH: &str = method_path!("TransportHandle");

        if self.is_closed() {
            return Err(CastError::ChannelClosed.into());
        }

        let (result_tx, result_rx) = oneshot::channel();
        let cmd = TaskCmd::Send { msg, result_tx };

        self.task_cmd_tx.send_timeout(cmd, LOCAL_TASK_COMMAND_TIMEOUT).await
            .map_err(|err| match err {
                mpsc::error::SendTimeoutError::Closed(_) => Error::from(CastError::ChannelClosed),
                mpsc::error::SendTimeoutError::Timeout(_) =>
                    format_err!("{METHOD_PATH}: timeout queueing message"),
            })?;

        match tokio::time::timeout(SEND_TIMEOUT, result_rx).await {
            Err(_elapsed) => bail!("{METHOD_PATH}: timeout sending message"),
            Ok(Err(_recv_err)) => Err(CastError::ChannelClosed.into()),
            Ok(Ok(res)) => res,
        }
    }

    pub fn closed(&self) -> watch::Receiver<bool> {
        self.shared.closed_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed_tx.borrow()
    }

    /// Registers for inbound messages matching `key`.
    ///
    /// The returned receiver ends when the route is removed or the transport closes.
    pub(crate) fn register(&self, key: ChannelKey)
    -> Result<(RouteId, mpsc::UnboundedReceiver<CastMessage>)>
    {
        let mut routes = self.shared.routes();

        // Checked under the routes lock, so a concurrent shutdown can't miss this route.
        if self.is_closed() {
            return Err(CastError::ChannelClosed.into());
        }

        let id = self.shared.next_route_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        routes.insert(id, Route { key, tx });

        Ok((id, rx))
    }

    pub(crate) fn unregister(&self, id: RouteId) {
        self.shared.routes().remove(&id);
    }
}

impl Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TransportHandle")
         .field("closed", &self.is_closed())
         .finish_non_exhaustive()
    }
}

impl Shared {
    fn routes(&self) -> MutexGuard<'_, HashMap<RouteId, Route>> {
        self.routes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drops every route, which ends every channel's receiver.
    fn shutdown(&self) {
        let mut routes = self.routes();
        routes.clear();
        self.closed_tx.send_replace(true);
    }
}

#[tracing::instrument(level = "info",
                      fields(ip = ?config.addr.ip(),
                             port = config.addr.port()))]
#[named]
async fn tls_connect(config: &Config)
-> Result<impl TokioAsyncStream>
{
    const FUNCTION_PATH: &str = function_path!();

    let addr = &config.addr;
    let ip: IpAddr = addr.ip();

    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let tls_config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous().with_custom_certificate_verifier(Arc::new(
            crate::util::rustls::danger::NoCertificateVerification::new_ring()))
        .with_no_client_auth();
    let tls_config = Arc::new(tls_config);

    let connector = tokio_rustls::TlsConnector::from(tls_config);

    let ip_rustls = rustls::pki_types::IpAddr::from(ip);
    let domain = rustls::pki_types::ServerName::IpAddress(ip_rustls);

    let tcp_stream = tokio::net::TcpStream::connect(addr).await?;
    tcp_stream.set_nodelay(true)?;

    tracing::debug!(target: FUNCTION_PATH,
                    "TcpStream connected");

    let tls_stream = connector.connect(domain, tcp_stream).await?;

    tracing::info!(target: FUNCTION_PATH,
                   "TlsStream connected");

    Ok(tls_stream)
}

impl<Si, St> Task<Si, St>
where Si: Sink<CastMessage, Error = Error>,
      St: Stream<Item = Result<CastMessage>>,
{
    #[named]
    async fn main(self) -> Result<()> {
        const METHOD_PATH: &str = method_path!("Task");

        pin! {
            let this = self;
        }

        while let Some(event) = this.as_mut().take_next_event().await {
            tracing::trace!(target: METHOD_PATH,
                            ?event,
                            "event");

            match event {
                TaskEvent::Cmd(TaskCmd::Send { msg, result_tx }) => {
                    let res = this.as_mut().send_raw(msg).await;
                    if let Err(ref err) = res {
                        tracing::warn!(target: METHOD_PATH,
                                       ?err,
                                       "send_raw error");
                    }
                    let _ = result_tx.send(res);
                },

                TaskEvent::Cmd(TaskCmd::Shutdown { result_tx }) => {
                    tracing::info!(target: METHOD_PATH,
                                   "shutdown on command");
                    this.as_mut().close_conn().await;
                    this.shared.shutdown();
                    let _ = result_tx.send(());
                    return Ok(());
                },

                TaskEvent::MessageRead(read_res) => {
                    this.as_mut().handle_msg_read(read_res);
                },

                TaskEvent::Flush(res) => {
                    if let Err(err) = res {
                        tracing::warn!(target: METHOD_PATH,
                                       ?err,
                                       "flush error");
                    }
                    *this.as_mut().project().need_flush = false;
                },

                TaskEvent::ConnectionClosed => {
                    tracing::info!(target: METHOD_PATH,
                                   "shutdown on connection closed by peer");
                    break;
                },
            }
        }

        this.shared.shutdown();

        Ok(())
    }

    async fn take_next_event(self: Pin<&mut Self>) -> Option<TaskEvent> {
        let mut proj = self.project();

        let conn_flush_stream = if *proj.need_flush {
            let fut = proj.conn_sink.flush();
            let stream = futures::stream::once(fut);
            Either::Left(stream)
        } else {
            Either::Right(futures::stream::empty())
        };

        let mut conn_read_stream = proj.conn_stream
            .map(TaskEvent::MessageRead)
            .chain(futures::stream::once(future::ready(TaskEvent::ConnectionClosed)));

        // Streams polled in order with current implementation on first
        // poll of Merge.
        //
        // By assigning to a variable, these temporaries have their
        // lifetime extended so `merge()` can use them.
        let streams = (
            &mut (conn_flush_stream.map(TaskEvent::Flush)),
            &mut (proj.task_cmd_rx.map(TaskEvent::Cmd)),
            &mut (conn_read_stream),
        );

        let mut merged = futures_concurrency::stream::Merge::merge(streams);

        merged.next().await
    }

    #[named]
    async fn send_raw(self: Pin<&mut Self>, msg: CastMessage) -> Result<()> {
        let mut proj = self.project();

        tracing::trace!(target: method_path!("Task"),
                        ?msg,
                        "msg send");

        *proj.need_flush = true;

        let fut = proj.conn_sink.feed(msg);
        tokio::time::timeout(SEND_TIMEOUT, fut).await
            .map_err(|_elapsed| format_err!("Task::send_raw: timeout feeding sink"))??;

        Ok(())
    }

    #[named]
    async fn close_conn(self: Pin<&mut Self>) {
        let mut proj = self.project();

        let res = tokio::time::timeout(LOCAL_TASK_COMMAND_TIMEOUT, proj.conn_sink.close()).await;

        match res {
            Ok(Ok(())) => {},
            Ok(Err(err)) => tracing::warn!(target: method_path!("Task"),
                                           ?err,
                                           "error closing connection"),
            Err(_elapsed) => tracing::warn!(target: method_path!("Task"),
                                            "timeout closing connection"),
        }
    }

    #[named]
    fn handle_msg_read(self: Pin<&mut Self>, read_res: Result<CastMessage>) {
        const METHOD_PATH: &str = method_path!("Task");

        let msg: CastMessage = match read_res {
            Err(err) => {
                tracing::warn!(target: METHOD_PATH,
                               ?err,
                               "Message read error");
                return;
            },
            Ok(msg) => msg,
        };

        tracing::trace!(target: METHOD_PATH,
                        ?msg,
                        "message read");

        let mut routes = self.shared.routes();
        let mut delivered = 0_usize;

        routes.retain(|_id, route| {
            if !route.key.accepts(&msg) {
                return true;
            }

            // A failed send means the channel's receiver is gone.
            let alive = route.tx.send(msg.clone()).is_ok();
            if alive {
                delivered += 1;
            }
            alive
        });

        if delivered == 0 {
            tracing::trace!(target: METHOD_PATH,
                            namespace = msg.namespace,
                            source = msg.source,
                            destination = msg.destination,
                            "no channel for message");
        }
    }
}

impl Debug for TaskCmd {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskCmd::Send { msg, .. } =>
                f.debug_struct("TaskCmd::Send").field("msg", msg).finish_non_exhaustive(),
            TaskCmd::Shutdown { .. } =>
                f.debug_struct("TaskCmd::Shutdown").finish_non_exhaustive(),
        }
    }
}
