//! The per-device object: owns the connection and the device-level controllers, and
//! launches, tracks and stops applications.

use anyhow::format_err;
use crate::{
    application::{AppKind, AppStatusEvent, Application},
    config::Config,
    controllers::{
        connection::ConnectionController,
        heartbeat::{HeartbeatController, HeartbeatState},
        receiver::{ReceiverController, ReceiverStatusEvent},
        youtube::RemoteSessionFactory,
    },
    error::{CastError, Result},
    payload::receiver::{small_debug, Session, Status, Volume, VolumeRequest},
    sender::Sender,
    session::{diff_sessions, passive_player_candidate},
    transport::{Transport, TransportHandle},
    types::AppId,
    util::named,
};
use futures::{Stream, StreamExt};
use futures_concurrency::stream::Merge;
use std::{
    collections::BTreeMap,
    fmt::{self, Debug},
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::{pin, sync::broadcast, task::JoinHandle};
use tokio_stream::wrappers::WatchStream;

/// Everything the host integration needs to follow a device.
#[derive(Clone, Debug)]
pub enum PlatformEvent {
    ReceiverStatus(ReceiverStatusEvent),

    /// Sent when the device volume differs from the last one seen.
    Volume(Volume),

    /// An app id appeared in the running applications.
    StartedCasting(Session),

    /// An app id disappeared from the running applications.
    StoppedCasting(Session),

    /// A status-only player was attached to an unrecognised app.
    GenericPlayerAttached(Session),

    /// From the current player.
    PlayerStatus(AppStatusEvent),

    /// The device stopped answering PINGs; `Closed` follows.
    HeartbeatTimeout,

    /// The connection is gone. Sent once.
    Closed,
}

pub struct Platform {
    config: Config,
    handle: TransportHandle,
    connection: ConnectionController,
    heartbeat: HeartbeatController,
    receiver: ReceiverController,
    shared: Arc<Shared>,

    /// Some(_) until `.close()` is called.
    monitor: Option<JoinHandle<()>>,
}

/// State shared between the `Platform` and its monitor task.
struct Shared {
    /// Some(_) until torn down.
    transport: Mutex<Option<Transport>>,

    /// Why the platform was torn down, once it has been.
    closed_reason: Mutex<Option<CastError>>,

    player: Mutex<Option<Arc<Application>>>,

    /// The app id of a `launch` in flight. Its status must not get a passive player.
    launching: Mutex<Option<AppId>>,

    video_remote: Mutex<Option<Arc<dyn RemoteSessionFactory>>>,
    events_tx: broadcast::Sender<PlatformEvent>,
}

#[derive(Debug)]
enum MonitorEvent {
    ReceiverStatus(ReceiverStatusEvent),
    Heartbeat(HeartbeatState),
    TransportClosed(bool),
}

const EVENTS_BROADCAST_CHANNEL_CAPACITY: usize = 32;

impl Platform {
    /// Connects to the device at `config.addr` and starts the device-level controllers.
    pub async fn connect(config: Config) -> Result<Platform> {
        let transport = Transport::connect(&config).await?;
        Platform::from_transport(transport, config).await
    }

    /// Takes ownership of `transport`: `CONNECT`s to the receiver, starts the
    /// heartbeat and begins following receiver status.
    #[named]
    pub async fn from_transport(transport: Transport, config: Config) -> Result<Platform> {
        const METHOD_PATH: &str = method_path!("Platform");

        let handle = transport.handle();
        let sender = Sender::new(config.sender(), config.receiver());

        let (connection, heartbeat, receiver) = match open_controllers(&handle, &sender) {
            Ok(c) => c,
            Err(err) => {
                let _ = transport.close().await;
                return Err(err);
            },
        };

        let status_events = receiver.status_events();
        let heartbeat_state = heartbeat.watch_state();
        let transport_closed = transport.closed();

        if let Err(err) = connection.connect().await {
            let _ = transport.close().await;
            return Err(err);
        }
        heartbeat.start(config.heartbeat_interval);

        let shared = Arc::new(Shared {
            transport: Mutex::new(Some(transport)),
            closed_reason: Mutex::new(None),
            player: Mutex::new(None),
            launching: Mutex::new(None),
            video_remote: Mutex::new(None),
            events_tx: broadcast::Sender::new(EVENTS_BROADCAST_CHANNEL_CAPACITY),
        });

        let monitor = tokio::spawn(monitor(Arc::clone(&shared),
                                           handle.clone(),
                                           status_events,
                                           WatchStream::new(heartbeat_state),
                                           WatchStream::new(transport_closed)));

        tracing::info!(target: METHOD_PATH,
                       addr = %config.addr,
                       %sender,
                       "connected");

        Ok(Platform {
            config,
            handle,
            connection,
            heartbeat,
            receiver,
            shared,
            monitor: Some(monitor),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&self) -> impl Stream<Item = PlatformEvent> + Send + 'static {
        tokio_stream::wrappers::BroadcastStream::new(self.shared.events_tx.subscribe())
            .filter_map(|res| futures::future::ready(match res {
                Ok(it) => Some(it),
                Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(n)) => {
                    tracing::warn!(target: concat!(module_path!(), "::Platform::events"),
                                   n,
                                   "lagged");
                    None
                },
            }))
    }

    pub fn heartbeat_state(&self) -> HeartbeatState {
        self.heartbeat.state()
    }

    pub async fn status(&self) -> Result<Status> {
        self.timed(self.receiver.get_status()).await
    }

    pub async fn sessions(&self) -> Result<Vec<Session>> {
        self.timed(self.receiver.get_sessions()).await
    }

    pub async fn volume(&self) -> Result<Volume> {
        self.timed(self.receiver.get_volume()).await
    }

    pub async fn set_volume(&self, volume: VolumeRequest) -> Result<Volume> {
        self.timed(self.receiver.set_volume(volume)).await
    }

    pub async fn app_availability(&self, app_ids: &[AppId]) -> Result<BTreeMap<AppId, bool>> {
        self.timed(self.receiver.get_app_availability(app_ids)).await
    }

    pub async fn is_application_running(&self, kind: &AppKind) -> Result<bool> {
        Ok(self.sessions().await?.iter().any(|s| s.app_id == kind.app_id()))
    }

    /// True while any application is running on the device.
    pub async fn is_casting(&self) -> Result<bool> {
        Ok(!self.sessions().await?.is_empty())
    }

    pub fn current_player(&self) -> Option<Arc<Application>> {
        self.shared.player().clone()
    }

    /// Installs the remote-control service video applications play through.
    ///
    /// Applies to applications launched afterwards.
    pub fn set_video_remote(&self, factory: Arc<dyn RemoteSessionFactory>) {
        *lock(&self.shared.video_remote) = Some(factory);
    }

    /// Launches `kind` and makes it the current player.
    ///
    /// If the app is already running, the current player (or, with none, every
    /// running session) is stopped first.
    #[named]
    pub async fn launch(&self, kind: AppKind) -> Result<Arc<Application>> {
        const METHOD_PATH: &str = method_path!("Platform");

        if self.is_application_running(&kind).await? {
            tracing::info!(target: METHOD_PATH,
                           %kind,
                           "already running, stopping first");
            let player = self.current_player();
            self.stop(player.as_deref()).await;
        }

        let _launching = self.shared.begin_launch(&kind);

        let sessions = self.timed(self.receiver.launch(kind.app_id())).await?;

        let Some(session) = sessions.into_iter().find(|s| s.app_id == kind.app_id()) else {
            return Err(format_err!("{METHOD_PATH}: no session for launched app\n\
                                    _ kind = {kind}"));
        };

        tracing::debug!(target: METHOD_PATH,
                        session = ?small_debug::Session(&session),
                        "launched session");

        let video_remote = lock(&self.shared.video_remote).clone();
        let app = self.timed(Application::open(&self.handle, kind, session, video_remote))
                      .await?;

        self.shared.set_player(Arc::clone(&app));

        Ok(app)
    }

    /// Returns the current player if it is of `kind` and its app is still running;
    /// otherwise stops it and launches `kind`.
    pub async fn get_or_launch(&self, kind: AppKind) -> Result<Arc<Application>> {
        if let Some(player) = self.current_player() {
            if *player.kind() == kind
                && !player.is_closed()
                && self.is_application_running(&kind).await?
            {
                return Ok(player);
            }

            self.stop(Some(player.as_ref())).await;
        }

        self.launch(kind).await
    }

    /// Closes `app` and stops its session, or with `None` stops every running session.
    ///
    /// Best effort: failures are logged, never returned.
    #[named]
    pub async fn stop(&self, app: Option<&Application>) {
        const METHOD_PATH: &str = method_path!("Platform");

        if let Err(err) = self.try_stop(app).await {
            tracing::warn!(target: METHOD_PATH,
                           ?err,
                           "stop failed");
        }
    }

    async fn try_stop(&self, app: Option<&Application>) -> Result<()> {
        match app {
            Some(app) => {
                let session_id = app.session().session_id.clone();
                self.shared.clear_player_if(&session_id);
                app.close().await;
                self.timed(self.receiver.stop(&session_id)).await?;
            },
            None => {
                if let Some(player) = self.shared.take_player() {
                    player.close().await;
                }
                for session in self.sessions().await? {
                    self.timed(self.receiver.stop(&session.session_id)).await?;
                }
            },
        }

        Ok(())
    }

    /// Closes the current player, says `CLOSE` to the receiver and closes the
    /// connection.
    #[named]
    pub async fn close(mut self) -> Result<()> {
        const METHOD_PATH: &str = method_path!("Platform");

        self.heartbeat.stop();

        if let Some(player) = self.shared.take_player() {
            player.close().await;
        }

        if !self.handle.is_closed() {
            if let Err(err) = self.connection.disconnect().await {
                tracing::debug!(target: METHOD_PATH,
                                ?err,
                                "CLOSE send failed");
            }
        }

        self.receiver.close();
        self.heartbeat.close();
        self.connection.close();

        let res = self.shared.teardown(CastError::ChannelClosed).await;

        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }

        tracing::info!(target: METHOD_PATH,
                       ?res,
                       "closed");

        res
    }

    /// Runs `fut` under `Config::request_timeout`, failing fast once torn down.
    async fn timed<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        self.shared.ensure_open()?;

        match self.config.request_timeout {
            None => fut.await,
            Some(timeout) => tokio::time::timeout(timeout, fut).await
                .map_err(|_elapsed| CastError::RequestTimeout)?,
        }
    }
}

impl Drop for Platform {
    fn drop(&mut self) {
        let Some(monitor) = self.monitor.take() else {
            return;
        };

        monitor.abort();

        if lock(&self.shared.transport).is_some() {
            tracing::error!("Platform: not closed before drop.\n\
                             Use Platform::close to dispose of Platform.");
        }

        if let Some(player) = self.shared.take_player() {
            player.close_local();
        }
    }
}

impl Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Platform")
         .field("addr", &self.config.addr)
         .field("player", &self.current_player())
         .field("heartbeat", &self.heartbeat_state())
         .finish_non_exhaustive()
    }
}

impl Shared {
    fn player(&self) -> MutexGuard<'_, Option<Arc<Application>>> {
        lock(&self.player)
    }

    fn take_player(&self) -> Option<Arc<Application>> {
        self.player().take()
    }

    fn begin_launch(&self, kind: &AppKind) -> LaunchGuard<'_> {
        *lock(&self.launching) = Some(kind.app_id().to_string());
        LaunchGuard { shared: self }
    }

    fn is_launching(&self) -> bool {
        lock(&self.launching).is_some()
    }

    /// Replaces the current player. The previous one is closed in the background,
    /// sending `CLOSE` to its session.
    fn set_player(self: &Arc<Self>, app: Arc<Application>) {
        let prev = self.player().replace(Arc::clone(&app));
        if let Some(prev) = prev {
            tokio::spawn(async move { prev.close().await });
        }

        // Forward its status until it closes.
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let mut events = app.status_events();
            drop(app);
            while let Some(event) = events.next().await {
                let _ = shared.events_tx.send(PlatformEvent::PlayerStatus(event));
            }
        });
    }

    fn clear_player_if(&self, session_id: &str) -> Option<Arc<Application>> {
        let mut player = self.player();
        match player.as_ref() {
            Some(app) if app.session().session_id == session_id => player.take(),
            _ => None,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match lock(&self.closed_reason).as_ref() {
            Some(reason) => Err(reason.clone().into()),
            None => Ok(()),
        }
    }

    /// Closes the player and the transport. Only the first call has any effect.
    #[named]
    async fn teardown(&self, reason: CastError) -> Result<()> {
        {
            let mut closed_reason = lock(&self.closed_reason);
            if closed_reason.is_some() {
                return Ok(());
            }
            *closed_reason = Some(reason.clone());
        }

        tracing::info!(target: method_path!("Shared"),
                       %reason,
                       "tearing down");

        if let Some(player) = self.take_player() {
            player.close_local();
        }

        let transport = lock(&self.transport).take();
        let res = match transport {
            Some(transport) => transport.close().await,
            None => Ok(()),
        };

        let _ = self.events_tx.send(PlatformEvent::Closed);

        res
    }
}

/// Clears `Shared::launching` when the launch finishes, however it finishes.
struct LaunchGuard<'a> {
    shared: &'a Shared,
}

impl<'a> Drop for LaunchGuard<'a> {
    fn drop(&mut self) {
        lock(&self.shared.launching).take();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn open_controllers(handle: &TransportHandle, sender: &Sender)
-> Result<(ConnectionController, HeartbeatController, ReceiverController)>
{
    Ok((ConnectionController::open(handle, sender)?,
        HeartbeatController::open(handle, sender)?,
        ReceiverController::open(handle, sender)?))
}

/// Diffs receiver status into platform events and tears everything down when the
/// heartbeat times out or the connection goes away.
#[named]
async fn monitor(shared: Arc<Shared>,
                 handle: TransportHandle,
                 status_events: impl Stream<Item = ReceiverStatusEvent> + Send + 'static,
                 heartbeat_state: WatchStream<HeartbeatState>,
                 transport_closed: WatchStream<bool>)
{
    const FUNCTION_PATH: &str = function_path!();

    let events = (
        status_events.map(MonitorEvent::ReceiverStatus),
        heartbeat_state.map(MonitorEvent::Heartbeat),
        transport_closed.map(MonitorEvent::TransportClosed),
    ).merge();
    pin!(events);

    let mut prev_sessions: Vec<Session> = Vec::new();
    let mut prev_volume: Option<Volume> = None;

    while let Some(event) = events.next().await {
        tracing::trace!(target: FUNCTION_PATH,
                        ?event,
                        "event");

        match event {
            MonitorEvent::ReceiverStatus(status_event) => {
                let status = status_event.status.clone();
                let _ = shared.events_tx.send(PlatformEvent::ReceiverStatus(status_event));

                if prev_volume.as_ref() != Some(&status.volume) {
                    prev_volume = Some(status.volume.clone());
                    let _ = shared.events_tx.send(PlatformEvent::Volume(status.volume.clone()));
                }

                let diff = diff_sessions(&prev_sessions, &status.applications);

                for session in diff.stopped {
                    if let Some(player) = shared.clear_player_if(&session.session_id) {
                        player.close_local();
                    }
                    tracing::info!(target: FUNCTION_PATH,
                                   session = ?small_debug::Session(&session),
                                   "stopped casting");
                    let _ = shared.events_tx.send(PlatformEvent::StoppedCasting(session));
                }

                for session in diff.started {
                    tracing::info!(target: FUNCTION_PATH,
                                   session = ?small_debug::Session(&session),
                                   "started casting");
                    let _ = shared.events_tx.send(PlatformEvent::StartedCasting(session));
                }

                if let Some(candidate) = passive_player_candidate(&status.applications) {
                    attach_passive_player(&shared, &handle, candidate).await;
                }

                prev_sessions = status.applications;
            },

            MonitorEvent::Heartbeat(HeartbeatState::TimedOut) => {
                let _ = shared.events_tx.send(PlatformEvent::HeartbeatTimeout);
                if let Err(err) = shared.teardown(CastError::Timeout).await {
                    tracing::warn!(target: FUNCTION_PATH,
                                   ?err,
                                   "error closing transport after heartbeat timeout");
                }
                break;
            },

            MonitorEvent::TransportClosed(true) => {
                if let Err(err) = shared.teardown(CastError::ChannelClosed).await {
                    tracing::warn!(target: FUNCTION_PATH,
                                   ?err,
                                   "error closing transport");
                }
                break;
            },

            MonitorEvent::Heartbeat(_) | MonitorEvent::TransportClosed(false) => {},
        }
    }

    tracing::debug!(target: FUNCTION_PATH,
                    "monitor finished");
}

/// Attaches a status-only player to `session` unless some player is already current
/// or a launch is in flight.
#[named]
async fn attach_passive_player(shared: &Arc<Shared>, handle: &TransportHandle, session: &Session) {
    const FUNCTION_PATH: &str = function_path!();

    let busy = || shared.is_launching()
                  || shared.player().as_ref().is_some_and(|p| !p.is_closed());

    if busy() {
        return;
    }

    let kind = AppKind::Generic(session.app_id.clone());
    match Application::open(handle, kind, session.clone(), None).await {
        Ok(app) if busy() => {
            tracing::debug!(target: FUNCTION_PATH,
                            %app,
                            "player appeared while attaching, dropping generic player");
            app.close().await;
        },
        Ok(app) => {
            tracing::info!(target: FUNCTION_PATH,
                           %app,
                           "generic player attached");
            shared.set_player(app);
            let _ = shared.events_tx.send(PlatformEvent::GenericPlayerAttached(session.clone()));
        },
        Err(err) => tracing::warn!(target: FUNCTION_PATH,
                                   ?err,
                                   session = ?small_debug::Session(session),
                                   "error attaching generic player"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        application::AppPhase,
        error::classify,
        payload::{media, receiver},
        test_util::{self, FakeDevice},
        types::app,
    };
    use serde_json::json;
    use std::{net::{IpAddr, Ipv4Addr}, time::Duration};

    fn config() -> Config {
        Config::from_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_heartbeat_interval(Duration::from_secs(3600))
    }

    async fn platform() -> (Arc<Platform>, FakeDevice) {
        let (transport, device) = FakeDevice::pair();
        let platform = Platform::from_transport(transport, config()).await.unwrap();
        (Arc::new(platform), device)
    }

    fn receiver_status(applications: serde_json::Value) -> serde_json::Value {
        json!({
            "type": "RECEIVER_STATUS",
            "status": {
                "applications": applications,
                "volume": {"level": 0.5, "muted": false},
            },
        })
    }

    async fn close(platform: Arc<Platform>) {
        Arc::into_inner(platform).unwrap().close().await.unwrap();
    }

    #[tokio::test]
    async fn connect_and_heartbeat() {
        test_util::ensure_init();
        let (platform, mut device) = platform().await;

        let connect = device.recv().await;
        assert_eq!(connect.destination, "receiver-0");
        assert_eq!(test_util::json_body(&connect)["type"], "CONNECT");

        let ping = device.recv().await;
        assert_eq!(test_util::json_body(&ping)["type"], "PING");

        close(platform).await;
        let close = device.recv_request("CLOSE").await;
        assert_eq!(close.msg.destination, "receiver-0");
    }

    #[tokio::test]
    async fn stop_precedes_launch() {
        test_util::ensure_init();
        let (platform, mut device) = platform().await;

        let launch = tokio::spawn({
            let platform = Arc::clone(&platform);
            async move { platform.launch(AppKind::DefaultMediaReceiver).await.map(|_| ()) }
        });

        let running = json!([test_util::session_json(app::DEFAULT_MEDIA_RECEIVER, "s-0", "t-0")]);
        let mut types = Vec::new();
        loop {
            let req = device.recv_on(receiver::CHANNEL_NAMESPACE).await;
            let typ = req.body["type"].as_str().unwrap().to_string();
            match typ.as_str() {
                "GET_STATUS" => device.reply(&req, receiver_status(running.clone())),
                "STOP" => {
                    assert_eq!(req.body["sessionId"], "s-0");
                    device.reply(&req, receiver_status(json!([])));
                },
                "LAUNCH" => {
                    device.reply(&req, receiver_status(json!([
                        test_util::session_json(app::DEFAULT_MEDIA_RECEIVER, "s-1", "t-1"),
                    ])));
                    types.push(typ);
                    break;
                },
                other => panic!("unexpected {other}"),
            }
            types.push(typ);
        }

        assert_eq!(types, ["GET_STATUS", "GET_STATUS", "STOP", "LAUNCH"]);

        launch.await.unwrap().unwrap();
        assert_eq!(platform.current_player().unwrap().session().session_id, "s-1");

        close(platform).await;
    }

    #[tokio::test]
    async fn launch_load_play() {
        test_util::ensure_init();
        let (platform, mut device) = platform().await;
        let mut events = Box::pin(platform.events());

        let launch = tokio::spawn({
            let platform = Arc::clone(&platform);
            async move { platform.launch(AppKind::DefaultMediaReceiver).await }
        });

        let req = device.recv_request("GET_STATUS").await;
        device.reply(&req, receiver_status(json!([])));

        let req = device.recv_request("LAUNCH").await;
        assert_eq!(req.body["appId"], app::DEFAULT_MEDIA_RECEIVER);
        device.reply(&req, receiver_status(json!([
            test_util::session_json(app::DEFAULT_MEDIA_RECEIVER, "s-1", "t-1"),
        ])));

        let connect = device.recv_request("CONNECT").await;
        assert_eq!(connect.msg.destination, "t-1");

        let app = launch.await.unwrap().unwrap();
        assert_eq!(*app.kind(), AppKind::DefaultMediaReceiver);

        let load = tokio::spawn({
            let app = Arc::clone(&app);
            async move {
                app.load(media::Media::from_content_id("x"), media::LoadOptions::autoplay()).await
            }
        });

        let req = device.recv_request("LOAD").await;
        assert_eq!(req.msg.destination, "t-1");
        assert_eq!(req.body["autoplay"], true);
        assert_eq!(req.body["currentTime"], 0.0);
        assert_eq!(req.body["activeTrackIds"], json!([]));
        assert_eq!(req.body["repeatMode"], "REPEAT_OFF");
        assert_eq!(req.body["media"], json!({"contentId": "x"}));
        device.reply(&req, json!({
            "type": "MEDIA_STATUS",
            "status": [{"mediaSessionId": 12, "playerState": "BUFFERING"}],
        }));
        load.await.unwrap().unwrap();

        let play = tokio::spawn({
            let app = Arc::clone(&app);
            async move { app.play().await }
        });

        let req = device.recv_request("PLAY").await;
        assert_eq!(req.body["mediaSessionId"], 12);
        device.reply(&req, json!({
            "type": "MEDIA_STATUS",
            "status": [{"mediaSessionId": 12, "playerState": "PLAYING"}],
        }));
        assert!(play.await.unwrap().unwrap().unwrap().is_playing());

        let mut started = None;
        while started.is_none() {
            if let PlatformEvent::StartedCasting(session) = events.next().await.unwrap() {
                started = Some(session);
            }
        }
        assert_eq!(started.unwrap().app_id, app::DEFAULT_MEDIA_RECEIVER);

        drop(app);
        close(platform).await;
    }

    #[tokio::test]
    async fn unknown_app_gets_generic_player() {
        test_util::ensure_init();
        let (platform, mut device) = platform().await;
        let mut events = Box::pin(platform.events());

        device.send_json("receiver-0", "*", receiver::CHANNEL_NAMESPACE, receiver_status(json!([
            test_util::session_json("CC32E753", "s-9", "t-9"),
        ])));

        let connect = device.recv_request("CONNECT").await;
        assert_eq!(connect.msg.destination, "receiver-0");
        let connect = device.recv_request("CONNECT").await;
        assert_eq!(connect.msg.destination, "t-9");

        loop {
            if let PlatformEvent::GenericPlayerAttached(session) = events.next().await.unwrap() {
                assert_eq!(session.app_id, "CC32E753");
                break;
            }
        }

        let player = platform.current_player().unwrap();
        assert_eq!(*player.kind(), AppKind::Generic("CC32E753".into()));
        drop(player);

        device.send_json("receiver-0", "*", receiver::CHANNEL_NAMESPACE,
                         receiver_status(json!([])));

        loop {
            if let PlatformEvent::StoppedCasting(session) = events.next().await.unwrap() {
                assert_eq!(session.session_id, "s-9");
                break;
            }
        }
        assert!(platform.current_player().is_none());

        close(platform).await;
    }

    #[tokio::test]
    async fn launch_of_unknown_app_opens_one_connection() {
        test_util::ensure_init();
        let (platform, mut device) = platform().await;
        let mut events = Box::pin(platform.events());

        let launch = tokio::spawn({
            let platform = Arc::clone(&platform);
            async move { platform.launch(AppKind::Generic("CC32E753".into())).await }
        });

        let req = device.recv_request("GET_STATUS").await;
        device.reply(&req, receiver_status(json!([])));

        let running = json!([test_util::session_json("CC32E753", "s-9", "t-9")]);
        let req = device.recv_request("LAUNCH").await;
        device.reply(&req, receiver_status(running.clone()));

        let connect = device.recv_request("CONNECT").await;
        assert_eq!(connect.msg.destination, "t-9");

        let app = launch.await.unwrap().unwrap();

        // Status is handled in order, so once this volume shows up the LAUNCH
        // response has been handled too.
        device.send_json("receiver-0", "*", receiver::CHANNEL_NAMESPACE, json!({
            "type": "RECEIVER_STATUS",
            "status": {
                "applications": running,
                "volume": {"level": 0.25, "muted": false},
            },
        }));
        loop {
            match events.next().await.unwrap() {
                PlatformEvent::GenericPlayerAttached(session) =>
                    panic!("second player attached to {session:?}"),
                PlatformEvent::Volume(volume) if volume.level == Some(0.25) => break,
                _ => {},
            }
        }

        let mut extra_connects = 0;
        while let Some(msg) = device.try_recv() {
            let body = test_util::json_body(&msg);
            if body["type"] == "CONNECT" && msg.destination == "t-9" {
                extra_connects += 1;
            }
        }
        assert_eq!(extra_connects, 0);
        assert!(Arc::ptr_eq(&platform.current_player().unwrap(), &app));

        drop(app);
        close(platform).await;
    }

    /// Launches the default media receiver as session `s-1` on transport `t-1`.
    async fn launch_media_receiver(platform: &Arc<Platform>, device: &mut FakeDevice)
    -> Arc<Application>
    {
        let launch = tokio::spawn({
            let platform = Arc::clone(platform);
            async move { platform.launch(AppKind::DefaultMediaReceiver).await }
        });

        let req = device.recv_request("GET_STATUS").await;
        device.reply(&req, receiver_status(json!([])));

        let req = device.recv_request("LAUNCH").await;
        device.reply(&req, receiver_status(json!([
            test_util::session_json(app::DEFAULT_MEDIA_RECEIVER, "s-1", "t-1"),
        ])));

        device.recv_request("CONNECT").await;

        launch.await.unwrap().unwrap()
    }

    async fn assert_app_torn_down(platform: &Platform, app: &Application) {
        assert_eq!(app.phase(), AppPhase::Closed);
        assert!(platform.current_player().is_none());

        let err = app.play().await.unwrap_err();
        assert_eq!(classify(&err),
                   Some(&CastError::InvalidState("application closed".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_timeout_closes_player() {
        test_util::ensure_init();
        let (platform, mut device) = platform().await;
        let mut events = Box::pin(platform.events());

        let app = launch_media_receiver(&platform, &mut device).await;
        assert_eq!(app.phase(), AppPhase::Connected);

        loop {
            if let PlatformEvent::Closed = events.next().await.unwrap() {
                break;
            }
        }

        assert_app_torn_down(&platform, &app).await;

        drop(app);
        close(platform).await;
    }

    #[tokio::test]
    async fn peer_close_closes_player() {
        test_util::ensure_init();
        let (platform, mut device) = platform().await;
        let mut events = Box::pin(platform.events());

        let app = launch_media_receiver(&platform, &mut device).await;

        drop(device);

        loop {
            if let PlatformEvent::Closed = events.next().await.unwrap() {
                break;
            }
        }

        assert_app_torn_down(&platform, &app).await;

        drop(app);
        close(platform).await;
    }

    #[tokio::test]
    async fn close_closes_player() {
        test_util::ensure_init();
        let (platform, mut device) = platform().await;

        let app = launch_media_receiver(&platform, &mut device).await;

        Arc::into_inner(platform).unwrap().close().await.unwrap();

        let close = device.recv_request("CLOSE").await;
        assert_eq!(close.msg.destination, "t-1");
        assert_eq!(app.phase(), AppPhase::Closed);
        assert!(app.play().await.is_err());
    }

    #[tokio::test]
    async fn request_timeout() {
        test_util::ensure_init();
        let (transport, mut device) = FakeDevice::pair();
        let platform = Platform::from_transport(
            transport, config().with_request_timeout(Duration::from_millis(50))).await.unwrap();

        let err = platform.sessions().await.unwrap_err();
        assert_eq!(classify(&err), Some(&CastError::RequestTimeout));
        device.recv_request("GET_STATUS").await;

        platform.close().await.unwrap();
    }

    #[tokio::test]
    async fn peer_close_tears_down() {
        test_util::ensure_init();
        let (platform, device) = platform().await;
        let mut events = Box::pin(platform.events());

        drop(device);

        loop {
            if let PlatformEvent::Closed = events.next().await.unwrap() {
                break;
            }
        }

        let err = platform.sessions().await.unwrap_err();
        assert_eq!(classify(&err), Some(&CastError::ChannelClosed));

        close(platform).await;
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_timeout_tears_down() {
        test_util::ensure_init();
        let (transport, mut device) = FakeDevice::pair();
        let platform = Platform::from_transport(transport, Config::from_ip(
            IpAddr::V4(Ipv4Addr::LOCALHOST))).await.unwrap();
        let mut events = Box::pin(platform.events());

        device.recv_request("PING").await;

        assert!(matches!(events.next().await, Some(PlatformEvent::HeartbeatTimeout)));
        assert!(matches!(events.next().await, Some(PlatformEvent::Closed)));
        assert_eq!(platform.heartbeat_state(), HeartbeatState::TimedOut);

        let err = platform.sessions().await.unwrap_err();
        assert_eq!(classify(&err), Some(&CastError::Timeout));

        platform.close().await.unwrap();
    }
}
