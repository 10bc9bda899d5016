//! One launched receiver-side session and the controllers bound to it.

use crate::{
    controllers::{
        connection::ConnectionController,
        generic::{GenericController, GenericStatusEvent},
        media::{MediaController, MediaStatusEvent},
        youtube::{RemoteSessionFactory, VideoRemoteController},
    },
    error::{CastError, Result},
    payload::{media, receiver::{small_debug, Session}},
    sender::Sender,
    transport::TransportHandle,
    types::{app, AppId},
    util::named,
};
use futures::{stream::BoxStream, StreamExt};
use std::{
    fmt::{self, Debug, Display},
    sync::{Arc, Mutex, MutexGuard, Weak},
};
use tokio::{sync::watch, task::JoinHandle};

/// Which receiver app a player drives, selected at launch time.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum AppKind {
    DefaultMediaReceiver,
    YouTube,

    /// Any other app; status only, over the media namespace.
    Generic(AppId),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AppPhase {
    Connecting,
    Connected,

    /// Terminal.
    Closed,
}

/// A status update from whichever controller backs the application.
#[derive(Clone, Debug)]
pub enum AppStatusEvent {
    Media(MediaStatusEvent),
    Generic(GenericStatusEvent),
}

pub struct Application {
    kind: AppKind,
    session: Session,
    sender: Sender,
    connection: ConnectionController,
    functions: Functions,
    phase_tx: watch::Sender<AppPhase>,

    /// Closes the application when the peer sends `CLOSE`.
    watcher: Mutex<Option<JoinHandle<()>>>,
}

enum Functions {
    Media(MediaController),
    Video {
        media: MediaController,
        remote: VideoRemoteController,
    },
    Generic(GenericController),
}

impl AppKind {
    pub fn from_app_id(app_id: &str) -> AppKind {
        match app_id {
            app::DEFAULT_MEDIA_RECEIVER => AppKind::DefaultMediaReceiver,
            app::YOUTUBE => AppKind::YouTube,
            other => AppKind::Generic(other.to_string()),
        }
    }

    pub fn app_id(&self) -> &str {
        match self {
            AppKind::DefaultMediaReceiver => app::DEFAULT_MEDIA_RECEIVER,
            AppKind::YouTube => app::YOUTUBE,
            AppKind::Generic(app_id) => app_id,
        }
    }
}

impl Display for AppKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AppKind::DefaultMediaReceiver => write!(f, "DefaultMediaReceiver"),
            AppKind::YouTube => write!(f, "YouTube"),
            AppKind::Generic(app_id) => write!(f, "Generic({app_id})"),
        }
    }
}

impl Application {
    /// Binds to `session` with a fresh sender id and performs the `CONNECT` handshake.
    ///
    /// `video_remote` is only used by `AppKind::YouTube`.
    #[named]
    pub async fn open(transport: &TransportHandle,
                      kind: AppKind,
                      session: Session,
                      video_remote: Option<Arc<dyn RemoteSessionFactory>>)
    -> Result<Arc<Application>>
    {
        const METHOD_PATH: &str = method_path!("Application");

        let sender = Sender::random(session.transport_id.clone());

        let connection = ConnectionController::open(transport, &sender)?;

        let functions = match kind {
            AppKind::DefaultMediaReceiver =>
                Functions::Media(MediaController::open(transport, &sender)?),
            AppKind::YouTube => Functions::Video {
                media: MediaController::open(transport, &sender)?,
                remote: VideoRemoteController::open(transport, &sender, video_remote)?,
            },
            AppKind::Generic(_) =>
                Functions::Generic(GenericController::open(transport, &sender,
                                                           media::CHANNEL_NAMESPACE)?),
        };

        let mut disconnected = connection.disconnected();

        let app = Arc::new(Application {
            kind,
            session,
            sender,
            connection,
            functions,
            phase_tx: watch::Sender::new(AppPhase::Connecting),
            watcher: Mutex::new(None),
        });

        if let Err(err) = app.connection.connect().await {
            app.close_local();
            return Err(err);
        }

        app.phase_tx.send_replace(AppPhase::Connected);

        let weak: Weak<Application> = Arc::downgrade(&app);
        *app.lock_watcher() = Some(tokio::spawn(async move {
            // An error means the connection controller is gone, so the app is too.
            if disconnected.wait_for(|d| *d).await.is_err() {
                return;
            }

            if let Some(app) = weak.upgrade() {
                tracing::info!(target: METHOD_PATH,
                               app = %app,
                               "closed by peer");
                app.close_local();
            }
        }));

        tracing::info!(target: METHOD_PATH,
                       app = %app,
                       "connected");

        Ok(app)
    }

    pub fn kind(&self) -> &AppKind {
        &self.kind
    }

    /// The session this application was bound to when launched.
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn phase(&self) -> AppPhase {
        *self.phase_tx.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<AppPhase> {
        self.phase_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == AppPhase::Closed
    }

    /// Fails with `InvalidState` for a status-only application.
    pub fn media(&self) -> Result<&MediaController> {
        self.ensure_open()?;

        match &self.functions {
            Functions::Media(media) | Functions::Video { media, .. } => Ok(media),
            Functions::Generic(_) =>
                Err(CastError::invalid_state("application has no media control").into()),
        }
    }

    /// Fails with `InvalidState` unless this is a video application.
    pub fn video_remote(&self) -> Result<&VideoRemoteController> {
        self.ensure_open()?;

        match &self.functions {
            Functions::Video { remote, .. } => Ok(remote),
            _ => Err(CastError::invalid_state("application has no video remote").into()),
        }
    }

    pub fn generic(&self) -> Result<&GenericController> {
        self.ensure_open()?;

        match &self.functions {
            Functions::Generic(generic) => Ok(generic),
            _ => Err(CastError::invalid_state("application is not generic").into()),
        }
    }

    pub async fn get_status(&self) -> Result<Option<media::StatusEntry>> {
        self.media()?.get_status().await
    }

    pub async fn load(&self, media: media::Media, options: media::LoadOptions)
    -> Result<Option<media::StatusEntry>>
    {
        self.media()?.load(media, options).await
    }

    pub async fn play(&self) -> Result<Option<media::StatusEntry>> {
        self.media()?.play().await
    }

    pub async fn pause(&self) -> Result<Option<media::StatusEntry>> {
        self.media()?.pause().await
    }

    pub async fn stop_media(&self) -> Result<Option<media::StatusEntry>> {
        self.media()?.stop().await
    }

    pub async fn seek(&self, current_time: f64) -> Result<Option<media::StatusEntry>> {
        self.media()?.seek(current_time).await
    }

    /// Plays a video by id through the video remote.
    pub async fn load_video(&self, video_id: &str) -> Result<()> {
        self.video_remote()?.load(video_id).await
    }

    pub async fn play_list(&self, list_id: &str) -> Result<()> {
        self.video_remote()?.play_list(list_id).await
    }

    /// Status updates from the backing controller. Ends when the application closes.
    pub fn status_events(&self) -> BoxStream<'static, AppStatusEvent> {
        let events = match &self.functions {
            Functions::Media(media) | Functions::Video { media, .. } =>
                media.status_events().map(AppStatusEvent::Media).boxed(),
            Functions::Generic(generic) =>
                generic.status_events().map(AppStatusEvent::Generic).boxed(),
        };

        let mut phase = self.watch_phase();
        events.take_until(async move {
                  let _ = phase.wait_for(|p| *p == AppPhase::Closed).await;
              })
              .boxed()
    }

    /// Sends `CLOSE` to the session, best effort, then closes every controller.
    ///
    /// Idempotent. The receiver-side session keeps running; stopping it is the
    /// `Platform`'s job.
    #[named]
    pub async fn close(&self) {
        if self.is_closed() {
            return;
        }

        if let Err(err) = self.connection.disconnect().await {
            tracing::debug!(target: method_path!("Application"),
                            ?err,
                            app = %self,
                            "CLOSE send failed");
        }

        self.close_local();
    }

    /// Closes every controller without telling the peer.
    pub(crate) fn close_local(&self) {
        let prev = self.phase_tx.send_replace(AppPhase::Closed);

        if let Some(watcher) = self.lock_watcher().take() {
            watcher.abort();
        }

        match &self.functions {
            Functions::Media(media) => media.close(),
            Functions::Video { media, remote } => {
                remote.close();
                media.close();
            },
            Functions::Generic(generic) => generic.close(),
        }

        self.connection.close();

        if prev != AppPhase::Closed {
            tracing::debug!(target: concat!(module_path!(), "::Application::close_local"),
                            app = %self,
                            "closed");
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CastError::invalid_state("application closed").into());
        }
        Ok(())
    }

    fn lock_watcher(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.watcher.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        self.close_local();
    }
}

impl Display for Application {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} session={} ({})", self.kind, self.session.session_id, self.sender)
    }
}

impl Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Application")
         .field("kind", &self.kind)
         .field("session", &small_debug::Session(&self.session))
         .field("sender", &self.sender)
         .field("phase", &self.phase())
         .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        error::classify,
        payload::connection,
        test_util::{self, FakeDevice},
    };
    use rstest::rstest;
    use serde_json::json;

    fn session(app_id: &str) -> Session {
        serde_json::from_value(test_util::session_json(app_id, "s-1", "t-1")).unwrap()
    }

    #[rstest]
    #[case(app::DEFAULT_MEDIA_RECEIVER, AppKind::DefaultMediaReceiver)]
    #[case(app::YOUTUBE, AppKind::YouTube)]
    #[case("CC32E753", AppKind::Generic("CC32E753".into()))]
    fn kind_from_app_id(#[case] app_id: &str, #[case] kind: AppKind) {
        assert_eq!(AppKind::from_app_id(app_id), kind);
        assert_eq!(kind.app_id(), app_id);
    }

    #[tokio::test]
    async fn connects_to_transport_id() {
        test_util::ensure_init();
        let (transport, mut device) = FakeDevice::pair();

        let app = Application::open(&transport.handle(),
                                    AppKind::DefaultMediaReceiver,
                                    session(app::DEFAULT_MEDIA_RECEIVER),
                                    None).await.unwrap();

        let connect = device.recv_request("CONNECT").await;
        assert_eq!(connect.msg.destination, "t-1");
        assert_eq!(connect.msg.source, app.sender().sender_id);
        assert!(app.sender().sender_id.starts_with("client-"));
        assert_eq!(app.phase(), AppPhase::Connected);

        app.close().await;
        let close = device.recv_request("CLOSE").await;
        assert_eq!(close.msg.namespace, connection::CHANNEL_NAMESPACE);
        assert!(app.is_closed());

        let err = app.play().await.unwrap_err();
        assert_eq!(classify(&err), Some(&CastError::InvalidState("application closed".into())));

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn peer_close_closes_app() {
        test_util::ensure_init();
        let (transport, mut device) = FakeDevice::pair();

        let app = Application::open(&transport.handle(),
                                    AppKind::DefaultMediaReceiver,
                                    session(app::DEFAULT_MEDIA_RECEIVER),
                                    None).await.unwrap();
        let mut phase = app.watch_phase();
        let mut events = app.status_events();

        let connect = device.recv_request("CONNECT").await;
        device.send_json("t-1", &connect.msg.source, connection::CHANNEL_NAMESPACE,
                         json!({"type": "CLOSE"}));

        phase.wait_for(|p| *p == AppPhase::Closed).await.unwrap();
        assert!(events.next().await.is_none());
        assert!(app.media().is_err());

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn generic_app_is_status_only() {
        test_util::ensure_init();
        let (transport, mut device) = FakeDevice::pair();

        let app = Application::open(&transport.handle(),
                                    AppKind::Generic("CC32E753".into()),
                                    session("CC32E753"),
                                    None).await.unwrap();
        let mut events = app.status_events();

        assert_eq!(app.generic().unwrap().namespace(), media::CHANNEL_NAMESPACE);
        let err = app.play().await.unwrap_err();
        assert_eq!(classify(&err),
                   Some(&CastError::InvalidState("application has no media control".into())));

        let connect = device.recv_request("CONNECT").await;
        device.send_json("t-1", "*", media::CHANNEL_NAMESPACE, json!({
            "type": "MEDIA_STATUS",
            "status": [{"mediaSessionId": 1, "playerState": "PLAYING"}],
        }));

        let Some(AppStatusEvent::Generic(event)) = events.next().await else {
            panic!("expected a generic status event");
        };
        assert_eq!(event.status["playerState"], "PLAYING");
        assert_eq!(connect.msg.destination, "t-1");

        app.close().await;
        transport.close().await.unwrap();
    }
}
