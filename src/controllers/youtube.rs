//! YouTube style video remote: resolves a screen id over the cast channel, then
//! drives playback through a separate remote-control service.

use async_trait::async_trait;
use crate::{
    channel::ChannelSender,
    controller::{Controller, JsonMessage, MessageHandler},
    error::{CastError, Result},
    payload::{youtube::*, RequestInner, MESSAGE_RESPONSE_TYPE_INVALID_REQUEST},
    sender::Sender,
    transport::TransportHandle,
    util::named,
};
use std::{
    collections::VecDeque,
    fmt::{self, Debug},
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::sync::oneshot;

/// A remote-control session for one screen.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Plays `video_id`, optionally as part of playlist `list_id`.
    async fn play_video(&self, video_id: String, list_id: Option<String>) -> Result<()>;
    async fn add_to_queue(&self, video_id: String) -> Result<()>;
    async fn play_next(&self, video_id: String) -> Result<()>;
    async fn remove_video(&self, video_id: String) -> Result<()>;
    async fn clear_playlist(&self) -> Result<()>;
}

/// Opens `RemoteSession`s by screen id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteSessionFactory: Send + Sync {
    async fn open(&self, screen_id: String) -> Result<Box<dyn RemoteSession>>;
}

pub struct VideoRemoteController {
    controller: Controller,
    waiters: Arc<Waiters>,
    factory: Option<Arc<dyn RemoteSessionFactory>>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    screen_id: Option<String>,
    remote: Option<Arc<dyn RemoteSession>>,
}

/// Callers of `control_request`, oldest first. Each takes the next inbound message.
#[derive(Default)]
struct Waiters {
    inner: Mutex<WaitersInner>,
}

#[derive(Default)]
struct WaitersInner {
    closed: bool,
    queue: VecDeque<oneshot::Sender<JsonMessage>>,
}

struct Handler {
    waiters: Arc<Waiters>,
}

impl VideoRemoteController {
    pub fn open(transport: &TransportHandle,
                sender: &Sender,
                factory: Option<Arc<dyn RemoteSessionFactory>>)
    -> Result<VideoRemoteController>
    {
        let waiters = Arc::new(Waiters::default());

        let handler: Arc<dyn MessageHandler> = Arc::new(Handler {
            waiters: Arc::clone(&waiters),
        });

        let controller = Controller::open(transport, sender.key(CHANNEL_NAMESPACE), handler)?;

        Ok(VideoRemoteController {
            controller,
            waiters,
            factory,
            state: Mutex::new(State::default()),
        })
    }

    /// Sends `req` and resolves with the next message on the channel, whatever it is.
    ///
    /// The MDX namespace does not echo request ids.
    pub async fn control_request<Req>(&self, req: Req) -> Result<JsonMessage>
    where Req: RequestInner
    {
        let rx = self.waiters.push()?;
        self.controller.send(None, req).await?;

        let msg = rx.await.map_err(|_| CastError::Cancelled)?;

        if msg.typ == MESSAGE_RESPONSE_TYPE_INVALID_REQUEST {
            let reason = msg.body.get("reason")
                            .and_then(|r| r.as_str())
                            .unwrap_or_default()
                            .to_string();
            return Err(CastError::InvalidRequest { reason }.into());
        }

        Ok(msg)
    }

    /// Asks the receiver for its screen id; fails with `InvalidState` if it has none.
    #[named]
    pub async fn get_screen_id(&self) -> Result<String> {
        let msg = self.control_request(GetMdxSessionStatusRequest {}).await?;

        let status: MdxSessionStatus = msg.parse().unwrap_or_default();

        let Some(screen_id) = status.data.and_then(|d| d.screen_id) else {
            tracing::warn!(target: method_path!("VideoRemoteController"),
                           ?msg,
                           "no screenId in session status");
            return Err(CastError::invalid_state("missing screenId").into());
        };

        self.lock_state().screen_id = Some(screen_id.clone());

        Ok(screen_id)
    }

    /// Resolves the screen id, opens a fresh remote session on it and plays `video_id`.
    #[named]
    pub async fn play_video(&self, video_id: &str, list_id: Option<&str>) -> Result<()> {
        let Some(factory) = self.factory.clone() else {
            return Err(CastError::invalid_state("no video remote service").into());
        };

        let screen_id = self.get_screen_id().await?;

        tracing::debug!(target: method_path!("VideoRemoteController"),
                        screen_id, video_id, ?list_id,
                        "opening remote session");

        let remote: Arc<dyn RemoteSession> = Arc::from(factory.open(screen_id).await?);
        self.lock_state().remote = Some(Arc::clone(&remote));

        remote.play_video(video_id.to_string(), list_id.map(str::to_string)).await
    }

    pub async fn load(&self, video_id: &str) -> Result<()> {
        self.play_video(video_id, None).await
    }

    pub async fn play_list(&self, list_id: &str) -> Result<()> {
        self.play_video("", Some(list_id)).await
    }

    pub async fn add_to_queue(&self, video_id: &str) -> Result<()> {
        self.remote()?.add_to_queue(video_id.to_string()).await
    }

    pub async fn play_next(&self, video_id: &str) -> Result<()> {
        self.remote()?.play_next(video_id.to_string()).await
    }

    pub async fn remove_video(&self, video_id: &str) -> Result<()> {
        self.remote()?.remove_video(video_id.to_string()).await
    }

    pub async fn clear_playlist(&self) -> Result<()> {
        self.remote()?.clear_playlist().await
    }

    pub fn screen_id(&self) -> Option<String> {
        self.lock_state().screen_id.clone()
    }

    /// Idempotent. Waiting control requests fail with `Cancelled`; the remote
    /// session is dropped.
    pub fn close(&self) {
        self.waiters.close();
        *self.lock_state() = State::default();
        self.controller.close();
    }

    fn remote(&self) -> Result<Arc<dyn RemoteSession>> {
        self.lock_state().remote.clone()
            .ok_or_else(|| CastError::invalid_state("no remote session").into())
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for VideoRemoteController {
    fn drop(&mut self) {
        self.close();
    }
}

impl Debug for VideoRemoteController {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VideoRemoteController")
         .field("controller", &self.controller)
         .field("screen_id", &self.screen_id())
         .finish_non_exhaustive()
    }
}

impl Waiters {
    fn lock(&self) -> MutexGuard<'_, WaitersInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self) -> Result<oneshot::Receiver<JsonMessage>> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(CastError::Cancelled.into());
        }

        let (tx, rx) = oneshot::channel();
        inner.queue.push_back(tx);
        Ok(rx)
    }

    /// Hands `msg` to the oldest caller still waiting.
    fn resolve(&self, msg: &JsonMessage) {
        let mut inner = self.lock();
        while let Some(tx) = inner.queue.pop_front() {
            if tx.send(msg.clone()).is_ok() {
                return;
            }
        }
    }

    fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.queue.clear();
    }
}

impl MessageHandler for Handler {
    fn on_message(&self, msg: &JsonMessage, _channel: &ChannelSender) {
        self.waiters.resolve(msg);
    }

    fn on_close(&self) {
        self.waiters.close();
    }
}
