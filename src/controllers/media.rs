//! Media playback control scoped to the receiver-assigned media session.

use chrono::{DateTime, Utc};
use crate::{
    channel::ChannelSender,
    controller::{JsonMessage, MessageHandler},
    error::{CastError, Result},
    payload::media::{self, *},
    request::{RequestResponseController, Response},
    sender::Sender,
    transport::TransportHandle,
    types::MediaSessionId,
    util::named,
};
use futures::{Stream, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

#[derive(Debug)]
pub struct MediaController {
    rr: RequestResponseController,
    shared: Arc<Shared>,
}

/// A media status entry as it arrived.
#[derive(Clone, Debug)]
pub struct MediaStatusEvent {
    pub status: StatusEntry,
    pub broadcast: bool,
    pub time: DateTime<Utc>,
}

#[derive(Debug)]
struct Shared {
    /// The last status entry seen; replaced, never mutated.
    current: Mutex<Option<StatusEntry>>,
    status_tx: broadcast::Sender<MediaStatusEvent>,
}

struct Handler {
    shared: Arc<Shared>,
}

const STATUS_BROADCAST_CHANNEL_CAPACITY: usize = 16;

impl MediaController {
    pub fn open(transport: &TransportHandle, sender: &Sender) -> Result<MediaController> {
        let shared = Arc::new(Shared {
            current: Mutex::new(None),
            status_tx: broadcast::Sender::new(STATUS_BROADCAST_CHANNEL_CAPACITY),
        });

        let handler: Arc<dyn MessageHandler> = Arc::new(Handler {
            shared: Arc::clone(&shared),
        });

        let rr = RequestResponseController::open(transport,
                                                 sender.key(CHANNEL_NAMESPACE),
                                                 Some(handler))?;

        Ok(MediaController {
            rr,
            shared,
        })
    }

    pub async fn get_status(&self) -> Result<Option<StatusEntry>> {
        let resp = self.rr.request(GetStatusRequest {
            media_session_id: None,
        }).await?;

        status_entry_from(resp)
    }

    /// Loads `media`; unset options take their protocol defaults.
    ///
    /// On success the new media session becomes current. On `LOAD_FAILED`,
    /// `LOAD_CANCELLED` or `INVALID_PLAYER_STATE` the current session is unchanged.
    #[named]
    pub async fn load(&self, media: Media, options: LoadOptions) -> Result<Option<StatusEntry>> {
        const METHOD_PATH: &str = method_path!("MediaController");

        let req = LoadRequest::new(media, options);

        tracing::debug!(target: METHOD_PATH,
                        media = ?small_debug::Media(&req.media),
                        autoplay = req.autoplay,
                        "load");

        let resp = self.rr.request(req).await?;

        match resp.parse::<LoadResponse>()? {
            LoadResponse::Ok(status) => Ok(status.into_first()),
            LoadResponse::LoadFailed => Err(CastError::LoadFailed.into()),
            LoadResponse::LoadCancelled => Err(CastError::LoadCancelled.into()),
            LoadResponse::InvalidPlayerState => Err(CastError::InvalidPlayerState.into()),
        }
    }

    pub async fn play(&self) -> Result<Option<StatusEntry>> {
        self.session_request(PlayRequest).await
    }

    pub async fn pause(&self) -> Result<Option<StatusEntry>> {
        self.session_request(PauseRequest).await
    }

    pub async fn stop(&self) -> Result<Option<StatusEntry>> {
        self.session_request(StopRequest).await
    }

    /// Seeks to `current_time` seconds.
    pub async fn seek(&self, current_time: f64) -> Result<Option<StatusEntry>> {
        self.session_request(|common| SeekRequest { common, current_time }).await
    }

    /// Fails with `InvalidState` without sending when no media session is known yet.
    async fn session_request<Req>(&self, msg_type_fn: impl FnOnce(MediaRequestCommon) -> Req)
    -> Result<Option<StatusEntry>>
    where Req: crate::payload::RequestInner
    {
        let Some(media_session_id) = self.media_session_id() else {
            return Err(CastError::invalid_state("no session").into());
        };

        let resp = self.rr.request(msg_type_fn(MediaRequestCommon::new(media_session_id)))
                          .await?;

        status_entry_from(resp)
    }

    pub fn current_session(&self) -> Option<StatusEntry> {
        self.shared.current().clone()
    }

    pub fn media_session_id(&self) -> Option<MediaSessionId> {
        self.shared.current().as_ref().map(|entry| entry.media_session_id)
    }

    pub fn status_events(&self) -> impl Stream<Item = MediaStatusEvent> + Send + 'static {
        tokio_stream::wrappers::BroadcastStream::new(self.shared.status_tx.subscribe())
            .filter_map(|res| futures::future::ready(match res {
                Ok(it) => Some(it),
                Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(n)) => {
                    tracing::warn!(target: concat!(module_path!(),
                                                   "::MediaController::status_events"),
                                   n,
                                   "lagged");
                    None
                },
            }))
    }

    pub fn close(&self) {
        self.rr.close();
    }
}

#[named]
fn status_entry_from(resp: Response) -> Result<Option<StatusEntry>> {
    match resp.parse::<media::StatusResponse>() {
        Ok(media::StatusResponse::Ok(status)) => Ok(status.into_first()),
        Ok(media::StatusResponse::InvalidPlayerState) => Err(CastError::InvalidPlayerState.into()),
        Err(err) => anyhow::bail!("{function_path}: unexpected media response\n\
                                   _ err  = {err:#}\n\
                                   _ type = {typ}",
                                  function_path = function_path!(),
                                  typ = resp.typ),
    }
}

impl Shared {
    fn current(&self) -> MutexGuard<'_, Option<StatusEntry>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MessageHandler for Handler {
    #[named]
    fn on_message(&self, msg: &JsonMessage, _channel: &ChannelSender) {
        const METHOD_PATH: &str = method_path!("Handler");

        if msg.typ != MESSAGE_RESPONSE_TYPE_MEDIA_STATUS {
            return;
        }

        let status = match msg.parse::<media::Status>() {
            Ok(v) => v,
            Err(err) => {
                tracing::error!(target: METHOD_PATH,
                                ?err, ?msg,
                                "error deserialising typed media status payload");
                return;
            },
        };

        // An empty list means the receiver has no media session any more.
        let Some(entry) = status.into_first() else {
            if self.shared.current().take().is_some() {
                tracing::debug!(target: METHOD_PATH,
                                broadcast = msg.broadcast,
                                "media session ended");
            }
            return;
        };

        tracing::debug!(target: METHOD_PATH,
                        status = ?small_debug::MediaStatusEntry(&entry),
                        broadcast = msg.broadcast,
                        "media status");

        *self.shared.current() = Some(entry.clone());

        let _ = self.shared.status_tx.send(MediaStatusEvent {
            status: entry,
            broadcast: msg.broadcast,
            time: Utc::now(),
        });
    }
}
