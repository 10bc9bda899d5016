//! Device-level control: status, app availability, launch, stop and volume.

use anyhow::format_err;
use chrono::{DateTime, Utc};
use crate::{
    channel::ChannelSender,
    controller::{JsonMessage, MessageHandler},
    error::{CastError, Result},
    payload::receiver::{self, *},
    request::{RequestResponseController, Response},
    sender::Sender,
    transport::TransportHandle,
    types::{AppId, SessionId},
    util::named,
};
use futures::{Stream, StreamExt};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::broadcast;

#[derive(Debug)]
pub struct ReceiverController {
    rr: RequestResponseController,
    status_tx: broadcast::Sender<ReceiverStatusEvent>,
}

/// A receiver status snapshot as it arrived.
#[derive(Clone, Debug)]
pub struct ReceiverStatusEvent {
    pub status: receiver::Status,

    /// True when the device sent it to everyone rather than in reply to us.
    pub broadcast: bool,

    pub time: DateTime<Utc>,
}

struct Handler {
    status_tx: broadcast::Sender<ReceiverStatusEvent>,
}

const STATUS_BROADCAST_CHANNEL_CAPACITY: usize = 16;

impl ReceiverController {
    pub fn open(transport: &TransportHandle, sender: &Sender) -> Result<ReceiverController> {
        let status_tx = broadcast::Sender::new(STATUS_BROADCAST_CHANNEL_CAPACITY);

        let handler: Arc<dyn MessageHandler> = Arc::new(Handler {
            status_tx: status_tx.clone(),
        });

        let rr = RequestResponseController::open(transport,
                                                 sender.key(CHANNEL_NAMESPACE),
                                                 Some(handler))?;

        Ok(ReceiverController {
            rr,
            status_tx,
        })
    }

    pub async fn get_status(&self) -> Result<receiver::Status> {
        let resp = self.rr.request(GetStatusRequest {}).await?;
        status_from(resp)
    }

    /// Map from each requested app id to whether the device can run it.
    pub async fn get_app_availability(&self, app_ids: &[AppId])
    -> Result<BTreeMap<AppId, bool>>
    {
        let resp = self.rr.request(GetAppAvailabilityRequest {
            app_id: app_ids.to_vec(),
        }).await?;

        let availability: AppAvailabilityResponse = resp.parse()?;

        Ok(availability.availability.into_iter()
           .map(|(app_id, avail)| (app_id, avail == APP_AVAILABLE))
           .collect())
    }

    /// Launches `app_id` and returns the sessions running afterwards.
    ///
    /// Fails with `LaunchFailed` when the device answers `LAUNCH_ERROR`.
    #[named]
    pub async fn launch(&self, app_id: &str) -> Result<Vec<Session>> {
        const METHOD_PATH: &str = method_path!("ReceiverController");

        let resp = self.rr.request(LaunchRequest {
            app_id: app_id.to_string(),
        }).await?;

        match resp.parse::<LaunchResponse>()? {
            LaunchResponse::Ok(StatusWrapper { status }) => {
                tracing::info!(target: METHOD_PATH,
                               app_id,
                               sessions = ?small_debug::Sessions(&status.applications),
                               "launched");
                Ok(status.applications)
            },
            LaunchResponse::Error { reason } => {
                tracing::warn!(target: METHOD_PATH,
                               app_id,
                               ?reason,
                               "launch error");
                Err(CastError::LaunchFailed {
                    reason: reason.unwrap_or_default(),
                }.into())
            },
        }
    }

    /// Stops the session and returns the sessions still running.
    pub async fn stop(&self, session_id: &SessionId) -> Result<Vec<Session>> {
        let resp = self.rr.request(StopRequest {
            session_id: session_id.clone(),
        }).await?;

        Ok(status_from(resp)?.applications)
    }

    /// Changes either the level, in `0.0..=1.0`, or the mute state.
    pub async fn set_volume(&self, volume: VolumeRequest) -> Result<Volume> {
        if let VolumeRequest::Level(level) = volume {
            if !(0.0..=1.0).contains(&level) {
                return Err(CastError::InvalidRequest {
                    reason: format!("volume level {level} outside 0.0..=1.0"),
                }.into());
            }
        }

        let resp = self.rr.request(SetVolumeRequest { volume }).await?;
        Ok(status_from(resp)?.volume)
    }

    pub async fn get_volume(&self) -> Result<Volume> {
        Ok(self.get_status().await?.volume)
    }

    pub async fn get_sessions(&self) -> Result<Vec<Session>> {
        Ok(self.get_status().await?.applications)
    }

    /// Every receiver status the device sends, solicited or not.
    pub fn status_events(&self) -> impl Stream<Item = ReceiverStatusEvent> + Send + 'static {
        tokio_stream::wrappers::BroadcastStream::new(self.status_tx.subscribe())
            .filter_map(|res| futures::future::ready(match res {
                Ok(it) => Some(it),
                Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(n)) => {
                    tracing::warn!(target: concat!(module_path!(),
                                                   "::ReceiverController::status_events"),
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

fn status_from(resp: Response) -> Result<receiver::Status> {
    let StatusResponse::Ok(StatusWrapper { status }) = resp.parse::<StatusResponse>()
        .map_err(|err| format_err!("unexpected receiver response: {err:#}"))?;

    Ok(status)
}

impl MessageHandler for Handler {
    #[named]
    fn on_message(&self, msg: &JsonMessage, _channel: &ChannelSender) {
        const METHOD_PATH: &str = method_path!("Handler");

        if msg.typ != MESSAGE_RESPONSE_TYPE_RECEIVER_STATUS {
            return;
        }

        let StatusWrapper { status } = match msg.parse::<StatusWrapper>() {
            Ok(v) => v,
            Err(err) => {
                tracing::error!(target: METHOD_PATH,
                                ?err, ?msg,
                                "error deserialising typed receiver status payload");
                return;
            },
        };

        tracing::debug!(target: METHOD_PATH,
                        status = ?small_debug::ReceiverStatus(&status),
                        broadcast = msg.broadcast,
                        "receiver status");

        // Ignore an error result, which just means no receivers are currently listening.
        let _ = self.status_tx.send(ReceiverStatusEvent {
            status,
            broadcast: msg.broadcast,
            time: Utc::now(),
        });
    }
}
