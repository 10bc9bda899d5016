//! PING/PONG liveness watchdog on the `tp.heartbeat` namespace.

use crate::{
    channel::ChannelSender,
    controller::{Controller, JsonMessage, MessageHandler},
    error::Result,
    payload::{heartbeat::*, Payload},
    sender::Sender,
    transport::TransportHandle,
    util::named,
};
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// A missing PONG is fatal after this many intervals.
pub const TIMEOUT_FACTOR: u32 = 3;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HeartbeatState {
    /// Not started, or between a PONG and the next PING.
    Idle,
    Pinging,
    WaitingPong,

    /// Terminal until `start()` is called again.
    TimedOut,

    Stopped,
}

pub struct HeartbeatController {
    controller: Arc<Controller>,
    state_tx: Arc<watch::Sender<HeartbeatState>>,
    pong_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<()>>>,

    /// The ping loop, while running.
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Handler {
    pong_tx: mpsc::UnboundedSender<()>,
}

impl HeartbeatController {
    pub fn open(transport: &TransportHandle, sender: &Sender) -> Result<HeartbeatController> {
        let (pong_tx, pong_rx) = mpsc::unbounded_channel();

        let controller = Controller::open(transport,
                                          sender.key(CHANNEL_NAMESPACE),
                                          Arc::new(Handler { pong_tx }))?;

        Ok(HeartbeatController {
            controller: Arc::new(controller),
            state_tx: Arc::new(watch::Sender::new(HeartbeatState::Idle)),
            pong_rx: Arc::new(tokio::sync::Mutex::new(pong_rx)),
            task: Mutex::new(None),
        })
    }

    /// Sends a PING now, then one every `interval` after each PONG.
    ///
    /// Restarts the loop if it is already running.
    #[named]
    pub fn start(&self, interval: Duration) {
        let mut task = self.lock_task();
        if let Some(prev) = task.take() {
            prev.abort();
        }

        tracing::debug!(target: method_path!("HeartbeatController"),
                        ?interval,
                        "heartbeat started");

        *task = Some(tokio::spawn(ping_loop(Arc::clone(&self.controller),
                                            interval,
                                            Arc::clone(&self.state_tx),
                                            Arc::clone(&self.pong_rx))));
    }

    /// Idempotent. No PING is sent and no timeout fires after this returns.
    pub fn stop(&self) {
        if let Some(task) = self.lock_task().take() {
            task.abort();
        }
        self.state_tx.send_replace(HeartbeatState::Stopped);
    }

    pub fn state(&self) -> HeartbeatState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<HeartbeatState> {
        self.state_tx.subscribe()
    }

    /// Stops the watchdog and closes the channel.
    pub fn close(&self) {
        self.stop();
        self.controller.close();
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for HeartbeatController {
    fn drop(&mut self) {
        if let Some(task) = self.lock_task().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for HeartbeatController {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("HeartbeatController")
         .field("controller", &self.controller)
         .field("state", &self.state())
         .finish_non_exhaustive()
    }
}

#[named]
async fn ping_loop(controller: Arc<Controller>,
                   interval: Duration,
                   state_tx: Arc<watch::Sender<HeartbeatState>>,
                   pong_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<()>>>)
{
    const FUNCTION_PATH: &str = function_path!();

    let mut pong_rx = pong_rx.lock().await;
    let timeout = interval * TIMEOUT_FACTOR;

    loop {
        // PONGs from before this PING don't count.
        while pong_rx.try_recv().is_ok() {}

        state_tx.send_replace(HeartbeatState::Pinging);

        if let Err(err) = controller.send(None, Ping {}).await {
            tracing::warn!(target: FUNCTION_PATH,
                           ?err,
                           "PING send failed, heartbeat stopped");
            state_tx.send_replace(HeartbeatState::Stopped);
            return;
        }

        state_tx.send_replace(HeartbeatState::WaitingPong);

        match tokio::time::timeout(timeout, pong_rx.recv()).await {
            Ok(Some(())) => {
                state_tx.send_replace(HeartbeatState::Idle);
                tokio::time::sleep(interval).await;
            },
            Ok(None) => {
                // The handler is gone, so the channel closed.
                state_tx.send_replace(HeartbeatState::Stopped);
                return;
            },
            Err(_elapsed) => {
                tracing::warn!(target: FUNCTION_PATH,
                               ?timeout,
                               "no PONG before timeout");
                state_tx.send_replace(HeartbeatState::TimedOut);
                return;
            },
        }
    }
}

impl MessageHandler for Handler {
    #[named]
    fn on_message(&self, msg: &JsonMessage, channel: &ChannelSender) {
        const METHOD_PATH: &str = method_path!("Handler");

        match msg.typ.as_str() {
            MESSAGE_TYPE_PONG => {
                let _ = self.pong_tx.send(());
            },

            // Devices ping their senders too, and drop silent ones.
            MESSAGE_TYPE_PING => {
                let pong_json = match serde_json::to_string(&Payload::new(None, Pong {})) {
                    Ok(j) => j,
                    Err(err) => {
                        tracing::error!(target: METHOD_PATH,
                                        ?err,
                                        "serde_json serialisation error for pong payload");
                        return;
                    },
                };

                let channel = channel.clone();
                tokio::spawn(async move {
                    if let Err(err) = channel.send(pong_json.into()).await {
                        tracing::warn!(target: METHOD_PATH,
                                       ?err,
                                       "PONG send failed");
                    }
                });
            },

            _ => tracing::debug!(target: METHOD_PATH,
                                 typ = msg.typ,
                                 "unexpected heartbeat message"),
        }
    }
}
