//! Status-only controller for namespaces we have no typed model for.

use chrono::{DateTime, Utc};
use crate::{
    channel::ChannelSender,
    controller::{JsonMessage, MessageHandler},
    error::Result,
    payload::RequestInner,
    request::RequestResponseController,
    sender::Sender,
    transport::TransportHandle,
    types::{MessageTypeConst, Namespace},
    util::named,
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

#[derive(Debug)]
pub struct GenericController {
    rr: RequestResponseController,
    shared: Arc<Shared>,
}

#[derive(Clone, Debug)]
pub struct GenericStatusEvent {
    /// `status[0]` of the message, untyped.
    pub status: serde_json::Value,
    pub broadcast: bool,
    pub time: DateTime<Utc>,
}

#[derive(Debug)]
struct Shared {
    current: Mutex<Option<serde_json::Value>>,
    status_tx: broadcast::Sender<GenericStatusEvent>,
}

struct Handler {
    shared: Arc<Shared>,
}

#[derive(Debug, Serialize)]
struct GetStatusRequest {}

impl RequestInner for GetStatusRequest {
    const TYPE_NAME: MessageTypeConst = "GET_STATUS";
}

const STATUS_BROADCAST_CHANNEL_CAPACITY: usize = 16;

impl GenericController {
    pub fn open(transport: &TransportHandle, sender: &Sender, namespace: impl Into<Namespace>)
    -> Result<GenericController>
    {
        let shared = Arc::new(Shared {
            current: Mutex::new(None),
            status_tx: broadcast::Sender::new(STATUS_BROADCAST_CHANNEL_CAPACITY),
        });

        let handler: Arc<dyn MessageHandler> = Arc::new(Handler {
            shared: Arc::clone(&shared),
        });

        let key = crate::channel::ChannelKey::new(sender.sender_id.clone(),
                                                  sender.receiver_id.clone(),
                                                  namespace);
        let rr = RequestResponseController::open(transport, key, Some(handler))?;

        Ok(GenericController {
            rr,
            shared,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.rr.key().namespace
    }

    /// `GET_STATUS`, returning `status[0]` if the reply has one.
    pub async fn get_status(&self) -> Result<Option<serde_json::Value>> {
        let resp = self.rr.request(GetStatusRequest {}).await?;
        let first = first_status(&resp.body);
        if first.is_some() {
            *self.shared.current() = first.clone();
        }
        Ok(first)
    }

    pub fn current_status(&self) -> Option<serde_json::Value> {
        self.shared.current().clone()
    }

    pub fn status_events(&self) -> impl Stream<Item = GenericStatusEvent> + Send + 'static {
        tokio_stream::wrappers::BroadcastStream::new(self.shared.status_tx.subscribe())
            .filter_map(|res| futures::future::ready(res.ok()))
    }

    pub fn close(&self) {
        self.rr.close();
    }
}

fn first_status(body: &serde_json::Value) -> Option<serde_json::Value> {
    body.get("status")?.as_array()?.first().cloned()
}

impl Shared {
    fn current(&self) -> MutexGuard<'_, Option<serde_json::Value>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MessageHandler for Handler {
    #[named]
    fn on_message(&self, msg: &JsonMessage, channel: &ChannelSender) {
        let Some(status) = first_status(&msg.body) else {
            tracing::trace!(target: method_path!("Handler"),
                            typ = msg.typ,
                            namespace = channel.key().namespace,
                            "message without status");
            return;
        };

        *self.shared.current() = Some(status.clone());

        let _ = self.shared.status_tx.send(GenericStatusEvent {
            status,
            broadcast: msg.broadcast,
            time: Utc::now(),
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::{self, FakeDevice};
    use serde_json::json;

    const NS: &str = "urn:x-cast:com.example.player";

    #[tokio::test]
    async fn status_only() {
        test_util::ensure_init();
        let (transport, mut device) = FakeDevice::pair();
        let generic = Arc::new(GenericController::open(&transport.handle(),
                                                       &Sender::new("client-2", "web-2"),
                                                       NS).unwrap());
        let mut events = Box::pin(generic.status_events());

        let get = tokio::spawn({
            let generic = Arc::clone(&generic);
            async move { generic.get_status().await }
        });

        let req = device.recv_request("GET_STATUS").await;
        assert_eq!(req.msg.namespace, NS);
        device.reply(&req, json!({"type": "STATUS", "status": [{"track": "a"}]}));

        assert_eq!(get.await.unwrap().unwrap(), Some(json!({"track": "a"})));

        device.send_json("web-2", "*", NS, json!({"type": "STATUS", "status": [{"track": "b"}]}));
        device.send_json("web-2", "*", NS, json!({"type": "OTHER"}));

        // The reply to GET_STATUS is an event too.
        assert_eq!(events.next().await.unwrap().status, json!({"track": "a"}));
        let event = events.next().await.unwrap();
        assert!(event.broadcast);
        assert_eq!(event.status, json!({"track": "b"}));
        assert_eq!(generic.current_status(), Some(json!({"track": "b"})));

        generic.close();
        transport.close().await.unwrap();
    }
}
