//! JSON controller: one channel, one pump task, typed dispatch to a `MessageHandler`.

use crate::{
    channel::{Channel, ChannelKey, ChannelSender, Encoding},
    error::Result,
    message::CastMessage,
    payload::{Payload, RequestId, RequestInner},
    transport::TransportHandle,
    types::{EndpointId, MessageType},
    util::named,
};
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::{
    fmt::{self, Debug},
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::sync::broadcast;

/// Inbound JSON message after envelope decoding.
#[derive(Clone, Debug)]
pub struct JsonMessage {
    pub typ: MessageType,

    /// `None` for unsolicited messages, including those with the broadcast id 0.
    pub request_id: Option<RequestId>,

    /// The whole JSON object, `type` and `requestId` included.
    pub body: serde_json::Value,

    /// True when the message was addressed to `*` rather than to us.
    pub broadcast: bool,

    pub source: EndpointId,
}

/// Receives a controller's inbound messages on its pump task.
///
/// Implementations must not block; spawn a task for anything that awaits.
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(&self, msg: &JsonMessage, channel: &ChannelSender);

    /// Called once, after the last message, when the channel closes.
    fn on_close(&self) {}
}

pub struct Controller {
    channel: ChannelSender,

    /// Some(_) until `.close()` is called, so subscribers see the end of the stream.
    messages_tx: Mutex<Option<broadcast::Sender<JsonMessage>>>,
}

const MESSAGES_BROADCAST_CHANNEL_CAPACITY: usize = 16;

impl JsonMessage {
    #[named]
    pub(crate) fn decode(msg: &CastMessage) -> Result<JsonMessage> {
        const FUNCTION_PATH: &str = method_path!("JsonMessage");

        let Some(json) = msg.payload.as_str() else {
            anyhow::bail!("{FUNCTION_PATH}: binary payload on a JSON channel");
        };

        tracing::trace!(target: FUNCTION_PATH,
                        json,
                        namespace = msg.namespace,
                        "message payload json");

        let body: serde_json::Value = serde_json::from_str(json)?;

        let Some(typ) = body.get("type").and_then(|t| t.as_str()) else {
            anyhow::bail!("{FUNCTION_PATH}: missing `type`\n\
                           _ body = {body:#?}");
        };

        Ok(JsonMessage {
            typ: typ.to_string(),
            request_id: RequestId::from_json(&body),
            broadcast: msg.is_broadcast(),
            source: msg.source.clone(),
            body,
        })
    }

    /// Deserialises the whole body into `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone())
            .map_err(|err| anyhow::format_err!(
                "JsonMessage::parse: error deserialising {ty}\n\
                 _ err  = {err}\n\
                 _ type = {typ:?}",
                ty = std::any::type_name::<T>(),
                typ = self.typ))
    }
}

impl Controller {
    /// Opens a JSON channel for `key` and starts its pump task.
    pub fn open(transport: &TransportHandle,
                key: ChannelKey,
                handler: Arc<dyn MessageHandler>)
    -> Result<Controller>
    {
        let channel = Channel::open(transport, key, Encoding::Json)?;
        let sender = channel.sender().clone();
        let messages_tx = broadcast::Sender::new(MESSAGES_BROADCAST_CHANNEL_CAPACITY);

        // The pump exits on its own once the channel's route is gone.
        tokio::spawn(pump(channel, handler, messages_tx.clone()));

        Ok(Controller {
            channel: sender,
            messages_tx: Mutex::new(Some(messages_tx)),
        })
    }

    pub fn key(&self) -> &ChannelKey {
        self.channel.key()
    }

    /// Sends `inner` in a `{ type, requestId, ... }` envelope.
    #[named]
    pub async fn send<Req>(&self, request_id: Option<RequestId>, inner: Req) -> Result<()>
    where Req: RequestInner
    {
        const METHOD_PATH: &str = method_path!("Controller");

        let payload = Payload::new(request_id, inner);

        let key = self.key();

        tracing::debug!(target: METHOD_PATH,
                        ?payload,
                        request_type = payload.typ,
                        namespace = key.namespace,
                        source = key.source,
                        destination = key.destination,
                        "payload struct");

        let payload_json = serde_json::to_string(&payload)?;

        tracing::trace!(target: METHOD_PATH,
                        payload_json,
                        "payload json");

        self.channel.send(payload_json.into()).await
    }

    /// Every inbound message, after the controller's handler has seen it.
    pub fn subscribe(&self) -> impl Stream<Item = JsonMessage> + Send + 'static {
        let messages_rx = match lock(&self.messages_tx).as_ref() {
            Some(tx) => tx.subscribe(),
            // Closed: a receiver whose sender is already gone.
            None => broadcast::channel(1).1,
        };

        tokio_stream::wrappers::BroadcastStream::new(messages_rx)
            .filter_map(|res| futures::future::ready(match res {
                Ok(it) => Some(it),
                Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(n)) => {
                    tracing::warn!(target: concat!(module_path!(),
                                                   "::Controller::subscribe"),
                                   n,
                                   "lagged");
                    None
                },
            }))
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    /// Idempotent. The handler's `on_close` runs on the pump task after this returns.
    pub fn close(&self) {
        self.channel.close();
        lock(&self.messages_tx).take();
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.close();
    }
}

impl Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Controller")
         .field("channel", &self.channel)
         .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[named]
async fn pump(mut channel: Channel,
              handler: Arc<dyn MessageHandler>,
              messages_tx: broadcast::Sender<JsonMessage>)
{
    const FUNCTION_PATH: &str = function_path!();

    while let Some(msg) = channel.recv().await {
        let json_msg = match JsonMessage::decode(&msg) {
            Ok(m) => m,
            Err(err) => {
                tracing::warn!(target: FUNCTION_PATH,
                               ?err, ?msg,
                               "error decoding message, dropped");
                continue;
            },
        };

        tracing::debug!(target: FUNCTION_PATH,
                        typ = json_msg.typ,
                        request_id = ?json_msg.request_id,
                        broadcast = json_msg.broadcast,
                        namespace = channel.key().namespace,
                        "message");

        handler.on_message(&json_msg, channel.sender());

        // An error only means nobody is subscribed.
        let _ = messages_tx.send(json_msg);
    }

    tracing::trace!(target: FUNCTION_PATH,
                    key = ?channel.key(),
                    "pump finished");

    handler.on_close();
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        error::CastError,
        test_util::{self, FakeDevice},
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        messages: AtomicUsize,
        closes: AtomicUsize,
    }

    impl MessageHandler for Counting {
        fn on_message(&self, _msg: &JsonMessage, _channel: &ChannelSender) {
            self.messages.fetch_add(1, Ordering::SeqCst);
        }

        fn on_close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dispatch_and_close_once() {
        test_util::ensure_init();
        let (transport, device) = FakeDevice::pair();
        let handler = Arc::new(Counting::default());

        let controller = Controller::open(&transport.handle(),
                                          ChannelKey::new("sender-0", "receiver-0",
                                                          "urn:x-cast:test"),
                                          handler.clone()).unwrap();
        let mut messages = Box::pin(controller.subscribe());

        device.send_json("receiver-0", "*", "urn:x-cast:test",
                         json!({"type": "STATUS", "requestId": 0}));
        device.send_raw("receiver-0", "sender-0", "urn:x-cast:test", "not json");
        device.send_json("receiver-0", "sender-0", "urn:x-cast:test",
                         json!({"type": "STATUS", "requestId": 4}));

        let first = messages.next().await.unwrap();
        assert!(first.broadcast);
        assert_eq!(first.request_id, None);

        let second = messages.next().await.unwrap();
        assert!(!second.broadcast);
        assert_eq!(second.request_id.map(RequestId::inner), Some(4));
        assert_eq!(handler.messages.load(Ordering::SeqCst), 2);

        controller.close();
        controller.close();
        assert_eq!(messages.next().await.map(|m| m.typ), None);
        assert_eq!(handler.closes.load(Ordering::SeqCst), 1);

        let err = controller.send(None, crate::payload::heartbeat::Ping {}).await.unwrap_err();
        assert_eq!(crate::error::classify(&err), Some(&CastError::ChannelClosed));

        transport.close().await.unwrap();
    }
}
