//! Request id correlation over a JSON controller.

use crate::{
    channel::{ChannelKey, ChannelSender},
    controller::{Controller, JsonMessage, MessageHandler},
    error::{CastError, Result},
    payload::{RequestId, RequestIdGen, RequestInner, MESSAGE_RESPONSE_TYPE_INVALID_REQUEST},
    transport::TransportHandle,
    types::MessageType,
    util::named,
};
use serde::de::DeserializeOwned;
use std::{
    collections::HashMap,
    fmt::{self, Debug},
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::sync::oneshot;

/// A controller whose outbound requests each carry a fresh `requestId`, resolved by
/// the inbound message echoing it.
pub struct RequestResponseController {
    controller: Controller,
    ids: RequestIdGen,
    pending: Arc<PendingRequests>,
}

/// A response with its `requestId` removed.
#[derive(Clone, Debug)]
pub struct Response {
    pub typ: MessageType,

    /// The whole JSON object minus `requestId`; `type` is kept so tagged enums
    /// deserialise directly.
    pub body: serde_json::Value,
}

struct PendingRequests {
    state: Mutex<PendingState>,
}

#[derive(Default)]
struct PendingState {
    closed: bool,
    map: HashMap<RequestId, oneshot::Sender<JsonMessage>>,
}

/// Removes the pending entry if the request future is dropped before it resolves.
struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    request_id: RequestId,
}

/// Resolves pending requests, after giving `extra` a look at every message.
struct Dispatch {
    extra: Option<Arc<dyn MessageHandler>>,
    pending: Arc<PendingRequests>,
}

impl RequestResponseController {
    /// `extra` sees every inbound message before any pending request resolves, so
    /// state it derives from a response is visible when the request returns.
    pub fn open(transport: &TransportHandle,
                key: ChannelKey,
                extra: Option<Arc<dyn MessageHandler>>)
    -> Result<RequestResponseController>
    {
        let pending = Arc::new(PendingRequests {
            state: Mutex::new(PendingState::default()),
        });

        let dispatch = Arc::new(Dispatch {
            extra,
            pending: Arc::clone(&pending),
        });

        let controller = Controller::open(transport, key, dispatch)?;

        Ok(RequestResponseController {
            controller,
            ids: RequestIdGen::new(),
            pending,
        })
    }

    pub fn key(&self) -> &ChannelKey {
        self.controller.key()
    }

    /// Sends `req` and waits for the message carrying the same request id.
    ///
    /// There is no timeout at this layer: the request is pending until answered or
    /// until the controller closes, which fails it with `Cancelled`.
    #[named]
    pub async fn request<Req>(&self, req: Req) -> Result<Response>
    where Req: RequestInner
    {
        const METHOD_PATH: &str = method_path!("RequestResponseController");

        let start = tokio::time::Instant::now();

        let request_id = self.ids.take_next();
        let (guard, response_rx) = self.pending.register(request_id)?;

        // Registered before sending, so an immediate response can't be missed.
        self.controller.send(Some(request_id), req).await?;

        let msg = response_rx.await.map_err(|_| CastError::Cancelled)?;
        drop(guard);

        tracing::debug!(target: METHOD_PATH,
                        elapsed = ?start.elapsed(),
                        request_id = request_id.inner(),
                        request_type = Req::TYPE_NAME,
                        response_type = msg.typ,
                        namespace = self.key().namespace,
                        "response");

        if msg.typ == MESSAGE_RESPONSE_TYPE_INVALID_REQUEST {
            let reason = msg.body.get("reason")
                            .and_then(|r| r.as_str())
                            .unwrap_or_default()
                            .to_string();
            return Err(CastError::InvalidRequest { reason }.into());
        }

        Ok(Response::from_message(msg))
    }

    pub fn is_closed(&self) -> bool {
        self.controller.is_closed()
    }

    /// Idempotent. Every pending request fails with `Cancelled`, as does any later one.
    pub fn close(&self) {
        self.pending.cancel_all();
        self.controller.close();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().map.len()
    }
}

impl Drop for RequestResponseController {
    fn drop(&mut self) {
        self.close();
    }
}

impl Debug for RequestResponseController {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RequestResponseController")
         .field("controller", &self.controller)
         .field("pending", &self.pending_len())
         .finish_non_exhaustive()
    }
}

impl Response {
    fn from_message(msg: JsonMessage) -> Response {
        let mut body = msg.body;
        if let Some(obj) = body.as_object_mut() {
            obj.remove("requestId");
        }

        Response {
            typ: msg.typ,
            body,
        }
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone())
            .map_err(|err| anyhow::format_err!(
                "Response::parse: error deserialising {ty}\n\
                 _ err  = {err}\n\
                 _ body = {body:#?}",
                ty = std::any::type_name::<T>(),
                body = self.body))
    }
}

impl PendingRequests {
    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, request_id: RequestId)
    -> Result<(PendingGuard<'_>, oneshot::Receiver<JsonMessage>)>
    {
        let mut state = self.lock();
        if state.closed {
            return Err(CastError::Cancelled.into());
        }

        let (tx, rx) = oneshot::channel();
        state.map.insert(request_id, tx);

        Ok((PendingGuard { pending: self, request_id }, rx))
    }

    fn take(&self, request_id: RequestId) -> Option<oneshot::Sender<JsonMessage>> {
        self.lock().map.remove(&request_id)
    }

    /// Dropping the senders fails every waiting request.
    fn cancel_all(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.map.clear();
    }
}

impl<'a> Drop for PendingGuard<'a> {
    fn drop(&mut self) {
        self.pending.take(self.request_id);
    }
}

impl MessageHandler for Dispatch {
    #[named]
    fn on_message(&self, msg: &JsonMessage, channel: &ChannelSender) {
        if let Some(extra) = self.extra.as_ref() {
            extra.on_message(msg, channel);
        }

        let Some(request_id) = msg.request_id else {
            return;
        };

        match self.pending.take(request_id) {
            Some(tx) => {
                let _ = tx.send(msg.clone());
            },
            None => {
                tracing::debug!(target: method_path!("Dispatch"),
                                request_id = request_id.inner(),
                                typ = msg.typ,
                                namespace = channel.key().namespace,
                                "no pending request for response");
            },
        }
    }

    fn on_close(&self) {
        self.pending.cancel_all();

        if let Some(extra) = self.extra.as_ref() {
            extra.on_close();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        error::classify,
        payload::receiver::GetStatusRequest,
        test_util::{self, FakeDevice},
    };
    use serde_json::json;

    const NS: &str = "urn:x-cast:com.google.cast.receiver";

    fn open(transport: &crate::transport::Transport) -> RequestResponseController {
        RequestResponseController::open(&transport.handle(),
                                        ChannelKey::new("sender-0", "receiver-0", NS),
                                        None).unwrap()
    }

    #[tokio::test]
    async fn out_of_order_responses() {
        test_util::ensure_init();
        let (transport, mut device) = FakeDevice::pair();
        let rr = Arc::new(open(&transport));

        let requests = (0..4).map(|_| {
            let rr = Arc::clone(&rr);
            tokio::spawn(async move { rr.request(GetStatusRequest {}).await })
        }).collect::<Vec<_>>();

        let mut ids = Vec::new();
        for _ in 0..4 {
            let req = device.recv_json().await;
            assert_eq!(req["type"], "GET_STATUS");
            ids.push(req["requestId"].as_i64().unwrap());
        }

        for id in ids.iter().rev() {
            device.send_json("receiver-0", "sender-0", NS,
                             json!({"type": "RECEIVER_STATUS", "requestId": id, "tag": id}));
        }

        let mut tags = Vec::new();
        for req in requests {
            let resp = req.await.unwrap().unwrap();
            assert_eq!(resp.body.get("requestId"), None);
            tags.push(resp.body["tag"].as_i64().unwrap());
        }

        let mut sorted_ids = ids.clone();
        sorted_ids.sort();
        let mut sorted_tags = tags.clone();
        sorted_tags.sort();
        assert_eq!(sorted_ids, sorted_tags);
        assert_eq!(rr.pending_len(), 0);

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_request_is_typed() {
        test_util::ensure_init();
        let (transport, mut device) = FakeDevice::pair();
        let rr = Arc::new(open(&transport));

        let req = tokio::spawn({
            let rr = Arc::clone(&rr);
            async move { rr.request(GetStatusRequest {}).await }
        });

        let sent = device.recv_json().await;
        device.send_json("receiver-0", "sender-0", NS, json!({
            "type": "INVALID_REQUEST",
            "requestId": sent["requestId"],
            "reason": "INVALID_COMMAND",
        }));

        let err = req.await.unwrap().unwrap_err();
        assert_eq!(classify(&err),
                   Some(&CastError::InvalidRequest { reason: "INVALID_COMMAND".into() }));

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_cancels_pending() {
        test_util::ensure_init();
        let (transport, mut device) = FakeDevice::pair();
        let rr = Arc::new(open(&transport));

        let req = tokio::spawn({
            let rr = Arc::clone(&rr);
            async move { rr.request(GetStatusRequest {}).await }
        });

        let _sent = device.recv_json().await;
        rr.close();

        let err = req.await.unwrap().unwrap_err();
        assert_eq!(classify(&err), Some(&CastError::Cancelled));

        let err = rr.request(GetStatusRequest {}).await.unwrap_err();
        assert_eq!(classify(&err), Some(&CastError::Cancelled));
        assert!(device.try_recv().is_none());

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn transport_close_cancels_pending() {
        test_util::ensure_init();
        let (transport, mut device) = FakeDevice::pair();
        let rr = Arc::new(open(&transport));

        let req = tokio::spawn({
            let rr = Arc::clone(&rr);
            async move { rr.request(GetStatusRequest {}).await }
        });

        let _sent = device.recv_json().await;
        drop(device);

        let err = req.await.unwrap().unwrap_err();
        assert_eq!(classify(&err), Some(&CastError::Cancelled));

        transport.close().await.unwrap();
    }
}
