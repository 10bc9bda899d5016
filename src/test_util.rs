//! In-memory stand-in for a cast device, wired to a real `Transport`.

use crate::{
    error::Error,
    message::CastMessage,
    transport::Transport,
};
use futures::{channel::mpsc, SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Once;

/// Installs a test tracing subscriber once per process. `RUST_LOG` overrides the
/// default `warn` filter.
pub fn ensure_init() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_test_writer().with_target(true))
            .with(EnvFilter::try_from_default_env()
                      .unwrap_or_else(|_| EnvFilter::new("warn")))
            .try_init();
    });
}

/// The device end of a `Transport`: sees every frame the transport writes and can
/// inject frames as if read from the wire.
pub struct FakeDevice {
    to_transport: mpsc::UnboundedSender<CastMessage>,
    from_transport: mpsc::UnboundedReceiver<CastMessage>,
}

/// A message the device received and can `reply` to.
#[derive(Clone, Debug)]
pub struct Request {
    pub msg: CastMessage,
    pub body: Value,
}

impl FakeDevice {
    pub fn pair() -> (Transport, FakeDevice) {
        let (out_tx, out_rx) = mpsc::unbounded::<CastMessage>();
        let (in_tx, in_rx) = mpsc::unbounded::<CastMessage>();

        let transport = Transport::spawn(out_tx.sink_map_err(Error::from),
                                         in_rx.map(Ok));

        (transport, FakeDevice {
            to_transport: in_tx,
            from_transport: out_rx,
        })
    }

    /// Next frame written by the transport.
    pub async fn recv(&mut self) -> CastMessage {
        self.from_transport.next().await.expect("transport closed")
    }

    /// A frame already written by the transport, if any.
    pub fn try_recv(&mut self) -> Option<CastMessage> {
        self.from_transport.try_recv().ok()
    }

    pub async fn recv_json(&mut self) -> Value {
        json_body(&self.recv().await)
    }

    /// Skips frames until one with `"type": typ`.
    pub async fn recv_type(&mut self, typ: &str) -> Value {
        self.recv_request(typ).await.body
    }

    /// Skips frames until one with `"type": typ`, e.g. past heartbeat PINGs.
    pub async fn recv_request(&mut self, typ: &str) -> Request {
        loop {
            let msg = self.recv().await;
            let Some(json) = msg.payload.as_str() else {
                continue;
            };
            let Ok(body) = serde_json::from_str::<Value>(json) else {
                continue;
            };
            if body["type"] == typ {
                return Request { msg, body };
            }
        }
    }

    /// Skips frames until one on `namespace`.
    pub async fn recv_on(&mut self, namespace: &str) -> Request {
        loop {
            let msg = self.recv().await;
            if msg.namespace == namespace {
                let body = json_body(&msg);
                return Request { msg, body };
            }
        }
    }

    /// Answers `req` on its namespace, echoing its `requestId`.
    pub fn reply(&self, req: &Request, mut body: Value) {
        if let (Some(obj), Some(request_id)) = (body.as_object_mut(), req.body.get("requestId")) {
            obj.insert("requestId".to_string(), request_id.clone());
        }

        self.send_json(&req.msg.destination, &req.msg.source, &req.msg.namespace, body);
    }

    pub fn send_json(&self, source: &str, destination: &str, namespace: &str, body: Value) {
        self.send_raw(source, destination, namespace, &body.to_string());
    }

    pub fn send_raw(&self, source: &str, destination: &str, namespace: &str, payload: &str) {
        self.send(CastMessage {
            namespace: namespace.to_string(),
            source: source.to_string(),
            destination: destination.to_string(),
            payload: payload.to_string().into(),
        });
    }

    /// Ignored once the transport has stopped reading.
    pub fn send(&self, msg: CastMessage) {
        let _ = self.to_transport.unbounded_send(msg);
    }
}

pub fn json_body(msg: &CastMessage) -> Value {
    let json = msg.payload.as_str().expect("string payload");
    serde_json::from_str(json).expect("JSON payload")
}

/// A `RECEIVER_STATUS` application entry.
pub fn session_json(app_id: &str, session_id: &str, transport_id: &str) -> Value {
    json!({
        "appId": app_id,
        "sessionId": session_id,
        "transportId": transport_id,
        "displayName": format!("App {app_id}"),
        "statusText": "",
        "namespaces": [
            {"name": "urn:x-cast:com.google.cast.media"},
        ],
        "isIdleScreen": false,
    })
}
