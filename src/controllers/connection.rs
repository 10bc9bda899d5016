use crate::{
    channel::ChannelSender,
    controller::{Controller, JsonMessage, MessageHandler},
    error::Result,
    payload::{connection::*, USER_AGENT},
    sender::Sender,
    transport::TransportHandle,
    util::named,
};
use std::sync::Arc;
use tokio::sync::watch;

/// Virtual connection handshake with one endpoint.
#[derive(Debug)]
pub struct ConnectionController {
    controller: Controller,
    disconnected_rx: watch::Receiver<bool>,
}

struct Handler {
    disconnected_tx: watch::Sender<bool>,
}

impl ConnectionController {
    pub fn open(transport: &TransportHandle, sender: &Sender) -> Result<ConnectionController> {
        let (disconnected_tx, disconnected_rx) = watch::channel(false);

        let controller = Controller::open(transport,
                                          sender.key(CHANNEL_NAMESPACE),
                                          Arc::new(Handler { disconnected_tx }))?;

        Ok(ConnectionController {
            controller,
            disconnected_rx,
        })
    }

    pub async fn connect(&self) -> Result<()> {
        self.controller.send(None, ConnectRequest {
            user_agent: USER_AGENT.to_string(),
        }).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.controller.send(None, CloseRequest {}).await
    }

    /// Flips to `true` when the peer sends `CLOSE` or the channel closes.
    pub fn disconnected(&self) -> watch::Receiver<bool> {
        self.disconnected_rx.clone()
    }

    pub fn close(&self) {
        self.controller.close();
    }
}

impl MessageHandler for Handler {
    #[named]
    fn on_message(&self, msg: &JsonMessage, channel: &ChannelSender) {
        if msg.typ == MESSAGE_TYPE_CLOSE {
            tracing::info!(target: method_path!("Handler"),
                           key = ?channel.key(),
                           "connection closed by peer");
            self.disconnected_tx.send_replace(true);
        }
    }

    fn on_close(&self) {
        self.disconnected_tx.send_replace(true);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::{self, FakeDevice};
    use serde_json::json;

    #[tokio::test]
    async fn handshake_and_peer_close() {
        test_util::ensure_init();
        let (transport, mut device) = FakeDevice::pair();
        let sender = Sender::new("client-1", "web-1");

        let conn = ConnectionController::open(&transport.handle(), &sender).unwrap();
        let mut disconnected = conn.disconnected();

        conn.connect().await.unwrap();
        let msg = device.recv().await;
        assert_eq!((msg.source.as_str(), msg.destination.as_str()), ("client-1", "web-1"));
        let body = test_util::json_body(&msg);
        assert_eq!(body["type"], "CONNECT");
        assert!(body.get("requestId").is_none());

        device.send_json("web-1", "client-1", CHANNEL_NAMESPACE, json!({"type": "CLOSE"}));
        disconnected.wait_for(|d| *d).await.unwrap();

        conn.close();
        transport.close().await.unwrap();
    }
}
