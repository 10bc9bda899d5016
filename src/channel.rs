//! Logical conversations over one `Transport`, keyed by (source, destination, namespace).

use crate::{
    error::{CastError, Result},
    message::{CastMessage, CastMessagePayload},
    transport::{RouteId, TransportHandle},
    types::{EndpointId, Namespace},
    util::named,
};
use std::{
    fmt::{self, Debug},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::sync::mpsc;

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ChannelKey {
    /// Our endpoint, used as the source of messages we send.
    pub source: EndpointId,

    /// The remote endpoint.
    pub destination: EndpointId,

    pub namespace: Namespace,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Encoding {
    Json,
    Binary,
}

/// Receiving end of a channel, plus a `ChannelSender`.
///
/// Dropping the `Channel` closes it.
pub struct Channel {
    sender: ChannelSender,
    rx: mpsc::UnboundedReceiver<CastMessage>,
}

/// Sending end of a channel. Clones share the channel's closed state.
#[derive(Clone)]
pub struct ChannelSender {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    key: ChannelKey,
    encoding: Encoding,
    transport: TransportHandle,
    route_id: RouteId,
    closed: AtomicBool,
}

impl ChannelKey {
    pub fn new(source: impl Into<EndpointId>,
               destination: impl Into<EndpointId>,
               namespace: impl Into<Namespace>)
    -> ChannelKey
    {
        ChannelKey {
            source: source.into(),
            destination: destination.into(),
            namespace: namespace.into(),
        }
    }

    /// True when `msg` was sent to this channel: same namespace, from our
    /// destination, to our source or to everyone.
    pub fn accepts(&self, msg: &CastMessage) -> bool {
        msg.namespace == self.namespace
            && msg.source == self.destination
            && (msg.destination == self.source || msg.is_broadcast())
    }
}

impl Channel {
    pub fn open(transport: &TransportHandle, key: ChannelKey, encoding: Encoding)
    -> Result<Channel>
    {
        let (route_id, rx) = transport.register(key.clone())?;

        tracing::trace!(target: "cast_session::channel::Channel::open",
                        ?key, ?encoding, route_id,
                        "channel opened");

        Ok(Channel {
            sender: ChannelSender {
                inner: Arc::new(ChannelInner {
                    key,
                    encoding,
                    transport: transport.clone(),
                    route_id,
                    closed: AtomicBool::new(false),
                }),
            },
            rx,
        })
    }

    pub fn sender(&self) -> &ChannelSender {
        &self.sender
    }

    pub fn key(&self) -> &ChannelKey {
        self.sender.key()
    }

    /// Next inbound message, or `None` once the channel or its transport is closed.
    ///
    /// Payloads that don't match the channel's encoding are logged and skipped.
    #[named]
    pub async fn recv(&mut self) -> Option<CastMessage> {
        const METHOD_PATH: &str = method_path!("Channel");

        loop {
            if self.sender.is_closed() {
                return None;
            }

            let msg = self.rx.recv().await?;

            // Checked again: the channel may have closed while we waited.
            if self.sender.is_closed() {
                return None;
            }

            let encoding_ok = match (&msg.payload, self.sender.encoding()) {
                (CastMessagePayload::String(_), Encoding::Json) => true,
                (CastMessagePayload::Binary(_), Encoding::Binary) => true,
                _ => false,
            };

            if !encoding_ok {
                tracing::warn!(target: METHOD_PATH,
                               ?msg,
                               encoding = ?self.sender.encoding(),
                               "payload doesn't match channel encoding");
                continue;
            }

            return Some(msg);
        }
    }

    pub fn close(&self) {
        self.sender.close();
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.sender.close();
    }
}

impl Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Debug::fmt(&self.sender, f)
    }
}

impl ChannelSender {
    pub fn key(&self) -> &ChannelKey {
        &self.inner.key
    }

    pub fn encoding(&self) -> Encoding {
        self.inner.encoding
    }

    /// True once closed locally or once the transport has gone away.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst) || self.inner.transport.is_closed()
    }

    /// Sends `payload` from our source to our destination on our namespace.
    ///
    /// Fails with `ChannelClosed` once the channel is closed.
    #[named]
    pub async fn send(&self, payload: CastMessagePayload) -> Result<()> {
        const METHOD_PATH: &str = method_path!("ChannelSender");

        if self.is_closed() {
            return Err(CastError::ChannelClosed.into());
        }

        match (&payload, self.encoding()) {
            (CastMessagePayload::String(_), Encoding::Json)
            | (CastMessagePayload::Binary(_), Encoding::Binary) => {},
            _ => anyhow::bail!("{METHOD_PATH}: payload doesn't match channel encoding\n\
                                _ key      = {key:#?}\n\
                                _ encoding = {encoding:?}\n\
                                _ payload  = {payload:?}",
                               key = self.key(),
                               encoding = self.encoding()),
        }

        let key = self.key();
        let msg = CastMessage {
            namespace: key.namespace.clone(),
            source: key.source.clone(),
            destination: key.destination.clone(),
            payload,
        };

        self.inner.transport.send(msg).await
    }

    /// Idempotent. Stops delivery and removes the channel's route from the transport.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::trace!(target: "cast_session::channel::ChannelSender::close",
                        key = ?self.inner.key,
                        "channel closed");

        self.inner.transport.unregister(self.inner.route_id);
    }
}

impl Debug for ChannelSender {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Channel")
         .field("key", &self.inner.key)
         .field("encoding", &self.inner.encoding)
         .field("closed", &self.is_closed())
         .finish()
    }
}
