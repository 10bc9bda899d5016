use crate::types::{EndpointId, Namespace, ENDPOINT_BROADCAST};
use std::fmt::Debug;

#[derive(Clone, Eq, PartialEq)]
pub enum CastMessagePayload {
    String(String),
    Binary(Vec<u8>),
}

/// Messages that are exchanged between Receiver and Sender.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CastMessage {
    /// A namespace is a labeled protocol. That is, messages that are exchanged throughout the
    /// Cast ecosystem utilize namespaces to identify the protocol of the message being sent.
    pub namespace: Namespace,

    /// Unique identifier of the endpoint that sent the message.
    pub source: EndpointId,

    /// Unique identifier of the endpoint the message is addressed to, or `*`.
    pub destination: EndpointId,

    /// Payload data attached to the message (either string or binary).
    pub payload: CastMessagePayload,
}

impl CastMessage {
    pub fn is_broadcast(&self) -> bool {
        self.destination == ENDPOINT_BROADCAST
    }
}

impl CastMessagePayload {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CastMessagePayload::String(s) => Some(s.as_str()),
            CastMessagePayload::Binary(_) => None,
        }
    }
}

impl From<String> for CastMessagePayload {
    fn from(s: String) -> CastMessagePayload {
        Self::String(s)
    }
}

impl From<Vec<u8>> for CastMessagePayload {
    fn from(b: Vec<u8>) -> CastMessagePayload {
        Self::Binary(b)
    }
}

impl Debug for CastMessagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CastMessagePayload::String(s) => {
                f.debug_struct("CastMessagePayload::String")
                 .field("len", &s.len())
                 .finish_non_exhaustive()?;
            },
            CastMessagePayload::Binary(v) => {
                f.debug_struct("CastMessagePayload::Binary")
                 .field("len", &v.len())
                 .finish_non_exhaustive()?;
            },
        }

        Ok(())
    }
}
