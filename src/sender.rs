use crate::{
    channel::ChannelKey,
    types::{EndpointId, NamespaceConst, DEFAULT_RECEIVER_ID, DEFAULT_SENDER_ID},
};
use rand::Rng;
use std::fmt::{self, Display};

/// The (sender, receiver) endpoint pair shared by every controller one logical
/// endpoint opens.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Sender {
    pub sender_id: EndpointId,
    pub receiver_id: EndpointId,
}

impl Sender {
    pub fn new(sender_id: impl Into<EndpointId>, receiver_id: impl Into<EndpointId>) -> Sender {
        Sender {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
        }
    }

    /// `sender-0` to `receiver-0`, the device-level pair.
    pub fn platform() -> Sender {
        Sender::new(DEFAULT_SENDER_ID, DEFAULT_RECEIVER_ID)
    }

    /// A fresh `client-N` sender id talking to `receiver_id`, as used for each
    /// launched application.
    pub fn random(receiver_id: impl Into<EndpointId>) -> Sender {
        let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
        Sender::new(format!("client-{n}"), receiver_id)
    }

    pub fn key(&self, namespace: NamespaceConst) -> ChannelKey {
        ChannelKey::new(self.sender_id.clone(), self.receiver_id.clone(), namespace)
    }
}

impl Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} -> {}", self.sender_id, self.receiver_id)
    }
}
