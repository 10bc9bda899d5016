//! String aliases used across the protocol layer.
//!
//! The `*Const` variants are the `&'static str` forms used for well known values.

pub type AppId = String;
pub type AppIdConst = &'static str;

/// Source or destination of a message: `sender-0`, `receiver-0`, a session's
/// transport id, or the broadcast id `*`.
pub type EndpointId = String;
pub type EndpointIdConst = &'static str;

pub type MessageType = String;
pub type MessageTypeConst = &'static str;

pub type Namespace = String;
pub type NamespaceConst = &'static str;

/// Receiver-assigned id of a running application instance.
pub type SessionId = String;

/// Media-receiver-assigned id of the current media item session.
pub type MediaSessionId = i32;

pub const ENDPOINT_BROADCAST: EndpointIdConst = "*";

pub const DEFAULT_SENDER_ID: EndpointIdConst = "sender-0";
pub const DEFAULT_RECEIVER_ID: EndpointIdConst = "receiver-0";

/// Well known cast receiver app IDs.
pub mod app {
    use super::AppIdConst;

    pub const DEFAULT_MEDIA_RECEIVER: AppIdConst = "CC1AD845";
    pub const BACKDROP: AppIdConst = "E8C28D3C";
    pub const YOUTUBE: AppIdConst = "233637DE";
}
