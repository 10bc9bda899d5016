use crate::types::{AppId, MediaSessionId, MessageType, MessageTypeConst, NamespaceConst,
                   SessionId};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::{
    fmt::{self, Debug, Display},
    sync::atomic::{AtomicI32, Ordering},
};

/// i32 that represents a request_id in the Cast protocol.
///
/// Zero is only used in broadcast responses with no corresponding request.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct RequestId(i32);

/// Per-controller source of request ids.
pub(crate) struct RequestIdGen(AtomicI32);

impl RequestId {
    pub const BROADCAST: RequestId = RequestId(Self::BROADCAST_I32);
    const BROADCAST_I32: i32 = 0;
}

impl RequestIdGen {
    /// Some broadcasts have `request_id` 0, so skip that.
    const INITIAL_I32: i32 = RequestId::BROADCAST_I32 + 1;
}

/// Envelope shared by every JSON message: `{ type, requestId, ...inner }`.
#[skip_serializing_none]
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload<T>
{
    pub request_id: Option<RequestId>,

    #[serde(rename = "type")]
    pub typ: MessageType,

    #[serde(flatten)]
    pub inner: T,
}

/// Body of an outbound message; `TYPE_NAME` is written to the `type` field.
pub trait RequestInner: Debug + Serialize
{
    const TYPE_NAME: MessageTypeConst;
}

pub const USER_AGENT: &str = concat!("cast_session/", env!("CARGO_PKG_VERSION"));

pub const MESSAGE_RESPONSE_TYPE_INVALID_REQUEST: MessageTypeConst = "INVALID_REQUEST";


impl RequestId {
    pub fn inner(self) -> i32 {
        self.0
    }

    fn rpc_id_from(n: i32) -> RequestId {
        let id = RequestId(n);

        if id.is_broadcast() {
            panic!("RequestId::rpc_id_from: was broadcast = {id}");
        }

        id
    }

    /// Reads the `requestId` field of an inbound JSON object.
    ///
    /// Returns `None` when the field is missing, not an i32, or the broadcast id.
    pub fn from_json(value: &serde_json::Value) -> Option<RequestId> {
        let n = value.get("requestId")?.as_i64()?;
        let id = RequestId(i32::try_from(n).ok()?);
        id.is_rpc().then_some(id)
    }

    pub fn is_broadcast(self) -> bool {
        self == RequestId::BROADCAST
    }

    pub fn is_rpc(self) -> bool {
        self != RequestId::BROADCAST
    }
}

impl<T> Payload<T>
where T: RequestInner
{
    pub fn new(request_id: Option<RequestId>, inner: T) -> Payload<T> {
        Payload {
            request_id,
            typ: T::TYPE_NAME.to_string(),
            inner,
        }
    }
}

impl From<RequestId> for i32 {
    fn from(id: RequestId) -> i32 {
        id.0
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl RequestIdGen {
    pub(crate) fn new() -> RequestIdGen {
        RequestIdGen(AtomicI32::new(Self::INITIAL_I32))
    }

    pub(crate) fn take_next(&self) -> RequestId {
        loop {
            let id = self.0.fetch_add(1, Ordering::SeqCst);
            if id == RequestId::BROADCAST_I32 {
                // Receivers use 0 for broadcast messages, take the next value.
                continue;
            }

            return RequestId::rpc_id_from(id);
        }
    }
}

pub mod connection {
    use super::*;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.tp.connection";

    pub const MESSAGE_TYPE_CONNECT: MessageTypeConst = "CONNECT";
    pub const MESSAGE_TYPE_CLOSE: MessageTypeConst = "CLOSE";

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ConnectRequest {
        pub user_agent: String,
    }

    impl RequestInner for ConnectRequest {
        const TYPE_NAME: MessageTypeConst = MESSAGE_TYPE_CONNECT;
    }

    #[derive(Debug, Serialize)]
    pub struct CloseRequest {}

    impl RequestInner for CloseRequest {
        const TYPE_NAME: MessageTypeConst = MESSAGE_TYPE_CLOSE;
    }
}

pub mod heartbeat {
    use super::*;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.tp.heartbeat";

    pub const MESSAGE_TYPE_PING: MessageTypeConst = "PING";
    pub const MESSAGE_TYPE_PONG: MessageTypeConst = "PONG";

    #[derive(Debug, Serialize)]
    pub struct Ping {}

    impl RequestInner for Ping {
        const TYPE_NAME: MessageTypeConst = MESSAGE_TYPE_PING;
    }

    #[derive(Debug, Serialize)]
    pub struct Pong {}

    impl RequestInner for Pong {
        const TYPE_NAME: MessageTypeConst = MESSAGE_TYPE_PONG;
    }
}

pub mod receiver {
    use super::*;
    use std::collections::BTreeMap;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.receiver";

    pub const MESSAGE_REQUEST_TYPE_LAUNCH: MessageTypeConst = "LAUNCH";
    pub const MESSAGE_REQUEST_TYPE_STOP: MessageTypeConst = "STOP";
    pub const MESSAGE_REQUEST_TYPE_GET_STATUS: MessageTypeConst = "GET_STATUS";
    pub const MESSAGE_REQUEST_TYPE_GET_APP_AVAILABILITY: MessageTypeConst
        = "GET_APP_AVAILABILITY";
    pub const MESSAGE_REQUEST_TYPE_SET_VOLUME: MessageTypeConst = "SET_VOLUME";

    pub const MESSAGE_RESPONSE_TYPE_RECEIVER_STATUS: MessageTypeConst = "RECEIVER_STATUS";
    pub const MESSAGE_RESPONSE_TYPE_LAUNCH_ERROR: MessageTypeConst = "LAUNCH_ERROR";

    mod shared {
        use super::*;

        #[derive(Clone, Deserialize, Debug)]
        #[serde(rename_all = "camelCase")]
        pub struct StatusWrapper {
            pub status: Status,
        }

        #[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct Status {
            #[serde(default)]
            pub applications: Vec<Session>,

            #[serde(default)]
            pub is_active_input: bool,

            #[serde(default)]
            pub is_stand_by: bool,

            /// Volume parameters of the currently active cast device.
            #[serde(default)]
            pub volume: Volume,
        }

        /// One application instance running on the receiver.
        ///
        /// `app_id` says what is running; `session_id` and `transport_id` say which
        /// instance, and change every time the app is relaunched.
        #[skip_serializing_none]
        #[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct Session {
            pub app_id: AppId,
            pub session_id: SessionId,
            pub transport_id: String,

            #[serde(default)]
            pub display_name: String,

            #[serde(default)]
            pub namespaces: Vec<AppNamespace>,

            pub status_text: Option<String>,
            pub icon_url: Option<String>,

            #[serde(default)]
            pub is_idle_screen: bool,

            #[serde(default)]
            pub launched_from_cloud: bool,

            pub universal_app_id: Option<String>,
        }

        #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
        pub struct AppNamespace {
            pub name: String,
        }

        /// Structure that describes possible cast device volume options.
        #[skip_serializing_none]
        #[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct Volume {
            /// Volume level.
            pub level: Option<f32>,
            /// Mute/unmute state.
            pub muted: Option<bool>,

            pub control_type: Option<String>,
            pub step_interval: Option<f32>,
        }

        /// A `SET_VOLUME` change.
        ///
        /// The device ignores `muted` when `level` is in the same request, so exactly
        /// one is sent.
        #[derive(Clone, Copy, Debug, PartialEq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub enum VolumeRequest {
            Level(f32),
            Muted(bool),
        }
    }
    pub use self::shared::*;

    pub mod small_debug {
        use crate::util::fmt::DebugInline;
        use super::*;

        pub struct ReceiverStatus<'a>(pub &'a super::Status);
        pub struct Sessions<'a>(pub &'a [super::Session]);
        pub struct Session<'a>(pub &'a super::Session);
        pub struct Volume<'a>(pub &'a super::Volume);

        impl<'a> Debug for ReceiverStatus<'a> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.debug_struct("receiver::Status")
                    .field("applications", &Sessions(&self.0.applications))
                    .field("volume", &Volume(&self.0.volume))
                    .finish()
            }
        }

        impl<'a> Debug for Sessions<'a> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                let mut d = f.debug_list();
                for item in self.0 {
                    d.entry(&Session(item));
                }
                d.finish()
            }
        }

        impl<'a> Debug for Session<'a> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.debug_struct("Session")
                    .field("app_id", &DebugInline(&self.0.app_id))
                    .field("session_id", &self.0.session_id)
                    .field("display_name", &self.0.display_name)
                    .field("status_text", &DebugInline(&format!("{:?}", self.0.status_text)))
                    .finish()
            }
        }

        impl<'a> Debug for Volume<'a> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "Volume {{ level: {level}, muted: {muted} }}",
                       level = match self.0.level {
                           None => "None".to_string(),
                           Some(l) => format!("{l:.2}"),
                       },
                       muted = match self.0.muted {
                           None => "None".to_string(),
                           Some(m) => format!("{m}"),
                       })
            }
        }
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GetStatusRequest {}

    impl RequestInner for GetStatusRequest {
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_GET_STATUS;
    }

    #[derive(Debug, Deserialize)]
    #[serde(tag = "type")]
    pub enum StatusResponse {
        #[serde(rename = "RECEIVER_STATUS")]
        Ok(StatusWrapper),
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GetAppAvailabilityRequest {
        pub app_id: Vec<AppId>,
    }

    impl RequestInner for GetAppAvailabilityRequest {
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_GET_APP_AVAILABILITY;
    }

    /// Map from app id to `APP_AVAILABLE` / `APP_UNAVAILABLE`.
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AppAvailabilityResponse {
        #[serde(default)]
        pub availability: BTreeMap<AppId, String>,
    }

    pub const APP_AVAILABLE: &str = "APP_AVAILABLE";

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LaunchRequest {
        pub app_id: AppId,
    }

    impl RequestInner for LaunchRequest {
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_LAUNCH;
    }

    #[derive(Debug, Deserialize)]
    #[serde(tag = "type")]
    pub enum LaunchResponse {
        #[serde(rename = "RECEIVER_STATUS")]
        Ok(StatusWrapper),

        #[serde(rename = "LAUNCH_ERROR")]
        Error {
            #[serde(default)]
            reason: Option<String>,
        },
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct StopRequest {
        pub session_id: SessionId,
    }

    impl RequestInner for StopRequest {
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_STOP;
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SetVolumeRequest {
        pub volume: VolumeRequest,
    }

    impl RequestInner for SetVolumeRequest {
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_SET_VOLUME;
    }
}

pub mod media {
    use super::*;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.media";

    pub const MESSAGE_REQUEST_TYPE_GET_STATUS: MessageTypeConst = "GET_STATUS";
    pub const MESSAGE_REQUEST_TYPE_LOAD: MessageTypeConst = "LOAD";
    pub const MESSAGE_REQUEST_TYPE_PLAY: MessageTypeConst = "PLAY";
    pub const MESSAGE_REQUEST_TYPE_PAUSE: MessageTypeConst = "PAUSE";
    pub const MESSAGE_REQUEST_TYPE_STOP: MessageTypeConst = "STOP";
    pub const MESSAGE_REQUEST_TYPE_SEEK: MessageTypeConst = "SEEK";

    pub const MESSAGE_RESPONSE_TYPE_MEDIA_STATUS: MessageTypeConst = "MEDIA_STATUS";
    pub const MESSAGE_RESPONSE_TYPE_LOAD_CANCELLED: MessageTypeConst = "LOAD_CANCELLED";
    pub const MESSAGE_RESPONSE_TYPE_LOAD_FAILED: MessageTypeConst = "LOAD_FAILED";
    pub const MESSAGE_RESPONSE_TYPE_INVALID_PLAYER_STATE: MessageTypeConst
        = "INVALID_PLAYER_STATE";

    pub const PLAYER_STATE_PLAYING: &str = "PLAYING";

    pub type TrackId = i32;

    mod shared {
        use super::*;

        #[derive(Clone, Debug, Default, Deserialize, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct Status {
            #[serde(rename = "status", default)]
            pub entries: Vec<StatusEntry>,
        }

        impl Status {
            /// The receiver reports one entry per media session; only the first is used.
            pub fn into_first(self) -> Option<StatusEntry> {
                self.entries.into_iter().next()
            }
        }

        #[skip_serializing_none]
        #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct StatusEntry {
            pub media_session_id: MediaSessionId,

            pub media: Option<Media>,

            pub playback_rate: Option<f32>,

            #[serde(default)]
            pub player_state: String,

            pub idle_reason: Option<String>,
            pub current_time: Option<f64>,
            pub current_item_id: Option<i32>,
            pub supported_media_commands: Option<u32>,
            pub items: Option<Vec<Item>>,
            pub repeat_mode: Option<String>,
            pub active_track_ids: Option<Vec<TrackId>>,
            pub volume: Option<crate::payload::receiver::Volume>,
            pub custom_data: Option<serde_json::Value>,
        }

        impl StatusEntry {
            pub fn is_playing(&self) -> bool {
                self.player_state == PLAYER_STATE_PLAYING
            }

            pub fn metadata(&self) -> Option<&Metadata> {
                self.media.as_ref()?.metadata.as_ref()
            }
        }

        #[skip_serializing_none]
        #[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct Media {
            pub content_id: String,

            pub content_url: Option<String>,

            /// `BUFFERED`, `LIVE` or `NONE`.
            pub stream_type: Option<String>,

            pub content_type: Option<String>,

            pub metadata: Option<Metadata>,

            pub duration: Option<f64>,

            pub custom_data: Option<serde_json::Value>,
        }

        impl Media {
            pub fn from_content_id(content_id: impl Into<String>) -> Media {
                Media {
                    content_id: content_id.into(),
                    ..Media::default()
                }
            }
        }

        #[serde_with::serde_as]
        #[skip_serializing_none]
        #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct Item {
            pub item_id: i32,

            pub media: Option<Media>,

            // `autoplay` is sometimes serialised as a JSON string, like `"false"`.
            // Accept a bool or a string, serialise as a bool.
            #[serde_as(as = "Option<serde_with::PickFirst<(_, serde_with::DisplayFromStr)>>")]
            #[serde(default, rename = "autoplay")]
            pub auto_play: Option<bool>,

            pub custom_data: Option<serde_json::Value>,
        }

        #[skip_serializing_none]
        #[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct Metadata {
            #[serde(default)]
            pub metadata_type: u32,

            pub title: Option<String>,
            pub subtitle: Option<String>,
            pub series_title: Option<String>,
            pub song_name: Option<String>,
            pub album_name: Option<String>,
            pub album_artist: Option<String>,
            pub artist: Option<String>,
            pub composer: Option<String>,

            #[serde(default, skip_serializing_if = "Vec::is_empty")]
            pub images: Vec<Image>,

            pub release_date: Option<String>,
            pub season: Option<u32>,
            pub episode: Option<u32>,
            pub track_number: Option<u32>,
        }

        impl Metadata {
            /// URL of the first image, usually the album or cover art.
            pub fn art_url(&self) -> Option<&str> {
                self.images.first().map(|image| image.url.as_str())
            }
        }

        #[skip_serializing_none]
        #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
        pub struct Image {
            pub url: String,
            pub width: Option<u32>,
            pub height: Option<u32>,
        }

        #[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum RepeatMode {
            #[default]
            RepeatOff,
            RepeatAll,
            RepeatSingle,
            RepeatAllAndShuffle,
        }

        /// Optional `LOAD` parameters; unset fields take the protocol defaults.
        #[derive(Clone, Debug, Default)]
        pub struct LoadOptions {
            /// Default `false`.
            pub autoplay: Option<bool>,

            /// Seconds. Default `0`.
            pub current_time: Option<f64>,

            /// Default empty.
            pub active_track_ids: Option<Vec<TrackId>>,

            /// Default `REPEAT_OFF`.
            pub repeat_mode: Option<RepeatMode>,
        }

        impl LoadOptions {
            pub fn autoplay() -> LoadOptions {
                LoadOptions {
                    autoplay: Some(true),
                    ..LoadOptions::default()
                }
            }
        }

        #[skip_serializing_none]
        #[derive(Debug, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct MediaRequestCommon {
            pub media_session_id: MediaSessionId,
            pub custom_data: Option<serde_json::Value>,
        }

        impl MediaRequestCommon {
            pub fn new(media_session_id: MediaSessionId) -> MediaRequestCommon {
                MediaRequestCommon {
                    media_session_id,
                    custom_data: None,
                }
            }
        }
    }
    pub use self::shared::*;

    pub mod small_debug {
        use crate::util::fmt::{opt_field, DebugInline};
        use super::*;

        pub struct MediaStatusEntry<'a>(pub &'a super::StatusEntry);
        pub struct Media<'a>(pub &'a super::Media);
        pub struct Metadata<'a>(pub &'a super::Metadata);

        impl<'a> Debug for MediaStatusEntry<'a> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                // `DebugInline` is used to override Formatter's `alternate` setting
                // (i.e. using `{:#?}`) to remove unnecessary whitespace.

                f.debug_struct("MediaStatusEntry")
                    .field("player_state", &self.0.player_state)
                    .field("current_time",
                           &DebugInline(&format!("{:?}", &self.0.current_time)))
                    .field("media", &self.0.media.as_ref().map(Media))
                    .field("idle_reason",
                           &DebugInline(&format!("{:?}", &self.0.idle_reason)))
                    .field("media_session_id", &self.0.media_session_id)
                    .finish()
            }
        }

        impl<'a> Debug for Media<'a> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                let mut s = f.debug_struct("Media");
                s.field("content_id", &self.0.content_id);
                opt_field(&mut s, "content_url", &self.0.content_url);
                opt_field(&mut s, "stream_type", &self.0.stream_type);
                opt_field(&mut s, "duration", &self.0.duration);
                s.field("metadata", &self.0.metadata.as_ref().map(Metadata));
                s.finish()
            }
        }

        impl<'a> Debug for Metadata<'a> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                let mut s = f.debug_struct("Metadata");

                opt_field(&mut s, "title", &self.0.title);
                opt_field(&mut s, "artist", &self.0.artist);
                opt_field(&mut s, "album_name", &self.0.album_name);
                opt_field(&mut s, "series_title", &self.0.series_title);
                opt_field(&mut s, "season", &self.0.season);
                opt_field(&mut s, "episode", &self.0.episode);
                opt_field(&mut s, "art_url", &self.0.art_url());

                s.finish()
            }
        }
    }

    #[skip_serializing_none]
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LoadRequest {
        pub media: Media,
        pub autoplay: bool,
        pub current_time: f64,
        pub active_track_ids: Vec<TrackId>,
        pub repeat_mode: RepeatMode,
        pub custom_data: Option<serde_json::Value>,
    }

    impl LoadRequest {
        pub fn new(media: Media, options: LoadOptions) -> LoadRequest {
            LoadRequest {
                media,
                autoplay: options.autoplay.unwrap_or(false),
                current_time: options.current_time.unwrap_or(0.0),
                active_track_ids: options.active_track_ids.unwrap_or_default(),
                repeat_mode: options.repeat_mode.unwrap_or_default(),
                custom_data: None,
            }
        }
    }

    impl RequestInner for LoadRequest {
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_LOAD;
    }

    #[derive(Debug, Deserialize)]
    #[serde(tag = "type")]
    pub enum LoadResponse {
        #[serde(rename = "MEDIA_STATUS")]
        Ok(Status),

        #[serde(rename = "LOAD_CANCELLED")]
        LoadCancelled,

        #[serde(rename = "LOAD_FAILED")]
        LoadFailed,

        #[serde(rename = "INVALID_PLAYER_STATE")]
        InvalidPlayerState,
    }

    #[skip_serializing_none]
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GetStatusRequest {
        pub media_session_id: Option<MediaSessionId>,
    }

    impl RequestInner for GetStatusRequest {
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_GET_STATUS;
    }

    /// Response to `GET_STATUS` and every session-scoped command.
    #[derive(Debug, Deserialize)]
    #[serde(tag = "type")]
    pub enum StatusResponse {
        #[serde(rename = "MEDIA_STATUS")]
        Ok(Status),

        #[serde(rename = "INVALID_PLAYER_STATE")]
        InvalidPlayerState,
    }

    macro_rules! simple_media_request {
        ($name: ident, $msg_type_name: path) => {
            #[derive(Debug, Serialize)]
            pub struct $name(pub MediaRequestCommon);

            impl RequestInner for $name {
                const TYPE_NAME: MessageTypeConst = $msg_type_name;
            }
        };
    }

    simple_media_request!(PlayRequest,  MESSAGE_REQUEST_TYPE_PLAY);
    simple_media_request!(PauseRequest, MESSAGE_REQUEST_TYPE_PAUSE);
    simple_media_request!(StopRequest,  MESSAGE_REQUEST_TYPE_STOP);

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SeekRequest {
        #[serde(flatten)]
        pub common: MediaRequestCommon,

        pub current_time: f64,
    }

    impl RequestInner for SeekRequest {
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_SEEK;
    }
}

/// YouTube "MDX" side channel.
pub mod youtube {
    use super::*;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.youtube.mdx";

    pub const MESSAGE_REQUEST_TYPE_GET_MDX_SESSION_STATUS: MessageTypeConst
        = "getMdxSessionStatus";

    #[derive(Debug, Serialize)]
    pub struct GetMdxSessionStatusRequest {}

    impl RequestInner for GetMdxSessionStatusRequest {
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_GET_MDX_SESSION_STATUS;
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MdxSessionStatus {
        #[serde(default)]
        pub data: Option<MdxSessionData>,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MdxSessionData {
        pub screen_id: Option<String>,
    }
}
