use crate::types::{EndpointId, DEFAULT_RECEIVER_ID, DEFAULT_SENDER_ID};
use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

pub const DEFAULT_PORT: u16 = 8009;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Connection parameters for a `Platform`.
#[derive(Clone, Debug)]
pub struct Config {
    pub addr: SocketAddr,

    /// `EndpointId` used as the sender, and source of device-level messages we send.
    ///
    /// Set `None` for the default, or `Some(a)` will override it.
    pub sender: Option<EndpointId>,

    /// Interval between heartbeat PINGs. A missing PONG after 3 intervals is fatal.
    pub heartbeat_interval: Duration,

    /// Deadline for each request the Platform makes. `None` waits for as long as the
    /// connection is alive.
    pub request_timeout: Option<Duration>,
}

impl Config {
    pub fn new(addr: SocketAddr) -> Config {
        Config {
            addr,
            sender: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            request_timeout: None,
        }
    }

    /// Uses `DEFAULT_PORT`.
    pub fn from_ip(ip: IpAddr) -> Config {
        Config::new(SocketAddr::new(ip, DEFAULT_PORT))
    }

    pub fn with_sender(mut self, sender: impl Into<EndpointId>) -> Config {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Config {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Config {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn sender(&self) -> EndpointId {
        self.sender.as_ref()
            .cloned()
            .unwrap_or_else(|| DEFAULT_SENDER_ID.to_string())
    }

    pub fn receiver(&self) -> EndpointId {
        DEFAULT_RECEIVER_ID.to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn defaults() {
        let config = Config::from_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)));

        assert_eq!(config.addr.port(), 8009);
        assert_eq!(config.sender(), "sender-0");
        assert_eq!(config.receiver(), "receiver-0");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.request_timeout, None);
    }

    #[test]
    fn builder_overrides() {
        let config = Config::from_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_sender("sender-7")
            .with_request_timeout(Duration::from_secs(2));

        assert_eq!(config.sender(), "sender-7");
        assert_eq!(config.request_timeout, Some(Duration::from_secs(2)));
    }
}
