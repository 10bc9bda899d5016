//! One controller per protocol namespace, each built on `Controller` or
//! `RequestResponseController`.

pub mod connection;
pub mod generic;
pub mod heartbeat;
pub mod media;
pub mod receiver;
pub mod youtube;
