#[macro_use]
pub mod named;
pub use named::named;

pub mod fmt;
pub mod rustls;
