pub mod auth;
pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod media;
pub mod messenger;

pub use error::ChatError;
