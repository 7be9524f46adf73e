pub mod connection;
pub mod dispatcher;

pub use dispatcher::{Broadcast, Dispatcher};
