pub mod aio;
pub mod api;
pub mod apm;
pub mod connection;
pub mod pool;

pub use api::{init, instance, Api, Response, ResultType, DEFAULT_BUF_SIZE};
