pub mod config;
pub mod error;
pub mod stream;
pub mod trace;

pub use config::Config;
pub use error::{AdapterError, AdapterResult, Error, Result};
pub use stream::{BoxStream, StreamEvent, Usage};
pub use trace::TraceEvent;
