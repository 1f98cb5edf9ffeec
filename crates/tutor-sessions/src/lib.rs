//! The per-session mutable record: active document/question, active part,
//! content mode, and last-seen timestamp. A single-tenant-per-process design
//! — connecting a new session id evicts every other one (see DESIGN.md).

pub mod registry;

pub use registry::{ConnectMeta, ContentMode, SessionRegistry, SessionSnapshot};
