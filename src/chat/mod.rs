//! Chat module for the VaaniAI server
//!
//! Sessions, the usage meter, and the pipeline that turns a user message
//! into a stored reply.

pub mod active;
pub mod handlers;
pub mod pipeline;
pub mod sessions;
pub mod usage;

pub use pipeline::{MessagePipeline, SendOutcome, SendRequest, SendState};
pub use sessions::SessionStore;
pub use usage::{GuestCounter, Usage, UsageMeter};
