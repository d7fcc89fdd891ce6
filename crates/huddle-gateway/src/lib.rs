pub mod connection;
pub mod hub;
pub mod pipeline;

pub use hub::{ConnId, Hub, Identity};
pub use pipeline::{OutgoingMessage, Pipeline, PipelineError};
