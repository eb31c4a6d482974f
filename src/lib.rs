pub mod assets;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod fields;
pub mod form;
pub mod graph;
pub mod inputs;
pub mod outputs;
pub mod queue;
pub mod submit;
pub mod workflow;

pub use error::{Error, Result};
pub use workflow::Workflow;
