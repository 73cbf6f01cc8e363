pub mod coordinator;
mod error;
pub mod intake;
pub mod observer;
pub mod probe;
pub mod registry;
pub mod report;
pub mod settings;

pub use error::{Error, Result};
