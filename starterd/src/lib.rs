#![deny(clippy::as_conversions)]

pub mod executable;
mod node;
pub mod setup;
mod task;

pub use node::*;
