//! HTTP endpoint handlers.

pub mod publish;
pub mod system;
