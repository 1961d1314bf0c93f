//! Small helpers shared by the lifecycle engines.

pub mod json;
pub mod time;
