#![forbid(unsafe_code)]

pub mod actuator;
pub mod ph1sess;
pub mod timers;
