#![forbid(unsafe_code)]

pub mod persist;
pub mod ph1j;
pub mod recorder;
pub mod repo;
