#![forbid(unsafe_code)]

pub mod common;
pub mod ph1alert;
pub mod ph1dwell;
pub mod ph1grant;
pub mod ph1j;
pub mod ph1sess;
pub mod ph1vote;

pub use common::{
    ms_to_ns, ContractViolation, MonotonicTimeNs, ReasonCodeId, SchemaVersion, Validate,
};
