#![forbid(unsafe_code)]

pub mod ph1alert;
pub mod ph1delivery;
pub mod ph1dwell;
pub mod ph1grant;
pub mod ph1vote;
pub mod token;
