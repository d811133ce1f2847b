#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::ph1sess::SessionId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLinks {
    pub monitor_link: String,
    pub vote_link: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub session_id: SessionId,
    pub text: String,
    pub image_ref: Option<String>,
    pub monitor_link: String,
    pub vote_link: String,
    pub confirmed_duration_ms: u64,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeNotice {
    pub session_id: SessionId,
    pub winning_text: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AlertDecision {
    Sent(AlertPayload),
    /// Inside the cooldown window. Links are still minted so the vote can open.
    Suppressed {
        remaining_ms: u64,
        links: SessionLinks,
    },
}

impl AlertDecision {
    pub fn links(&self) -> SessionLinks {
        match self {
            AlertDecision::Sent(p) => SessionLinks {
                monitor_link: p.monitor_link.clone(),
                vote_link: p.vote_link.clone(),
            },
            AlertDecision::Suppressed { links, .. } => links.clone(),
        }
    }
}
