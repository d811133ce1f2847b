#![forbid(unsafe_code)]

use url::Url;
use wakewatch_kernel_contracts::ph1alert::{AlertDecision, AlertPayload, SessionLinks, WakeNotice};
use wakewatch_kernel_contracts::ph1dwell::DwellTransition;
use wakewatch_kernel_contracts::ph1sess::SessionId;
use wakewatch_kernel_contracts::MonotonicTimeNs;

use crate::token::TokenSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ph1AlertConfig {
    pub cooldown_ms: u64,
    pub public_base_url: String,
}

impl Ph1AlertConfig {
    pub fn mvp_v1() -> Self {
        Self {
            cooldown_ms: 30_000,
            public_base_url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkBaseError {
    #[error("public base url is not a valid url: {0}")]
    Parse(#[from] url::ParseError),
    #[error("public base url cannot carry a path: {0}")]
    CannotBeABase(String),
}

/// Notification gate: rate-limits alerts and mints the links they carry.
#[derive(Debug, Clone)]
pub struct Ph1AlertRuntime {
    config: Ph1AlertConfig,
    base: Url,
    last_sent_at: Option<MonotonicTimeNs>,
}

impl Ph1AlertRuntime {
    pub fn new(config: Ph1AlertConfig) -> Result<Self, LinkBaseError> {
        let base = Url::parse(&config.public_base_url)?;
        if base.cannot_be_a_base() {
            return Err(LinkBaseError::CannotBeABase(config.public_base_url));
        }
        Ok(Self {
            config,
            base,
            last_sent_at: None,
        })
    }

    pub fn last_sent_at(&self) -> Option<MonotonicTimeNs> {
        self.last_sent_at
    }

    /// Cooldown runs from the last alert actually sent; suppressed attempts do not extend it.
    pub fn on_drowsy(
        &mut self,
        now: MonotonicTimeNs,
        session_id: SessionId,
        transition: &DwellTransition,
        image_ref: Option<String>,
        tokens: &mut dyn TokenSource,
    ) -> AlertDecision {
        let links = self.mint_links(session_id, tokens);
        if let Some(last) = self.last_sent_at {
            let elapsed = now.ms_since(last);
            if elapsed < self.config.cooldown_ms {
                return AlertDecision::Suppressed {
                    remaining_ms: self.config.cooldown_ms - elapsed,
                    links,
                };
            }
        }
        self.last_sent_at = Some(now);
        let secs = transition.dwell_ms as f64 / 1000.0;
        AlertDecision::Sent(AlertPayload {
            session_id,
            text: format!(
                "Drowsiness alert: drowsy for {secs:.1}s (confidence {:.2}). Watch the live view or vote on a wake-up message.",
                transition.confidence
            ),
            image_ref,
            monitor_link: links.monitor_link,
            vote_link: links.vote_link,
            confirmed_duration_ms: transition.dwell_ms,
            confidence: transition.confidence,
        })
    }

    pub fn mint_links(&self, session_id: SessionId, tokens: &mut dyn TokenSource) -> SessionLinks {
        let view = tokens.mint("view");
        let ballot = tokens.mint("ballot");
        SessionLinks {
            monitor_link: self.link("monitor", session_id, "view", &view),
            vote_link: self.link("vote", session_id, "ballot", &ballot),
        }
    }

    pub fn wake_notice(&self, session_id: SessionId, winning_text: Option<String>) -> WakeNotice {
        let text = match winning_text.as_deref() {
            Some(t) => format!("Awake again. The winning wake-up was: \"{t}\""),
            None => "Awake again. No wake-up was chosen this time.".to_string(),
        };
        WakeNotice {
            session_id,
            winning_text,
            text,
        }
    }

    fn link(&self, page: &str, session_id: SessionId, nonce_key: &str, nonce: &str) -> String {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(page);
        }
        url.query_pairs_mut()
            .append_pair("session", &session_id.0.to_string())
            .append_pair(nonce_key, nonce);
        url.into()
    }
}
