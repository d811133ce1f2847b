#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use wakewatch_kernel_contracts::ph1alert::{AlertPayload, WakeNotice};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("{provider} answered http {status}")]
    HttpStatus { provider: &'static str, status: u16 },
    #[error("{provider} transport failure: {kind}")]
    Transport {
        provider: &'static str,
        kind: &'static str,
    },
    #[error("{provider} rejected the message: {description}")]
    Rejected {
        provider: &'static str,
        description: String,
    },
    #[error("{provider} is not configured: {reason}")]
    NotConfigured {
        provider: &'static str,
        reason: &'static str,
    },
}

impl DeliveryError {
    /// Transport failures and 5xx/429 are worth another attempt; the rest are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            DeliveryError::Transport { .. } => true,
            DeliveryError::Rejected { .. } | DeliveryError::NotConfigured { .. } => false,
        }
    }
}

/// Outbound messaging collaborator. Calls block; callers run them off the sample path.
pub trait MessagingProvider: Send + Sync {
    fn provider_ref(&self) -> &'static str;
    fn send_alert(&self, alert: &AlertPayload) -> Result<(), DeliveryError>;
    fn send_wake(&self, notice: &WakeNotice) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramConfig {
    pub api_base: String,
    pub bot_token: String,
    pub chat_id: String,
    pub timeout_ms: u32,
}

impl TelegramConfig {
    pub fn mvp_v1(bot_token: String, chat_id: String) -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            bot_token,
            chat_id,
            timeout_ms: 5_000,
        }
    }
}

pub struct TelegramBotProvider {
    config: TelegramConfig,
    agent: ureq::Agent,
}

impl TelegramBotProvider {
    const PROVIDER: &'static str = "telegram";

    pub fn new(config: TelegramConfig) -> Result<Self, DeliveryError> {
        if config.bot_token.trim().is_empty() {
            return Err(DeliveryError::NotConfigured {
                provider: Self::PROVIDER,
                reason: "bot token is empty",
            });
        }
        if config.chat_id.trim().is_empty() {
            return Err(DeliveryError::NotConfigured {
                provider: Self::PROVIDER,
                reason: "chat id is empty",
            });
        }
        let timeout = Duration::from_millis(u64::from(config.timeout_ms).max(100));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent("wakewatch/0.1")
            .try_proxy_from_env(false)
            .build();
        Ok(Self { config, agent })
    }

    fn send_message(&self, text: &str) -> Result<(), DeliveryError> {
        let endpoint = format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token
        );
        let payload = json!({
            "chat_id": self.config.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        let response = self
            .agent
            .post(&endpoint)
            .set("Content-Type", "application/json")
            .send_json(payload)
            .map_err(delivery_error_from_ureq)?;
        let body: Value = serde_json::from_reader(response.into_reader()).map_err(|_| {
            DeliveryError::Rejected {
                provider: Self::PROVIDER,
                description: "unparseable response body".to_string(),
            }
        })?;
        if body.get("ok").and_then(Value::as_bool) == Some(true) {
            Ok(())
        } else {
            Err(DeliveryError::Rejected {
                provider: Self::PROVIDER,
                description: body
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("ok=false")
                    .to_string(),
            })
        }
    }
}

impl MessagingProvider for TelegramBotProvider {
    fn provider_ref(&self) -> &'static str {
        Self::PROVIDER
    }

    fn send_alert(&self, alert: &AlertPayload) -> Result<(), DeliveryError> {
        self.send_message(&render_alert_text(alert))
    }

    fn send_wake(&self, notice: &WakeNotice) -> Result<(), DeliveryError> {
        self.send_message(&notice.text)
    }
}

pub fn render_alert_text(alert: &AlertPayload) -> String {
    let mut text = format!(
        "{}\nSession {}\nWatch: {}\nVote: {}",
        alert.text, alert.session_id, alert.monitor_link, alert.vote_link
    );
    if let Some(image) = &alert.image_ref {
        text.push_str("\nSnapshot: ");
        text.push_str(image);
    }
    text
}

fn delivery_error_from_ureq(err: ureq::Error) -> DeliveryError {
    match err {
        ureq::Error::Status(status, _) => DeliveryError::HttpStatus {
            provider: TelegramBotProvider::PROVIDER,
            status,
        },
        ureq::Error::Transport(transport) => DeliveryError::Transport {
            provider: TelegramBotProvider::PROVIDER,
            kind: classify_transport_error_kind(&format!("{:?} {}", transport.kind(), transport)),
        },
    }
}

fn classify_transport_error_kind(raw: &str) -> &'static str {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        "timeout"
    } else if lower.contains("tls") || lower.contains("ssl") {
        "tls"
    } else if lower.contains("dns") {
        "dns"
    } else if lower.contains("connect") {
        "connection"
    } else {
        "transport"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Alert(AlertPayload),
    Wake(WakeNotice),
}

/// Keeps every message in memory. Optionally fails the first `fail_first` sends.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMessagingProvider {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    remaining_failures: Arc<Mutex<u32>>,
}

impl InMemoryMessagingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(fail_first: u32) -> Self {
        Self {
            sent: Arc::default(),
            remaining_failures: Arc::new(Mutex::new(fail_first)),
        }
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    fn push(&self, message: OutboundMessage) -> Result<(), DeliveryError> {
        if let Ok(mut remaining) = self.remaining_failures.lock() {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DeliveryError::Transport {
                    provider: "in_memory",
                    kind: "connection",
                });
            }
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message);
        }
        Ok(())
    }
}

impl MessagingProvider for InMemoryMessagingProvider {
    fn provider_ref(&self) -> &'static str {
        "in_memory"
    }

    fn send_alert(&self, alert: &AlertPayload) -> Result<(), DeliveryError> {
        self.push(OutboundMessage::Alert(alert.clone()))
    }

    fn send_wake(&self, notice: &WakeNotice) -> Result<(), DeliveryError> {
        self.push(OutboundMessage::Wake(notice.clone()))
    }
}
