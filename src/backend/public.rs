//! Wire types exchanged with the chat service
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::chat::models::Message;

static DOTTED_VERSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.(\d)").unwrap());
static LETTER_DIGIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)([a-z])(\d)").unwrap());
static LLAMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)llama").unwrap());
static SMOLLM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)smollm").unwrap());
static SIZE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[:\-_](\d+[bB])").unwrap());

/// Label shown when the service doesn't say which model it runs.
pub const GENERIC_MODEL_LABEL: &str = "AI Assistant";

/// Body of a chat request. `messages` is the transcript as it was
/// before `message` was added.
#[derive(Serialize, Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    pub messages: Vec<Message>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct HealthResponse {
    #[serde(default)]
    pub model_info: Option<ModelInfo>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub model: String,
    #[serde(default)]
    pub context_window: Option<u64>,
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub parameters: Option<String>,
}

impl ModelInfo {
    /// Human friendly model name, e.g. `ai/llama3.2:1B-Q8_0` becomes
    /// `Llama 3 2`.
    pub fn display_name(&self) -> String {
        if self.model.is_empty() {
            return "AI Model".to_string();
        }
        let mut name = self.model.as_str();
        if let Some((_, tail)) = name.rsplit_once('/') {
            name = tail;
        }
        if let Some((head, _)) = name.split_once(':') {
            name = head;
        }

        let name = DOTTED_VERSION.replace_all(name, " $1");
        let name = LETTER_DIGIT.replace_all(&name, "$1 $2");
        let name = LLAMA.replace(&name, "Llama");
        SMOLLM.replace(&name, "SmolLM").into_owned()
    }

    /// Parameter size such as `7B` when the model name carries one.
    pub fn size_label(&self) -> Option<String> {
        SIZE.captures(&self.model)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_uppercase())
    }

    pub fn is_llama_cpp(&self) -> bool {
        self.model_type.as_deref() == Some("llama.cpp")
            || self.model.to_lowercase().contains("llama")
    }
}

/// Label for the model, falling back to a generic one.
pub fn model_label(info: Option<&ModelInfo>) -> String {
    match info {
        Some(info) => match info.size_label() {
            Some(size) => format!("{} ({})", info.display_name(), size),
            None => info.display_name(),
        },
        None => GENERIC_MODEL_LABEL.to_string(),
    }
}

/// Per message metrics sent to the metrics log endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MessageMetricsEvent {
    pub message_id: String,
    pub tokens_in: usize,
    pub tokens_out: usize,
    pub response_time_ms: f64,
    pub time_to_first_token_ms: f64,
}

/// A failed send, sent to the error log endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    pub error_type: String,
    pub status_code: u16,
    pub input_length: usize,
    pub timestamp: String,
}

/// Aggregate server side counters.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsSummary {
    pub total_requests: u64,
    /// Seconds
    pub average_response_time: f64,
    pub tokens_generated: u64,
    pub tokens_processed: Option<u64>,
    pub active_users: u64,
    pub error_rate: f64,
    pub llama_cpp_metrics: Option<LlamaCppMetrics>,
}

impl MetricsSummary {
    pub fn is_error_rate_high(&self) -> bool {
        self.error_rate > 0.05
    }
}

/// Runtime figures reported when the service runs on llama.cpp.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LlamaCppMetrics {
    pub context_size: u64,
    /// Milliseconds
    pub prompt_eval_time: f64,
    pub tokens_per_second: f64,
    /// Bytes
    pub memory_per_token: f64,
    pub threads_used: u32,
    pub batch_size: u32,
    pub model_type: String,
}

impl LlamaCppMetrics {
    pub fn memory_efficiency(&self) -> &'static str {
        const MIB: f64 = 1024.0 * 1024.0;
        match self.memory_per_token {
            m if m <= MIB => "Excellent",
            m if m <= 2.0 * MIB => "Good",
            m if m <= 4.0 * MIB => "Fair",
            _ => "Poor",
        }
    }

    pub fn thread_utilization(&self) -> &'static str {
        match self.threads_used {
            0..=2 => "Low",
            3..=8 => "Moderate",
            9..=16 => "High",
            _ => "Very High",
        }
    }
}
