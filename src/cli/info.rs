use anyhow::Result;

use crate::backend::{ChatApi, LlamaCppMetrics, MetricsSummary, model_label};
use crate::core::ClientContext;

fn format_memory_size(bytes: f64) -> String {
    const KIB: f64 = 1024.0;
    match bytes {
        b if b < KIB => format!("{} B", b),
        b if b < KIB * KIB => format!("{:.2} KB", b / KIB),
        b if b < KIB * KIB * KIB => format!("{:.2} MB", b / (KIB * KIB)),
        b => format!("{:.2} GB", b / (KIB * KIB * KIB)),
    }
}

fn render_llama_cpp(llama: &LlamaCppMetrics) -> Vec<String> {
    vec![
        "llama.cpp:".to_string(),
        format!("  Tokens/sec: {:.2}", llama.tokens_per_second),
        format!("  Prompt eval: {:.0} ms", llama.prompt_eval_time),
        format!("  Context size: {} tokens", llama.context_size),
        format!(
            "  Memory per token: {} ({})",
            format_memory_size(llama.memory_per_token),
            llama.memory_efficiency()
        ),
        format!(
            "  Threads: {} ({})",
            llama.threads_used,
            llama.thread_utilization()
        ),
        format!("  Batch size: {}", llama.batch_size),
    ]
}

pub(crate) fn render_summary(summary: &MetricsSummary) -> String {
    let mut lines = vec![
        format!("Requests: {}", summary.total_requests),
        format!("Avg response: {:.2}s", summary.average_response_time),
        format!("Tokens generated: {}", summary.tokens_generated),
    ];
    if let Some(processed) = summary.tokens_processed {
        lines.push(format!("Tokens processed: {}", processed));
    }
    lines.push(format!("Active users: {}", summary.active_users));

    let mut error_rate = format!("Error rate: {:.1}%", summary.error_rate * 100.0);
    if summary.is_error_rate_high() {
        error_rate.push_str(" (high)");
    }
    lines.push(error_rate);

    if let Some(llama) = &summary.llama_cpp_metrics {
        lines.extend(render_llama_cpp(llama));
    }
    lines.join("\n")
}

/// Everything the service is willing to say about itself. Neither a
/// failed health check nor a missing summary is fatal.
pub(crate) async fn describe(api: &ChatApi) -> String {
    let mut lines = vec![format!("Service: {}", api.base_url())];

    let info = match api.model_info().await {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!("Could not fetch model info: {}", e);
            None
        }
    };
    lines.push(format!("Model: {}", model_label(info.as_ref())));
    if let Some(info) = &info {
        if let Some(window) = info.context_window {
            lines.push(format!("Context window: {} tokens", window));
        }
        if info.is_llama_cpp() {
            lines.push("Runtime: llama.cpp".to_string());
        }
    }

    match api.metrics_summary().await {
        Ok(summary) => lines.push(render_summary(&summary)),
        Err(e) => tracing::warn!("Metrics summary unavailable: {}", e),
    }
    lines.join("\n")
}

pub async fn run(ctx: &ClientContext) -> Result<()> {
    let api = ChatApi::from_config(&ctx.config)?;
    println!("{}", describe(&api).await);
    Ok(())
}
