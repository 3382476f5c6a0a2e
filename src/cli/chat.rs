use std::io::{self, Write};

use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use super::history::render_transcript;
use super::info::render_summary;
use super::open_session;
use crate::backend::model_label;
use crate::chat::{AssembledReply, ChatSession, Role, TranscriptEvent};
use crate::core::{ClientContext, SendError};
use crate::metrics::{MessageMetricsRecord, SummaryPoller};

const HELP: &str = "\
/clear    start over with an empty transcript
/totals   show tokens sent and received this session
/metrics  show or hide the service usage summary
/theme    switch between dark and light colors
/history  print the transcript
/quit     leave the chat
Ctrl-C while a reply streams stops it.";

#[derive(Debug, PartialEq, Eq)]
enum SlashCommand {
    Clear,
    Totals,
    Metrics,
    Theme,
    History,
    Help,
    Quit,
    Unknown(String),
}

impl SlashCommand {
    fn parse(line: &str) -> Option<Self> {
        let name = line.strip_prefix('/')?.split_whitespace().next().unwrap_or("");
        let cmd = match name {
            "clear" => Self::Clear,
            "totals" => Self::Totals,
            "metrics" => Self::Metrics,
            "theme" => Self::Theme,
            "history" => Self::History,
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => Self::Unknown(other.to_string()),
        };
        Some(cmd)
    }
}

/// ANSI colors for the current display preference.
struct Theme {
    dark: bool,
}

impl Theme {
    fn new(dark: bool) -> Self {
        Self { dark }
    }

    fn accent(&self, text: &str) -> String {
        let code = if self.dark { "96" } else { "34" };
        format!("\x1b[{}m{}\x1b[0m", code, text)
    }

    fn dim(&self, text: &str) -> String {
        let code = if self.dark { "90" } else { "2" };
        format!("\x1b[{}m{}\x1b[0m", code, text)
    }

    fn error(&self, text: &str) -> String {
        format!("\x1b[31m{}\x1b[0m", text)
    }
}

/// Writes assistant content as it grows, printing only what is new
/// since the last update of the same entry.
pub(crate) struct StreamPrinter<W: Write> {
    out: W,
    current: Option<String>,
    printed: usize,
}

impl<W: Write> StreamPrinter<W> {
    pub(crate) fn new(out: W) -> Self {
        Self {
            out,
            current: None,
            printed: 0,
        }
    }

    pub(crate) fn show(&mut self, event: &TranscriptEvent) -> io::Result<()> {
        let TranscriptEvent::Updated(msg) = event else {
            return Ok(());
        };
        if msg.role != Role::Assistant {
            return Ok(());
        }
        if self.current.as_deref() != Some(msg.id.as_str()) {
            self.current = Some(msg.id.clone());
            self.printed = 0;
        }
        if let Some(suffix) = msg.content.get(self.printed..) {
            write!(self.out, "{}", suffix)?;
            self.out.flush()?;
        }
        self.printed = msg.content.len();
        Ok(())
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

/// Sends `line` and prints the reply to stdout while it streams.
/// Ctrl-C cancels the send instead of killing the process.
pub(crate) async fn send_and_print(
    session: &mut ChatSession,
    line: &str,
) -> Result<AssembledReply, SendError> {
    let cancel = session.cancel_handle();
    let mut events = session.subscribe();
    let mut printer = StreamPrinter::new(io::stdout());

    let result = {
        let send = session.send(line);
        tokio::pin!(send);
        loop {
            tokio::select! {
                result = &mut send => break result,
                Some(event) = events.recv() => {
                    if let Err(e) = printer.show(&event) {
                        tracing::warn!("Failed to print reply: {}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::debug!("Interrupt received, cancelling send");
                    cancel.cancel();
                }
            }
        }
    };
    while let Ok(event) = events.try_recv() {
        if let Err(e) = printer.show(&event) {
            tracing::warn!("Failed to print reply: {}", e);
        }
    }
    println!();
    result
}

fn render_record(record: &MessageMetricsRecord) -> String {
    format!(
        "{} tokens in, {} out, first token {:.0} ms, total {:.0} ms",
        record.tokens_in,
        record.tokens_out,
        record.first_token_ms(),
        record.response_ms()
    )
}

fn last_user_record(session: &ChatSession) -> Option<&MessageMetricsRecord> {
    let user = session
        .messages()
        .iter()
        .rev()
        .find(|m| m.role == Role::User)?;
    session.metrics_for(&user.id)
}

async fn show_summary(poller: &SummaryPoller, ctx: &ClientContext, theme: &Theme) {
    match poller.wait_for_summary(ctx.config.connect_timeout).await {
        Some(summary) => println!("{}", theme.dim(&render_summary(&summary))),
        None => println!("{}", theme.dim("Metrics are not available yet")),
    }
}

pub async fn run(ctx: &mut ClientContext) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let mut session = open_session(ctx).await?;
    let mut poller = SummaryPoller::new(session.api().clone(), ctx.config.metrics_poll_interval);

    let model = match session.api().model_info().await {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!("Could not fetch model info: {}", e);
            None
        }
    };
    println!(
        "Chatting with {}. Type /help for commands.",
        model_label(model.as_ref())
    );
    if !session.messages().is_empty() {
        println!(
            "Restored {} messages, /history prints them.",
            session.messages().len()
        );
    }

    loop {
        let theme = Theme::new(ctx.preferences.dark_mode);
        let readline = rl.readline(&theme.accent(">>> "));
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Err(e) = rl.add_history_entry(line) {
                    tracing::debug!("Failed to record line history: {}", e);
                }

                if let Some(cmd) = SlashCommand::parse(line) {
                    match cmd {
                        SlashCommand::Clear => {
                            session.clear().await;
                            println!("Transcript cleared");
                        }
                        SlashCommand::Totals => {
                            let totals = session.session_totals();
                            println!(
                                "{}",
                                theme.dim(&format!(
                                    "Session: ~{} tokens in, ~{} tokens out",
                                    totals.tokens_in, totals.tokens_out
                                ))
                            );
                        }
                        SlashCommand::Metrics => {
                            if poller.toggle() {
                                show_summary(&poller, ctx, &theme).await;
                            } else {
                                println!("Metrics hidden");
                            }
                        }
                        SlashCommand::Theme => {
                            match ctx.preferences.toggle_dark_mode(&ctx.db).await {
                                Ok(true) => println!("Dark mode on"),
                                Ok(false) => println!("Dark mode off"),
                                Err(e) => tracing::warn!("Failed to save theme: {}", e),
                            }
                        }
                        SlashCommand::History => {
                            println!("{}", render_transcript(session.messages()));
                        }
                        SlashCommand::Help => println!("{}", HELP),
                        SlashCommand::Quit => break,
                        SlashCommand::Unknown(name) => {
                            println!("Unknown command /{}, try /help", name);
                        }
                    }
                    continue;
                }

                match send_and_print(&mut session, line).await {
                    Ok(_) => {
                        if let Some(record) = last_user_record(&session) {
                            println!("{}", theme.dim(&render_record(record)));
                        }
                    }
                    Err(SendError::Cancelled) => println!("{}", theme.dim("(stopped)")),
                    Err(_) => {
                        if let Some(msg) = session.error() {
                            eprintln!("{}", theme.error(msg));
                        }
                    }
                }
                if poller.is_visible() {
                    if let Some(summary) = poller.latest() {
                        println!("{}", theme.dim(&render_summary(&summary)));
                    }
                }
            }
            Err(ReadlineError::Interrupted) => break,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }

    poller.hide();
    session.flush_telemetry().await;
    Ok(())
}
