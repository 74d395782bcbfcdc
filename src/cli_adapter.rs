use crate::coordinator::ChatSurface;
use crate::types::{IncomingMessage, OutgoingMessage};
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing::warn;

const DEFAULT_CONVERSATION_ID: &str = "cli";
const QUIT_COMMANDS: [&str; 2] = ["/quit", "/exit"];

/// `thread:<id> <text>` addresses a separate session; anything else goes to
/// the main conversation.
pub fn parse_input(line: &str) -> Result<IncomingMessage> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        bail!("empty input");
    }

    if let Some(rest) = trimmed.strip_prefix("thread:") {
        let rest = rest.trim_start();
        let mut parts = rest.splitn(2, char::is_whitespace);
        let thread_id = parts
            .next()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("thread id is required after thread:"))?;
        let text = parts
            .next()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("message text is required after thread id"))?;
        return Ok(IncomingMessage {
            text,
            conversation_id: DEFAULT_CONVERSATION_ID.to_string(),
            thread_id: Some(thread_id),
        });
    }

    Ok(IncomingMessage {
        text: trimmed.to_string(),
        conversation_id: DEFAULT_CONVERSATION_ID.to_string(),
        thread_id: None,
    })
}

pub fn pretty_outgoing(message: &OutgoingMessage) -> Result<String> {
    let json = serde_json::to_string_pretty(message)?;
    Ok(json)
}

pub fn render_outgoing(message: &OutgoingMessage) -> String {
    let author = message.author.as_deref().unwrap_or("🛒 Seller");
    match &message.thread_id {
        Some(thread) => format!("── {author} [{thread}] ──\n{}\n", message.text),
        None => format!("── {author} ──\n{}\n", message.text),
    }
}

/// Terminal surface: reads stdin lines, prints bot output to stdout.
pub struct CliAdapter {
    rx: mpsc::UnboundedReceiver<IncomingMessage>,
    json: bool,
}

impl CliAdapter {
    pub fn spawn(json: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        warn!("cli: failed to read stdin: {err}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                if QUIT_COMMANDS.contains(&line.trim()) {
                    break;
                }
                match parse_input(&line) {
                    Ok(msg) => {
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(err) => eprintln!("{err}"),
                }
            }
        });
        Self { rx, json }
    }
}

#[async_trait]
impl ChatSurface for CliAdapter {
    async fn recv(&mut self) -> Option<IncomingMessage> {
        print!("> ");
        let _ = std::io::stdout().flush();
        self.rx.recv().await
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        let rendered = if self.json {
            pretty_outgoing(message)?
        } else {
            render_outgoing(message)
        };
        println!("{rendered}");
        Ok(())
    }
}
