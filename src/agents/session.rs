use crate::types::FinalReport;
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info};

/// Words that turn a line containing a number into an analysis request
pub const ANALYSIS_KEYWORDS: [&str; 5] = ["apr", "analyze", "analysis", "report", "metrics"];

pub const NO_RESPONSE: &str = "❌ Sorry, I didn't get a response. Please try again.";

const RULE_WIDTH: usize = 80;

/// What the operator asked for with one line of input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputIntent {
    Exit,
    Empty,
    Analyze {
        request_id: String,
        trigger: AnalysisTrigger,
    },
    Query(String),
}

/// Which rule turned a line into an analysis request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisTrigger {
    /// An analysis keyword next to a standalone number
    Keyword,
    /// The whole line is the number
    BareNumber,
}

static REQUEST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,4})\b").expect("request number pattern is valid"));

pub fn classify_input(line: &str) -> InputIntent {
    let input = line.trim();
    let lowered = input.to_lowercase();

    if lowered == "exit" || lowered == "quit" {
        return InputIntent::Exit;
    }

    if input.is_empty() {
        return InputIntent::Empty;
    }

    if ANALYSIS_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
        if let Some(number) = REQUEST_NUMBER.captures(input).and_then(|c| c.get(1)) {
            return InputIntent::Analyze {
                request_id: number.as_str().to_string(),
                trigger: AnalysisTrigger::Keyword,
            };
        }
    }

    if input.chars().all(|c| c.is_ascii_digit()) {
        return InputIntent::Analyze {
            request_id: input.to_string(),
            trigger: AnalysisTrigger::BareNumber,
        };
    }

    InputIntent::Query(input.to_string())
}

/// The two things a chat session can ask of the agent system
#[async_trait]
pub trait ReviewService: Send + Sync {
    async fn analyze(&self, request_id: &str) -> FinalReport;
    async fn ask(&self, question: &str) -> Result<Option<String>>;
}

/// Line-oriented conversation with the coordinator
pub struct ChatSession<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> ChatSession<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub fn into_writer(self) -> W {
        self.writer
    }

    /// Runs until `exit`/`quit` or end of input. Failures while handling a line
    /// are printed and the loop keeps going; only a broken input stream ends it early.
    pub async fn run(&mut self, service: &dyn ReviewService) -> Result<()> {
        self.banner().await?;

        let mut line = String::new();
        loop {
            self.write("You: ").await?;

            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .context("Failed to read from input")?;

            if read == 0 {
                self.say("\n👋 Goodbye!").await?;
                return Ok(());
            }

            match classify_input(&line) {
                InputIntent::Exit => {
                    self.say("👋 Ending conversation...").await?;
                    return Ok(());
                }
                InputIntent::Empty => continue,
                InputIntent::Analyze {
                    request_id,
                    trigger,
                } => self.analyze(service, &request_id, trigger).await?,
                InputIntent::Query(question) => self.ask(service, &question).await?,
            }
        }
    }

    async fn banner(&mut self) -> Result<()> {
        self.say("\n🤖 APR Analysis System Ready!").await?;
        self.say("💬 You're chatting with the APR Coordinator").await?;
        self.say("📋 For APR analysis, just provide an APR number (e.g., '121' or 'analyze APR 121')")
            .await?;
        self.say("❓ For general questions, ask normally").await?;
        self.say("🚪 Type 'exit' or 'quit' to end\n").await
    }

    async fn analyze(
        &mut self,
        service: &dyn ReviewService,
        request_id: &str,
        trigger: AnalysisTrigger,
    ) -> Result<()> {
        info!("Analysis request for APR {} ({:?})", request_id, trigger);
        let banner = match trigger {
            AnalysisTrigger::Keyword => format!("\n🎯 Detected APR analysis request for APR {}", request_id),
            AnalysisTrigger::BareNumber => format!("\n🎯 Running APR analysis for APR {}", request_id),
        };
        self.say(&banner).await?;

        let report = service.analyze(request_id).await;

        let rule = "=".repeat(RULE_WIDTH);
        self.say("\n📊 Final Report:\n").await?;
        self.say(&rule).await?;
        self.say(&report.narrative).await?;
        self.say(&rule).await
    }

    async fn ask(&mut self, service: &dyn ReviewService, question: &str) -> Result<()> {
        self.say("💭 Processing with coordinator...").await?;

        match service.ask(question).await {
            Ok(Some(reply)) => self.say(&format!("\n🤖 Coordinator: {}\n", reply)).await,
            Ok(None) => {
                debug!("Coordinator produced no reply");
                self.say(&format!("{}\n", NO_RESPONSE)).await
            }
            Err(e) => {
                error!("Chat turn failed: {:#}", e);
                self.say(&format!("❌ Error: {:#}", e)).await?;
                self.say("Please try again.\n").await
            }
        }
    }

    async fn say(&mut self, text: &str) -> Result<()> {
        self.write(text).await?;
        self.write("\n").await
    }

    async fn write(&mut self, text: &str) -> Result<()> {
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
