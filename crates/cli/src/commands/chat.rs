//! Interactive conversation with the assistant.
//!
//! Every line the operator types is one orchestration call. Lines starting
//! with `/` are local commands and never reach the language model.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;
use underwrite_agent::prompts::AGENT_NAME;
use underwrite_agent::{assemble, AgentRuntime, SessionManager};
use underwrite_core::config::{AppConfig, LoadOptions, LogFormat};
use underwrite_core::domain::conversation::{ConversationThread, ThreadHandle};
use underwrite_core::domain::metrics::UsageMetrics;
use underwrite_db::{connect_from_config, migrations};

use crate::commands::{prepare, CommandResult};

const TRACE_CONTENT_LIMIT: usize = 240;

const HELP: &str = "commands:
  /upload <path>  attach a text document to your next message
  /reset          start a new conversation
  /trace          show every turn of this conversation
  /metrics        show token usage and steps
  /quit           leave the chat";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatInput {
    Message(String),
    Upload(PathBuf),
    Reset,
    Trace,
    Metrics,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse_input(line: &str) -> ChatInput {
    let line = line.trim();
    if line.is_empty() {
        return ChatInput::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return ChatInput::Message(line.to_string());
    };

    let (name, argument) = match command.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (command, ""),
    };
    match name.to_ascii_lowercase().as_str() {
        "upload" if !argument.is_empty() => ChatInput::Upload(PathBuf::from(argument)),
        "reset" => ChatInput::Reset,
        "trace" => ChatInput::Trace,
        "metrics" => ChatInput::Metrics,
        "help" => ChatInput::Help,
        "quit" | "exit" => ChatInput::Quit,
        _ => ChatInput::Unknown(line.to_string()),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplSummary {
    pub turns: usize,
    pub thread_handle: ThreadHandle,
}

pub fn run(options: LoadOptions, document: Option<&Path>, resume: Option<&str>) -> CommandResult {
    let (config, runtime) = match prepare("chat", options) {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };
    init_logging(&config);

    let initial_document = match document.map(std::fs::read_to_string).transpose() {
        Ok(document) => document,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "document_read",
                format!("could not read document: {error}"),
                7,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        let services = assemble(&config, &pool, None)
            .map_err(|error| ("agent_assembly", error.to_string(), 8u8))?;

        let session_id = match resume {
            Some(handle) => services
                .sessions
                .resume(&ThreadHandle(handle.to_string()))
                .await
                .map_err(|error| ("session_resume", error.to_string(), 9u8))?
                .ok_or_else(|| {
                    ("session_resume", format!("no saved conversation `{handle}`"), 9u8)
                })?,
            None => services.sessions.create().await,
        };
        info!(
            event_name = "cli.chat.session_started",
            session_id = %session_id,
            resumed = resume.is_some(),
            "chat session ready"
        );

        let mut stdout = tokio::io::stdout();
        let summary = run_repl(
            &services.runtime,
            &services.sessions,
            &session_id,
            initial_document,
            BufReader::new(tokio::io::stdin()),
            &mut stdout,
        )
        .await
        .map_err(|error| ("terminal_io", error.to_string(), 10u8))?;
        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(summary)
    });

    match result {
        Ok(summary) => CommandResult::success(
            "chat",
            format!(
                "conversation ended after {} turns; resume with --resume {}",
                summary.turns, summary.thread_handle
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("chat", error_class, message, exit_code)
        }
    }
}

/// Reads operator lines until `/quit` or end of input.
pub async fn run_repl<R, W>(
    runtime: &AgentRuntime,
    sessions: &SessionManager,
    session_id: &str,
    mut pending_document: Option<String>,
    reader: R,
    writer: &mut W,
) -> std::io::Result<ReplSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut turns = 0;
    if pending_document.is_some() {
        writer.write_all(b"document attached; it will be sent with your first message\n").await?;
    }

    loop {
        writer.write_all(b"you> ").await?;
        writer.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        let output = match parse_input(&line) {
            ChatInput::Empty => continue,
            ChatInput::Quit => break,
            ChatInput::Help => HELP.to_string(),
            ChatInput::Unknown(line) => format!("unknown command `{line}`; type /help"),
            ChatInput::Upload(path) => match tokio::fs::read_to_string(&path).await {
                Ok(document) => {
                    let output = format!(
                        "attached {} ({} characters); it will be sent with your next message",
                        path.display(),
                        document.chars().count()
                    );
                    pending_document = Some(document);
                    output
                }
                Err(error) => format!("could not read {}: {error}", path.display()),
            },
            input => {
                let mut session = match sessions.acquire(session_id).await {
                    Ok(session) => session,
                    Err(error) => {
                        let line = format!("error: {}\n", error.user_message());
                        writer.write_all(line.as_bytes()).await?;
                        continue;
                    }
                };
                match input {
                    ChatInput::Message(text) => {
                        let document = pending_document.as_deref();
                        match runtime.handle_turn(&mut session, &text, document).await {
                            Ok(response) => {
                                pending_document = None;
                                turns += 1;
                                sessions.persist(&session).await;
                                format!("{AGENT_NAME}> {}", response.reply)
                            }
                            Err(error) => format!("error: {}", error.user_message()),
                        }
                    }
                    ChatInput::Reset => {
                        runtime.reset_session(&mut session).await;
                        format!("conversation reset; new handle {}", session.thread_handle())
                    }
                    ChatInput::Trace => render_trace(&session.thread),
                    ChatInput::Metrics => render_metrics(&session.metrics()),
                    _ => continue,
                }
            }
        };
        writer.write_all(output.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }

    writer.flush().await?;
    let session = sessions
        .acquire(session_id)
        .await
        .map_err(|error| std::io::Error::other(error.to_string()))?;
    Ok(ReplSummary { turns, thread_handle: session.thread_handle().clone() })
}

pub fn render_trace(thread: &ConversationThread) -> String {
    if thread.is_empty() {
        return "no turns yet".to_string();
    }

    let mut out = format!("thread {}\n", thread.continuation_handle());
    for (index, turn) in thread.turns().iter().enumerate() {
        let author = turn.author_name.as_deref().unwrap_or(turn.role.as_str());
        let _ = write!(out, "[{index}] {} ({author})", turn.role.as_str());
        if let Some(call) = &turn.tool_call {
            let _ = write!(out, " call {} {}", call.name, call.arguments);
        } else if let Some(result) = &turn.tool_result {
            let _ = write!(
                out,
                " result {} {}: {}",
                result.name,
                result.outcome.as_str(),
                clip(&result.payload.to_string())
            );
        } else {
            let _ = write!(out, ": {}", clip(&turn.content));
        }
        if let Some(metadata) = &turn.metadata {
            if let Some(step) = metadata.step {
                let _ = write!(out, " [step {step}]");
            }
            if let Some(usage) = metadata.usage {
                let _ = write!(out, " [tokens {}]", usage.total());
            }
            if metadata.replayed {
                out.push_str(" [replayed]");
            }
            if metadata.truncated {
                out.push_str(" [truncated]");
            }
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

pub fn render_metrics(metrics: &UsageMetrics) -> String {
    let cost = metrics.estimated_cost();
    format!(
        "tokens: total {} (prompt {}, completion {})\nsteps: {}\nestimated cost: ${:.6}",
        metrics.total_tokens,
        metrics.prompt_tokens,
        metrics.completion_tokens,
        metrics.total_steps,
        cost.total_cost
    )
}

fn clip(text: &str) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= TRACE_CONTENT_LIMIT {
        return single_line;
    }
    let clipped: String = single_line.chars().take(TRACE_CONTENT_LIMIT).collect();
    format!("{clipped}...")
}

/// Logs go to stderr so they never interleave with the conversation.
fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use underwrite_core::domain::metrics::UsageMetrics;

    use super::{parse_input, render_metrics, ChatInput};

    #[test]
    fn slash_commands_are_parsed_locally() {
        assert_eq!(parse_input("  /reset "), ChatInput::Reset);
        assert_eq!(parse_input("/TRACE"), ChatInput::Trace);
        assert_eq!(parse_input("/exit"), ChatInput::Quit);
        assert_eq!(
            parse_input("/upload claims/acme.txt"),
            ChatInput::Upload(PathBuf::from("claims/acme.txt"))
        );
        assert!(matches!(parse_input("/upload"), ChatInput::Unknown(_)));
        assert_eq!(parse_input("   "), ChatInput::Empty);
    }

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(
            parse_input("What's the risk for POL-123?"),
            ChatInput::Message("What's the risk for POL-123?".to_string())
        );
    }

    #[test]
    fn metrics_render_cost_estimate() {
        let metrics = UsageMetrics {
            total_tokens: 1_500_000,
            total_steps: 3,
            prompt_tokens: 1_000_000,
            completion_tokens: 500_000,
        };

        let rendered = render_metrics(&metrics);

        assert!(rendered.contains("total 1500000 (prompt 1000000, completion 500000)"));
        assert!(rendered.contains("steps: 3"));
        assert!(rendered.contains("$0.300000"));
    }
}
