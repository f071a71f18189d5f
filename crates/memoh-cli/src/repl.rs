//! Interactive REPL — a local chat loop over the Local-CLI channel.
//!
//! Uses `rustyline` for readline-style editing with persistent history.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use rustyline::config::Configurer;
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use tokio::sync::mpsc;
use tracing::debug;

use memoh_channels::{LocalChannel, LocalEvent};
use memoh_flow::StreamEvent;

use crate::helpers;

/// Exit commands (case-insensitive match).
const EXIT_COMMANDS: &[&str] = &["exit", "quit", "/exit", "/quit", ":q"];

/// Run the interactive REPL loop against a Local-CLI channel.
///
/// `identity` is the local session identity this channel is bound under.
pub async fn run(
    channel: Arc<LocalChannel>,
    outbound: mpsc::Receiver<LocalEvent>,
    identity: &str,
    render_markdown: bool,
) -> Result<()> {
    helpers::print_banner();

    let printer = tokio::spawn(drain_outbound(outbound, render_markdown));

    let mut editor = create_editor()?;
    let result = repl_loop(&channel, identity, &mut editor).await;

    save_history(&mut editor);
    drop(channel);
    let _ = printer.await;

    result
}

async fn repl_loop(channel: &Arc<LocalChannel>, identity: &str, editor: &mut Editor<(), DefaultHistory>) -> Result<()> {
    loop {
        let input = match editor.readline("You: ") {
            Ok(line) => line,
            Err(rustyline::error::ReadlineError::Interrupted) => break,
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {e}");
                break;
            }
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            continue;
        }

        if is_exit_command(trimmed) {
            println!("\nGoodbye! 👋");
            break;
        }

        let _ = editor.add_history_entry(&input);

        debug!(session = identity, input = trimmed, "processing input");
        helpers::print_thinking();
        channel.submit(identity, identity, trimmed, vec![]).await;
        helpers::clear_thinking();
    }

    Ok(())
}

/// Forward every event delivered on the Local channel's outbound side to
/// stdout as it arrives.
async fn drain_outbound(mut outbound: mpsc::Receiver<LocalEvent>, render_markdown: bool) {
    while let Some(event) = outbound.recv().await {
        match event {
            LocalEvent::Stream(StreamEvent::Delta { delta, .. }) => {
                print!("{delta}");
                let _ = std::io::stdout().flush();
            }
            LocalEvent::Stream(StreamEvent::Final { message }) => {
                helpers::print_response(&message, render_markdown);
            }
            LocalEvent::Stream(StreamEvent::Error { error }) => {
                eprintln!("\n❌ Error: {error}\n");
            }
            LocalEvent::Text(text) => {
                helpers::print_response(&text, render_markdown);
            }
            _ => {}
        }
    }
}

/// Create a rustyline editor with history.
fn create_editor() -> Result<Editor<(), DefaultHistory>> {
    let mut editor = DefaultEditor::new()?;
    editor.set_max_history_size(1000)?;

    let history_path = history_path();
    if history_path.exists() {
        let _ = editor.load_history(&history_path);
        debug!("loaded REPL history from {}", history_path.display());
    }

    Ok(editor)
}

/// Save history to disk.
fn save_history(editor: &mut Editor<(), DefaultHistory>) {
    let path = history_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = editor.save_history(&path) {
        debug!("failed to save history: {e}");
    }
}

/// Path to the history file.
fn history_path() -> std::path::PathBuf {
    memoh_core::utils::get_data_path().join("history").join("cli_history")
}

/// Check if input is an exit command.
fn is_exit_command(input: &str) -> bool {
    let lower = input.to_lowercase();
    EXIT_COMMANDS.contains(&lower.as_str())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_commands() {
        assert!(is_exit_command("exit"));
        assert!(is_exit_command("EXIT"));
        assert!(is_exit_command("/quit"));
        assert!(is_exit_command(":q"));
        assert!(!is_exit_command("hello"));
        assert!(!is_exit_command(""));
    }

    #[test]
    fn history_path_under_data_dir() {
        let path = history_path();
        assert!(path.to_string_lossy().contains(".memoh"));
        assert!(path.to_string_lossy().contains("cli_history"));
    }
}
