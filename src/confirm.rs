//! # Confirmation Gate
//!
//! Every tool call passes through a `ConfirmationGate` before it runs. The
//! console gate asks the operator; tests substitute a scripted one.

use async_trait::async_trait;
use console::style;
use std::io::{self, Write};

/// Result text fed back to the model when the operator declines a tool call.
pub const USER_CANCELLED: &str = "User cancelled.";

#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    /// Returns `true` if the tool may run. Anything that is not an explicit
    /// approval counts as a decline.
    async fn confirm(&self, tool_name: &str, arguments: &str) -> bool;
}

/// Whether an operator reply approves the call. Only `y` (any case) does.
pub fn is_affirmative(reply: &str) -> bool {
    reply.trim().eq_ignore_ascii_case("y")
}

/// Asks on the terminal and blocks until a line is read.
pub struct ConsoleGate;

#[async_trait]
impl ConfirmationGate for ConsoleGate {
    async fn confirm(&self, tool_name: &str, arguments: &str) -> bool {
        print!(
            "\x07{} ",
            style(format!("Use tool {tool_name} with arguments {arguments}? (y/n):")).dim()
        );
        if io::stdout().flush().is_err() {
            return false;
        }

        let reply = tokio::task::spawn_blocking(|| {
            let mut buffer = String::new();
            match io::stdin().read_line(&mut buffer) {
                Ok(0) => None, // EOF (Ctrl+D)
                Ok(_) => Some(buffer),
                Err(_) => None,
            }
        })
        .await;

        match reply {
            Ok(Some(line)) => is_affirmative(&line),
            _ => false,
        }
    }
}

/// Approves or declines every call without asking.
pub struct FixedGate(pub bool);

#[async_trait]
impl ConfirmationGate for FixedGate {
    async fn confirm(&self, _tool_name: &str, _arguments: &str) -> bool {
        self.0
    }
}
