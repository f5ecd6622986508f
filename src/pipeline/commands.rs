//! Operator command reader.
//!
//! Reads one command per line (`q`, `a`, `s`, `r` or their long names) and
//! queues it for the monitor. Unknown lines are logged and skipped.

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::types::Command;

/// Forward parsed commands until EOF, cancellation, or `quit`.
///
/// Returns the number of commands queued.
pub async fn read_commands<R: AsyncBufRead + Unpin>(
    reader: R,
    commands: mpsc::Sender<Command>,
    cancel_token: CancellationToken,
) -> Result<u64> {
    let mut lines = reader.lines();
    let mut queued = 0u64;

    loop {
        let line = tokio::select! {
            _ = cancel_token.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<Command>() {
            Ok(command) => {
                info!(?command, "⌨️ Command received");
                if commands.send(command).await.is_err() {
                    // Monitor is gone
                    break;
                }
                queued += 1;
                if command == Command::Quit {
                    break;
                }
            }
            Err(e) => warn!("[CommandReader] {} (use q, a, s or r)", e),
        }
    }

    Ok(queued)
}
