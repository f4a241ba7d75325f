//! The operator console (§1: out of scope for the core): reads lines from stdin and
//! translates the `stop` command into `Command::Stop` (§5, §6).

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use laminar_core::command::Command;

pub async fn run(command_tx: mpsc::UnboundedSender<Command>) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "console read failed");
                return;
            }
        };
        match line.trim() {
            "stop" => {
                let _ = command_tx.send(Command::Stop);
                return;
            }
            "" => {}
            other => tracing::info!(command = other, "unrecognized console command"),
        }
    }
}
