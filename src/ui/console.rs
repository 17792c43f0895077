use std::future::Future;
use std::str::FromStr;

use color_eyre::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::monitor::{MonitorHandle, MonitorState, StateChange};
use crate::mqtt::topics::Topic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Connect,
    Disconnect,
    Status,
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "connect" | "c" => Ok(ConsoleCommand::Connect),
            "disconnect" | "d" => Ok(ConsoleCommand::Disconnect),
            "status" | "s" => Ok(ConsoleCommand::Status),
            "help" | "h" | "?" => Ok(ConsoleCommand::Help),
            "quit" | "q" | "exit" => Ok(ConsoleCommand::Quit),
            other => Err(format!("Unknown command '{}', try 'help'", other)),
        }
    }
}

const HELP: &str = "Commands: connect, disconnect, status, help, quit";

/// One line per known topic, unset values stay blank
pub fn render_state(state: &MonitorState) -> String {
    Topic::ALL
        .iter()
        .map(|topic| match state.reading(*topic) {
            Some(reading) => format!("{}: {}", topic.label(), reading.payload),
            None => format!("{}: ", topic.label()),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_change(change: &StateChange) -> Option<String> {
    change
        .reading
        .as_ref()
        .map(|reading| format!("{}: {}", change.topic.label(), reading))
}

async fn print_changes(mut changes: broadcast::Receiver<StateChange>) {
    loop {
        match changes.recv().await {
            Ok(change) => {
                if let Some(line) = render_change(&change) {
                    println!("{}", line);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Display fell behind, skipped {} updates", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("State change printer finished");
}

async fn execute(handle: &MonitorHandle, command: ConsoleCommand) -> Result<bool> {
    match command {
        ConsoleCommand::Connect => match handle.connect().await {
            Ok(outcome) => println!("{}", outcome),
            Err(e) => {
                error!("Connect failed: {}", e);
                println!("Could not connect to the broker: {}", e);
            }
        },
        ConsoleCommand::Disconnect => {
            let outcome = handle.disconnect().await?;
            println!("{}", outcome);
        }
        ConsoleCommand::Status => {
            let status = handle.status().await?;
            println!(
                "Connected: {} {}",
                status.connected,
                status.client_id.unwrap_or_default()
            );
            println!("Publishers: {}", status.running_publishers.join(", "));
            println!("{}", render_state(handle.state()));
        }
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => return Ok(false),
    }
    Ok(true)
}

/// Reads commands from stdin until `quit`, end of input, Ctrl-C or SIGTERM,
/// then runs the monitor teardown.
pub async fn run_console(handle: MonitorHandle, auto_connect: bool) -> Result<()> {
    let input = BufReader::new(tokio::io::stdin());
    drive_console(handle, auto_connect, input, shutdown_signal()).await
}

/// Resolves on the first Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("Ctrl-C received"),
        _ = terminate => info!("SIGTERM received"),
    }
}

async fn drive_console<R, S>(
    handle: MonitorHandle,
    auto_connect: bool,
    input: R,
    stop: S,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    let printer = tokio::spawn(print_changes(handle.subscribe_changes()));
    println!("{}", HELP);

    if auto_connect {
        execute(&handle, ConsoleCommand::Connect).await?;
    }

    tokio::pin!(stop);
    let mut lines = input.lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut stop => break,
        };
        let Some(line) = line else {
            debug!("End of input");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<ConsoleCommand>() {
            Ok(command) => {
                if !execute(&handle, command).await? {
                    break;
                }
            }
            Err(message) => println!("{}", message),
        }
    }

    info!("Shutting down");
    handle.shutdown().await?;
    printer.abort();
    Ok(())
}
