//! Interactive dispatch session: live progress, stdin/Ctrl-C controls, bell.

use anyhow::{Context, Result};
use std::io::{BufRead, IsTerminal, Write};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::crm::DueClient;
use crate::dispatch::{
    ControlSurface, DispatchEvent, DispatchOrchestrator, Notifier, ProgressObserver,
    ProgressSnapshot, RunState, RunSummary, TracingNotifier,
};

/// Single-key commands typed while a run is in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlCommand {
    Pause,
    Resume,
    Abort,
}

pub(crate) fn parse_control_command(line: &str) -> Option<ControlCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "p" | "pause" => Some(ControlCommand::Pause),
        "r" | "resume" | "c" | "continue" => Some(ControlCommand::Resume),
        "a" | "abort" | "q" | "quit" => Some(ControlCommand::Abort),
        _ => None,
    }
}

fn apply(control: &ControlSurface, command: ControlCommand) {
    match command {
        ControlCommand::Pause => {
            if control.pause() {
                eprintln!("\n⏸  Paused. Type 'r' to resume or 'a' to abort.");
            }
        }
        ControlCommand::Resume => {
            if control.resume() {
                eprintln!("\n▶  Resumed.");
            }
        }
        ControlCommand::Abort => {
            control.abort();
            eprintln!("\n⏹  Aborting after the current message...");
        }
    }
}

/// Rings the terminal bell when the run needs attention.
pub(crate) struct TerminalBell;

impl Notifier for TerminalBell {
    fn notify(&self, event: &DispatchEvent) {
        match event {
            DispatchEvent::AutoPaused { sent, count } => {
                eprintln!(
                    "\x07\n⏸  Auto-pause #{} after {} messages. Type 'r' to resume or 'a' to abort.",
                    count, sent
                );
            }
            DispatchEvent::RunFinished { .. } => eprint!("\x07"),
            _ => {}
        }
    }
}

/// Bell on a terminal, log lines when stderr is redirected.
pub(crate) fn notifier_for(interactive: bool) -> Arc<dyn Notifier> {
    if interactive {
        Arc::new(TerminalBell)
    } else {
        Arc::new(TracingNotifier)
    }
}

pub(crate) fn default_notifier() -> Arc<dyn Notifier> {
    notifier_for(std::io::stderr().is_terminal())
}

pub(crate) fn format_progress(snapshot: &ProgressSnapshot) -> String {
    format!(
        "[{}/{}] {:>5.1}%  ok {}  failed {}",
        snapshot.current,
        snapshot.total,
        snapshot.percent(),
        snapshot.succeeded,
        snapshot.failed
    )
}

pub(crate) fn progress_observer() -> ProgressObserver {
    std::sync::Arc::new(|snapshot: ProgressSnapshot| {
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r{}", format_progress(&snapshot));
        let _ = stderr.flush();
    })
}

/// Start the run and drive it from the terminal until it finishes.
pub(crate) async fn run_interactive(orchestrator: DispatchOrchestrator) -> Result<RunSummary> {
    let control = orchestrator.control();
    eprintln!("Controls: 'p' pause, 'r' resume, 'a' abort (Ctrl-C also aborts)");

    // Blocking stdin reads get their own thread so they never hold up runtime
    // shutdown.
    let (tx, mut commands) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if let Some(command) = parse_control_command(&line)
                && tx.send(command).is_err()
            {
                break;
            }
        }
    });

    let mut states = control.subscribe_state();
    let driver = {
        let control = control.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(command) = commands.recv() => apply(&control, command),
                    result = tokio::signal::ctrl_c() => {
                        if result.is_ok() {
                            apply(&control, ControlCommand::Abort);
                        }
                    }
                    changed = states.changed() => {
                        if changed.is_err() || states.borrow_and_update().is_terminal() {
                            break;
                        }
                    }
                }
            }
        })
    };

    let summary = orchestrator
        .start()
        .await
        .context("Dispatch task failed")?;
    driver.abort();
    eprintln!();
    Ok(summary)
}

pub(crate) fn print_summary(summary: &RunSummary) {
    let state = if summary.aborted {
        RunState::Aborted
    } else {
        RunState::Completed
    };
    println!("\n📊 Run {} {}", summary.run_id, state);
    if let Some(label) = &summary.metadata.label {
        println!("   Label: {}", label);
    }
    println!("   Sent: {}/{}", summary.total, summary.planned);
    println!("   Succeeded: {}", summary.succeeded);
    println!("   Failed: {}", summary.failed);
    println!("   Duration: {:.1}s", summary.duration_seconds);
    if summary.auto_pause_count > 0 {
        println!("   Auto-pauses: {}", summary.auto_pause_count);
    }
    if summary.halted_by_failures {
        println!("   ⚠️  Stopped after too many failures in a row");
    }

    let failures: Vec<_> = summary.failures().collect();
    if !failures.is_empty() {
        println!("\n❌ Failed recipients:");
        for record in failures {
            println!(
                "   #{} {}: {}",
                record.index + 1,
                record.destination,
                record.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

pub(crate) fn history_line(run: &RunSummary) -> String {
    let state = if run.aborted { "aborted" } else { "completed" };
    format!(
        "{}  {:<20}  {:<9}  {}/{} sent  ok {}  failed {}  {:.0}s",
        run.started_at
            .with_timezone(&chrono::Local)
            .format("%d/%m/%Y %H:%M"),
        run.metadata.label.as_deref().unwrap_or("-"),
        state,
        run.total,
        run.planned,
        run.succeeded,
        run.failed,
        run.duration_seconds
    )
}

pub(crate) fn print_due_clients(due: &[DueClient<'_>]) {
    if due.is_empty() {
        println!("No clients due.");
        return;
    }
    for entry in due {
        let when = match entry.days_left {
            d if d < 0 => format!("expired {} day(s) ago", -d),
            0 => "expires today".to_string(),
            d => format!("expires in {} day(s)", d),
        };
        println!(
            "{:<24} {:<16} {:<12} {} ({})",
            entry.client.name,
            entry.client.phone,
            entry.client.plan,
            entry.client.expires_on.format("%d/%m/%Y"),
            when
        );
    }
    println!("\n{} client(s) due", due.len());
}
