use std::io::BufRead;
use std::thread;

use anyhow::{Context, Result};
use common::RecorderConfig;
use log::{debug, error, info, warn};
use recorder::{Recorder, SaveStatus, StatusEvent, create_recorder};
use tokio::sync::mpsc::{self, UnboundedSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Save,
    StartRecording,
    StopRecording,
    Quit,
}

impl Action {
    fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "s" | "save" => Some(Action::Save),
            "r" | "record" => Some(Action::StartRecording),
            "x" | "stop" => Some(Action::StopRecording),
            "q" | "quit" | "exit" => Some(Action::Quit),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            RecorderConfig::load(&path).with_context(|| format!("failed to load config {}", path))?
        }
        None => RecorderConfig::default(),
    };
    let session = &config.session;
    info!(
        "[main] {}x{} @ {}fps, {} bps, {}s buffer -> {}",
        session.width,
        session.height,
        session.frame_rate,
        session.bit_rate(),
        session.span_secs,
        config.output_dir.display()
    );

    let mut recorder = create_recorder(config);
    recorder.start().await?;
    let mut events = recorder
        .take_events()
        .context("recorder did not provide a status stream")?;

    let (actions_tx, mut actions) = mpsc::unbounded_channel();
    spawn_console(actions_tx.clone());
    #[cfg(feature = "hotkeys")]
    spawn_hotkeys(actions_tx);
    #[cfg(not(feature = "hotkeys"))]
    drop(actions_tx);

    println!("commands: save (s), record (r), stop (x), quit (q)");
    loop {
        tokio::select! {
            action = actions.recv() => {
                let Some(action) = action else { break };
                if action == Action::Quit {
                    break;
                }
                if let Err(e) = dispatch(&*recorder, action).await {
                    error!("[main] {:#}", e);
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if !report(event) {
                    break;
                }
            }
        }
    }

    info!("[main] shutting down");
    recorder.stop().await?;
    while let Ok(event) = events.try_recv() {
        report(event);
    }
    Ok(())
}

async fn dispatch(recorder: &dyn Recorder, action: Action) -> Result<()> {
    match action {
        Action::Save => recorder.save(&recorder.next_output_path()).await,
        Action::StartRecording => recorder.start_recording(&recorder.next_output_path()).await,
        Action::StopRecording => recorder.stop_recording().await,
        Action::Quit => Ok(()),
    }
}

/// Logs a status event. Returns `false` when the session cannot continue.
fn report(event: StatusEvent) -> bool {
    match event {
        StatusEvent::BufferStatus { span_usec } => {
            debug!("[main] buffered {:.1}s", span_usec as f64 / 1_000_000.0)
        }
        StatusEvent::SaveComplete { path, status } => match status {
            SaveStatus::Ok => info!("[main] saved replay to {}", path.display()),
            SaveStatus::NoSyncFrame => warn!("[main] nothing to save yet, try again shortly"),
            SaveStatus::WriteError => error!("[main] failed to write {}", path.display()),
        },
        StatusEvent::RecordingStarted {
            path,
            preroll_packets,
        } => info!(
            "[main] recording to {} ({} buffered packets prepended)",
            path.display(),
            preroll_packets
        ),
        StatusEvent::RecordingFailed { path, reason } => {
            error!("[main] could not record to {}: {}", path.display(), reason)
        }
        StatusEvent::RecordingStopped {
            path,
            samples,
            status,
        } => {
            if status.is_ok() {
                info!("[main] recorded {} packets to {}", samples, path.display());
            } else {
                error!(
                    "[main] recording {} ended with an error after {} packets",
                    path.display(),
                    samples
                );
            }
        }
        StatusEvent::EncoderError(message) => warn!("[main] encoder: {}", message),
        StatusEvent::Fatal(message) => {
            error!("[main] {}", message);
            return false;
        }
    }
    true
}

fn spawn_console(actions: UnboundedSender<Action>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match Action::parse(&line) {
                Some(action) => {
                    if actions.send(action).is_err() {
                        return;
                    }
                }
                None if line.trim().is_empty() => {}
                None => println!("unknown command: {}", line.trim()),
            }
        }
        let _ = actions.send(Action::Quit);
    });
}

#[cfg(feature = "hotkeys")]
fn spawn_hotkeys(actions: UnboundedSender<Action>) {
    use rdev::{EventType, Key, listen};

    thread::spawn(move || {
        info!("[main] hot keys: F2 save, F3 record, F4 stop");
        let result = listen(move |event| {
            let action = match event.event_type {
                EventType::KeyPress(Key::F2) => Action::Save,
                EventType::KeyPress(Key::F3) => Action::StartRecording,
                EventType::KeyPress(Key::F4) => Action::StopRecording,
                _ => return,
            };
            debug!("[main] hot key: {:?}", action);
            let _ = actions.send(action);
        });
        debug!("[main] hot key listener exited with: {:?}", result);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_console_commands() {
        assert_eq!(Action::parse("save"), Some(Action::Save));
        assert_eq!(Action::parse(" s \n"), Some(Action::Save));
        assert_eq!(Action::parse("record"), Some(Action::StartRecording));
        assert_eq!(Action::parse("x"), Some(Action::StopRecording));
        assert_eq!(Action::parse("exit"), Some(Action::Quit));
        assert_eq!(Action::parse("rewind"), None);
    }

    #[test]
    fn fatal_events_end_the_session() {
        assert!(report(StatusEvent::BufferStatus { span_usec: 1 }));
        assert!(!report(StatusEvent::Fatal("enormous packet".into())));
    }
}
