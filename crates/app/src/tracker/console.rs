//! Minimal stdin operator console.
//!
//! Stands in for the external GUI and input listeners in headless runs:
//! one line per command, flipping the same toggle flags a listener would.

use std::{
    io::BufRead,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use crossbeam_channel::Sender;
use tracing::info;

use crate::tracker::controls::{emit, Toggles, TrackerEvent};

/// Spawn the console reader thread. It exits on `quit`, on EOF, or when the
/// shutdown flag is raised elsewhere.
pub fn spawn(
    toggles: Arc<Toggles>,
    events: Sender<TrackerEvent>,
    shutdown: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("operator-console".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            println!("commands: track | engage | covert | status | quit");
            for line in stdin.lock().lines() {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                let Ok(line) = line else { break };
                match line.trim().to_ascii_lowercase().as_str() {
                    "t" | "track" => {
                        let on = toggles.toggle_tracking();
                        emit(&events, TrackerEvent::TrackingToggled(on));
                        info!("tracking {}", if on { "on" } else { "off" });
                    }
                    "e" | "engage" => {
                        let on = toggles.toggle_engaged();
                        info!("engage {}", if on { "on" } else { "off" });
                    }
                    "c" | "covert" => {
                        let on = toggles.toggle_covert();
                        info!("covert {}", if on { "on" } else { "off" });
                    }
                    "s" | "status" => {
                        println!(
                            "tracking={} engaged={} covert={}",
                            toggles.tracking(),
                            toggles.engaged(),
                            toggles.covert()
                        );
                    }
                    "q" | "quit" => {
                        shutdown.store(true, Ordering::SeqCst);
                        break;
                    }
                    "" => {}
                    other => println!("unknown command {other:?}"),
                }
            }
        })
        .expect("failed to spawn operator console thread")
}
