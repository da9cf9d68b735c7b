//! Example: Run the time-lapse trigger against a simulated print.
//!
//! Run with: cargo run -p lapse-timer --example simulate_print [settings.json]
//!
//! Without a settings file the trigger captures every 0.4 mm and every 2 s.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lapse_timer::IntervalScheduler;
use lapse_trigger::{CaptureSink, LapseSettings, LapseTrigger, PositionSample, StaticPrintStatus};
use tracing_subscriber::EnvFilter;

/// Camera stand-in that logs each frame instead of storing it.
#[derive(Default)]
struct LoggingCamera {
    frames: AtomicUsize,
}

impl CaptureSink for LoggingCamera {
    fn capture(&self) {
        // Simulated encode latency; runs on a capture worker.
        std::thread::sleep(Duration::from_millis(150));
        let frame = self.frames.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(frame, "Captured time-lapse frame");
    }

    fn cleanup(&self) {
        let removed = self.frames.swap(0, Ordering::SeqCst);
        tracing::info!(removed, "Removed time-lapse frames");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,lapse_trigger=debug,lapse_timer=debug")),
        )
        .init();

    let settings = match std::env::args().nth(1) {
        Some(path) => LapseSettings::load(path)?,
        None => LapseSettings {
            enabled: true,
            height_threshold_mm: 0.4,
            interval_seconds: 2,
            ..Default::default()
        },
    };

    let printer = Arc::new(StaticPrintStatus::idle());
    let camera = Arc::new(LoggingCamera::default());
    let scheduler = Arc::new(IntervalScheduler::current()?);
    let trigger = LapseTrigger::new(&settings, printer.clone(), camera, scheduler.clone());

    println!("=== Time-lapse Simulation ===");
    println!("{}\n", format_status(&trigger));

    // Job starts.
    printer.set_job(Some("benchy.gcode".to_string()));
    trigger.set_running(true)?;

    // Twenty 0.2 mm layers, with a travel move down and back mid-print.
    let mut layers: Vec<f64> = (1..=20).map(|layer| f64::from(layer) * 0.2).collect();
    layers.insert(10, 0.6);
    for z in layers {
        let outcome = trigger.evaluate(PositionSample::Known(z));
        println!("z = {z:5.2} mm -> {outcome:?}");
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    // Manual request from the operator.
    println!("manual -> {:?}", trigger.capture_now());

    // Job ends.
    trigger.set_running(false)?;
    printer.set_job(None);
    tokio::time::sleep(Duration::from_millis(500)).await;
    println!("\n{}", format_status(&trigger));
    trigger.clean();

    scheduler.shutdown();
    println!("\nDone.");
    Ok(())
}

fn format_status(trigger: &LapseTrigger) -> String {
    let status = trigger.status();
    format!(
        "enabled={} manual={} running={} threshold={}mm last={}mm interval={}s",
        status.enabled,
        status.manual_mode,
        status.running,
        status.height_threshold_mm,
        status.last_trigger_height_mm,
        status.interval_seconds
    )
}
