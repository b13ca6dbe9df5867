//! Demonstration of keytally's capture engine.
//!
//! This example shows how to:
//! 1. Check for Input Monitoring permission
//! 2. Start an engine on a throwaway data directory
//! 3. Watch the aggregate grow while you type
//! 4. Export a report and shut down cleanly
//!
//! Run with: cargo run --example capture_demo
//!
//! Note: Requires Input Monitoring permission on macOS.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use keytally::{
    collector::{check_permission, SystemSource},
    storage::format_summary,
    CaptureState, Config, DateRange, Engine, ExportFormat, PERMISSION_INSTRUCTIONS,
};

fn main() -> anyhow::Result<()> {
    println!("keytally - Capture Demo");
    println!("=======================");
    println!();

    print!("Checking Input Monitoring permission... ");
    if check_permission() {
        println!("OK ✓");
    } else {
        println!("FAILED ✗");
        println!();
        println!("{PERMISSION_INSTRUCTIONS}");
        return Ok(());
    }
    println!();

    let data_dir = std::env::temp_dir().join("keytally-demo");
    let mut config = Config::with_data_path(&data_dir);
    config.autosave_interval = Duration::from_secs(5);

    let mut engine = Engine::start(config, SystemSource::new())?;
    if engine.capture_state() != &CaptureState::Running {
        eprintln!("Capture did not start: {:?}", engine.capture_state());
        return Ok(());
    }

    println!("Data directory: {data_dir:?}");
    println!("Capturing for 30 seconds... type something!");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let start = Instant::now();
    let mut last_total = 0;
    while running.load(Ordering::SeqCst) && start.elapsed() < Duration::from_secs(30) {
        std::thread::sleep(Duration::from_secs(1));
        let total = engine.stats().total_count;
        if total != last_total {
            println!("[{:>2}s] {} keystrokes", start.elapsed().as_secs(), total);
            last_total = total;
        }
    }

    engine.shutdown();
    println!();
    print!("{}", format_summary(&engine.summary(DateRange::Today, 5)));

    let report = engine.export_snapshot(&data_dir.join("demo_report.txt"), ExportFormat::Report)?;
    println!();
    println!("Report written to {report:?}");
    println!("{}", engine.health().summary());
    Ok(())
}
