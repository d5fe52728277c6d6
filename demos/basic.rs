use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use log::LevelFilter;
use simple_logger::SimpleLogger;
use trayport::{BaseTray, Icon, Tray, TrayEntry};

fn main() -> Result<()> {
    SimpleLogger::new()
        .with_module_level("trayport", LevelFilter::Trace)
        .with_level(LevelFilter::Debug)
        .init()?;

    let clicks = Arc::new(AtomicU32::new(0));
    let muted = Arc::new(AtomicBool::new(false));

    let mut tray = Tray::builder("org.example.trayport")
        .with_icon(Icon::from_rgba(vec![255u8; 32 * 32 * 4], 32, 32)?)
        .with_tooltip("Demo System Tray")
        .build()?;
    let exit = tray.exit_handle();

    let counter = TrayEntry::label("Clicked 0 times");
    tray.add_entries([
        TrayEntry::button("Click me", {
            let clicks = clicks.clone();
            let counter = counter.clone();
            move || {
                let n = clicks.fetch_add(1, Ordering::SeqCst) + 1;
                counter.set_text(format!("Clicked {n} times"));
            }
        }),
        counter,
        TrayEntry::separator(),
        TrayEntry::submenu("Profiles", (1..=3).map(|i| {
            TrayEntry::button(format!("Profile {i}"), move || log::info!("Selected profile {i}"))
        })),
        TrayEntry::toggle("Autostart", false, |on| log::info!("Autostart: {on}")),
        TrayEntry::synced_toggle("Muted", muted.clone(), |on| log::info!("Muted: {on}")),
        TrayEntry::separator(),
        TrayEntry::button("Quit", move || exit.exit())
    ])?;

    tray.run()?;
    log::info!("Exited after {} clicks (muted: {})", clicks.load(Ordering::SeqCst), muted.load(Ordering::SeqCst));
    Ok(())
}
