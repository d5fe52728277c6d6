use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::LevelFilter;
use simple_logger::SimpleLogger;
use trayport::{BaseTray, Icon, Tray, TrayEntry};

fn main() -> Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Debug)
        .init()?;

    let mut tray = Tray::new("org.example.trayport.pump", Icon::default(), [])?;
    let exit = tray.exit_handle();
    tray.add_entry(TrayEntry::button("Quit", move || exit.exit()))?;

    let uptime = tray.add_entry(TrayEntry::label("Uptime: 0s"))?;
    let start = Instant::now();
    let mut shown = 0;
    // the application owns the loop and gives the tray a slice of every iteration
    while tray.pump()? {
        let secs = start.elapsed().as_secs();
        if secs != shown {
            shown = secs;
            uptime.set_text(format!("Uptime: {secs}s"));
            tray.update()?;
        }
        thread::sleep(Duration::from_millis(16));
    }
    Ok(())
}
