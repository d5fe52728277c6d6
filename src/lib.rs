//! System tray icons with a dropdown menu behind one contract.
//!
//! ```no_run
//! use trayport::{BaseTray, Icon, Tray, TrayEntry};
//!
//! # fn main() -> trayport::TrayResult<()> {
//! let mut tray = Tray::new("org.example.demo", Icon::default(), [])?;
//! let exit = tray.exit_handle();
//! tray.add_entries([
//!     TrayEntry::button("Hello", || println!("hello")),
//!     TrayEntry::separator(),
//!     TrayEntry::button("Quit", move || exit.exit())
//! ])?;
//! tray.run()?;
//! # Ok(())
//! # }
//! ```
//!
//! Every platform has exactly one backend, chosen at compile time:
//! `Shell_NotifyIconW` on Windows, StatusNotifierItem + dbusmenu on Linux and
//! `NSStatusItem` on macOS. Menu handlers always run on the thread that calls
//! [`BaseTray::run`] or [`BaseTray::pump`].

pub use crate::entry::TrayEntry;
pub use crate::error::{ErrorSource, TrayError, TrayErrorKind, TrayResult};
pub use crate::icon::Icon;
pub use crate::platform::{NativeIcon, PlatformError};
pub use crate::tray::{ExitHandle, TrayState};

use crate::platform::NativeTrayIcon;
use crate::tray::{NativeTray, TrayCore};

mod entry;
mod error;
mod icon;
mod menu;
mod platform;
mod tray;

/// The operations every tray supports, independent of the platform.
pub trait BaseTray {
    /// Runs the event loop until [`BaseTray::exit`] is requested.
    fn run(&mut self) -> TrayResult<()>;

    /// Requests the loop to stop. Idempotent.
    fn exit(&self);

    /// Rebuilds the native menu from the current entries.
    fn update(&mut self) -> TrayResult<()>;

    /// Processes pending events without blocking. Returns `false` once the tray exited.
    fn pump(&mut self) -> TrayResult<bool>;

    fn add_entry(&mut self, entry: TrayEntry) -> TrayResult<TrayEntry>;

    fn add_entries<I>(&mut self, entries: I) -> TrayResult<()>
        where I: IntoIterator<Item = TrayEntry>;

    fn remove_entry(&mut self, entry: &TrayEntry) -> TrayResult<bool>;

    fn entries(&self) -> &[TrayEntry];
}

#[derive(Debug, Clone, Default)]
pub struct TrayBuilder {
    identifier: String,
    icon: Icon,
    tooltip: Option<String>,
    entries: Vec<TrayEntry>
}

impl TrayBuilder {

    /// `identifier` names the tray towards the shell, e.g. a bundle or application id.
    pub fn new<S: ToString>(identifier: S) -> Self {
        Self {
            identifier: identifier.to_string(),
            ..Default::default()
        }
    }

    pub fn with_icon(mut self, icon: Icon) -> Self {
        self.icon = icon;
        self
    }

    pub fn with_tooltip<S: ToString>(mut self, tooltip: S) -> Self {
        self.tooltip = Some(tooltip.to_string());
        self
    }

    pub fn with_entry(mut self, entry: TrayEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn with_entries<I>(mut self, entries: I) -> Self
        where I: IntoIterator<Item = TrayEntry>
    {
        self.entries.extend(entries);
        self
    }

    pub fn build(self) -> TrayResult<Tray> {
        Ok(Tray(self.build_core()?))
    }

    fn build_core<B: NativeTray>(self) -> TrayResult<TrayCore<B>> {
        TrayCore::new(&self.identifier, &self.icon, self.tooltip.as_deref(), self.entries)
    }
}

/// A live tray icon. Dropping it removes the icon from the shell.
pub struct Tray(TrayCore<NativeTrayIcon>);

impl Tray {
    /// Registers a tray icon and installs `entries` with a single menu update.
    pub fn new<S, I>(identifier: S, icon: Icon, entries: I) -> TrayResult<Self>
        where S: AsRef<str>, I: IntoIterator<Item = TrayEntry>
    {
        Ok(Self(TrayCore::new(identifier.as_ref(), &icon, None, entries)?))
    }

    pub fn builder<S: ToString>(identifier: S) -> TrayBuilder {
        TrayBuilder::new(identifier)
    }

    /// A handle that stops the loop, for use inside menu handlers or from other threads.
    pub fn exit_handle(&self) -> ExitHandle {
        self.0.exit_handle()
    }

    pub fn state(&self) -> TrayState {
        self.0.state()
    }

    pub fn set_icon(&mut self, icon: Icon) -> TrayResult<()> {
        self.0.set_icon(&icon)
    }

    pub fn set_tooltip<S: ToString>(&mut self, tooltip: impl Into<Option<S>>) -> TrayResult<()> {
        let tooltip = tooltip.into().map(|s| s.to_string());
        self.0.set_tooltip(tooltip.as_deref())
    }
}

impl BaseTray for Tray {
    fn run(&mut self) -> TrayResult<()> {
        self.0.run()
    }

    fn exit(&self) {
        self.0.exit_handle().exit()
    }

    fn update(&mut self) -> TrayResult<()> {
        self.0.update()
    }

    fn pump(&mut self) -> TrayResult<bool> {
        self.0.pump()
    }

    fn add_entry(&mut self, entry: TrayEntry) -> TrayResult<TrayEntry> {
        self.0.add_entry(entry)
    }

    fn add_entries<I>(&mut self, entries: I) -> TrayResult<()>
        where I: IntoIterator<Item = TrayEntry>
    {
        self.0.add_entries(entries)
    }

    fn remove_entry(&mut self, entry: &TrayEntry) -> TrayResult<bool> {
        self.0.remove_entry(entry)
    }

    fn entries(&self) -> &[TrayEntry] {
        self.0.entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tray::mock::{shell, MockTray};

    #[test]
    fn builder_installs_everything_with_one_update() {
        let shell = shell();
        let core: TrayCore<MockTray> = Tray::builder("app.builder")
            .with_tooltip("Builder")
            .with_entry(TrayEntry::label("first"))
            .with_entries([TrayEntry::separator(), TrayEntry::button("last", || {})])
            .build_core()
            .unwrap();
        let shell = shell.lock();
        assert_eq!(shell.identifier, "app.builder");
        assert_eq!(shell.tooltip.as_deref(), Some("Builder"));
        assert_eq!(shell.menus_installed, 1);
        assert_eq!(shell.menu.iter().map(|i| i.label.as_str()).collect::<Vec<_>>(), ["first", "", "last"]);
        assert_eq!(core.entries().len(), 3);
        assert_eq!(core.state(), TrayState::Constructed);
    }
}
