use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flume::{Receiver, Sender};

use crate::entry::TrayEntry;
use crate::error::{TrayErrorKind, TrayResult};
use crate::icon::Icon;
use crate::menu::{Activation, MenuLayout};

/// Messages from the native side to the tray.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum TrayMessage {
    /// Menu item `id` of layout `revision` was clicked.
    Activated { revision: u32, id: usize },
    /// Nothing happened, but the loop should look at the exit flag.
    Wake,
    /// The platform shut the loop down.
    Quit
}

pub(crate) type MessageSender = Sender<TrayMessage>;

/// Wakes a blocked [`NativeTray::wait`] from any thread.
pub(crate) type NativeWaker = Arc<dyn Fn() + Send + Sync + 'static>;

/// What every platform backend provides.
pub(crate) trait NativeTray: Sized {
    /// Creates and registers the status item.
    fn create(identifier: &str, icon: &Icon, tooltip: Option<&str>, sender: MessageSender) -> TrayResult<Self>;

    /// Replaces the native menu with `layout`.
    fn set_menu(&mut self, layout: &MenuLayout) -> TrayResult<()>;

    fn set_icon(&mut self, icon: &Icon) -> TrayResult<()>;

    fn set_tooltip(&mut self, tooltip: Option<&str>) -> TrayResult<()>;

    /// Blocks until the native side has produced something. Backends that deliver
    /// everything through the channel return the next message directly.
    fn wait(&mut self, receiver: &Receiver<TrayMessage>) -> TrayResult<Option<TrayMessage>>;

    /// Handles whatever native events are pending without blocking.
    fn poll(&mut self) -> TrayResult<()>;

    fn waker(&self) -> Option<NativeWaker> {
        None
    }
}

/// Lifecycle of a tray.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TrayState {
    Constructed,
    /// Inside [`Tray::run`](crate::Tray::run).
    Running,
    /// Driven through [`Tray::pump`](crate::Tray::pump).
    Idle,
    Exited
}

/// Requests the tray loop to stop. Can be cloned into menu handlers and sent to
/// other threads.
#[derive(Clone)]
pub struct ExitHandle {
    requested: Arc<AtomicBool>,
    sender: MessageSender,
    waker: Option<NativeWaker>
}

impl ExitHandle {
    /// Asks the loop to stop at its next opportunity. Calling this more than once has no further effect.
    pub fn exit(&self) {
        if self.requested.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("Exit requested");
        self.sender
            .send(TrayMessage::Wake)
            .unwrap_or_else(|_| log::debug!("Tray already gone"));
        if let Some(waker) = &self.waker {
            waker();
        }
    }

    pub fn is_exit_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

impl Debug for ExitHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitHandle")
            .field("requested", &self.is_exit_requested())
            .finish()
    }
}

/// Platform independent half of a tray: entry bookkeeping, layout revisions,
/// click dispatch and the loop state machine.
pub(crate) struct TrayCore<B> {
    native: Option<B>,
    entries: Vec<TrayEntry>,
    layout: MenuLayout,
    receiver: Receiver<TrayMessage>,
    exit: ExitHandle,
    state: TrayState,
    refresh_pending: bool
}

impl<B: NativeTray> TrayCore<B> {
    pub fn new<I>(identifier: &str, icon: &Icon, tooltip: Option<&str>, entries: I) -> TrayResult<Self>
        where I: IntoIterator<Item = TrayEntry>
    {
        let (sender, receiver) = flume::unbounded();
        let native = B::create(identifier, icon, tooltip, sender.clone())?;
        log::trace!("Created native tray (identifier: {identifier})");
        let exit = ExitHandle {
            requested: Arc::new(AtomicBool::new(false)),
            sender,
            waker: native.waker()
        };
        let mut core = Self {
            native: Some(native),
            entries: Vec::new(),
            layout: MenuLayout::empty(0),
            receiver,
            exit,
            state: TrayState::Constructed,
            refresh_pending: false
        };
        core.add_entries(entries)?;
        Ok(core)
    }

    pub fn state(&self) -> TrayState {
        self.state
    }

    pub fn exit_handle(&self) -> ExitHandle {
        self.exit.clone()
    }

    pub fn entries(&self) -> &[TrayEntry] {
        &self.entries
    }

    pub fn add_entry(&mut self, entry: TrayEntry) -> TrayResult<TrayEntry> {
        self.entries.push(entry.clone());
        self.update()?;
        Ok(entry)
    }

    /// Adds all entries and refreshes the native menu once.
    pub fn add_entries<I>(&mut self, entries: I) -> TrayResult<()>
        where I: IntoIterator<Item = TrayEntry>
    {
        self.entries.extend(entries);
        self.update()
    }

    pub fn remove_entry(&mut self, entry: &TrayEntry) -> TrayResult<bool> {
        let before = self.entries.len();
        self.entries.retain(|e| !e.same_entry(entry));
        if before == self.entries.len() {
            return Ok(false);
        }
        self.update()?;
        Ok(true)
    }

    pub fn update(&mut self) -> TrayResult<()> {
        let Some(native) = self.native.as_mut() else {
            log::debug!("Ignoring update of an exited tray");
            return Ok(());
        };
        let layout = self.layout.rebuild(&self.entries);
        native.set_menu(&layout)?;
        self.layout = layout;
        Ok(())
    }

    pub fn set_icon(&mut self, icon: &Icon) -> TrayResult<()> {
        match self.native.as_mut() {
            Some(native) => native.set_icon(icon),
            None => Ok(())
        }
    }

    pub fn set_tooltip(&mut self, tooltip: Option<&str>) -> TrayResult<()> {
        match self.native.as_mut() {
            Some(native) => native.set_tooltip(tooltip),
            None => Ok(())
        }
    }

    pub fn run(&mut self) -> TrayResult<()> {
        if self.state == TrayState::Exited {
            log::debug!("Tray already exited");
            return Ok(());
        }
        self.state = TrayState::Running;
        loop {
            self.dispatch_pending()?;
            if self.exit.is_exit_requested() {
                break;
            }
            let Some(native) = self.native.as_mut() else { break };
            if let Some(message) = native.wait(&self.receiver)? {
                self.dispatch(message)?;
            }
        }
        self.shutdown();
        Ok(())
    }

    /// One non-blocking pass. Returns `false` once the tray has exited.
    pub fn pump(&mut self) -> TrayResult<bool> {
        if self.state == TrayState::Exited {
            return Ok(false);
        }
        self.state = TrayState::Idle;
        if let Some(native) = self.native.as_mut() {
            native.poll()?;
        }
        self.dispatch_pending()?;
        if self.exit.is_exit_requested() {
            self.shutdown();
            return Ok(false);
        }
        Ok(true)
    }

    /// Clicks already queued were made on the menu that is installed right now,
    /// so the refresh their handlers ask for waits until the queue is empty.
    fn dispatch_pending(&mut self) -> TrayResult<()> {
        while !self.exit.is_exit_requested() {
            let Ok(message) = self.receiver.try_recv() else { break };
            self.dispatch(message)?;
        }
        if std::mem::take(&mut self.refresh_pending) && !self.exit.is_exit_requested() {
            // the old menu stays usable, its clicks are checked against the old revision
            self.update()
                .unwrap_or_else(|err| log::warn!("Failed to refresh the menu: {err}"));
        }
        Ok(())
    }

    fn dispatch(&mut self, message: TrayMessage) -> TrayResult<()> {
        match message {
            TrayMessage::Activated { revision, id } => match self.layout.activate(revision, id) {
                Ok(Activation::Handled) => self.refresh_pending = true,
                Ok(Activation::Ignored) => log::trace!("Item {id} has no action"),
                Err(err) if err.kind() == TrayErrorKind::LateCallback => log::debug!("{err}"),
                Err(err) => return Err(err)
            },
            TrayMessage::Wake => {}
            TrayMessage::Quit => self.exit.exit()
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.state = TrayState::Exited;
        if let Some(native) = self.native.take() {
            log::trace!("Releasing native tray");
            drop(native);
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::thread;

    use super::mock::{click, find, shell, MockTray};
    use super::*;

    type Core = TrayCore<MockTray>;

    fn counter() -> (Arc<AtomicU32>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicU32::new(0));
        let handler = {
            let count = count.clone();
            move || { count.fetch_add(1, Ordering::SeqCst); }
        };
        (count, handler)
    }

    #[test]
    fn scenario_counter_and_submenu() {
        let shell = shell();
        let (a, on_a) = counter();
        let (b1, on_b1) = counter();
        let mut core = Core::new("app.test", &Icon::default(), None, [
            TrayEntry::button("A", on_a),
            TrayEntry::separator(),
            TrayEntry::submenu("B", [TrayEntry::button("B1", on_b1)])
        ]).unwrap();
        assert_eq!(shell.lock().identifier, "app.test");
        assert_eq!(shell.lock().menus_installed, 1);

        click(&shell, &["A"]);
        click(&shell, &["B", "B1"]);
        click(&shell, &["B"]);
        assert!(core.pump().unwrap());
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b1.load(Ordering::SeqCst), 1);
        assert_eq!(core.state(), TrayState::Idle);
    }

    #[test]
    fn entries_added_at_construction_share_one_update() {
        let shell = shell();
        let _core = Core::new("app.test", &Icon::default(), None, (0..5).map(|i| TrayEntry::label(i))).unwrap();
        let shell = shell.lock();
        assert_eq!(shell.menus_installed, 1);
        assert_eq!(shell.menu.len(), 5);
    }

    #[test]
    fn exit_from_a_handler_ends_run_once() {
        let shell = shell();
        let mut core = Core::new("app.test", &Icon::default(), None, []).unwrap();
        let exit = core.exit_handle();
        let (count, on_click) = counter();
        core.add_entry(TrayEntry::button("Quit", move || {
            on_click();
            exit.exit();
            exit.exit();
        })).unwrap();
        let id = find(&shell.lock().menu, &["Quit"]).unwrap();
        shell.lock().queued_clicks.push_back(vec![id, id]);

        core.run().unwrap();
        assert_eq!(core.state(), TrayState::Exited);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!shell.lock().registered);

        core.run().unwrap();
        assert!(!core.pump().unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exit_from_another_thread_wakes_run() {
        let _shell = shell();
        let mut core = Core::new("app.test", &Icon::default(), None, []).unwrap();
        let exit = core.exit_handle();
        let worker = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(20));
            exit.exit();
        });
        core.run().unwrap();
        worker.join().unwrap();
        assert_eq!(core.state(), TrayState::Exited);
    }

    #[test]
    fn exit_is_idempotent() {
        let _shell = shell();
        let mut core = Core::new("app.test", &Icon::default(), None, []).unwrap();
        let exit = core.exit_handle();
        for _ in 0..3 {
            exit.exit();
        }
        assert!(exit.is_exit_requested());
        assert!(!core.pump().unwrap());
        assert!(!core.pump().unwrap());
        assert_eq!(core.state(), TrayState::Exited);
    }

    #[test]
    fn clicks_after_an_update_do_not_hit_the_new_menu() {
        let shell = shell();
        let (first, on_first) = counter();
        let (second, on_second) = counter();
        let mut core = Core::new("app.test", &Icon::default(), None, [TrayEntry::button("first", on_first)]).unwrap();
        click(&shell, &["first"]);
        let old = core.entries()[0].clone();
        core.remove_entry(&old).unwrap();
        core.add_entry(TrayEntry::button("second", on_second)).unwrap();
        core.pump().unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn toggles_refresh_the_menu() {
        let shell = shell();
        let mut core = Core::new("app.test", &Icon::default(), None, [TrayEntry::toggle("T", false, |_| {})]).unwrap();
        assert!(!shell.lock().menu[0].checked);
        click(&shell, &["T"]);
        core.pump().unwrap();
        assert!(shell.lock().menu[0].checked);
        assert_eq!(shell.lock().menus_installed, 2);
    }

    #[test]
    fn updates_never_leave_dangling_items() {
        let shell = shell();
        let keep = TrayEntry::label("keep");
        let gone = TrayEntry::submenu("gone", [TrayEntry::label("child")]);
        let mut core = Core::new("app.test", &Icon::default(), None, [keep.clone(), gone.clone(), keep.clone()]).unwrap();
        assert!(core.remove_entry(&gone).unwrap());
        assert!(!core.remove_entry(&gone).unwrap());
        let menu = shell.lock().menu.clone();
        assert_eq!(menu.iter().map(|i| i.label.as_str()).collect::<Vec<_>>(), ["keep", "keep"]);
        assert_ne!(menu[0].id, menu[1].id);
    }

    #[test]
    fn exited_tray_ignores_updates() {
        let shell = shell();
        let mut core = Core::new("app.test", &Icon::default(), Some("tip"), []).unwrap();
        assert_eq!(shell.lock().tooltip.as_deref(), Some("tip"));
        core.exit_handle().exit();
        core.pump().unwrap();
        let installed = shell.lock().menus_installed;
        core.add_entry(TrayEntry::label("late")).unwrap();
        core.set_tooltip(Some("late")).unwrap();
        assert_eq!(shell.lock().menus_installed, installed);
        assert_eq!(shell.lock().tooltip.as_deref(), Some("tip"));
    }

    #[test]
    fn late_clicks_are_absorbed() {
        let shell = shell();
        let (count, handler) = counter();
        let mut core = Core::new("app.test", &Icon::default(), None, [TrayEntry::button("A", handler)]).unwrap();
        let sender = shell.lock().sender.clone().unwrap();
        sender.send(TrayMessage::Activated { revision: 99, id: 1 }).unwrap();
        sender.send(TrayMessage::Activated { revision: 1, id: 42 }).unwrap();
        assert!(core.pump().unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn platform_quit_stops_the_loop() {
        let shell = shell();
        let mut core = Core::new("app.test", &Icon::default(), None, []).unwrap();
        shell.lock().sender.clone().unwrap().send(TrayMessage::Quit).unwrap();
        core.run().unwrap();
        assert_eq!(core.state(), TrayState::Exited);
    }

    #[test]
    fn click_on_a_removed_item_never_runs_another_handler() {
        let shell = shell();
        let (a, on_a) = counter();
        let (b, on_b) = counter();
        let mut core = Core::new("app.test", &Icon::default(), None, [
            TrayEntry::button("A", on_a),
            TrayEntry::button("B", on_b)
        ]).unwrap();
        let old_a = find(&shell.lock().menu, &["A"]).unwrap();
        let first = core.entries()[0].clone();
        core.remove_entry(&first).unwrap();
        drop(first);

        // hosts that only report item ids get the current revision attached
        let (revision, sender) = {
            let shell = shell.lock();
            (shell.revision, shell.sender.clone().unwrap())
        };
        sender.send(TrayMessage::Activated { revision, id: old_a }).unwrap();
        assert!(core.pump().unwrap());
        assert_eq!((a.load(Ordering::SeqCst), b.load(Ordering::SeqCst)), (0, 0));

        click(&shell, &["B"]);
        core.pump().unwrap();
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn live_tray_takes_new_icon_and_tooltip() {
        let shell = shell();
        let mut core = Core::new("app.test", &Icon::default(), Some("before"), []).unwrap();
        let icon = Icon::from_rgba(vec![0; 4], 1, 1).unwrap();
        core.set_icon(&icon).unwrap();
        core.set_tooltip(Some("after")).unwrap();
        {
            let shell = shell.lock();
            assert_eq!(shell.icon.as_deref(), Some(format!("{icon:?}").as_str()));
            assert_eq!(shell.tooltip.as_deref(), Some("after"));
        }
        core.set_tooltip(None).unwrap();
        assert_eq!(shell.lock().tooltip, None);
        assert!(core.pump().unwrap());
    }
}
