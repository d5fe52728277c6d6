use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

pub(crate) type ClickHandler = Arc<dyn Fn() + Send + Sync + 'static>;
pub(crate) type ToggleHandler = Arc<dyn Fn(bool) + Send + Sync + 'static>;

/// One row of a tray menu.
///
/// Entries are shared handles: cloning yields another reference to the same
/// row, so an entry kept by the application can be modified after it was
/// added to a tray. Modifications become visible with the next
/// [`Tray::update`](crate::Tray::update).
#[derive(Clone)]
pub struct TrayEntry {
    inner: Arc<EntryInner>
}

pub(crate) struct EntryInner {
    kind: EntryKind,
    state: Mutex<EntryState>
}

enum EntryKind {
    Label,
    Separator,
    Button(ClickHandler),
    Toggle(ToggleHandler),
    SyncedToggle {
        value: Arc<AtomicBool>,
        handler: ToggleHandler
    },
    Submenu
}

struct EntryState {
    label: String,
    enabled: bool,
    checked: bool,
    children: Vec<TrayEntry>
}

/// What the native menu needs to know about an entry.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum EntryRole {
    Label,
    Separator,
    Button,
    Toggle,
    Submenu
}

impl TrayEntry {
    fn new(kind: EntryKind, label: String) -> Self {
        Self {
            inner: Arc::new(EntryInner {
                kind,
                state: Mutex::new(EntryState {
                    label,
                    enabled: true,
                    checked: false,
                    children: Vec::new()
                })
            })
        }
    }

    /// Plain text row without an action.
    pub fn label<S: ToString>(text: S) -> Self {
        Self::new(EntryKind::Label, text.to_string())
    }

    pub fn separator() -> Self {
        Self::new(EntryKind::Separator, String::new())
    }

    pub fn button<S, F>(text: S, handler: F) -> Self
        where S: ToString, F: Fn() + Send + Sync + 'static
    {
        Self::new(EntryKind::Button(Arc::new(handler)), text.to_string())
    }

    /// A checkable row. Every click flips the state and reports the new value.
    pub fn toggle<S, F>(text: S, checked: bool, handler: F) -> Self
        where S: ToString, F: Fn(bool) + Send + Sync + 'static
    {
        let entry = Self::new(EntryKind::Toggle(Arc::new(handler)), text.to_string());
        entry.inner.state.lock().checked = checked;
        entry
    }

    /// A toggle whose state lives in `value`, so that it can be shared with the rest
    /// of the application. External writes show up after the next update.
    pub fn synced_toggle<S, F>(text: S, value: Arc<AtomicBool>, handler: F) -> Self
        where S: ToString, F: Fn(bool) + Send + Sync + 'static
    {
        Self::new(EntryKind::SyncedToggle { value, handler: Arc::new(handler) }, text.to_string())
    }

    pub fn submenu<S, I>(text: S, children: I) -> Self
        where S: ToString, I: IntoIterator<Item = TrayEntry>
    {
        let entry = Self::new(EntryKind::Submenu, text.to_string());
        entry.inner.state.lock().children.extend(children);
        entry
    }

    pub fn with_enabled(self, enabled: bool) -> Self {
        self.set_enabled(enabled);
        self
    }

    pub fn text(&self) -> String {
        self.inner.state.lock().label.clone()
    }

    pub fn set_text<S: ToString>(&self, text: S) {
        self.inner.state.lock().label = text.to_string();
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.state.lock().enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.state.lock().enabled = enabled;
    }

    /// Check state of toggles; always `false` for other entries.
    pub fn is_checked(&self) -> bool {
        match &self.inner.kind {
            EntryKind::Toggle(_) => self.inner.state.lock().checked,
            EntryKind::SyncedToggle { value, .. } => value.load(Ordering::Acquire),
            _ => false
        }
    }

    pub fn set_checked(&self, checked: bool) {
        match &self.inner.kind {
            EntryKind::Toggle(_) => self.inner.state.lock().checked = checked,
            EntryKind::SyncedToggle { value, .. } => value.store(checked, Ordering::Release),
            _ => log::debug!("Ignoring check state for a non toggle entry")
        }
    }

    /// Children of a submenu, empty for every other entry.
    pub fn children(&self) -> Vec<TrayEntry> {
        self.inner.state.lock().children.clone()
    }

    /// Appends to a submenu. Returns `false` if this entry is not a submenu.
    pub fn push_child(&self, child: TrayEntry) -> bool {
        if !self.is_submenu() {
            return false;
        }
        self.inner.state.lock().children.push(child);
        true
    }

    /// Removes every occurrence of `child` from a submenu.
    pub fn remove_child(&self, child: &TrayEntry) -> bool {
        let mut state = self.inner.state.lock();
        let before = state.children.len();
        state.children.retain(|c| !c.same_entry(child));
        before != state.children.len()
    }

    pub fn is_submenu(&self) -> bool {
        matches!(self.inner.kind, EntryKind::Submenu)
    }

    /// Whether both handles refer to the same row.
    pub fn same_entry(&self, other: &TrayEntry) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn role(&self) -> EntryRole {
        match self.inner.kind {
            EntryKind::Label => EntryRole::Label,
            EntryKind::Separator => EntryRole::Separator,
            EntryKind::Button(_) => EntryRole::Button,
            EntryKind::Toggle(_) | EntryKind::SyncedToggle { .. } => EntryRole::Toggle,
            EntryKind::Submenu => EntryRole::Submenu
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<EntryInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn key(&self) -> *const EntryInner {
        Arc::as_ptr(&self.inner)
    }
}

impl EntryInner {
    /// Runs the click action. Returns `false` when the entry has nothing to run
    /// or is disabled.
    pub(crate) fn activate(&self) -> bool {
        if !self.state.lock().enabled {
            return false;
        }
        match &self.kind {
            EntryKind::Button(handler) => {
                handler();
                true
            }
            EntryKind::Toggle(handler) => {
                let checked = {
                    let mut state = self.state.lock();
                    state.checked = !state.checked;
                    state.checked
                };
                handler(checked);
                true
            }
            EntryKind::SyncedToggle { value, handler } => {
                let checked = !value.fetch_xor(true, Ordering::AcqRel);
                handler(checked);
                true
            }
            EntryKind::Label | EntryKind::Separator | EntryKind::Submenu => false
        }
    }
}

impl Debug for TrayEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TrayEntry")
            .field("role", &self.role())
            .field("label", &state.label)
            .field("enabled", &state.enabled)
            .field("children", &state.children.len())
            .finish()
    }
}
