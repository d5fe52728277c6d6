use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::Mutex;
use zbus::fdo;
use zbus::interface;
use zbus::object_server::SignalEmitter;
use zbus::zvariant::{OwnedValue, Str, Value};

use crate::entry::EntryRole;
use crate::menu::{MenuLayout, NodeRole, ROOT_ID};
use crate::tray::{MessageSender, TrayMessage};

/// A dbusmenu property value.
#[derive(Debug, Clone, Eq, PartialEq)]
enum Prop {
    Str(String),
    Int(i32),
    Bool(bool)
}

impl Prop {
    fn to_value(&self) -> OwnedValue {
        match self {
            Prop::Str(s) => OwnedValue::from(Str::from(s.clone())),
            Prop::Int(i) => OwnedValue::from(*i),
            Prop::Bool(b) => OwnedValue::from(*b)
        }
    }
}

type Properties = HashMap<&'static str, Prop>;

/// Items of one menu revision by their dbusmenu id.
type MenuEntries = BTreeMap<usize, MenuEntry>;

#[derive(Debug, Clone, Eq, PartialEq)]
struct MenuEntry {
    properties: Properties,
    children: Vec<usize>
}

impl MenuEntry {
    fn get_properties(&self, requested: &[String]) -> HashMap<String, OwnedValue> {
        self.properties
            .iter()
            .filter(|(k, _)| requested.is_empty() || requested.iter().any(|r| r == *k))
            .map(|(k, v)| (k.to_string(), v.to_value()))
            .collect()
    }
}

struct MenuSnapshot {
    revision: u32,
    entries: MenuEntries
}

/// Changes between two snapshots, in the shape the dbusmenu signals want them.
#[derive(Debug, Default, PartialEq)]
struct MenuDiff {
    layout_parent: Option<usize>,
    updated: Vec<(usize, Vec<&'static str>)>,
    removed: Vec<(usize, Vec<&'static str>)>
}

pub struct DBusMenu {
    snapshot: Mutex<MenuSnapshot>,
    sender: MessageSender
}

impl DBusMenu {
    pub fn new(sender: MessageSender) -> Self {
        Self {
            snapshot: Mutex::new(MenuSnapshot {
                revision: 0,
                entries: build_menu(&MenuLayout::empty(0))
            }),
            sender
        }
    }

    pub async fn update_menu(&self, layout: &MenuLayout, emitter: &SignalEmitter<'_>) -> zbus::Result<()> {
        let entries = build_menu(layout);
        let revision = layout.revision();
        let (diff, updated) = {
            let mut snapshot = self.snapshot.lock();
            let diff = generate_diff(&snapshot.entries, &entries);
            let updated: Vec<(i32, HashMap<String, OwnedValue>)> = diff
                .updated
                .iter()
                .map(|(id, keys)| {
                    let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
                    (*id as i32, entries[id].get_properties(&keys))
                })
                .collect();
            snapshot.entries = entries;
            snapshot.revision = revision;
            (diff, updated)
        };
        if let Some(parent) = diff.layout_parent {
            log::trace!("Sending layout update signal (parent: {parent}, revision: {revision})");
            Self::layout_updated(emitter, revision, parent as i32).await?;
        }
        if !updated.is_empty() || !diff.removed.is_empty() {
            let removed: Vec<(i32, Vec<String>)> = diff
                .removed
                .iter()
                .map(|(id, keys)| (*id as i32, keys.iter().map(|k| k.to_string()).collect()))
                .collect();
            log::trace!("Sending property update signal (Updated: {:?}, Removed: {:?})", diff.updated, diff.removed);
            Self::items_properties_updated(emitter, &updated, &removed).await?;
        }
        Ok(())
    }

    // dbusmenu events carry no revision. Item ids stay with their entry across
    // revisions, so a click from an outdated menu still finds its entry or nothing.
    fn clicked(&self, id: i32) {
        let revision = self.snapshot.lock().revision;
        let Ok(id) = usize::try_from(id) else { return };
        self.sender
            .send(TrayMessage::Activated { revision, id })
            .unwrap_or_else(|_| log::debug!("Dropping click on item {id}, the tray is gone"));
    }
}

fn build_menu(layout: &MenuLayout) -> MenuEntries {
    layout
        .nodes()
        .map(|(id, node)| {
            let mut properties = Properties::new();
            match node.role {
                NodeRole::Root => {
                    properties.insert("children-display", Prop::Str(String::from("submenu")));
                }
                NodeRole::Entry(EntryRole::Separator) => {
                    properties.insert("type", Prop::Str(String::from("separator")));
                }
                NodeRole::Entry(role) => {
                    properties.insert("label", Prop::Str(node.label.clone()));
                    if !node.enabled || role == EntryRole::Label {
                        properties.insert("enabled", Prop::Bool(false));
                    }
                    match role {
                        EntryRole::Toggle => {
                            properties.insert("toggle-type", Prop::Str(String::from("checkmark")));
                            properties.insert("toggle-state", Prop::Int(i32::from(node.checked)));
                        }
                        EntryRole::Submenu => {
                            properties.insert("children-display", Prop::Str(String::from("submenu")));
                        }
                        _ => {}
                    }
                }
            }
            (id, MenuEntry {
                properties,
                children: node.children.clone()
            })
        })
        .collect()
}

fn generate_diff(old: &MenuEntries, new: &MenuEntries) -> MenuDiff {
    let mut diff = MenuDiff::default();
    let mut changed = HashSet::new();
    // items only present on one side show up as a change of their parent's children
    for (&i, new) in new {
        let Some(old) = old.get(&i) else { continue };
        let mut removed: Vec<&'static str> = old.properties
            .keys()
            .filter(|k| !new.properties.contains_key(*k))
            .copied()
            .collect();
        removed.sort_unstable();
        if !removed.is_empty() {
            diff.removed.push((i, removed));
        }
        let mut updated: Vec<&'static str> = new.properties
            .iter()
            .filter(|(k, v)| old.properties.get(*k) != Some(*v))
            .map(|(k, _)| *k)
            .collect();
        updated.sort_unstable();
        if !updated.is_empty() {
            diff.updated.push((i, updated));
        }
        if new.children != old.children {
            changed.insert(i);
        }
    }
    diff.layout_parent = match changed.len() {
        0 => None,
        1 => changed.iter().next().copied(),
        _ => Some(find_common_root(new, &changed))
    };
    diff
}

/// Deepest node whose subtree contains every changed node.
fn find_common_root(entries: &MenuEntries, changed: &HashSet<usize>) -> usize {
    fn visit(entries: &MenuEntries, changed: &HashSet<usize>, id: usize, depth: usize, best: &mut (usize, usize)) -> usize {
        let Some(entry) = entries.get(&id) else { return 0 };
        let count = usize::from(changed.contains(&id)) + entry
            .children
            .iter()
            .map(|c| visit(entries, changed, *c, depth + 1, best))
            .sum::<usize>();
        if count == changed.len() && depth >= best.1 {
            *best = (id, depth);
        }
        count
    }
    let mut best = (ROOT_ID, 0);
    visit(entries, changed, ROOT_ID, 0, &mut best);
    best.0
}

fn collect(ids: &[usize], entries: &MenuEntries, property_names: &[String], depth: u32) -> Vec<OwnedValue> {
    match depth {
        0 => Vec::new(),
        _ => ids
            .iter()
            .filter_map(|id| {
                let entry = entries.get(id)?;
                let value = Value::new((
                    *id as i32,
                    entry.get_properties(property_names),
                    collect(&entry.children, entries, property_names, depth - 1)));
                OwnedValue::try_from(value)
                    .map_err(|err| log::warn!("Failed to encode menu item {id}: {err}"))
                    .ok()
            })
            .collect()
    }
}

fn lookup(entries: &MenuEntries, id: i32) -> fdo::Result<&MenuEntry> {
    usize::try_from(id)
        .ok()
        .and_then(|id| entries.get(&id))
        .ok_or_else(|| fdo::Error::InvalidArgs(format!("Unknown menu item {id}")))
}

#[interface(name = "com.canonical.dbusmenu")]
impl DBusMenu {

    fn get_layout(&self, parent_id: i32, recursion_depth: i32, property_names: Vec<String>) -> fdo::Result<(u32, (i32, HashMap<String, OwnedValue>, Vec<OwnedValue>))> {
        log::trace!("get_layout({}, {}, {:?})", parent_id, recursion_depth, property_names);
        let depth = u32::try_from(recursion_depth)
            .unwrap_or(u32::MAX);
        let snapshot = self.snapshot.lock();
        let entry = lookup(&snapshot.entries, parent_id)?;
        Ok((snapshot.revision, (parent_id, entry.get_properties(&property_names), collect(&entry.children, &snapshot.entries, &property_names, depth))))
    }

    fn get_group_properties(&self, ids: Vec<i32>, property_names: Vec<String>) -> Vec<(i32, HashMap<String, OwnedValue>)> {
        log::trace!("get_group_properties({:?}, {:?})", ids, property_names);
        let snapshot = self.snapshot.lock();
        snapshot.entries
            .iter()
            .filter(|(i, _)| ids.is_empty() || ids.contains(&(**i as i32)))
            .map(|(i, e)| (*i as i32, e.get_properties(&property_names)))
            .collect()
    }

    fn get_property(&self, id: i32, name: String) -> fdo::Result<OwnedValue> {
        log::trace!("get_property({:?}, {:?})", id, name);
        let snapshot = self.snapshot.lock();
        lookup(&snapshot.entries, id)?
            .properties
            .get(name.as_str())
            .map(Prop::to_value)
            .ok_or_else(|| fdo::Error::InvalidArgs(format!("Unknown property {name}")))
    }

    fn event(&self, id: i32, event_id: String, _data: OwnedValue, timestamp: u32) {
        log::trace!("event({}, {}, {})", id, event_id, timestamp);
        if event_id == "clicked" {
            self.clicked(id);
        }
    }

    fn event_group(&self, events: Vec<(i32, String, OwnedValue, u32)>) -> Vec<i32> {
        let mut unknown = Vec::new();
        for (id, event, data, timestamp) in events {
            let known = usize::try_from(id)
                .is_ok_and(|i| self.snapshot.lock().entries.contains_key(&i));
            match known {
                true => self.event(id, event, data, timestamp),
                false => unknown.push(id)
            }
        }
        unknown
    }

    fn about_to_show(&self, _id: i32) -> bool {
        false
    }

    fn about_to_show_group(&self, _ids: Vec<i32>) -> (Vec<i32>, Vec<i32>) {
        Default::default()
    }

    #[zbus(signal)]
    async fn item_activation_requested(emitter: &SignalEmitter<'_>, id: i32, timestamp: u32) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn items_properties_updated(emitter: &SignalEmitter<'_>, updated_props: &[(i32, HashMap<String, OwnedValue>)], removed_props: &[(i32, Vec<String>)]) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn layout_updated(emitter: &SignalEmitter<'_>, revision: u32, parent: i32) -> zbus::Result<()>;

    #[zbus(property)]
    fn icon_theme_path(&self) -> Vec<String> {
        Vec::new()
    }

    #[zbus(property)]
    fn status(&self) -> String {
        String::from("normal")
    }

    #[zbus(property)]
    fn text_direction(&self) -> String {
        String::from("ltr")
    }

    #[zbus(property)]
    fn version(&self) -> u32 {
        3
    }
}
