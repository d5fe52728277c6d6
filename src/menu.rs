use std::collections::HashMap;
use std::sync::Weak;

use crate::entry::{EntryInner, EntryRole, TrayEntry};
use crate::error::{TrayError, TrayResult};

/// Id of the invisible root node every layout starts with.
pub(crate) const ROOT_ID: usize = 0;

/// Identifies one appearance of an entry: parent item, entry address and
/// how often the entry already appeared under that parent.
type Slot = (usize, usize, usize);

/// Flattened menu tree handed to the native backends.
///
/// Nodes are stored in pre-order. A fresh layout numbers them in that order;
/// a layout made with [`MenuLayout::rebuild`] keeps the id of every entry that is
/// still in the same place and hands out never used ids for everything new, so
/// an id seen by the native side never points to a different entry.
pub(crate) struct MenuLayout {
    revision: u32,
    nodes: Vec<MenuNode>,
    positions: HashMap<usize, usize>,
    slots: HashMap<Slot, usize>,
    next_id: usize
}

pub(crate) struct MenuNode {
    pub id: usize,
    pub role: NodeRole,
    pub label: String,
    pub enabled: bool,
    pub checked: bool,
    pub children: Vec<usize>,
    target: Option<Weak<EntryInner>>
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum NodeRole {
    Root,
    Entry(EntryRole)
}

/// Outcome of a native click.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Activation {
    /// The entry ran its action.
    Handled,
    /// The item exists but has nothing to run (label, submenu, disabled entry).
    Ignored
}

impl MenuLayout {
    pub fn empty(revision: u32) -> Self {
        Self::construct(&[], revision)
    }

    /// Translates the entries into a fresh layout. The entries are only read.
    pub fn construct(entries: &[TrayEntry], revision: u32) -> Self {
        LayoutBuilder::new(None, ROOT_ID + 1).finish(entries, revision)
    }

    /// Next revision for `entries`, reusing the ids of this layout where the entries stayed.
    pub fn rebuild(&self, entries: &[TrayEntry]) -> Self {
        LayoutBuilder::new(Some(&self.slots), self.next_id).finish(entries, self.revision.wrapping_add(1))
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn root(&self) -> &MenuNode {
        &self.nodes[0]
    }

    pub fn get(&self, id: usize) -> Option<&MenuNode> {
        self.positions
            .get(&id)
            .map(|position| &self.nodes[*position])
    }

    /// All nodes in pre-order, root first.
    pub fn nodes(&self) -> impl ExactSizeIterator<Item = (usize, &MenuNode)> {
        self.nodes.iter().map(|node| (node.id, node))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Runs the action behind item `id` of layout `revision`.
    ///
    /// Clicks that refer to another revision, to an unknown item or to an entry
    /// that no longer exists are reported as [`TrayErrorKind::LateCallback`](crate::TrayErrorKind::LateCallback).
    pub fn activate(&self, revision: u32, id: usize) -> TrayResult<Activation> {
        if revision != self.revision {
            return Err(TrayError::late_callback(revision, id));
        }
        let node = self
            .get(id)
            .ok_or_else(|| TrayError::late_callback(revision, id))?;
        let Some(target) = node.target.as_ref() else {
            return Ok(Activation::Ignored);
        };
        let entry = target
            .upgrade()
            .ok_or_else(|| TrayError::late_callback(revision, id))?;
        Ok(match entry.activate() {
            true => Activation::Handled,
            false => Activation::Ignored
        })
    }
}

// The previous layout still holds a `Weak` to every entry it shows, so no entry
// address can be recycled while the ids of the next layout are decided.
struct LayoutBuilder<'a> {
    previous: Option<&'a HashMap<Slot, usize>>,
    nodes: Vec<MenuNode>,
    slots: HashMap<Slot, usize>,
    seen: HashMap<(usize, usize), usize>,
    ancestors: Vec<*const EntryInner>,
    next_id: usize
}

impl<'a> LayoutBuilder<'a> {
    fn new(previous: Option<&'a HashMap<Slot, usize>>, next_id: usize) -> Self {
        Self {
            previous,
            nodes: Vec::new(),
            slots: HashMap::new(),
            seen: HashMap::new(),
            ancestors: Vec::new(),
            next_id
        }
    }

    fn finish(mut self, entries: &[TrayEntry], revision: u32) -> MenuLayout {
        log::trace!("Building layout (revision: {revision})");
        self.nodes.push(MenuNode {
            id: ROOT_ID,
            role: NodeRole::Root,
            label: String::new(),
            enabled: true,
            checked: false,
            children: Vec::new(),
            target: None
        });
        let children = self.append_all(ROOT_ID, entries);
        self.nodes[0].children = children;
        let positions = self.nodes
            .iter()
            .enumerate()
            .map(|(position, node)| (node.id, position))
            .collect();
        MenuLayout {
            revision,
            nodes: self.nodes,
            positions,
            slots: self.slots,
            next_id: self.next_id
        }
    }

    fn assign(&mut self, parent: usize, entry: &TrayEntry) -> usize {
        let address = entry.key() as usize;
        let occurrence = self.seen.entry((parent, address)).or_insert(0);
        let slot = (parent, address, *occurrence);
        *occurrence += 1;
        let id = match self.previous.and_then(|previous| previous.get(&slot)) {
            Some(id) => *id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
        };
        self.slots.insert(slot, id);
        id
    }

    fn append_all(&mut self, parent: usize, entries: &[TrayEntry]) -> Vec<usize> {
        let mut ids = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = self.assign(parent, entry);
            let position = self.nodes.len();
            let role = entry.role();
            self.nodes.push(MenuNode {
                id,
                role: NodeRole::Entry(role),
                label: entry.text(),
                enabled: entry.is_enabled(),
                checked: entry.is_checked(),
                children: Vec::new(),
                target: Some(entry.downgrade())
            });
            if role == EntryRole::Submenu {
                if self.ancestors.contains(&entry.key()) {
                    log::warn!("Submenu {:?} contains itself, cutting the cycle", entry.text());
                } else {
                    self.ancestors.push(entry.key());
                    let children = self.append_all(id, &entry.children());
                    self.ancestors.pop();
                    self.nodes[position].children = children;
                }
            }
            ids.push(id);
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::TrayErrorKind;

    fn counter() -> (Arc<AtomicU32>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicU32::new(0));
        let handler = {
            let count = count.clone();
            move || { count.fetch_add(1, Ordering::SeqCst); }
        };
        (count, handler)
    }

    fn shape(layout: &MenuLayout, id: usize) -> String {
        let node = layout.get(id).unwrap();
        let children: Vec<String> = node.children.iter().map(|c| shape(layout, *c)).collect();
        match children.is_empty() {
            true => node.label.clone(),
            false => format!("{}[{}]", node.label, children.join(","))
        }
    }

    fn sample() -> Vec<TrayEntry> {
        vec![
            TrayEntry::button("A", || {}),
            TrayEntry::separator(),
            TrayEntry::submenu("B", [
                TrayEntry::label("B1"),
                TrayEntry::submenu("B2", [TrayEntry::toggle("B2a", true, |_| {})])
            ]),
            TrayEntry::label("C")
        ]
    }

    #[test]
    fn layout_mirrors_the_entries() {
        let layout = MenuLayout::construct(&sample(), 1);
        assert_eq!(layout.revision(), 1);
        assert_eq!(layout.len(), 7);
        assert_eq!(shape(&layout, ROOT_ID), "[A,,B[B1,B2[B2a]],C]");
        let toggle = layout.nodes().find(|(_, n)| n.label == "B2a").unwrap().1;
        assert!(toggle.checked);
        assert_eq!(toggle.role, NodeRole::Entry(EntryRole::Toggle));
    }

    #[test]
    fn construction_is_repeatable() {
        let entries = sample();
        let a = MenuLayout::construct(&entries, 1);
        let b = MenuLayout::construct(&entries, 2);
        assert_eq!(shape(&a, ROOT_ID), shape(&b, ROOT_ID));
        for ((ia, na), (ib, nb)) in a.nodes().zip(b.nodes()) {
            assert_eq!(ia, ib);
            assert_eq!(na.role, nb.role);
            assert_eq!(na.children, nb.children);
        }
    }

    #[test]
    fn children_come_after_their_parent() {
        let layout = MenuLayout::construct(&sample(), 0);
        for (id, node) in layout.nodes() {
            assert!(node.children.iter().all(|c| *c > id));
        }
    }

    #[test]
    fn click_reaches_exactly_one_handler() {
        let (a, on_a) = counter();
        let (b, on_b) = counter();
        let (c, on_c) = counter();
        let entries = vec![
            TrayEntry::button("x", on_a),
            TrayEntry::submenu("s", [TrayEntry::button("x", on_b)]),
            TrayEntry::button("x", on_c)
        ];
        let layout = MenuLayout::construct(&entries, 4);
        let inner = layout.root().children[1];
        let inner_child = layout.get(inner).unwrap().children[0];
        assert_eq!(layout.activate(4, inner_child).unwrap(), Activation::Handled);
        assert_eq!((a.load(Ordering::SeqCst), b.load(Ordering::SeqCst), c.load(Ordering::SeqCst)), (0, 1, 0));
        assert_eq!(layout.activate(4, inner).unwrap(), Activation::Ignored);
        assert_eq!(layout.activate(4, ROOT_ID).unwrap(), Activation::Ignored);
    }

    #[test]
    fn stale_and_unknown_clicks_are_late() {
        let (count, handler) = counter();
        let entries = vec![TrayEntry::button("A", handler)];
        let layout = MenuLayout::construct(&entries, 2);
        assert_eq!(layout.activate(1, 1).unwrap_err().kind(), TrayErrorKind::LateCallback);
        assert_eq!(layout.activate(2, 99).unwrap_err().kind(), TrayErrorKind::LateCallback);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropped_entries_are_late() {
        let (count, handler) = counter();
        let layout = MenuLayout::construct(&[TrayEntry::button("A", handler)], 0);
        assert_eq!(layout.activate(0, 1).unwrap_err().kind(), TrayErrorKind::LateCallback);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn submenu_cycles_are_cut() {
        let outer = TrayEntry::submenu("outer", []);
        let inner = TrayEntry::submenu("inner", [outer.clone()]);
        outer.push_child(inner.clone());
        let layout = MenuLayout::construct(&[outer.clone()], 0);
        assert_eq!(shape(&layout, ROOT_ID), "[outer[inner[outer]]]");
        // break the Arc cycle so the test does not leak
        outer.remove_child(&inner);
    }

    #[test]
    fn repeated_entries_get_distinct_ids() {
        let (count, handler) = counter();
        let entry = TrayEntry::button("dup", handler);
        let layout = MenuLayout::construct(&[entry.clone(), entry.clone()], 0);
        assert_eq!(layout.root().children, [1, 2]);
        layout.activate(0, 2).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rebuild_keeps_ids_of_remaining_entries() {
        let a = TrayEntry::button("A", || {});
        let b = TrayEntry::submenu("B", [TrayEntry::label("B1")]);
        let first = MenuLayout::construct(&[a.clone(), b.clone()], 1);
        let b_id = first.root().children[1];
        let b1_id = first.get(b_id).unwrap().children[0];

        let second = first.rebuild(&[b.clone()]);
        assert_eq!(second.revision(), 2);
        assert_eq!(second.root().children, [b_id]);
        assert_eq!(second.get(b_id).unwrap().children, [b1_id]);
        assert!(second.get(first.root().children[0]).is_none());
    }

    #[test]
    fn ids_of_removed_entries_are_never_handed_out_again() {
        let a = TrayEntry::button("A", || {});
        let first = MenuLayout::construct(&[a.clone()], 1);
        let old = first.root().children[0];
        let second = first.rebuild(&[]);
        let third = second.rebuild(&[a.clone(), TrayEntry::label("new")]);
        let ids = &third.root().children;
        assert!(ids.iter().all(|id| *id > old));
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn click_on_a_removed_item_does_not_reach_its_successor() {
        let (a, on_a) = counter();
        let (b, on_b) = counter();
        let first_entry = TrayEntry::button("A", on_a);
        let second_entry = TrayEntry::button("B", on_b);
        let first = MenuLayout::construct(&[first_entry, second_entry.clone()], 1);
        let removed = first.root().children[0];

        let second = first.rebuild(&[second_entry]);
        let err = second.activate(second.revision(), removed).unwrap_err();
        assert_eq!(err.kind(), TrayErrorKind::LateCallback);
        assert_eq!((a.load(Ordering::SeqCst), b.load(Ordering::SeqCst)), (0, 0));
    }
}
