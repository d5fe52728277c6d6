use objc2::rc::Retained;
use objc2::runtime::AnyObject;
use objc2_app_kit::{NSControlStateValueOff, NSControlStateValueOn, NSMenu, NSMenuItem};
use objc2_foundation::{MainThreadMarker, NSInteger, NSString};

use crate::entry::EntryRole;
use crate::menu::{MenuLayout, NodeRole};
use crate::platform::macos::callback::SystemTrayCallback;

unsafe fn build_menu_item(mtm: MainThreadMarker, layout: &MenuLayout, id: usize, callback: &SystemTrayCallback) -> Option<Retained<NSMenuItem>> {
    let node = layout.get(id)?;
    let NodeRole::Entry(role) = node.role else { return None };
    if role == EntryRole::Separator {
        return Some(NSMenuItem::separatorItem(mtm));
    }
    let item = NSMenuItem::initWithTitle_action_keyEquivalent(
        mtm.alloc(),
        &NSString::from_str(&node.label),
        None,
        &NSString::from_str("")
    );
    item.setEnabled(node.enabled && role != EntryRole::Label);
    match role {
        EntryRole::Submenu => {
            let sub = build_menu(mtm, layout, &node.children, callback);
            item.setSubmenu(Some(&sub));
        }
        EntryRole::Button | EntryRole::Toggle => {
            if role == EntryRole::Toggle {
                item.setState(match node.checked {
                    true => NSControlStateValueOn,
                    false => NSControlStateValueOff
                });
            }
            let target: &AnyObject = callback;
            item.setTarget(Some(target));
            item.setAction(Some(SystemTrayCallback::menu_item_selector()));
            item.setTag(id as NSInteger);
        }
        EntryRole::Label | EntryRole::Separator => {}
    }
    Some(item)
}

unsafe fn build_menu(mtm: MainThreadMarker, layout: &MenuLayout, ids: &[usize], callback: &SystemTrayCallback) -> Retained<NSMenu> {
    let menu = NSMenu::new(mtm);
    // enabled state comes from the entries, not from target validation
    menu.setAutoenablesItems(false);
    for &id in ids {
        if let Some(item) = build_menu_item(mtm, layout, id, callback) {
            menu.addItem(&item);
        }
    }
    menu
}

pub fn construct_native_menu(mtm: MainThreadMarker, layout: &MenuLayout, callback: &SystemTrayCallback) -> Retained<NSMenu> {
    unsafe { build_menu(mtm, layout, &layout.root().children, callback) }
}
