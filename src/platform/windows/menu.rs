use windows_sys::Win32::Foundation::{HWND, POINT};
use windows_sys::Win32::UI::WindowsAndMessaging::{
    AppendMenuW, CreatePopupMenu, DestroyMenu, GetCursorPos, SetForegroundWindow, TrackPopupMenu, HMENU,
    MENU_ITEM_FLAGS, MF_CHECKED, MF_GRAYED, MF_POPUP, MF_SEPARATOR, MF_STRING, TPM_BOTTOMALIGN, TPM_NONOTIFY,
    TPM_RETURNCMD, TPM_RIGHTBUTTON
};

use crate::ensure;
use crate::entry::EntryRole;
use crate::error::{TrayError, TrayResult};
use crate::menu::{MenuLayout, NodeRole};
use crate::platform::windows::{encode_wide, error_check};

/// A popup menu. Command `n` stands for the `n`-th item of the layout in pre-order.
pub struct NativeMenu {
    hmenu: HMENU,
    revision: u32,
    commands: Vec<usize>
}

impl NativeMenu {
    pub fn from_layout(layout: &MenuLayout) -> TrayResult<Self> {
        check_command_range(layout.len())?;
        let hmenu = error_check(unsafe { CreatePopupMenu() })?;
        let mut menu = Self {
            hmenu,
            revision: layout.revision(),
            commands: Vec::with_capacity(layout.len())
        };
        add_all(menu.hmenu, &mut menu.commands, layout, &layout.root().children)?;
        Ok(menu)
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// Shows the menu at the cursor and blocks until it closes. Returns the picked item id.
    pub fn show_on_cursor(&self, hwnd: HWND) -> TrayResult<Option<usize>> {
        let mut cursor = POINT { x: 0, y: 0 };
        error_check(unsafe { GetCursorPos(&mut cursor) })?;
        // without this the menu does not close when clicking elsewhere
        unsafe { SetForegroundWindow(hwnd) };
        let id = unsafe {
            TrackPopupMenu(
                self.hmenu,
                TPM_BOTTOMALIGN | TPM_RIGHTBUTTON | TPM_RETURNCMD | TPM_NONOTIFY,
                cursor.x,
                cursor.y,
                0,
                hwnd,
                std::ptr::null()
            )
        };
        let command = usize::try_from(id).unwrap_or(0);
        Ok(command
            .checked_sub(1)
            .and_then(|index| self.commands.get(index))
            .copied())
    }
}

impl Drop for NativeMenu {
    fn drop(&mut self) {
        log::trace!("Destroying native menu (revision: {})", self.revision);
        if let Err(err) = error_check(unsafe { DestroyMenu(self.hmenu) }) {
            log::warn!("Failed to destroy menu: {err}");
        }
    }
}

/// Command ids travel in the low word of `WM_COMMAND`, zero means nothing was picked.
fn check_command_range(items: usize) -> TrayResult<()> {
    ensure!(items <= u16::MAX as usize, TrayError::custom(format!("menu has {items} items, at most {} fit into command ids", u16::MAX)));
    Ok(())
}

fn add_all(hmenu: HMENU, commands: &mut Vec<usize>, layout: &MenuLayout, ids: &[usize]) -> TrayResult<()> {
    for &id in ids {
        let Some(node) = layout.get(id) else { continue };
        let NodeRole::Entry(role) = node.role else { continue };
        let mut flags: MENU_ITEM_FLAGS = match role {
            EntryRole::Separator => {
                error_check(unsafe { AppendMenuW(hmenu, MF_SEPARATOR, 0, std::ptr::null()) })?;
                continue;
            }
            _ => MF_STRING
        };
        if !node.enabled || role == EntryRole::Label {
            flags |= MF_GRAYED;
        }
        if role == EntryRole::Toggle && node.checked {
            flags |= MF_CHECKED;
        }
        let wide = encode_wide(&node.label);
        match role {
            EntryRole::Submenu => {
                let submenu = error_check(unsafe { CreatePopupMenu() })?;
                let appended = add_all(submenu, commands, layout, &node.children)
                    .and_then(|_| error_check(unsafe { AppendMenuW(hmenu, flags | MF_POPUP, submenu as usize, wide.as_ptr()) }));
                if let Err(err) = appended {
                    unsafe { DestroyMenu(submenu) };
                    return Err(err);
                }
            }
            _ => {
                commands.push(id);
                error_check(unsafe { AppendMenuW(hmenu, flags, commands.len(), wide.as_ptr()) })?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrayErrorKind;

    #[test]
    fn oversized_menus_are_refused() {
        assert!(check_command_range(1).is_ok());
        assert!(check_command_range(u16::MAX as usize).is_ok());
        let err = check_command_range(u16::MAX as usize + 1).unwrap_err();
        assert_eq!(err.kind(), TrayErrorKind::Custom);
    }
}
