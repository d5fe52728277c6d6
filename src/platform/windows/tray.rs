use std::cell::Cell;
use std::mem::{size_of, zeroed};

use windows_sys::Win32::Foundation::HWND;
use windows_sys::Win32::UI::Shell::{
    Shell_NotifyIconW, NIF_ICON, NIF_MESSAGE, NIF_TIP, NIM_ADD, NIM_DELETE, NIM_MODIFY, NOTIFYICONDATAW,
    NOTIFY_ICON_MESSAGE
};
use windows_sys::Win32::UI::WindowsAndMessaging::HICON;

use crate::error::TrayResult;
use crate::platform::windows::error_check;

/// What to send along with a notify call. `None` fields are left untouched by the shell.
#[derive(Debug, Default, Copy, Clone)]
pub struct IconFields<'a> {
    pub message: Option<u32>,
    pub icon: Option<HICON>,
    /// An empty tooltip clears it.
    pub tooltip: Option<&'a str>
}

/// The notification area icon owned by one message window.
#[derive(Debug)]
pub struct NotifyIcon {
    hwnd: HWND,
    id: u32,
    added: Cell<bool>
}

impl NotifyIcon {
    pub fn new(hwnd: HWND, id: u32) -> Self {
        Self {
            hwnd,
            id,
            added: Cell::new(false)
        }
    }

    pub fn add(&self, fields: IconFields) -> TrayResult<()> {
        self.notify(NIM_ADD, fields)?;
        self.added.set(true);
        Ok(())
    }

    pub fn modify(&self, fields: IconFields) -> TrayResult<()> {
        self.notify(NIM_MODIFY, fields)
    }

    /// Removes the icon if the shell ever accepted it.
    pub fn remove(&self) -> TrayResult<()> {
        if !self.added.replace(false) {
            log::trace!("Icon {} was never added, nothing to remove", self.id);
            return Ok(());
        }
        self.notify(NIM_DELETE, IconFields::default())
    }

    fn notify(&self, action: NOTIFY_ICON_MESSAGE, fields: IconFields) -> TrayResult<()> {
        let mut data: NOTIFYICONDATAW = unsafe { zeroed() };
        data.cbSize = size_of::<NOTIFYICONDATAW>() as u32;
        data.hWnd = self.hwnd;
        data.uID = self.id;
        if let Some(message) = fields.message {
            data.uFlags |= NIF_MESSAGE;
            data.uCallbackMessage = message;
        }
        if let Some(icon) = fields.icon {
            data.uFlags |= NIF_ICON;
            data.hIcon = icon;
        }
        if let Some(tooltip) = fields.tooltip {
            data.uFlags |= NIF_TIP;
            copy_wide_truncated(&mut data.szTip, tooltip);
        }
        log::trace!("Shell_NotifyIconW(action: {action}, id: {}, flags: 0x{:x})", self.id, data.uFlags);
        error_check(unsafe { Shell_NotifyIconW(action, &data) })?;
        Ok(())
    }
}

/// Copies `src` into the fixed buffer, always leaving room for the terminating zero.
fn copy_wide_truncated(dst: &mut [u16], src: &str) -> usize {
    let capacity = dst.len().saturating_sub(1);
    let mut written = 0;
    for (slot, c) in dst.iter_mut().zip(src.encode_utf16().take(capacity)) {
        *slot = c;
        written += 1;
    }
    if let Some(end) = dst.get_mut(written) {
        *end = 0;
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_terminated() {
        let mut buffer = [7u16; 8];
        assert_eq!(copy_wide_truncated(&mut buffer, "tray"), 4);
        assert_eq!(&buffer[..5], &[b't' as u16, b'r' as u16, b'a' as u16, b'y' as u16, 0]);
    }

    #[test]
    fn icons_that_were_never_added_are_not_removed() {
        // a shell call with this window would fail
        let icon = NotifyIcon::new(std::ptr::null_mut(), 1);
        assert!(icon.remove().is_ok());
        assert!(icon.remove().is_ok());
    }

    #[test]
    fn long_text_is_cut() {
        let mut buffer = [7u16; 4];
        assert_eq!(copy_wide_truncated(&mut buffer, "too long"), 3);
        assert_eq!(buffer[3], 0);
    }
}
