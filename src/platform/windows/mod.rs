mod icon;
mod menu;
mod tray;

use std::cell::RefCell;
use std::iter::once;
use std::mem::zeroed;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Once, OnceLock};

use flume::Receiver;
use windows_sys::Win32::Foundation::{HINSTANCE, HWND, LPARAM, LRESULT, WPARAM};
use windows_sys::Win32::System::SystemServices::IMAGE_DOS_HEADER;
use windows_sys::Win32::UI::Shell::{DefSubclassProc, RemoveWindowSubclass, SetWindowSubclass};
use windows_sys::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW, PeekMessageW, PostMessageW,
    RegisterClassW, RegisterWindowMessageW, TranslateMessage, HWND_MESSAGE, MSG, PM_REMOVE, WM_APP, WM_DESTROY,
    WM_LBUTTONUP, WM_QUIT, WM_RBUTTONUP, WNDCLASSW
};

pub use crate::platform::windows::icon::NativeIcon;
use crate::ensure;
use crate::error::{ErrorSource, TrayError, TrayResult};
use crate::icon::Icon;
use crate::menu::MenuLayout;
use crate::platform::windows::menu::NativeMenu;
use crate::platform::windows::tray::{IconFields, NotifyIcon};
use crate::tray::{MessageSender, NativeTray, NativeWaker, TrayMessage};

const TRAY_SUBCLASS_ID: usize = 6001;
const WM_USER_TRAY_ICON: u32 = WM_APP + 1;
const WM_USER_WAKE: u32 = WM_APP + 2;

pub struct NativeTrayIcon {
    hwnd: HWND,
    data: Box<RefCell<TrayData>>
}

/// State the subclass proc reads while handling shell notifications.
struct TrayData {
    notify: NotifyIcon,
    icon: NativeIcon,
    tooltip: Option<String>,
    menu: Option<NativeMenu>,
    sender: MessageSender
}

impl TrayData {
    fn register(&self) -> TrayResult<()> {
        self.notify.add(IconFields {
            message: Some(WM_USER_TRAY_ICON),
            icon: Some(self.icon.handle()),
            tooltip: self.tooltip.as_deref()
        })
    }
}

impl NativeTray for NativeTrayIcon {
    fn create(identifier: &str, icon: &Icon, tooltip: Option<&str>, sender: MessageSender) -> TrayResult<Self> {
        let tray_id = GLOBAL_TRAY_COUNTER.fetch_add(1, Ordering::Relaxed);

        let title = encode_wide(identifier);
        let hwnd = unsafe {
            CreateWindowExW(
                0,
                get_class_name().as_ptr(),
                title.as_ptr(),
                0,
                0, 0,
                0, 0,
                HWND_MESSAGE,
                null_mut(),
                get_instance_handle(),
                std::ptr::null()
            )
        };
        ensure!(!hwnd.is_null(), TrayError::registration(format!("failed to create message window: {}", windows_result::Error::from_win32())));
        log::trace!("Created new message window (tray id: {tray_id})");

        let data = Box::new(RefCell::new(TrayData {
            notify: NotifyIcon::new(hwnd, tray_id),
            icon: NativeIcon::from_icon(icon),
            tooltip: tooltip.map(str::to_string),
            menu: None,
            sender
        }));

        let tray = NativeTrayIcon {
            hwnd,
            data
        };

        error_check(unsafe {
            SetWindowSubclass(
                hwnd,
                Some(tray_subclass_proc),
                TRAY_SUBCLASS_ID,
                &*tray.data as *const RefCell<TrayData> as usize)
        })?;

        tray.data
            .borrow()
            .register()
            .map_err(|err| TrayError::registration(format!("Shell_NotifyIconW refused the icon: {err}")))?;

        Ok(tray)
    }

    fn set_menu(&mut self, layout: &MenuLayout) -> TrayResult<()> {
        let menu = NativeMenu::from_layout(layout)?;
        self.data.borrow_mut().menu = Some(menu);
        Ok(())
    }

    fn set_icon(&mut self, icon: &Icon) -> TrayResult<()> {
        let icon = NativeIcon::from_icon(icon);
        self.data.borrow().notify.modify(IconFields {
            icon: Some(icon.handle()),
            ..Default::default()
        })?;
        self.data.borrow_mut().icon = icon;
        Ok(())
    }

    fn set_tooltip(&mut self, tooltip: Option<&str>) -> TrayResult<()> {
        self.data.borrow().notify.modify(IconFields {
            tooltip: Some(tooltip.unwrap_or_default()),
            ..Default::default()
        })?;
        self.data.borrow_mut().tooltip = tooltip.map(str::to_string);
        Ok(())
    }

    fn wait(&mut self, _receiver: &Receiver<TrayMessage>) -> TrayResult<Option<TrayMessage>> {
        let mut msg: MSG = unsafe { zeroed() };
        match unsafe { GetMessageW(&mut msg, null_mut(), 0, 0) } {
            -1 => Err(windows_result::Error::from_win32().into()),
            0 => Ok(Some(TrayMessage::Quit)),
            _ => {
                unsafe {
                    TranslateMessage(&msg);
                    DispatchMessageW(&msg);
                }
                Ok(None)
            }
        }
    }

    fn poll(&mut self) -> TrayResult<()> {
        let mut msg: MSG = unsafe { zeroed() };
        while unsafe { PeekMessageW(&mut msg, null_mut(), 0, 0, PM_REMOVE) } != 0 {
            if msg.message == WM_QUIT {
                self.data
                    .borrow()
                    .sender
                    .send(TrayMessage::Quit)
                    .unwrap_or_else(|_| log::debug!("Tray already gone"));
                break;
            }
            unsafe {
                TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
        Ok(())
    }

    fn waker(&self) -> Option<NativeWaker> {
        let hwnd = self.hwnd as usize;
        Some(Arc::new(move || {
            if unsafe { PostMessageW(hwnd as HWND, WM_USER_WAKE, 0, 0) } == 0 {
                log::debug!("Failed to wake the message loop: {}", windows_result::Error::from_win32());
            }
        }))
    }
}

impl Drop for NativeTrayIcon {
    fn drop(&mut self) {
        {
            let data = self.data.borrow();
            log::trace!("Destroying message window ({:?})", data.notify);
            data.notify
                .remove()
                .unwrap_or_else(|err| log::warn!("Failed to remove tray icon: {err}"));
        }
        unsafe {
            RemoveWindowSubclass(self.hwnd, Some(tray_subclass_proc), TRAY_SUBCLASS_ID);
        }
        error_check(unsafe { DestroyWindow(self.hwnd) })
            .map(|_| ())
            .unwrap_or_else(|err| log::warn!("Failed to destroy message window: {err}"));
    }
}

unsafe extern "system" fn tray_subclass_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM, _id: usize, data_ptr: usize) -> LRESULT {
    // the box outlives the subclass, see `Drop for NativeTrayIcon`
    let data = &*(data_ptr as *const RefCell<TrayData>);
    match msg {
        WM_DESTROY => log::trace!("Message window destroyed"),
        WM_USER_WAKE => log::trace!("Woken up"),
        _ if msg == taskbar_restart_message() => {
            log::debug!("Taskbar restarted, adding the icon again");
            if let Ok(data) = data.try_borrow() {
                data.register()
                    .unwrap_or_else(|err| log::warn!("Failed to re-add tray icon: {err}"));
            }
        }
        WM_USER_TRAY_ICON => match lparam as u32 {
            WM_LBUTTONUP | WM_RBUTTONUP => match data.try_borrow() {
                Ok(data) => if let Some(menu) = data.menu.as_ref() {
                    match menu.show_on_cursor(hwnd) {
                        Ok(Some(id)) => data.sender
                            .send(TrayMessage::Activated { revision: menu.revision(), id })
                            .unwrap_or_else(|_| log::debug!("Dropping click on item {id}, the tray is gone")),
                        Ok(None) => {}
                        Err(err) => log::warn!("Failed to show menu: {err}")
                    }
                },
                Err(_) => log::debug!("Menu is already open")
            },
            _ => {}
        },
        _ => {}
    }
    DefSubclassProc(hwnd, msg, wparam, lparam)
}

static GLOBAL_TRAY_COUNTER: AtomicU32 = AtomicU32::new(1);

fn taskbar_restart_message() -> u32 {
    static MESSAGE: OnceLock<u32> = OnceLock::new();
    *MESSAGE.get_or_init(|| {
        let name = encode_wide("TaskbarCreated");
        unsafe { RegisterWindowMessageW(name.as_ptr()) }
    })
}

fn get_class_name() -> &'static [u16] {
    static INITIALIZED: Once = Once::new();
    static CLASS_NAME: OnceLock<Vec<u16>> = OnceLock::new();

    let class_name = CLASS_NAME.get_or_init(|| encode_wide("trayport_message_window"));

    INITIALIZED.call_once(|| {
        let hinstance = get_instance_handle();

        unsafe extern "system" fn tray_icon_window_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
            DefWindowProcW(hwnd, msg, wparam, lparam)
        }

        let mut wnd_class: WNDCLASSW = unsafe { zeroed() };
        wnd_class.lpfnWndProc = Some(tray_icon_window_proc);
        wnd_class.hInstance = hinstance;
        wnd_class.lpszClassName = class_name.as_ptr();
        let class = unsafe { RegisterClassW(&wnd_class) };
        log::trace!("Registered tray window class: 0x{:x}", class);
    });

    class_name
}

fn encode_wide(string: &str) -> Vec<u16> {
    string
        .encode_utf16()
        .chain(once(0))
        .collect()
}

/// Win32 return values that signal failure through zero or null.
trait Win32Return: Copy {
    fn failed(self) -> bool;
}

impl Win32Return for i32 {
    fn failed(self) -> bool {
        self == 0
    }
}

impl<T> Win32Return for *mut T {
    fn failed(self) -> bool {
        self.is_null()
    }
}

fn error_check<T: Win32Return>(value: T) -> TrayResult<T> {
    match value.failed() {
        true => Err(windows_result::Error::from_win32().into()),
        false => Ok(value)
    }
}

// taken from winit's code base
// https://github.com/rust-windowing/winit/blob/ee88e38f13fbc86a7aafae1d17ad3cd4a1e761df/src/platform_impl/windows/util.rs#L138
fn get_instance_handle() -> HINSTANCE {
    // Gets the instance handle by taking the address of the
    // pseudo-variable created by the microsoft linker:
    // https://devblogs.microsoft.com/oldnewthing/20041025-00/?p=37483

    // This is preferred over GetModuleHandle(NULL) because it also works in DLLs:
    // https://stackoverflow.com/questions/21718027/getmodulehandlenull-vs-hinstance

    extern "C" {
        static __ImageBase: IMAGE_DOS_HEADER;
    }

    unsafe { &__ImageBase as *const _ as _ }
}

pub type PlatformError = windows_result::Error;
impl From<PlatformError> for ErrorSource {
    fn from(value: PlatformError) -> Self {
        ErrorSource::Os(value)
    }
}
