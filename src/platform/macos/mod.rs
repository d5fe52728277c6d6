mod callback;
mod menu;

use std::borrow::Cow;

use flume::Receiver;
use objc2::rc::Retained;
use objc2_app_kit::{
    NSApplication, NSApplicationActivationPolicy, NSEventMask, NSImage, NSMenu, NSStatusBar, NSStatusItem,
    NSVariableStatusItemLength
};
use objc2_foundation::{MainThreadMarker, NSData, NSDate, NSDefaultRunLoopMode, NSSize, NSString};
use png::{BitDepth, ColorType, Encoder};

use crate::error::{ErrorSource, TrayError, TrayResult};
use crate::icon::{Icon, IconSource, RgbaImage};
use crate::menu::MenuLayout;
use crate::platform::macos::callback::SystemTrayCallback;
use crate::platform::macos::menu::construct_native_menu;
use crate::tray::{MessageSender, NativeTray, TrayMessage};

/// How long a blocking wait sleeps before looking at the exit flag again.
const WAIT_INTERVAL_SECONDS: f64 = 0.1;
const STATUS_BAR_ICON_SIZE: f64 = 18.0;

pub struct NativeTrayIcon {
    mtm: MainThreadMarker,
    app: Retained<NSApplication>,
    status_item: Retained<NSStatusItem>,
    // NSMenuItem only keeps a weak reference to its target
    callback: Option<Retained<SystemTrayCallback>>,
    menu: Option<Retained<NSMenu>>,
    sender: MessageSender
}

impl NativeTrayIcon {
    fn apply_icon(&self, icon: &NativeIcon) {
        unsafe {
            if let Some(button) = self.status_item.button(self.mtm) {
                button.setImage(Some(&icon.image));
            }
        }
    }

    fn next_event(&self, date: &NSDate) -> bool {
        unsafe {
            match self.app.nextEventMatchingMask_untilDate_inMode_dequeue(NSEventMask::Any, Some(date), NSDefaultRunLoopMode, true) {
                Some(event) => {
                    self.app.sendEvent(&event);
                    self.app.updateWindows();
                    true
                }
                None => false
            }
        }
    }
}

impl NativeTray for NativeTrayIcon {
    fn create(identifier: &str, icon: &Icon, tooltip: Option<&str>, sender: MessageSender) -> TrayResult<Self> {
        let mtm = MainThreadMarker::new()
            .ok_or_else(|| TrayError::registration("status items can only be created on the main thread"))?;
        let app = NSApplication::sharedApplication(mtm);
        app.setActivationPolicy(NSApplicationActivationPolicy::Accessory);
        unsafe { app.finishLaunching() };

        let status_item = unsafe { NSStatusBar::systemStatusBar().statusItemWithLength(NSVariableStatusItemLength) };
        let autosave_name = autosave_name(identifier);
        // AppKit remembers the position the user dragged the item to under this name
        unsafe { status_item.setAutosaveName(Some(&NSString::from_str(autosave_name))) };
        log::trace!("Created status item {autosave_name}");

        let tray = Self {
            mtm,
            app,
            status_item,
            callback: None,
            menu: None,
            sender
        };
        tray.apply_icon(&NativeIcon::from_icon(icon));
        tray.set_button_tooltip(tooltip);
        Ok(tray)
    }

    fn set_menu(&mut self, layout: &MenuLayout) -> TrayResult<()> {
        let callback = SystemTrayCallback::new(self.mtm, layout.revision(), self.sender.clone());
        let menu = construct_native_menu(self.mtm, layout, &callback);
        unsafe { self.status_item.setMenu(Some(&menu)) };
        self.menu = Some(menu);
        self.callback = Some(callback);
        Ok(())
    }

    fn set_icon(&mut self, icon: &Icon) -> TrayResult<()> {
        self.apply_icon(&NativeIcon::from_icon(icon));
        Ok(())
    }

    fn set_tooltip(&mut self, tooltip: Option<&str>) -> TrayResult<()> {
        self.set_button_tooltip(tooltip);
        Ok(())
    }

    fn wait(&mut self, _receiver: &Receiver<TrayMessage>) -> TrayResult<Option<TrayMessage>> {
        let date = unsafe { NSDate::dateWithTimeIntervalSinceNow(WAIT_INTERVAL_SECONDS) };
        self.next_event(&date);
        Ok(None)
    }

    fn poll(&mut self) -> TrayResult<()> {
        let date = unsafe { NSDate::distantPast() };
        while self.next_event(&date) {}
        Ok(())
    }
}

impl NativeTrayIcon {
    fn set_button_tooltip(&self, tooltip: Option<&str>) {
        unsafe {
            if let Some(button) = self.status_item.button(self.mtm) {
                let tooltip = tooltip.map(NSString::from_str);
                button.setToolTip(tooltip.as_deref());
            }
        }
    }
}

impl Drop for NativeTrayIcon {
    fn drop(&mut self) {
        log::trace!("Removing status item");
        unsafe {
            self.status_item.setMenu(None);
            NSStatusBar::systemStatusBar().removeStatusItem(&self.status_item);
        }
    }
}

/// An `NSImage` ready for the status bar.
#[derive(Debug, Clone)]
pub struct NativeIcon {
    image: Retained<NSImage>
}

impl NativeIcon {
    pub fn from_image(image: Retained<NSImage>) -> Self {
        Self { image }
    }

    /// Resolves `icon`, falling back to the application icon on failure.
    pub fn from_icon(icon: &Icon) -> Self {
        let image = match &icon.0 {
            IconSource::Default => None,
            IconSource::Path(path) => {
                let path = NSString::from_str(&path.to_string_lossy());
                unsafe { NSImage::initWithContentsOfFile(NSImage::alloc(), &path) }
            }
            IconSource::Rgba(image) => encode_png(image)
                .map_err(|err| log::warn!("Failed to encode icon: {err}"))
                .ok()
                .and_then(|bytes| {
                    let data = NSData::with_bytes(&bytes);
                    unsafe { NSImage::initWithData(NSImage::alloc(), &data) }
                }),
            IconSource::Resource(id) => {
                log::warn!("Resource icons ({id}) only exist on Windows, using the default icon");
                None
            }
            IconSource::Native(native) => return native.clone()
        };
        let image = image.unwrap_or_else(|| {
            if !icon.is_default() {
                log::warn!("Failed to load {icon:?}, using the default icon");
            }
            unsafe { NSImage::imageNamed(&NSString::from_str("NSApplicationIcon")) }
                .unwrap_or_else(NSImage::new)
        });
        unsafe { image.setSize(NSSize::new(STATUS_BAR_ICON_SIZE, STATUS_BAR_ICON_SIZE)) };
        Self { image }
    }

    pub fn image(&self) -> &NSImage {
        &self.image
    }
}

fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, png::EncodingError> {
    let mut bytes = Vec::new();
    let mut encoder = Encoder::new(&mut bytes, image.width, image.height);
    encoder.set_color(ColorType::Rgba);
    encoder.set_depth(BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&image.rgba)?;
    writer.finish()?;
    Ok(bytes)
}

/// Identifiers are reverse-DNS strings; AppKit needs something non-empty.
fn autosave_name(identifier: &str) -> &str {
    match identifier.trim() {
        "" => env!("CARGO_PKG_NAME"),
        trimmed => trimmed
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PlatformError(Cow<'static, str>);

impl From<PlatformError> for ErrorSource {
    fn from(value: PlatformError) -> Self {
        ErrorSource::Os(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrayErrorKind;

    #[test]
    fn identifier_becomes_the_autosave_name() {
        assert_eq!(autosave_name("org.example.app"), "org.example.app");
        assert_eq!(autosave_name("  org.example.app "), "org.example.app");
        assert_eq!(autosave_name(" "), "trayport");
    }

    #[test]
    fn status_items_need_the_main_thread() {
        let (sender, _receiver) = flume::unbounded();
        let result = std::thread::spawn(move || {
            NativeTrayIcon::create("org.example.app", &Icon::default(), None, sender).err().map(|err| err.kind())
        }).join().unwrap();
        assert_eq!(result, Some(TrayErrorKind::Registration));
    }
}
