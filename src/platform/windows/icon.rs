use std::fmt::{Debug, Formatter};
use std::ptr::null_mut;
use std::sync::Arc;

use windows_sys::Win32::UI::WindowsAndMessaging::{CreateIcon, DestroyIcon, LoadIconW, LoadImageW, HICON, IDI_APPLICATION, IMAGE_ICON, LR_DEFAULTSIZE, LR_LOADFROMFILE};

use crate::error::TrayResult;
use crate::icon::{Icon, IconSource, RgbaImage};
use crate::platform::windows::{encode_wide, error_check, get_instance_handle};

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NativeIcon {
    handle: Arc<NativeIconHandle>
}

impl NativeIcon {
    /// Takes ownership of `handle`; it is destroyed together with the last clone.
    ///
    /// # Safety
    /// `handle` must be a valid icon that nothing else destroys.
    pub unsafe fn from_raw(handle: HICON) -> Self {
        Self::owned(handle)
    }

    fn owned(handle: HICON) -> Self {
        Self {
            handle: Arc::new(NativeIconHandle { handle, owned: true })
        }
    }

    /// Resolves `icon`, falling back to the stock application icon on failure.
    pub fn from_icon(icon: &Icon) -> Self {
        let result = match &icon.0 {
            IconSource::Default => return Self::stock(),
            IconSource::Path(path) => Self::from_file(&path.to_string_lossy()),
            IconSource::Rgba(image) => Self::from_rgba(image),
            IconSource::Resource(id) => Self::from_resource(*id, None),
            IconSource::Native(native) => return native.clone()
        };
        result.unwrap_or_else(|err| {
            log::warn!("Failed to load {icon:?}, using the default icon: {err}");
            Self::stock()
        })
    }

    fn stock() -> Self {
        // shared icons must never be passed to DestroyIcon
        let handle = unsafe { LoadIconW(null_mut(), IDI_APPLICATION) };
        Self {
            handle: Arc::new(NativeIconHandle { handle, owned: false })
        }
    }

    fn from_rgba(image: &RgbaImage) -> TrayResult<Self> {
        let mut mask = Vec::with_capacity(image.rgba.len() / 4);
        let mut bgra = image.rgba.clone();
        bgra.chunks_exact_mut(4).for_each(|pixel| {
            pixel.swap(0, 2);
            mask.push(u8::MAX - pixel[3]);
        });
        log::trace!("Creating new native icon");
        let handle = error_check(unsafe {
            CreateIcon(
                null_mut(),
                image.width as i32,
                image.height as i32,
                1,
                4 * u8::BITS as u8,
                mask.as_ptr(),
                bgra.as_ptr()
            )
        })?;
        Ok(Self::owned(handle))
    }

    fn from_file(path: &str) -> TrayResult<Self> {
        let wide = encode_wide(path);
        log::trace!("Loading native icon from {path}");
        let handle = error_check(unsafe {
            LoadImageW(
                null_mut(),
                wide.as_ptr(),
                IMAGE_ICON,
                0,
                0,
                LR_LOADFROMFILE | LR_DEFAULTSIZE
            )
        })?;
        Ok(Self::owned(handle))
    }

    fn from_resource(resource_id: u16, size: Option<(u32, u32)>) -> TrayResult<Self> {
        let (width, height) = size.unwrap_or((0, 0));
        log::trace!("Loading native icon from resource {resource_id}");
        let handle = error_check(unsafe {
            LoadImageW(
                get_instance_handle(),
                resource_id as usize as *const u16,
                IMAGE_ICON,
                width as i32,
                height as i32,
                LR_DEFAULTSIZE
            )
        })?;
        Ok(Self::owned(handle))
    }

    pub fn handle(&self) -> HICON {
        self.handle.handle
    }
}

#[derive(Eq, PartialEq)]
struct NativeIconHandle {
    handle: HICON,
    owned: bool
}

unsafe impl Send for NativeIconHandle {}
unsafe impl Sync for NativeIconHandle {}

impl Drop for NativeIconHandle {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        log::trace!("Dropping native icon");
        if let Err(err) = error_check(unsafe { DestroyIcon(self.handle) }) {
            log::warn!("Failed to destroy native icon: {err}");
        }
    }
}

impl Debug for NativeIconHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeIconHandle")
            .field("handle", &self.handle)
            .field("owned", &self.owned)
            .finish()
    }
}
