use std::fmt::{Debug, Formatter};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use png::{BitDepth, ColorType, Decoder, Transformations};

use crate::ensure;
use crate::error::{TrayError, TrayResult};
use crate::platform::NativeIcon;

/// An image for the tray icon.
///
/// Cheap to clone. Resolution into the platform representation happens when
/// the icon is handed to a tray, see [`NativeIcon::from_icon`].
#[derive(Clone, Default)]
pub struct Icon(pub(crate) IconSource);

#[derive(Clone, Default)]
pub(crate) enum IconSource {
    #[default]
    Default,
    Path(PathBuf),
    Rgba(Arc<RgbaImage>),
    #[cfg_attr(not(target_os = "windows"), allow(dead_code))]
    Resource(u16),
    Native(NativeIcon)
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct RgbaImage {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32
}

impl Icon {
    /// Loads an icon from an image file on disk.
    ///
    /// Only checks that the file exists; the platform decodes it.
    pub fn from_path(path: impl AsRef<Path>) -> TrayResult<Self> {
        let path = path.as_ref();
        ensure!(path.is_file(), TrayError::icon(format!("{} is not a readable file", path.display())));
        Ok(Self(IconSource::Path(path.to_path_buf())))
    }

    /// Like [`Icon::from_path`], but falls back to [`Icon::default`] when the path is unusable.
    pub fn from_path_lossy(path: impl AsRef<Path>) -> Self {
        Self::from_path(path).unwrap_or_else(|err| {
            log::warn!("Using the default icon: {err}");
            Self::default()
        })
    }

    pub fn from_rgba(rgba: Vec<u8>, width: u32, height: u32) -> TrayResult<Self> {
        ensure!(width > 0 && height > 0, TrayError::icon("icon dimensions must be non-zero"));
        let expected = width as usize * height as usize * 4;
        ensure!(
            rgba.len() == expected,
            TrayError::icon(format!("expected {expected} bytes of rgba data for a {width}x{height} icon, got {}", rgba.len()))
        );
        Ok(Self(IconSource::Rgba(Arc::new(RgbaImage { rgba, width, height }))))
    }

    pub fn from_png_bytes(bytes: &[u8]) -> TrayResult<Self> {
        let mut decoder = Decoder::new(Cursor::new(bytes));
        decoder.set_transformations(Transformations::normalize_to_color8() | Transformations::ALPHA);
        let mut reader = decoder.read_info()?;
        let mut buffer = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buffer)?;
        buffer.truncate(info.buffer_size());
        ensure!(info.bit_depth == BitDepth::Eight, TrayError::icon("unsupported png bit depth"));
        let rgba = match info.color_type {
            ColorType::Rgba => buffer,
            ColorType::GrayscaleAlpha => buffer
                .chunks_exact(2)
                .flat_map(|p| [p[0], p[0], p[0], p[1]])
                .collect(),
            other => return Err(TrayError::icon(format!("unsupported png color type: {other:?}")))
        };
        Self::from_rgba(rgba, info.width, info.height)
    }

    /// An icon embedded in the executable's resources.
    #[cfg(target_os = "windows")]
    pub fn from_resource(resource_id: u16) -> Self {
        Self(IconSource::Resource(resource_id))
    }

    /// Wraps an already created platform icon.
    pub fn from_native(icon: NativeIcon) -> Self {
        Self(IconSource::Native(icon))
    }

    pub fn is_default(&self) -> bool {
        matches!(self.0, IconSource::Default)
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.0 {
            IconSource::Path(path) => Some(path),
            _ => None
        }
    }

    /// Width and height for pixel based icons.
    pub fn size(&self) -> Option<(u32, u32)> {
        match &self.0 {
            IconSource::Rgba(image) => Some((image.width, image.height)),
            _ => None
        }
    }
}

impl Debug for Icon {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            IconSource::Default => f.write_str("Icon::Default"),
            IconSource::Path(path) => f.debug_tuple("Icon::Path").field(path).finish(),
            IconSource::Rgba(image) => write!(f, "Icon::Rgba({}x{})", image.width, image.height),
            IconSource::Resource(id) => f.debug_tuple("Icon::Resource").field(id).finish(),
            IconSource::Native(_) => f.write_str("Icon::Native")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use png::Encoder;

    use super::*;
    use crate::TrayErrorKind;

    fn encode_png(width: u32, height: u32, color: ColorType, data: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        let mut encoder = Encoder::new(&mut bytes, width, height);
        encoder.set_color(color);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(data).unwrap();
        writer.finish().unwrap();
        bytes
    }

    #[test]
    fn existing_path_is_kept() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not really a png").unwrap();
        let icon = Icon::from_path(file.path()).unwrap();
        assert_eq!(icon.path(), Some(file.path()));
    }

    #[test]
    fn missing_path_is_an_icon_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Icon::from_path(dir.path().join("missing.png")).unwrap_err();
        assert_eq!(err.kind(), TrayErrorKind::IconLoad);
        let err = Icon::from_path(dir.path()).unwrap_err();
        assert_eq!(err.kind(), TrayErrorKind::IconLoad);
    }

    #[test]
    fn lossy_path_degrades_to_default() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.png", "b/c.ico", ""] {
            assert!(Icon::from_path_lossy(dir.path().join(name)).is_default());
        }
    }

    #[test]
    fn rgba_length_is_checked() {
        assert!(Icon::from_rgba(vec![0; 16], 2, 2).is_ok());
        assert_eq!(Icon::from_rgba(vec![0; 15], 2, 2).unwrap_err().kind(), TrayErrorKind::IconLoad);
        assert_eq!(Icon::from_rgba(Vec::new(), 0, 0).unwrap_err().kind(), TrayErrorKind::IconLoad);
    }

    #[test]
    fn png_rgba_is_decoded() {
        let pixels = [255, 0, 0, 255, 0, 255, 0, 128];
        let icon = Icon::from_png_bytes(&encode_png(2, 1, ColorType::Rgba, &pixels)).unwrap();
        assert_eq!(icon.size(), Some((2, 1)));
        match &icon.0 {
            IconSource::Rgba(image) => assert_eq!(image.rgba, pixels),
            other => panic!("unexpected source: {:?}", Icon(other.clone()))
        }
    }

    #[test]
    fn png_rgb_gains_an_alpha_channel() {
        let icon = Icon::from_png_bytes(&encode_png(1, 1, ColorType::Rgb, &[1, 2, 3])).unwrap();
        match &icon.0 {
            IconSource::Rgba(image) => assert_eq!(image.rgba, [1, 2, 3, 255]),
            other => panic!("unexpected source: {:?}", Icon(other.clone()))
        }
    }

    #[test]
    fn garbage_png_is_an_icon_error() {
        let err = Icon::from_png_bytes(b"definitely not a png").unwrap_err();
        assert_eq!(err.kind(), TrayErrorKind::IconLoad);
    }
}
