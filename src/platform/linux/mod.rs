mod item;
mod menu;

use std::sync::atomic::{AtomicU32, Ordering};

use flume::Receiver;
use futures_util::StreamExt;
use zbus::{connection, proxy, Connection, Task};

use crate::error::{ErrorSource, TrayError, TrayResult};
use crate::icon::{Icon, IconSource};
use crate::menu::MenuLayout;
use crate::platform::linux::item::StatusNotifierItem;
use crate::platform::linux::menu::DBusMenu;
use crate::tray::{MessageSender, NativeTray, TrayMessage};

static MENU_PATH: &str = "/MenuBar";
static ITEM_PATH: &str = "/StatusNotifierItem";
static COUNTER: AtomicU32 = AtomicU32::new(1);

const DEFAULT_ICON_NAME: &str = "application-x-executable";

/// `(width, height, ARGB32 in network byte order)`
pub(crate) type Pixmap = (i32, i32, Vec<u8>);

pub struct NativeTrayIcon {
    name: String,
    _register_task: Task<zbus::Result<()>>,
    connection: Connection
}

impl NativeTrayIcon {
    async fn new_async(identifier: &str, icon: &Icon, tooltip: Option<&str>, sender: MessageSender) -> TrayResult<Self> {
        let pid = std::process::id();
        let id = COUNTER.fetch_add(1, Ordering::AcqRel);
        let name = format!("org.kde.StatusNotifierItem-{pid}-{id}");

        let conn = connection::Builder::session()?
            .name(name.clone())?
            .serve_at(
                ITEM_PATH,
                StatusNotifierItem::new(
                    identifier.to_string(),
                    NativeIcon::from_icon(icon),
                    tooltip.unwrap_or_default().to_string()),
            )?
            .serve_at(MENU_PATH, DBusMenu::new(sender))?
            .internal_executor(true)
            .build()
            .await?;
        log::trace!("Serving {ITEM_PATH} and {MENU_PATH} as {name}");

        let proxy = StatusNotifierWatcherProxy::builder(&conn)
            .path("/StatusNotifierWatcher")?
            .build()
            .await?;

        proxy
            .register_status_notifier_item(&name)
            .await
            .map_err(|err| TrayError::registration(format!("StatusNotifierWatcher rejected {name}: {err}")))?;

        let register_task = {
            let name = name.clone();
            conn.executor().spawn(
                async move {
                    let mut owner_changes = proxy.inner().receive_owner_changed().await?;
                    while let Some(owner) = owner_changes.next().await {
                        if owner.is_some() {
                            log::debug!("StatusNotifierWatcher changed owner, registering {name} again");
                            proxy.register_status_notifier_item(&name).await?;
                        }
                    }
                    Ok(())
                },
                "statusnotifierwatcher watcher",
            )
        };

        Ok(Self {
            name,
            _register_task: register_task,
            connection: conn
        })
    }
}

impl NativeTray for NativeTrayIcon {
    fn create(identifier: &str, icon: &Icon, tooltip: Option<&str>, sender: MessageSender) -> TrayResult<Self> {
        async_io::block_on(Self::new_async(identifier, icon, tooltip, sender))
    }

    fn set_menu(&mut self, layout: &MenuLayout) -> TrayResult<()> {
        async_io::block_on(async {
            let iface = self
                .connection
                .object_server()
                .interface::<_, DBusMenu>(MENU_PATH)
                .await?;
            let iref = iface.get().await;
            iref.update_menu(layout, iface.signal_emitter()).await
        })?;
        Ok(())
    }

    fn set_icon(&mut self, icon: &Icon) -> TrayResult<()> {
        let icon = NativeIcon::from_icon(icon);
        async_io::block_on(async {
            let iface = self
                .connection
                .object_server()
                .interface::<_, StatusNotifierItem>(ITEM_PATH)
                .await?;
            let iref = iface.get().await;
            iref.update_icon(icon, iface.signal_emitter()).await
        })?;
        Ok(())
    }

    fn set_tooltip(&mut self, tooltip: Option<&str>) -> TrayResult<()> {
        let tooltip = tooltip.unwrap_or_default().to_string();
        async_io::block_on(async {
            let iface = self
                .connection
                .object_server()
                .interface::<_, StatusNotifierItem>(ITEM_PATH)
                .await?;
            let iref = iface.get().await;
            iref.update_tooltip(tooltip, iface.signal_emitter()).await
        })?;
        Ok(())
    }

    fn wait(&mut self, receiver: &Receiver<TrayMessage>) -> TrayResult<Option<TrayMessage>> {
        // D-Bus calls are served on the connection's executor and only ever reach us through the channel.
        Ok(Some(receiver.recv().unwrap_or(TrayMessage::Quit)))
    }

    fn poll(&mut self) -> TrayResult<()> {
        Ok(())
    }
}

impl Drop for NativeTrayIcon {
    fn drop(&mut self) {
        log::trace!("Releasing {}", self.name);
        async_io::block_on(self.connection.release_name(self.name.as_str()))
            .map(|_| ())
            .unwrap_or_else(|err| log::warn!("Failed to release {}: {err}", self.name));
    }
}

#[proxy(interface = "org.kde.StatusNotifierWatcher", assume_defaults = true)]
trait StatusNotifierWatcher {
    fn register_status_notifier_host(&self, service: &str) -> zbus::Result<()>;

    fn register_status_notifier_item(&self, service: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    fn status_notifier_host_registered(&self) -> zbus::Result<()>;

    #[zbus(signal)]
    fn status_notifier_host_unregistered(&self) -> zbus::Result<()>;

    #[zbus(signal)]
    fn status_notifier_item_registered(&self, arg_1: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    fn status_notifier_item_unregistered(&self, arg_1: &str) -> zbus::Result<()>;

    #[zbus(property)]
    fn is_status_notifier_host_registered(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn protocol_version(&self) -> zbus::Result<i32>;

    #[zbus(property)]
    fn registered_status_notifier_items(&self) -> zbus::Result<Vec<String>>;
}

/// Icon as a StatusNotifierItem host understands it: a theme icon name (or an
/// absolute file path) or raw pixels.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum NativeIcon {
    Name(String),
    Pixels(Vec<Pixmap>)
}

impl Default for NativeIcon {
    fn default() -> Self {
        Self::Name(String::from(DEFAULT_ICON_NAME))
    }
}

impl NativeIcon {
    /// A freedesktop icon theme name such as `"mail-unread"`.
    pub fn from_name<S: ToString>(name: S) -> Self {
        Self::Name(name.to_string())
    }

    /// Resolves `icon`, falling back to the default icon when that is not possible.
    pub fn from_icon(icon: &Icon) -> Self {
        match &icon.0 {
            IconSource::Default => Self::default(),
            IconSource::Path(path) => match (path.is_file(), path.canonicalize().ok().and_then(|p| p.to_str().map(str::to_string))) {
                (true, Some(path)) => Self::Name(path),
                _ => {
                    log::warn!("Icon {path:?} is not usable, using the default icon");
                    Self::default()
                }
            },
            IconSource::Rgba(image) => {
                let argb = image.rgba
                    .chunks_exact(4)
                    .flat_map(|p| [p[3], p[0], p[1], p[2]])
                    .collect();
                Self::Pixels(vec![(image.width as i32, image.height as i32, argb)])
            }
            IconSource::Resource(id) => {
                log::warn!("Resource icons ({id}) only exist on Windows, using the default icon");
                Self::default()
            }
            IconSource::Native(native) => native.clone()
        }
    }

    fn name(&self) -> &str {
        match self {
            NativeIcon::Name(name) => name,
            NativeIcon::Pixels(_) => ""
        }
    }

    fn pixmaps(&self) -> Vec<Pixmap> {
        match self {
            NativeIcon::Name(_) => Vec::new(),
            NativeIcon::Pixels(pixmaps) => pixmaps.clone()
        }
    }
}

pub type PlatformError = zbus::Error;
impl From<PlatformError> for ErrorSource {
    fn from(value: PlatformError) -> Self {
        ErrorSource::Os(value)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_icon_is_a_theme_name() {
        let icon = NativeIcon::from_icon(&Icon::default());
        assert_eq!(icon.name(), DEFAULT_ICON_NAME);
        assert!(icon.pixmaps().is_empty());
    }

    #[test]
    fn paths_become_absolute_icon_names() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"png").unwrap();
        let icon = NativeIcon::from_icon(&Icon::from_path(file.path()).unwrap());
        let expected = file.path().canonicalize().unwrap();
        assert_eq!(icon.name(), expected.to_str().unwrap());
    }

    #[test]
    fn vanished_paths_fall_back_to_the_default() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let icon = Icon::from_path(file.path()).unwrap();
        drop(file);
        assert_eq!(NativeIcon::from_icon(&icon), NativeIcon::default());
    }

    #[test]
    fn pixels_are_converted_to_argb() {
        let icon = Icon::from_rgba(vec![1, 2, 3, 4, 5, 6, 7, 8], 2, 1).unwrap();
        assert_eq!(NativeIcon::from_icon(&icon).pixmaps(), [(2, 1, vec![4, 1, 2, 3, 8, 5, 6, 7])]);
    }

    #[test]
    fn native_icons_pass_through() {
        let icon = Icon::from_native(NativeIcon::from_name("mail-unread"));
        assert_eq!(NativeIcon::from_icon(&icon).name(), "mail-unread");
    }
}
