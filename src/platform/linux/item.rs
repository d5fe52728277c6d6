use parking_lot::Mutex;
use zbus::interface;
use zbus::object_server::SignalEmitter;
use zbus::zvariant::{ObjectPath, OwnedObjectPath};

use crate::platform::linux::{NativeIcon, Pixmap, MENU_PATH};

pub struct StatusNotifierItem {
    identifier: String,
    tooltip: Mutex<String>,
    icon: Mutex<NativeIcon>
}

impl StatusNotifierItem {
    pub fn new(identifier: String, icon: NativeIcon, tooltip: String) -> Self {
        Self {
            identifier,
            tooltip: Mutex::new(tooltip),
            icon: Mutex::new(icon)
        }
    }

    pub async fn update_tooltip(
        &self,
        tooltip: String,
        emitter: &SignalEmitter<'_>,
    ) -> zbus::Result<()> {
        *self.tooltip.lock() = tooltip;
        Self::new_tool_tip(emitter).await?;
        Ok(())
    }

    pub async fn update_icon(
        &self,
        icon: NativeIcon,
        emitter: &SignalEmitter<'_>,
    ) -> zbus::Result<()> {
        *self.icon.lock() = icon;
        Self::new_icon(emitter).await?;
        Ok(())
    }
}

#[interface(name = "org.kde.StatusNotifierItem")]
impl StatusNotifierItem {
    // The menu is the whole interaction; ItemIsMenu tells hosts to open it on every click.
    fn activate(&self, x: i32, y: i32) {
        log::trace!("activate({x}, {y})");
    }

    fn context_menu(&self, x: i32, y: i32) {
        log::trace!("context_menu({x}, {y})");
    }

    fn scroll(&self, delta: i32, orientation: String) {
        log::trace!("scroll({delta}, {orientation})");
    }

    fn secondary_activate(&self, x: i32, y: i32) {
        log::trace!("secondary_activate({x}, {y})");
    }

    #[zbus(signal)]
    async fn new_attention_icon(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn new_icon(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn new_overlay_icon(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn new_status(emitter: &SignalEmitter<'_>, status: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn new_title(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn new_tool_tip(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(property)]
    fn attention_icon_name(&self) -> String {
        Default::default()
    }

    #[zbus(property)]
    fn attention_icon_pixmap(&self) -> Vec<Pixmap> {
        Default::default()
    }

    #[zbus(property)]
    fn attention_movie_name(&self) -> String {
        Default::default()
    }

    #[zbus(property)]
    fn category(&self) -> String {
        String::from("ApplicationStatus")
    }

    #[zbus(property)]
    fn icon_name(&self) -> String {
        self.icon.lock().name().to_string()
    }

    #[zbus(property)]
    fn icon_pixmap(&self) -> Vec<Pixmap> {
        self.icon.lock().pixmaps()
    }

    #[zbus(property)]
    fn icon_theme_path(&self) -> String {
        Default::default()
    }

    #[zbus(property)]
    fn id(&self) -> String {
        self.identifier.clone()
    }

    #[zbus(property)]
    fn item_is_menu(&self) -> bool {
        true
    }

    #[zbus(property)]
    fn menu(&self) -> OwnedObjectPath {
        ObjectPath::from_static_str_unchecked(MENU_PATH).into()
    }

    #[zbus(property)]
    fn overlay_icon_name(&self) -> String {
        Default::default()
    }

    #[zbus(property)]
    fn overlay_icon_pixmap(&self) -> Vec<Pixmap> {
        Default::default()
    }

    #[zbus(property)]
    fn status(&self) -> String {
        String::from("Active")
    }

    #[zbus(property)]
    fn title(&self) -> String {
        self.identifier.clone()
    }

    #[zbus(property)]
    fn tool_tip(&self) -> (String, Vec<Pixmap>, String, String) {
        (
            String::new(),
            Vec::new(),
            self.tooltip.lock().clone(),
            String::new(),
        )
    }

    #[zbus(property)]
    fn window_id(&self) -> i32 {
        0
    }
}
