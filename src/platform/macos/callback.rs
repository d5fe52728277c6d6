use block2::RcBlock;
use objc2::rc::Retained;
use objc2::runtime::{NSObject, Sel};
use objc2::{declare_class, msg_send_id, mutability, sel, ClassType, DeclaredClass};
use objc2_app_kit::NSMenuItem;
use objc2_foundation::{MainThreadMarker, NSInteger};

use crate::tray::{MessageSender, TrayMessage};

declare_class!(
    /// Target of every item of one menu revision. Forwards the item tag.
    pub struct SystemTrayCallback;

    unsafe impl ClassType for SystemTrayCallback {
        type Super = NSObject;
        type Mutability = mutability::MainThreadOnly;
        const NAME: &'static str = "TrayportSystemTrayCallback";
    }

    impl DeclaredClass for SystemTrayCallback {
        type Ivars = RcBlock<dyn Fn(NSInteger)>;
    }

    unsafe impl SystemTrayCallback {
        #[method(menuItemClicked:)]
        fn menu_item_clicked(&self, sender: Option<&NSMenuItem>) {
            if let Some(sender) = sender {
                self.ivars().call((unsafe { sender.tag() },));
            }
        }
    }
);

impl SystemTrayCallback {
    /// A target that reports clicks as items of layout `revision`.
    pub fn new(mtm: MainThreadMarker, revision: u32, sender: MessageSender) -> Retained<Self> {
        let block = RcBlock::new(move |tag: NSInteger| {
            let Ok(id) = usize::try_from(tag) else { return };
            sender
                .send(TrayMessage::Activated { revision, id })
                .unwrap_or_else(|_| log::debug!("Dropping click on item {id}, the tray is gone"));
        });
        let this = mtm.alloc::<Self>().set_ivars(block);
        unsafe { msg_send_id![super(this), init] }
    }

    pub fn menu_item_selector() -> Sel {
        sel!(menuItemClicked:)
    }
}
