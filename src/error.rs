use std::borrow::Cow;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::panic::Location;

use crate::platform::PlatformError;

pub type TrayResult<T> = Result<T, TrayError>;

#[derive(Debug, thiserror::Error)]
pub enum ErrorSource {
    #[error("platform error: {0}")]
    Os(PlatformError),
    #[error("failed to load icon: {0}")]
    IconLoad(Cow<'static, str>),
    #[error("failed to decode png: {0}")]
    Png(#[from] png::DecodingError),
    #[error("failed to register tray with the shell: {0}")]
    Registration(Cow<'static, str>),
    #[error("callback for item {id} (revision {revision}) arrived after its menu was replaced or torn down")]
    LateCallback { revision: u32, id: usize },
    #[error("{0}")]
    Custom(Cow<'static, str>)
}

/// Coarse classification of a [`TrayError`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TrayErrorKind {
    Os,
    IconLoad,
    Registration,
    LateCallback,
    Custom
}

pub struct TrayError {
    location: &'static Location<'static>,
    source: ErrorSource
}

impl TrayError {
    #[track_caller]
    pub fn custom(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::from(ErrorSource::Custom(msg.into()))
    }

    #[track_caller]
    pub fn icon(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::from(ErrorSource::IconLoad(msg.into()))
    }

    #[track_caller]
    pub fn registration(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::from(ErrorSource::Registration(msg.into()))
    }

    #[track_caller]
    pub fn late_callback(revision: u32, id: usize) -> Self {
        Self::from(ErrorSource::LateCallback { revision, id })
    }

    pub fn kind(&self) -> TrayErrorKind {
        match &self.source {
            ErrorSource::Os(_) => TrayErrorKind::Os,
            ErrorSource::IconLoad(_) | ErrorSource::Png(_) => TrayErrorKind::IconLoad,
            ErrorSource::Registration(_) => TrayErrorKind::Registration,
            ErrorSource::LateCallback { .. } => TrayErrorKind::LateCallback,
            ErrorSource::Custom(_) => TrayErrorKind::Custom
        }
    }

    pub fn error_source(&self) -> &ErrorSource {
        &self.source
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

impl Debug for TrayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "TrayError: {:?}\n\tat {}", self.source, self.location)
    }
}

impl Display for TrayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.source, f)
    }
}

impl Error for TrayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.source()
    }
}

impl<T: Into<ErrorSource>> From<T> for TrayError {
    #[track_caller]
    fn from(value: T) -> Self {
        Self {
            location: Location::caller(),
            source: value.into()
        }
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $result:expr) => {
        if !($cond) {
            return Err($result);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_source() {
        assert_eq!(TrayError::icon("missing").kind(), TrayErrorKind::IconLoad);
        assert_eq!(TrayError::registration("no watcher").kind(), TrayErrorKind::Registration);
        assert_eq!(TrayError::late_callback(3, 7).kind(), TrayErrorKind::LateCallback);
        assert_eq!(TrayError::custom("other").kind(), TrayErrorKind::Custom);
    }

    #[test]
    fn location_points_at_the_caller() {
        let err = TrayError::custom("here");
        assert_eq!(err.location().file(), file!());
        assert!(format!("{err:?}").contains("TrayError"));
        assert_eq!(err.to_string(), "here");
    }

    #[test]
    fn late_callback_message_names_the_item() {
        let msg = TrayError::late_callback(2, 5).to_string();
        assert!(msg.contains("item 5"));
        assert!(msg.contains("revision 2"));
    }
}
