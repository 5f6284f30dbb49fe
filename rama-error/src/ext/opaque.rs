use std::fmt;

use crate::BoxError;

/// Rarely will you need [`OpaqueError`],
/// it can however be a useful last-resort in case you
/// get weird higher-rank Lifetime issues...
pub struct OpaqueError(BoxError);

impl OpaqueError {
    #[inline(always)]
    pub(super) fn from_box_error(e: impl Into<BoxError>) -> Self {
        Self(e.into())
    }

    /// Builds an [`OpaqueError`] from anything that can be displayed,
    /// without requiring it to implement [`std::error::Error`].
    #[inline]
    pub fn from_display(msg: impl fmt::Display) -> Self {
        Self(msg.to_string().into())
    }

    /// Builds an [`OpaqueError`] from an existing [`std::error::Error`].
    #[inline]
    pub fn from_std(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(error))
    }
}

impl From<BoxError> for OpaqueError {
    #[inline(always)]
    fn from(e: BoxError) -> Self {
        Self(e)
    }
}

impl fmt::Debug for OpaqueError {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for OpaqueError {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for OpaqueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}
