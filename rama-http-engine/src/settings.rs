//! HTTP/2 settings surface (§6).
//!
//! Fields mirror `nghttp2_settings_entry` ids one for one. `None` means
//! "unset" (the original's sentinel `-1`, which matters because `0` is a
//! meaningful value for several of these settings).

/// HTTP/2 settings submitted immediately after a session is established.
///
/// Unset fields are simply not submitted, so the peer's own defaults apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Http2Settings {
    pub header_table_size: Option<u32>,
    pub enable_push: Option<bool>,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub max_frame_size: Option<u32>,
    pub max_header_list_size: Option<u32>,
    pub enable_connect_protocol: Option<bool>,
}

impl Http2Settings {
    /// An all-unset settings value: nothing is submitted beyond the codec's
    /// own implicit defaults.
    #[must_use]
    pub fn unset() -> Self {
        Self::default()
    }

    /// Apply the settings that are set onto an [`h2`] builder, for either
    /// [`h2::client::Builder`] or [`h2::server::Builder`].
    pub(crate) fn apply_to_client(&self, builder: &mut h2::client::Builder) {
        if let Some(v) = self.header_table_size {
            builder.header_table_size(v);
        }
        if let Some(v) = self.enable_push {
            builder.enable_push(v);
        }
        if let Some(v) = self.max_concurrent_streams {
            builder.max_concurrent_streams(v);
        }
        if let Some(v) = self.initial_window_size {
            builder.initial_window_size(v);
        }
        if let Some(v) = self.max_frame_size {
            builder.max_frame_size(v);
        }
        if let Some(v) = self.max_header_list_size {
            builder.max_header_list_size(v);
        }
        if self.enable_connect_protocol == Some(true) {
            builder.enable_connect_protocol();
        }
    }

    pub(crate) fn apply_to_server(&self, builder: &mut h2::server::Builder) {
        if let Some(v) = self.header_table_size {
            builder.header_table_size(v);
        }
        if let Some(v) = self.enable_push {
            builder.enable_push(v);
        }
        if let Some(v) = self.max_concurrent_streams {
            builder.max_concurrent_streams(v);
        }
        if let Some(v) = self.initial_window_size {
            builder.initial_window_size(v);
        }
        if let Some(v) = self.max_frame_size {
            builder.max_frame_size(v);
        }
        if let Some(v) = self.max_header_list_size {
            builder.max_header_list_size(v);
        }
        if self.enable_connect_protocol == Some(true) {
            builder.enable_connect_protocol();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_is_default() {
        assert_eq!(Http2Settings::unset(), Http2Settings::default());
    }

    #[test]
    fn zero_is_distinguishable_from_unset() {
        let z = Http2Settings {
            enable_push: Some(false),
            ..Default::default()
        };
        assert_ne!(z, Http2Settings::unset());
        assert_eq!(z.enable_push, Some(false));
    }
}
