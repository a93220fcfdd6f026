//! User-Agent string sent by the HTTP page source.

/// Default User-Agent (identifies the tool and its version).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("streamfetch/{version} (paginated-export-tool)")
}
