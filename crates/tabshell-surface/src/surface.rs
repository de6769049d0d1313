//! Capability contract between the controller and the host's embedded
//! renderer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::SurfaceError;
use crate::Result;

/// Completion callback for asynchronous surface capabilities.
pub type Callback<T> = Box<dyn FnOnce(T) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureParams {
    pub format: ImageFormat,
    /// JPEG quality, 0-100
    pub quality: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearDataOptions {
    /// Only clear data created after this point (epoch milliseconds).
    pub since: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearDataTypes {
    pub appcache: bool,
    pub cache: bool,
    pub cookies: bool,
    pub file_systems: bool,
    #[serde(rename = "indexedDB")]
    pub indexed_db: bool,
    pub local_storage: bool,
    #[serde(rename = "webSQL")]
    pub web_sql: bool,
}

impl ClearDataTypes {
    pub fn all() -> Self {
        Self {
            appcache: true,
            cache: true,
            cookies: true,
            file_systems: true,
            indexed_db: true,
            local_storage: true,
            web_sql: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptDescriptor {
    File(String),
    Code(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowDisposition {
    IgnoreAction,
    SaveToDisk,
    CurrentTab,
    NewBackgroundTab,
    NewForegroundTab,
    NewWindow,
    NewPopup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWindowRequest {
    pub target_url: String,
    pub disposition: WindowDisposition,
    pub name: Option<String>,
}

impl NewWindowRequest {
    pub fn opens_tab(&self) -> bool {
        matches!(
            self.disposition,
            WindowDisposition::NewBackgroundTab | WindowDisposition::NewForegroundTab
        )
    }

    pub fn in_foreground(&self) -> bool {
        self.disposition == WindowDisposition::NewForegroundTab
    }
}

/// Raw load lifecycle events as reported by the surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SurfaceEvent {
    LoadStart {
        url: String,
        is_top_level: bool,
    },
    LoadCommit {
        url: String,
        is_top_level: bool,
    },
    LoadStop,
    LoadAbort {
        url: String,
        is_top_level: bool,
        code: i32,
        reason: String,
    },
    NewWindow(NewWindowRequest),
    PermissionRequest {
        permission: String,
        url: String,
    },
}

/// The embedded renderer behind one tab.
///
/// `suspend` and `resume` are optional; the defaults report
/// [`SurfaceError::Unsupported`].
pub trait RenderingSurface: Send + Sync {
    /// Stable label used in logs and by the message proxy.
    fn label(&self) -> &str;

    /// Must be set before the first navigation.
    fn set_partition(&self, partition: &str);

    fn navigate(&self, url: &str);

    fn can_go_back(&self) -> bool;

    fn can_go_forward(&self) -> bool;

    fn back(&self);

    fn forward(&self);

    fn stop(&self);

    fn reload(&self);

    fn set_zoom(&self, factor: f64);

    fn suspend(&self) -> Result<()> {
        Err(SurfaceError::Unsupported("suspend"))
    }

    fn resume(&self) -> Result<()> {
        Err(SurfaceError::Unsupported("resume"))
    }

    /// Answers with an image data url.
    fn capture_visible_region(&self, params: &CaptureParams, callback: Callback<Result<String>>);

    fn clear_data(
        &self,
        options: &ClearDataOptions,
        types: &ClearDataTypes,
        callback: Callback<Result<()>>,
    );

    /// Answers with one result per frame the script ran in.
    fn execute_script(&self, script: &ScriptDescriptor, callback: Callback<Result<Vec<Value>>>);

    /// Post a serialized message into the loaded content.
    fn post_message(&self, message: &str);
}

/// Where an activated surface is displayed.
pub trait DisplayRoot: Send + Sync {
    fn attach(&self, surface: &Arc<dyn RenderingSurface>) -> Result<()>;

    fn detach(&self, surface: &Arc<dyn RenderingSurface>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event: SurfaceEvent = serde_json::from_str(
            r#"{"type": "loadstart", "url": "https://example.com", "is_top_level": true}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            SurfaceEvent::LoadStart {
                url: "https://example.com".to_string(),
                is_top_level: true,
            }
        );

        let event: SurfaceEvent = serde_json::from_str(
            r#"{"type": "newwindow", "target_url": "https://a.test", "disposition": "new_background_tab", "name": null}"#,
        )
        .unwrap();
        match event {
            SurfaceEvent::NewWindow(request) => {
                assert!(request.opens_tab());
                assert!(!request.in_foreground());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_clear_data_types_names() {
        let json = serde_json::to_value(ClearDataTypes::all()).unwrap();
        assert_eq!(json["indexedDB"], true);
        assert_eq!(json["localStorage"], true);
    }
}
