//! Tab record
//!
//! What the tab strip shows for one tab: navigation flags, url, title and
//! favicon.

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::TabError;
use crate::Result;

pub type TabId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabType {
    /// Web content hosted by a rendering surface
    Webview,
    /// Built-in page (history, settings, new tab)
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabRecord {
    /// Unique identifier
    pub id: TabId,
    #[serde(rename = "type")]
    pub tab_type: TabType,
    pub can_go_back: bool,
    pub can_go_forward: bool,
    pub is_loading: bool,
    pub url: String,
    pub title: String,
    pub favicon: Option<String>,
}

impl TabRecord {
    pub fn new(tab_type: TabType, url: String) -> Result<Self> {
        if url.is_empty() {
            return Err(TabError::InvalidUrl("URL cannot be empty".to_string()));
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            tab_type,
            can_go_back: false,
            can_go_forward: false,
            is_loading: false,
            url,
            title: String::new(),
            favicon: None,
        })
    }

    pub fn webview(url: impl Into<String>) -> Result<Self> {
        Self::new(TabType::Webview, url.into())
    }

    pub fn internal(url: impl Into<String>) -> Result<Self> {
        Self::new(TabType::Internal, url.into())
    }

    pub fn is_webview(&self) -> bool {
        self.tab_type == TabType::Webview
    }

    /// Get display title (with fallback to URL)
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            &self.url
        } else {
            &self.title
        }
    }
}

/// Partial update merged into an existing record. `None` keeps the field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabStatePatch {
    pub can_go_back: Option<bool>,
    pub can_go_forward: Option<bool>,
    pub is_loading: Option<bool>,
    pub url: Option<String>,
    pub title: Option<String>,
    /// `Some(None)` clears the favicon. On the wire an explicit `null`
    /// clears it and an absent key keeps it.
    #[serde(
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub favicon: Option<Option<String>>,
}

fn present_or_null<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl TabStatePatch {
    pub fn loading(is_loading: bool) -> Self {
        Self {
            is_loading: Some(is_loading),
            ..Self::default()
        }
    }

    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Shallow merge into a copy of `record`.
    pub fn apply(&self, record: &TabRecord) -> TabRecord {
        let mut merged = record.clone();
        if let Some(v) = self.can_go_back {
            merged.can_go_back = v;
        }
        if let Some(v) = self.can_go_forward {
            merged.can_go_forward = v;
        }
        if let Some(v) = self.is_loading {
            merged.is_loading = v;
        }
        if let Some(v) = &self.url {
            merged.url = v.clone();
        }
        if let Some(v) = &self.title {
            merged.title = v.clone();
        }
        if let Some(v) = &self.favicon {
            merged.favicon = v.clone();
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tab() {
        let tab = TabRecord::webview("https://example.com").unwrap();
        assert!(tab.is_webview());
        assert_eq!(tab.url, "https://example.com");
        assert_eq!(tab.display_title(), "https://example.com");
        assert!(!tab.is_loading);
    }

    #[test]
    fn test_empty_url_rejected() {
        assert!(TabRecord::internal(String::new()).is_err());
    }

    #[test]
    fn test_patch_keeps_untouched_fields() {
        let mut tab = TabRecord::webview("https://example.com").unwrap();
        tab.title = "Example".to_string();
        tab.favicon = Some("https://example.com/favicon.ico".to_string());

        let merged = TabStatePatch::loading(true).apply(&tab);
        assert!(merged.is_loading);
        assert_eq!(merged.title, "Example");
        assert_eq!(merged.favicon, tab.favicon);
        assert_eq!(merged.id, tab.id);

        let cleared = TabStatePatch {
            favicon: Some(None),
            ..TabStatePatch::default()
        }
        .apply(&merged);
        assert_eq!(cleared.favicon, None);
        assert!(cleared.is_loading);
    }

    #[test]
    fn test_patch_favicon_null_clears() {
        let patch: TabStatePatch = serde_json::from_str(r#"{"favicon": null}"#).unwrap();
        assert_eq!(patch.favicon, Some(None));
        assert!(!patch.is_empty());

        let patch: TabStatePatch =
            serde_json::from_str(r#"{"favicon": "https://a.test/icon.png"}"#).unwrap();
        assert_eq!(patch.favicon, Some(Some("https://a.test/icon.png".to_string())));

        let patch: TabStatePatch = serde_json::from_str(r#"{"is_loading": true}"#).unwrap();
        assert_eq!(patch.favicon, None);
        assert_eq!(serde_json::to_value(&patch).unwrap().get("favicon"), None);

        let clear = TabStatePatch {
            favicon: Some(None),
            ..TabStatePatch::default()
        };
        let json = serde_json::to_string(&clear).unwrap();
        let back: TabStatePatch = serde_json::from_str(&json).unwrap();
        assert_eq!(back, clear);
    }

    #[test]
    fn test_record_serializes_type_field() {
        let tab = TabRecord::internal("about:history").unwrap();
        let json = serde_json::to_value(&tab).unwrap();
        assert_eq!(json["type"], "internal");
    }
}
