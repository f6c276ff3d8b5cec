//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Defaults applied by the synchronization engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Title given to newly created documents
    #[serde(default = "default_title")]
    pub default_title: String,

    /// Serialized rich-content body of newly created documents
    #[serde(default = "default_body")]
    pub default_body: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_title: default_title(),
            default_body: default_body(),
        }
    }
}

fn default_title() -> String {
    "Untitled Note".to_string()
}

/// One empty paragraph, the editor's canonical empty document.
fn default_body() -> String {
    r#"[{"type":"paragraph","children":[{"text":""}]}]"#.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"default_title": "New page"}"#).unwrap();
        assert_eq!(config.default_title, "New page");
        assert_eq!(config.default_body, EngineConfig::default().default_body);
    }

    #[test]
    fn test_default_body_is_valid_json() {
        let body: serde_json::Value = serde_json::from_str(&EngineConfig::default().default_body).unwrap();
        assert_eq!(body[0]["type"], "paragraph");
    }
}
