//! Bridge configuration.
//!
//! The wire conventions here are fixed for a given deployment: both sides must agree
//! on the discriminator field name and the callback entry point.

/// Default discriminator field for polymorphic envelopes.
pub const DEFAULT_TYPE_TAG_FIELD: &str = "typeTag";
/// Default method name the remote side calls on a callback token.
pub const DEFAULT_CALLBACK_METHOD: &str = "invoke";
/// Default remote method used to release a handle.
pub const DEFAULT_RELEASE_METHOD: &str = "dispose";
/// Default maximum frame size for the framed transport (8 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub type_tag_field: String,
    pub callback_method: String,
    pub release_method: String,
    pub max_frame_length: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            type_tag_field: DEFAULT_TYPE_TAG_FIELD.to_string(),
            callback_method: DEFAULT_CALLBACK_METHOD.to_string(),
            release_method: DEFAULT_RELEASE_METHOD.to_string(),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `SCRIPTBRIDGE_*` environment variables.
    ///
    /// Unparseable or empty values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(field) = non_empty("SCRIPTBRIDGE_TYPE_TAG_FIELD") {
            config.type_tag_field = field;
        }
        if let Some(method) = non_empty("SCRIPTBRIDGE_CALLBACK_METHOD") {
            config.callback_method = method;
        }
        if let Some(method) = non_empty("SCRIPTBRIDGE_RELEASE_METHOD") {
            config.release_method = method;
        }
        if let Some(raw) = non_empty("SCRIPTBRIDGE_MAX_FRAME_BYTES") {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.max_frame_length = n,
                _ => tracing::warn!(value = %raw, "Ignoring invalid SCRIPTBRIDGE_MAX_FRAME_BYTES"),
            }
        }

        config
    }

    pub fn with_type_tag_field(mut self, field: impl Into<String>) -> Self {
        self.type_tag_field = field.into();
        self
    }

    pub fn with_callback_method(mut self, method: impl Into<String>) -> Self {
        self.callback_method = method.into();
        self
    }

    pub fn with_release_method(mut self, method: impl Into<String>) -> Self {
        self.release_method = method.into();
        self
    }

    pub fn with_max_frame_length(mut self, bytes: usize) -> Self {
        self.max_frame_length = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = BridgeConfig::new();
        assert_eq!(config.type_tag_field, "typeTag");
        assert_eq!(config.callback_method, "invoke");
        assert_eq!(config.release_method, "dispose");
        assert_eq!(config.max_frame_length, 8 * 1024 * 1024);
    }

    #[test]
    fn builder_pattern() {
        let config = BridgeConfig::new()
            .with_type_tag_field("kind")
            .with_callback_method("call")
            .with_release_method("release")
            .with_max_frame_length(1024);

        assert_eq!(config.type_tag_field, "kind");
        assert_eq!(config.callback_method, "call");
        assert_eq!(config.release_method, "release");
        assert_eq!(config.max_frame_length, 1024);
    }

    #[test]
    fn env_overrides() {
        let config = BridgeConfig::from_lookup(lookup_from(&[
            ("SCRIPTBRIDGE_TYPE_TAG_FIELD", "__type"),
            ("SCRIPTBRIDGE_MAX_FRAME_BYTES", "4096"),
        ]));
        assert_eq!(config.type_tag_field, "__type");
        assert_eq!(config.callback_method, "invoke");
        assert_eq!(config.max_frame_length, 4096);
    }

    #[test]
    fn env_ignores_garbage() {
        let config = BridgeConfig::from_lookup(lookup_from(&[
            ("SCRIPTBRIDGE_CALLBACK_METHOD", "   "),
            ("SCRIPTBRIDGE_MAX_FRAME_BYTES", "lots"),
        ]));
        assert_eq!(config, BridgeConfig::default());
    }
}
