//! Encode and decode configuration
//!
//! Both option structs derive serde so an embedding application can keep them
//! in its own config file; every field has a default, so partial configs load.

use serde::{Deserialize, Serialize};

/// Indentation applied by indented encoding: each new line starts with
/// `prefix` followed by one `indent` per nesting level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Indent {
    pub prefix: String,
    pub indent: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeOptions {
    /// Escape `<`, `>` and `&` as `\u003c`, `\u003e`, `\u0026`
    pub escape_html: bool,
    pub indent: Option<Indent>,
    /// Emit map entries in iteration order instead of sorting by key
    pub unordered_map: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            escape_html: true,
            indent: None,
            unordered_map: false,
        }
    }
}

impl EncodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn escape_html(mut self, on: bool) -> Self {
        self.escape_html = on;
        self
    }

    pub fn indent(mut self, prefix: impl Into<String>, indent: impl Into<String>) -> Self {
        self.indent = Some(Indent {
            prefix: prefix.into(),
            indent: indent.into(),
        });
        self
    }

    pub fn unordered_map(mut self, on: bool) -> Self {
        self.unordered_map = on;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeOptions {
    /// Decode numbers inside dynamic values as `Number` instead of `f64`
    pub use_number: bool,
    /// Reject object keys that match no struct field
    pub disallow_unknown_fields: bool,
}

impl DecodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn use_number(mut self, on: bool) -> Self {
        self.use_number = on;
        self
    }

    pub fn disallow_unknown_fields(mut self, on: bool) -> Self {
        self.disallow_unknown_fields = on;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_defaults_escape_html() {
        let opts = EncodeOptions::default();
        assert!(opts.escape_html);
        assert!(opts.indent.is_none());
        assert!(!opts.unordered_map);
    }

    #[test]
    fn test_partial_config_loads() {
        let opts: EncodeOptions =
            serde_json::from_str(r#"{"indent":{"indent":"  "}}"#).unwrap();
        assert!(opts.escape_html);
        assert_eq!(
            opts.indent,
            Some(Indent {
                prefix: String::new(),
                indent: "  ".into()
            })
        );

        let opts: DecodeOptions =
            serde_json::from_str(r#"{"disallow_unknown_fields":true}"#).unwrap();
        assert!(opts.disallow_unknown_fields);
        assert!(!opts.use_number);
    }

    #[test]
    fn test_builders() {
        let opts = EncodeOptions::new()
            .escape_html(false)
            .indent(">", "\t")
            .unordered_map(true);
        assert!(!opts.escape_html);
        assert!(opts.unordered_map);
        assert_eq!(opts.indent.as_ref().map(|i| i.prefix.as_str()), Some(">"));
    }
}
