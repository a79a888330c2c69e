//! Struct tag parsing: `"name,opt1,opt2"`

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct FieldTag {
    /// Key override; `None` keeps the field name
    pub(crate) name: Option<&'static str>,
    pub(crate) omit_empty: bool,
    pub(crate) string: bool,
}

/// Parse a field tag. `None` means the field is excluded (`"-"`).
pub(crate) fn parse(tag: Option<&'static str>) -> Option<FieldTag> {
    let Some(tag) = tag else {
        return Some(FieldTag::default());
    };
    if tag == "-" {
        return None;
    }

    let mut parts = tag.split(',');
    let name = parts.next().filter(|n| !n.is_empty());
    let mut parsed = FieldTag {
        name,
        ..FieldTag::default()
    };
    for opt in parts {
        match opt {
            "omitempty" => parsed.omit_empty = true,
            "string" => parsed.string = true,
            _ => {}
        }
    }
    Some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tags() {
        assert_eq!(parse(None), Some(FieldTag::default()));
        assert_eq!(parse(Some("-")), None);

        let dash = parse(Some("-,")).unwrap();
        assert_eq!(dash.name, Some("-"));

        let t = parse(Some("a,omitempty")).unwrap();
        assert_eq!(t.name, Some("a"));
        assert!(t.omit_empty && !t.string);

        let t = parse(Some(",string,omitempty")).unwrap();
        assert_eq!(t.name, None);
        assert!(t.omit_empty && t.string);

        let t = parse(Some("id,unknown")).unwrap();
        assert!(!t.omit_empty && !t.string);
    }
}
