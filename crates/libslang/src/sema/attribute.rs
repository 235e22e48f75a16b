//! Declaration attributes recorded from `#[...]` directives.

use strum_macros::Display;

use crate::nom_tools::SpanInfo;

/// The directive kinds the compiler recognizes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum AttributeKind {
    /// `allow_cast` on a struct: permit runtime casts into it.
    AllowCast,
    /// `builtin` on a macro: the expander provides the implementation.
    Builtin,
    /// `disable(...)` on an expression, e.g. `disable(const_eval)`.
    Disable,
    /// `native(lib="...")` on a function: body provided by the host.
    Native,
}

/// Returns the attribute kind for a directive name.
pub fn attribute_kind(name: &str) -> Option<AttributeKind> {
    match name {
        "allow_cast" => Some(AttributeKind::AllowCast),
        "builtin" => Some(AttributeKind::Builtin),
        "disable" => Some(AttributeKind::Disable),
        "native" => Some(AttributeKind::Native),
        _ => None,
    }
}

/// A recorded attribute: kind, location, and `key`/`key=value` arguments.
#[derive(Debug, Clone)]
pub struct AttributeInfo {
    pub kind: AttributeKind,
    pub span: SpanInfo,
    pub args: Vec<(String, Option<String>)>,
}

impl AttributeInfo {
    /// Returns the value of a `key="value"` argument.
    pub fn arg_value(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(name, _)| name == key)
            .and_then(|(_, value)| value.as_deref())
    }

    /// Returns whether a bare `key` argument is present.
    pub fn has_arg(&self, key: &str) -> bool {
        self.args.iter().any(|(name, _)| name == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_names_map_to_kinds() {
        assert_eq!(attribute_kind("native"), Some(AttributeKind::Native));
        assert_eq!(attribute_kind("allow_cast"), Some(AttributeKind::AllowCast));
        assert_eq!(attribute_kind("builtin"), Some(AttributeKind::Builtin));
        assert_eq!(attribute_kind("disable"), Some(AttributeKind::Disable));
        assert_eq!(attribute_kind("inline"), None);
    }
}
