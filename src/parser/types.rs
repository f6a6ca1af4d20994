// src/parser/types.rs
//! Static type model shared by the parser, the function registry and the runtime

use serde::{Deserialize, Serialize};
use std::fmt;

/// Static result type of an expression or a declared parameter type.
///
/// `Object` is the dynamic type: any runtime value may flow through it, but it
/// is only assignable to parameters that are themselves declared `Object`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Long,
    Double,
    String,
    Boolean,
    Map,
    List,
    Void,
    Object,
}

impl ValueType {
    /// Whether a value of type `self` may be passed where `declared` is expected.
    ///
    /// The only implicit coercion is `Long -> Double`.
    pub fn is_assignable_to(self, declared: ValueType) -> bool {
        self == declared
            || (declared == ValueType::Object && self != ValueType::Void)
            || (self == ValueType::Long && declared == ValueType::Double)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ValueType::Long | ValueType::Double)
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::Long => "Long",
            ValueType::Double => "Double",
            ValueType::String => "String",
            ValueType::Boolean => "Boolean",
            ValueType::Map => "Map",
            ValueType::List => "List",
            ValueType::Void => "Void",
            ValueType::Object => "Object",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignability() {
        assert!(ValueType::String.is_assignable_to(ValueType::String));
        assert!(ValueType::String.is_assignable_to(ValueType::Object));
        assert!(ValueType::Long.is_assignable_to(ValueType::Double));

        assert!(!ValueType::Double.is_assignable_to(ValueType::Long));
        assert!(!ValueType::Object.is_assignable_to(ValueType::String));
        assert!(!ValueType::Void.is_assignable_to(ValueType::Object));
    }
}
