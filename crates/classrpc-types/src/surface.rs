//! Class surfaces and member naming rules.
//!
//! A [`ClassSurface`] is the published shape of an exported class: an ordered
//! list of member declarations. It is computed once at export time and never
//! changes afterwards.

use crate::envelope::{CONSTRUCT_MEMBER, DESTROY_MEMBER};
use serde::{Deserialize, Serialize};

/// Member names reserved for lifecycle operations.
pub const RESERVED_MEMBERS: &[&str] = &[CONSTRUCT_MEMBER, DESTROY_MEMBER];

/// Whether a member is callable or a data property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    /// A callable member.
    Method,
    /// A data property with get/set access.
    Property,
}

/// One public member of an exported class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDecl {
    /// Member name.
    pub name: String,
    /// Method or property.
    pub kind: MemberKind,
    /// Whether the importer blocks on this member.
    pub sync: bool,
    /// Whether the member lives on the class rather than on instances.
    #[serde(rename = "static")]
    pub is_static: bool,
}

/// The declared public surface of an exported class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSurface {
    /// Name the class is exported under.
    pub class_name: String,
    /// Public members in declaration order.
    pub members: Vec<MemberDecl>,
}

impl ClassSurface {
    /// Create an empty surface.
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            members: Vec::new(),
        }
    }

    /// Look up a member by name and placement.
    pub fn member(&self, name: &str, is_static: bool) -> Option<&MemberDecl> {
        self.members
            .iter()
            .find(|m| m.name == name && m.is_static == is_static)
    }

    fn names(&self, kind: MemberKind, is_static: bool) -> Vec<&str> {
        self.members
            .iter()
            .filter(|m| m.kind == kind && m.is_static == is_static)
            .map(|m| m.name.as_str())
            .collect()
    }

    /// Public instance methods.
    pub fn methods(&self) -> Vec<&str> {
        self.names(MemberKind::Method, false)
    }

    /// Public static methods.
    pub fn static_methods(&self) -> Vec<&str> {
        self.names(MemberKind::Method, true)
    }

    /// Public instance properties.
    pub fn properties(&self) -> Vec<&str> {
        self.names(MemberKind::Property, false)
    }

    /// Public static properties.
    pub fn static_properties(&self) -> Vec<&str> {
        self.names(MemberKind::Property, true)
    }
}

/// Naming conventions deciding visibility and call style.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingRules {
    /// Suffix marking a member as synchronous (default `Sync`).
    pub sync_suffix: String,
    /// Prefix marking a member as private (default `_`).
    pub private_prefix: String,
}

impl Default for NamingRules {
    fn default() -> Self {
        Self {
            sync_suffix: "Sync".to_string(),
            private_prefix: "_".to_string(),
        }
    }
}

impl NamingRules {
    /// Whether a member with this name belongs on the surface.
    pub fn is_public(&self, name: &str) -> bool {
        !name.is_empty()
            && !(!self.private_prefix.is_empty() && name.starts_with(&self.private_prefix))
            && !RESERVED_MEMBERS.contains(&name)
    }

    /// Whether a method with this name is synchronous.
    pub fn is_sync(&self, name: &str) -> bool {
        !self.sync_suffix.is_empty() && name.ends_with(&self.sync_suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(name: &str, kind: MemberKind, sync: bool, is_static: bool) -> MemberDecl {
        MemberDecl {
            name: name.to_string(),
            kind,
            sync,
            is_static,
        }
    }

    #[test]
    fn test_partitions_preserve_order() {
        let mut surface = ClassSurface::new("ApiClass");
        surface.members = vec![
            decl("getTypeSync", MemberKind::Method, true, true),
            decl("b", MemberKind::Property, true, false),
            decl("getPropSync", MemberKind::Method, true, false),
            decl("a", MemberKind::Property, true, false),
            decl("getProp", MemberKind::Method, false, false),
            decl("version", MemberKind::Property, true, true),
        ];
        assert_eq!(surface.methods(), vec!["getPropSync", "getProp"]);
        assert_eq!(surface.static_methods(), vec!["getTypeSync"]);
        assert_eq!(surface.properties(), vec!["b", "a"]);
        assert_eq!(surface.static_properties(), vec!["version"]);
        assert!(surface.member("a", false).is_some());
        assert!(surface.member("a", true).is_none());
    }

    #[test]
    fn test_naming_rules() {
        let rules = NamingRules::default();
        assert!(rules.is_public("getProp"));
        assert!(!rules.is_public("_notExport"));
        assert!(!rules.is_public("constructor"));
        assert!(!rules.is_public("destructor"));
        assert!(rules.is_sync("getPropSync"));
        assert!(!rules.is_sync("getProp"));
    }

    #[test]
    fn test_custom_naming_rules() {
        let rules = NamingRules {
            sync_suffix: "_now".to_string(),
            private_prefix: "internal".to_string(),
        };
        assert!(rules.is_sync("read_now"));
        assert!(!rules.is_public("internalState"));
        assert!(rules.is_public("_underscore"));
    }

    #[test]
    fn test_surface_json_shape() {
        let mut surface = ClassSurface::new("C");
        surface
            .members
            .push(decl("run", MemberKind::Method, false, true));
        let json = serde_json::to_value(&surface).unwrap();
        assert_eq!(json["members"][0]["static"], true);
        assert_eq!(json["members"][0]["kind"], "method");
    }
}
