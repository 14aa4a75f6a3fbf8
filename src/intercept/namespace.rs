use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceKind {
    Static,
    Dynamic,
    Api,
}

impl NamespaceKind {
    pub const ALL: [NamespaceKind; 3] = [
        NamespaceKind::Static,
        NamespaceKind::Dynamic,
        NamespaceKind::Api,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NamespaceKind::Static => "static",
            NamespaceKind::Dynamic => "dynamic",
            NamespaceKind::Api => "api",
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three namespace names owned by one deployed version:
/// `<prefix>-<kind>-<version>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespaces {
    prefix: String,
    version: String,
}

impl Namespaces {
    pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            version: version.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn name(&self, kind: NamespaceKind) -> String {
        format!("{}-{}-{}", self.prefix, kind.as_str(), self.version)
    }

    pub fn current(&self) -> Vec<String> {
        NamespaceKind::ALL.iter().map(|k| self.name(*k)).collect()
    }

    /// True for namespaces this app created under any other version.
    /// Names outside the app prefix are never touched.
    pub fn is_stale(&self, name: &str) -> bool {
        let owned = name
            .strip_prefix(self.prefix.as_str())
            .map(|rest| rest.starts_with('-'))
            .unwrap_or(false);
        owned && !self.current().iter().any(|c| c == name)
    }
}
