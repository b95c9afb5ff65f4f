//! Deployed web modules.

use crate::routing::matcher::normalize_slashes;

/// A web module deployed on a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub name: String,
    pub context_path: String,
}

impl Deployment {
    pub fn new(name: impl Into<String>, context_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context_path: context_path.into(),
        }
    }

    /// Path the module is served under. The host's default web module is
    /// always served at `/`.
    pub fn resolve_context_path(&self, default_web_module: &str) -> String {
        if self.name == default_web_module {
            "/".to_string()
        } else {
            normalize_slashes(&self.context_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_module_lands_on_root() {
        let root = Deployment::new("ROOT.war", "/ROOT");
        assert_eq!(root.resolve_context_path("ROOT.war"), "/");

        let app = Deployment::new("shop.war", "shop/");
        assert_eq!(app.resolve_context_path("ROOT.war"), "/shop");
    }
}
