use std::path::Path;

use desklock_engine::errors::PolicyError;
use desklock_engine::loader::load_policies;
use desklock_engine::PolicyTable;
use tempfile::TempDir;

fn dash_block(name: &str, values: &[String]) -> String {
    let mut out = format!("    {name} {{\n");
    for v in values {
        out.push_str(&format!("        - {v:?}\n"));
    }
    out.push_str("    }\n");
    out
}

/// Builder for a `role` node in a policy file
pub struct RoleBuilder {
    name: String,
    landing: String,
    paths: Vec<String>,
    entities: Vec<String>,
    blocked_labels: Vec<String>,
    dropdown_allow: Option<Vec<String>>,
}

impl RoleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            landing: "home".to_string(),
            paths: vec!["home".to_string()],
            entities: Vec::new(),
            blocked_labels: Vec::new(),
            dropdown_allow: None,
        }
    }

    pub fn with_landing(mut self, landing: &str) -> Self {
        self.landing = landing.to_string();
        self
    }

    pub fn with_paths(mut self, paths: &[&str]) -> Self {
        self.paths = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_entities(mut self, entities: &[&str]) -> Self {
        self.entities = entities.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn blocking(mut self, labels: &[&str]) -> Self {
        self.blocked_labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn allowing_dropdown(mut self, labels: &[&str]) -> Self {
        self.dropdown_allow = Some(labels.iter().map(|l| l.to_string()).collect());
        self
    }

    pub fn to_kdl(&self) -> String {
        let mut out = format!("role {:?} {{\n", self.name);
        out.push_str(&format!("    landing {:?}\n", self.landing));
        out.push_str(&dash_block("paths", &self.paths));
        if !self.entities.is_empty() {
            out.push_str(&dash_block("entities", &self.entities));
        }
        if !self.blocked_labels.is_empty() {
            out.push_str(&dash_block("blocked-labels", &self.blocked_labels));
        }
        if let Some(allow) = &self.dropdown_allow {
            out.push_str(&dash_block("dropdown-allow", allow));
        }
        out.push_str("}\n");
        out
    }
}

/// A temporary policy directory populated file by file
pub struct PolicyDir {
    dir: TempDir,
}

impl PolicyDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp policy dir"),
        }
    }

    pub fn with_file(self, name: &str, contents: &str) -> Self {
        std::fs::write(self.dir.path().join(name), contents).expect("Failed to write policy file");
        self
    }

    pub fn with_role(self, file: &str, role: RoleBuilder) -> Self {
        let kdl = role.to_kdl();
        self.with_file(file, &kdl)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn try_load(&self) -> Result<PolicyTable, PolicyError> {
        load_policies(self.dir.path())
    }

    pub fn load(&self) -> PolicyTable {
        self.try_load().expect("Failed to load test policies")
    }
}

impl Default for PolicyDir {
    fn default() -> Self {
        Self::new()
    }
}
