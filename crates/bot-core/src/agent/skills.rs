use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Declared parameter of a skill, surfaced by `%skills` and the prompt.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SkillParam {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SkillSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<SkillParam>,
}

/// A named, parameterized routine. The body is a sandbox program; invocation
/// binds the caller's arguments as the `args` variable and runs it under the
/// same timeout and trace discipline as any other script.
#[derive(Debug, Clone)]
pub struct Skill {
    pub spec: SkillSpec,
    pub body: String,
}

/// Lookup surface for the skill library. Storage is a collaborator concern;
/// the core only needs resolution and listing.
pub trait SkillRegistry: Send + Sync {
    fn lookup(&self, name: &str) -> Option<Arc<Skill>>;
    fn list(&self) -> Vec<SkillSpec>;
}

/// In-memory registry used by the runner wiring and by tests.
#[derive(Debug, Default)]
pub struct StaticSkillRegistry {
    skills: Vec<Arc<Skill>>,
}

impl StaticSkillRegistry {
    pub fn new(skills: Vec<Skill>) -> Self {
        Self {
            skills: skills.into_iter().map(Arc::new).collect(),
        }
    }
}

impl SkillRegistry for StaticSkillRegistry {
    fn lookup(&self, name: &str) -> Option<Arc<Skill>> {
        self.skills.iter().find(|s| s.spec.name == name).cloned()
    }

    fn list(&self) -> Vec<SkillSpec> {
        self.skills.iter().map(|s| s.spec.clone()).collect()
    }
}
