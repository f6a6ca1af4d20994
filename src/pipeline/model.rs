// src/pipeline/model.rs
//! Pipelines and their stages

use crate::compiler::CompiledRule;
use std::sync::Arc;

pub use crate::parser::ast::MatchPolicy;

#[derive(Debug, Clone)]
pub struct Stage {
    pub priority: i64,
    pub match_policy: MatchPolicy,
    pub rules: Vec<Arc<dyn CompiledRule>>,
}

impl Stage {
    pub fn new(priority: i64, match_policy: MatchPolicy, rules: Vec<Arc<dyn CompiledRule>>) -> Self {
        Self {
            priority,
            match_policy,
            rules,
        }
    }
}

/// Named, ordered sequence of stages
#[derive(Debug, Clone)]
pub struct Pipeline {
    id: String,
    title: String,
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Stages are ordered by ascending priority
    pub fn new(id: impl Into<String>, title: impl Into<String>, mut stages: Vec<Stage>) -> Self {
        stages.sort_by_key(|stage| stage.priority);
        Self {
            id: id.into(),
            title: title.into(),
            stages,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}
