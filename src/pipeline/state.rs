// src/pipeline/state.rs
//! Immutable processor state and the handle that swaps it

use crate::compiler::{CompiledRule, RuleCompiler};
use crate::config::ConfigurationSource;
use crate::functions::FunctionRegistry;
use crate::parser::{parse_pipeline, parse_rule};
use crate::pipeline::connections::PipelineConnections;
use crate::pipeline::model::{Pipeline, Stage};
use crate::ConfigurationError;
use ahash::{HashMap, HashSet};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// One complete configuration: compiled rules, pipelines and stream
/// connections. Never mutated after it is built.
#[derive(Debug, Default)]
pub struct ProcessorState {
    rules: BTreeMap<String, Arc<dyn CompiledRule>>,
    pipelines: BTreeMap<String, Arc<Pipeline>>,
    connections: PipelineConnections,
}

impl ProcessorState {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse, check and compile every part of `source`. Any error rejects
    /// the whole configuration.
    pub fn build(
        source: &ConfigurationSource,
        registry: &FunctionRegistry,
        compiler: &RuleCompiler,
    ) -> Result<Self, ConfigurationError> {
        let mut rules = BTreeMap::new();
        let mut by_title: HashMap<String, Arc<dyn CompiledRule>> = HashMap::default();

        for rule_source in &source.rules {
            let rule = parse_rule(&rule_source.source, registry)
                .map_err(|errors| ConfigurationError::InvalidRule {
                    id: rule_source.id.clone(),
                    errors,
                })?
                .with_id(rule_source.id.clone());

            if rules.contains_key(&rule.id) {
                return Err(ConfigurationError::DuplicateRule(rule.id));
            }
            if by_title.contains_key(&rule.title) {
                return Err(ConfigurationError::DuplicateRule(rule.title));
            }

            let title = rule.title.clone();
            let compiled = compiler.compile(Arc::new(rule));
            by_title.insert(title, Arc::clone(&compiled));
            rules.insert(rule_source.id.clone(), compiled);
        }

        let mut pipelines = BTreeMap::new();
        for pipeline_source in &source.pipelines {
            if pipelines.contains_key(&pipeline_source.id) {
                return Err(ConfigurationError::DuplicatePipeline(
                    pipeline_source.id.clone(),
                ));
            }

            let definition = parse_pipeline(&pipeline_source.source).map_err(|errors| {
                ConfigurationError::InvalidPipeline {
                    id: pipeline_source.id.clone(),
                    errors,
                }
            })?;

            let mut stages = Vec::with_capacity(definition.stages.len());
            for stage in &definition.stages {
                let mut stage_rules = Vec::with_capacity(stage.rule_titles.len());
                for title in &stage.rule_titles {
                    let rule = by_title.get(title).ok_or_else(|| ConfigurationError::UnknownRule {
                        pipeline: pipeline_source.id.clone(),
                        rule: title.clone(),
                    })?;
                    stage_rules.push(Arc::clone(rule));
                }
                stages.push(Stage::new(stage.priority, stage.match_policy, stage_rules));
            }

            let pipeline = Pipeline::new(pipeline_source.id.clone(), definition.title, stages);
            pipelines.insert(pipeline_source.id.clone(), Arc::new(pipeline));
        }

        let mut connections = PipelineConnections::new();
        for connection in &source.connections {
            let mut seen = HashSet::default();
            for pipeline_id in &connection.pipeline_ids {
                if !pipelines.contains_key(pipeline_id) {
                    return Err(ConfigurationError::UnknownPipeline {
                        stream: connection.stream_id.clone(),
                        pipeline: pipeline_id.clone(),
                    });
                }
                if seen.insert(pipeline_id.as_str()) {
                    connections.connect(connection.stream_id.clone(), pipeline_id.clone());
                }
            }
        }

        Ok(Self {
            rules,
            pipelines,
            connections,
        })
    }

    pub fn rule(&self, id: &str) -> Option<&Arc<dyn CompiledRule>> {
        self.rules.get(id)
    }

    pub fn rules(&self) -> impl Iterator<Item = &Arc<dyn CompiledRule>> {
        self.rules.values()
    }

    pub fn pipeline(&self, id: &str) -> Option<&Arc<Pipeline>> {
        self.pipelines.get(id)
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn connections(&self) -> &PipelineConnections {
        &self.connections
    }
}

/// Holds the active state. Readers clone the `Arc` and keep it for the
/// whole message, so a swap never affects in-flight processing.
#[derive(Debug, Default)]
pub struct StateHandle {
    current: RwLock<Arc<ProcessorState>>,
}

impl StateHandle {
    pub fn new(state: ProcessorState) -> Self {
        Self {
            current: RwLock::new(Arc::new(state)),
        }
    }

    pub fn load(&self) -> Arc<ProcessorState> {
        let guard = match self.current.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(&guard)
    }

    /// Install `state` and return the one it replaced
    pub fn swap(&self, state: ProcessorState) -> Arc<ProcessorState> {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, Arc::new(state))
    }
}
