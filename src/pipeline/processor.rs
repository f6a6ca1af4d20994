// src/pipeline/processor.rs
//! Runs messages through the pipelines connected to their streams

use crate::compiler::RuleCompiler;
use crate::config::{ConfigurationSource, ProcessorConfig};
use crate::functions::FunctionRegistry;
use crate::pipeline::listener::{InterpreterListener, NoopListener, SimulationListener, TraceEvent};
use crate::pipeline::model::{MatchPolicy, Pipeline, Stage};
use crate::pipeline::state::{ProcessorState, StateHandle};
use crate::runtime::context::{EvaluationContext, RuleError};
use crate::runtime::message::{Message, DEFAULT_STREAM_ID};
use crate::{ConfigurationError, Value};
use ahash::HashSet;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of processing one message
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingResult {
    pub message: Message,
    /// Failures raised by rule conditions and actions, in order
    pub errors: Vec<RuleError>,
    /// Ids of the pipelines that ran, in execution order
    pub pipelines: Vec<String>,
}

impl ProcessingResult {
    pub fn is_dropped(&self) -> bool {
        self.message.is_dropped()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Processing result with the trace recorded along the way
#[derive(Debug, Clone)]
pub struct Simulation {
    pub result: ProcessingResult,
    pub trace: Vec<TraceEvent>,
}

/// Entry point for message processing.
///
/// Shared across threads; configuration can be replaced while messages are
/// being processed.
#[derive(Debug)]
pub struct PipelineProcessor {
    registry: Arc<FunctionRegistry>,
    compiler: RuleCompiler,
    config: ProcessorConfig,
    state: StateHandle,
}

impl PipelineProcessor {
    /// Starts with an empty state: no rules, pipelines or connections.
    /// Fails when `config` does not validate.
    pub fn new(
        registry: Arc<FunctionRegistry>,
        config: ProcessorConfig,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            registry,
            compiler: RuleCompiler::new(config.codegen.clone()),
            config,
            state: StateHandle::default(),
        })
    }

    /// Build a new state from `source` and make it active. On error the
    /// current state stays in place.
    pub fn apply(&self, source: &ConfigurationSource) -> Result<(), ConfigurationError> {
        let state = match ProcessorState::build(source, &self.registry, &self.compiler) {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, "configuration rejected, keeping current state");
                return Err(err);
            }
        };

        info!(
            rules = source.rules.len(),
            pipelines = state.pipeline_count(),
            streams = state.connections().stream_count(),
            "activating processor state"
        );
        self.state.swap(state);
        Ok(())
    }

    pub fn state(&self) -> Arc<ProcessorState> {
        self.state.load()
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn process(&self, message: Message) -> ProcessingResult {
        self.process_with_listener(message, &mut NoopListener)
    }

    /// Process and record a trace of every decision
    pub fn simulate(&self, message: Message) -> Simulation {
        let mut listener = SimulationListener::new();
        let result = self.process_with_listener(message, &mut listener);
        Simulation {
            result,
            trace: listener.into_events(),
        }
    }

    pub fn process_with_listener(
        &self,
        message: Message,
        listener: &mut dyn InterpreterListener,
    ) -> ProcessingResult {
        let state = self.state.load();
        let mut ctx = EvaluationContext::new(message);
        let mut seen_streams: HashSet<String> = HashSet::default();
        let mut seen_pipelines: HashSet<String> = HashSet::default();
        let mut executed = Vec::new();

        listener.start_processing(ctx.message());

        // Rules may route the message into more streams; those streams'
        // pipelines run in a later round.
        'rounds: while !ctx.message().is_dropped() {
            let streams: Vec<String> = ctx
                .message()
                .effective_streams()
                .into_iter()
                .filter(|stream| !seen_streams.contains(stream))
                .collect();
            if streams.is_empty() {
                break;
            }

            let pipeline_ids: Vec<String> = streams
                .iter()
                .flat_map(|stream| state.connections().pipelines_for(stream))
                .filter(|id| !seen_pipelines.contains(*id))
                .map(str::to_owned)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();

            if streams.len() == 1 && streams[0] == DEFAULT_STREAM_ID {
                listener.process_default_stream(ctx.message(), &pipeline_ids);
            } else {
                listener.process_streams(ctx.message(), &streams, &pipeline_ids);
            }
            seen_streams.extend(streams);

            for id in pipeline_ids {
                seen_pipelines.insert(id.clone());
                let Some(pipeline) = state.pipeline(&id) else {
                    continue;
                };
                self.run_pipeline(pipeline, &mut ctx, listener);
                executed.push(id);

                if ctx.message().is_dropped() {
                    debug!(message = %ctx.message().id, "message dropped, stopping processing");
                    break 'rounds;
                }
            }
        }

        listener.finish_processing(ctx.message());

        let (mut message, errors) = ctx.into_parts();
        if self.config.record_processing_errors && !errors.is_empty() {
            let text = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            message.set_field(self.config.processing_error_field.clone(), Value::String(text));
        }

        ProcessingResult {
            message,
            errors,
            pipelines: executed,
        }
    }

    fn run_pipeline(
        &self,
        pipeline: &Pipeline,
        ctx: &mut EvaluationContext,
        listener: &mut dyn InterpreterListener,
    ) {
        for stage in pipeline.stages() {
            let satisfied = self.run_stage(stage, pipeline, ctx, listener);

            if satisfied && !ctx.message().is_dropped() {
                listener.continue_pipeline_execution(pipeline, stage);
            } else {
                listener.stop_pipeline_execution(pipeline, stage);
                break;
            }
        }
    }

    /// Returns whether the stage is satisfied under its match policy
    fn run_stage(
        &self,
        stage: &Stage,
        pipeline: &Pipeline,
        ctx: &mut EvaluationContext,
        listener: &mut dyn InterpreterListener,
    ) -> bool {
        listener.enter_stage(stage, pipeline);

        let mut matched = Vec::with_capacity(stage.rules.len());
        for rule in &stage.rules {
            listener.evaluate_rule(rule.rule(), pipeline);
            match rule.evaluate_condition(ctx) {
                Ok(true) => {
                    listener.satisfy_rule(rule.rule(), pipeline);
                    matched.push(rule);
                }
                Ok(false) => listener.dissatisfy_rule(rule.rule(), pipeline),
                Err(err) => {
                    debug!(pipeline = pipeline.id(), rule = rule.id(), error = %err, "rule condition failed");
                    listener.fail_evaluate_rule(rule.rule(), pipeline, &err);
                    ctx.add_error(rule.id(), err);
                }
            }
        }

        let satisfied = match stage.match_policy {
            MatchPolicy::All => matched.len() == stage.rules.len(),
            MatchPolicy::Either => stage.rules.is_empty() || !matched.is_empty(),
            MatchPolicy::Pass => true,
        };

        if satisfied || stage.match_policy != MatchPolicy::All {
            for rule in matched {
                listener.execute_rule(rule.rule(), pipeline);
                if let Err(err) = rule.execute(ctx) {
                    warn!(pipeline = pipeline.id(), rule = rule.id(), error = %err, "rule actions failed");
                    listener.fail_execute_rule(rule.rule(), pipeline, &err);
                    ctx.add_error(rule.id(), err);
                }
            }
        }

        listener.exit_stage(stage, pipeline);
        satisfied
    }
}
