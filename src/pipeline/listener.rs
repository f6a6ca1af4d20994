// src/pipeline/listener.rs
//! Observation hooks fired while a message moves through pipelines
//!
//! Listeners only observe. The processor makes the same decisions whichever
//! listener is attached.

use crate::parser::ast::Rule;
use crate::pipeline::model::{Pipeline, Stage};
use crate::runtime::message::Message;
use crate::EvaluationError;
use std::time::{Duration, Instant};
use tracing::debug;

#[allow(unused_variables)]
pub trait InterpreterListener {
    fn start_processing(&mut self, message: &Message) {}

    fn finish_processing(&mut self, message: &Message) {}

    /// Message belongs to no stream and runs the default stream's pipelines
    fn process_default_stream(&mut self, message: &Message, pipeline_ids: &[String]) {}

    fn process_streams(&mut self, message: &Message, stream_ids: &[String], pipeline_ids: &[String]) {}

    fn enter_stage(&mut self, stage: &Stage, pipeline: &Pipeline) {}

    fn exit_stage(&mut self, stage: &Stage, pipeline: &Pipeline) {}

    fn evaluate_rule(&mut self, rule: &Rule, pipeline: &Pipeline) {}

    fn fail_evaluate_rule(&mut self, rule: &Rule, pipeline: &Pipeline, error: &EvaluationError) {}

    fn satisfy_rule(&mut self, rule: &Rule, pipeline: &Pipeline) {}

    fn dissatisfy_rule(&mut self, rule: &Rule, pipeline: &Pipeline) {}

    fn execute_rule(&mut self, rule: &Rule, pipeline: &Pipeline) {}

    fn fail_execute_rule(&mut self, rule: &Rule, pipeline: &Pipeline, error: &EvaluationError) {}

    fn continue_pipeline_execution(&mut self, pipeline: &Pipeline, stage: &Stage) {}

    fn stop_pipeline_execution(&mut self, pipeline: &Pipeline, stage: &Stage) {}
}

/// Production listener
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl InterpreterListener for NoopListener {}

/// One line of a simulation trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// Time since the listener was created
    pub elapsed: Duration,
    pub text: String,
}

/// Records a human-readable trace of every hook
#[derive(Debug)]
pub struct SimulationListener {
    started: Instant,
    events: Vec<TraceEvent>,
}

impl Default for SimulationListener {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationListener {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            events: Vec::new(),
        }
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    fn record(&mut self, text: String) {
        self.events.push(TraceEvent {
            elapsed: self.started.elapsed(),
            text,
        });
    }
}

impl InterpreterListener for SimulationListener {
    fn start_processing(&mut self, _message: &Message) {
        self.record("Starting message processing".to_string());
    }

    fn finish_processing(&mut self, _message: &Message) {
        self.record("Finished message processing".to_string());
    }

    fn process_default_stream(&mut self, message: &Message, pipeline_ids: &[String]) {
        self.record(format!(
            "Message {} running {:?} for default stream",
            message.id, pipeline_ids
        ));
    }

    fn process_streams(&mut self, message: &Message, stream_ids: &[String], pipeline_ids: &[String]) {
        self.record(format!(
            "Message {} running {:?} for streams {:?}",
            message.id, pipeline_ids, stream_ids
        ));
    }

    fn enter_stage(&mut self, stage: &Stage, pipeline: &Pipeline) {
        self.record(format!(
            "Enter Stage {} of Pipeline {}",
            stage.priority,
            pipeline.title()
        ));
    }

    fn exit_stage(&mut self, stage: &Stage, pipeline: &Pipeline) {
        self.record(format!(
            "Exit Stage {} of Pipeline {}",
            stage.priority,
            pipeline.title()
        ));
    }

    fn evaluate_rule(&mut self, rule: &Rule, pipeline: &Pipeline) {
        self.record(format!(
            "Evaluate Rule {} in Pipeline {}",
            rule.title,
            pipeline.title()
        ));
    }

    fn fail_evaluate_rule(&mut self, rule: &Rule, pipeline: &Pipeline, error: &EvaluationError) {
        self.record(format!(
            "Error evaluating Rule {} in Pipeline {}: {}",
            rule.title,
            pipeline.title(),
            error
        ));
    }

    fn satisfy_rule(&mut self, rule: &Rule, pipeline: &Pipeline) {
        self.record(format!(
            "Evaluation satisfied Rule {} in Pipeline {}",
            rule.title,
            pipeline.title()
        ));
    }

    fn dissatisfy_rule(&mut self, rule: &Rule, pipeline: &Pipeline) {
        self.record(format!(
            "Evaluation not satisfied Rule {} in Pipeline {}",
            rule.title,
            pipeline.title()
        ));
    }

    fn execute_rule(&mut self, rule: &Rule, pipeline: &Pipeline) {
        self.record(format!(
            "Execute Rule {} in Pipeline {}",
            rule.title,
            pipeline.title()
        ));
    }

    fn fail_execute_rule(&mut self, rule: &Rule, pipeline: &Pipeline, error: &EvaluationError) {
        self.record(format!(
            "Failed to execute Rule {} in Pipeline {}: {}",
            rule.title,
            pipeline.title(),
            error
        ));
    }

    fn continue_pipeline_execution(&mut self, pipeline: &Pipeline, stage: &Stage) {
        self.record(format!(
            "Completed Stage {} for Pipeline {}, continuing to next Stage",
            stage.priority,
            pipeline.title()
        ));
    }

    fn stop_pipeline_execution(&mut self, pipeline: &Pipeline, stage: &Stage) {
        self.record(format!(
            "Stage {} for Pipeline {} not satisfied, not executing more Stages",
            stage.priority,
            pipeline.title()
        ));
    }
}

/// Emits every hook as a `debug` event
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl InterpreterListener for LoggingListener {
    fn start_processing(&mut self, message: &Message) {
        debug!(message = %message.id, "start processing");
    }

    fn finish_processing(&mut self, message: &Message) {
        debug!(message = %message.id, dropped = message.is_dropped(), "finish processing");
    }

    fn process_default_stream(&mut self, message: &Message, pipeline_ids: &[String]) {
        debug!(message = %message.id, pipelines = ?pipeline_ids, "processing default stream");
    }

    fn process_streams(&mut self, message: &Message, stream_ids: &[String], pipeline_ids: &[String]) {
        debug!(message = %message.id, streams = ?stream_ids, pipelines = ?pipeline_ids, "processing streams");
    }

    fn enter_stage(&mut self, stage: &Stage, pipeline: &Pipeline) {
        debug!(pipeline = pipeline.id(), stage = stage.priority, "enter stage");
    }

    fn exit_stage(&mut self, stage: &Stage, pipeline: &Pipeline) {
        debug!(pipeline = pipeline.id(), stage = stage.priority, "exit stage");
    }

    fn fail_evaluate_rule(&mut self, rule: &Rule, pipeline: &Pipeline, error: &EvaluationError) {
        debug!(pipeline = pipeline.id(), rule = %rule.id, %error, "rule condition failed");
    }

    fn satisfy_rule(&mut self, rule: &Rule, pipeline: &Pipeline) {
        debug!(pipeline = pipeline.id(), rule = %rule.id, "rule matched");
    }

    fn dissatisfy_rule(&mut self, rule: &Rule, pipeline: &Pipeline) {
        debug!(pipeline = pipeline.id(), rule = %rule.id, "rule did not match");
    }

    fn fail_execute_rule(&mut self, rule: &Rule, pipeline: &Pipeline, error: &EvaluationError) {
        debug!(pipeline = pipeline.id(), rule = %rule.id, %error, "rule actions failed");
    }

    fn stop_pipeline_execution(&mut self, pipeline: &Pipeline, stage: &Stage) {
        debug!(pipeline = pipeline.id(), stage = stage.priority, "stage not satisfied, stopping pipeline");
    }
}
