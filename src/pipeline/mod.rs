// src/pipeline/mod.rs
//! Pipelines, stages and the message processor

pub mod connections;
pub mod listener;
pub mod model;
pub mod processor;
pub mod state;

pub use connections::PipelineConnections;
pub use listener::{
    InterpreterListener, LoggingListener, NoopListener, SimulationListener, TraceEvent,
};
pub use model::{MatchPolicy, Pipeline, Stage};
pub use processor::{PipelineProcessor, ProcessingResult, Simulation};
pub use state::{ProcessorState, StateHandle};
