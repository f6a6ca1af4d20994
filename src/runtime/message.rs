// src/runtime/message.rs
//! Log message flowing through the pipelines

use crate::Value;
use ahash::HashMap;
use serde::{Deserialize, Serialize};

/// Stream every message belongs to when it has not been routed anywhere else
pub const DEFAULT_STREAM_ID: &str = "000000000000000000000001";

/// A message being processed. Rules read and mutate its fields and streams.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub fields: HashMap<String, Value>,

    /// Stream ids in routing order, without duplicates
    #[serde(default)]
    pub streams: Vec<String>,

    /// Set by `drop_message()`; no further pipeline processing happens
    #[serde(default)]
    pub dropped: bool,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_stream(mut self, stream_id: impl Into<String>) -> Self {
        self.add_stream(stream_id);
        self
    }

    /// Build a message from a JSON object; non-object input yields an error
    pub fn from_json(json: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(json)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    pub fn remove_field(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Adds the stream if it is not present. Returns whether it was added.
    pub fn add_stream(&mut self, stream_id: impl Into<String>) -> bool {
        let stream_id = stream_id.into();
        if self.streams.contains(&stream_id) {
            return false;
        }
        self.streams.push(stream_id);
        true
    }

    pub fn remove_stream(&mut self, stream_id: &str) -> bool {
        let before = self.streams.len();
        self.streams.retain(|s| s != stream_id);
        before != self.streams.len()
    }

    pub fn in_stream(&self, stream_id: &str) -> bool {
        self.streams.iter().any(|s| s == stream_id)
    }

    /// Streams used for pipeline selection: the default stream when none is set
    pub fn effective_streams(&self) -> Vec<String> {
        if self.streams.is_empty() {
            vec![DEFAULT_STREAM_ID.to_string()]
        } else {
            self.streams.clone()
        }
    }

    pub fn drop_message(&mut self) {
        self.dropped = true;
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped
    }
}
