// src/pipeline/connections.rs
//! Stream to pipeline bindings

use ahash::HashMap;
use std::collections::BTreeSet;

/// Pipelines connected to each stream. Built once per configuration and
/// replaced as a whole.
#[derive(Debug, Clone, Default)]
pub struct PipelineConnections {
    streams: HashMap<String, BTreeSet<String>>,
}

impl PipelineConnections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, stream_id: impl Into<String>, pipeline_id: impl Into<String>) {
        self.streams
            .entry(stream_id.into())
            .or_default()
            .insert(pipeline_id.into());
    }

    /// Pipeline ids for a stream, sorted
    pub fn pipelines_for(&self, stream_id: &str) -> impl Iterator<Item = &str> {
        self.streams
            .get(stream_id)
            .into_iter()
            .flat_map(|ids| ids.iter().map(String::as_str))
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connections() {
        let mut connections = PipelineConnections::new();
        connections.connect("s1", "p2");
        connections.connect("s1", "p1");
        connections.connect("s1", "p2");

        assert_eq!(connections.pipelines_for("s1").collect::<Vec<_>>(), vec!["p1", "p2"]);
        assert_eq!(connections.pipelines_for("other").count(), 0);
        assert_eq!(connections.stream_count(), 1);
    }
}
