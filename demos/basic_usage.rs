// demos/basic_usage.rs
//! Basic usage of the pipeline rule processor

use pipeline_rule_processor::config::{ConfigurationSource, ProcessorConfig};
use pipeline_rule_processor::{FunctionRegistry, Message, PipelineProcessor, DEFAULT_STREAM_ID};
use std::sync::Arc;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Pipeline Rule Processor - Basic Usage ===\n");

    let source = ConfigurationSource::new()
        .rule(
            "tag_errors",
            r#"rule "tag_errors"
               when to_long($message.status) >= 500
               then
                   set_field("severity", "error");
                   route_to_stream("errors");
               end"#,
        )
        .rule(
            "normalize_user",
            r#"rule "normalize_user"
               when has_field("user")
               then set_field("user", lowercase(to_string($message.user)));
               end"#,
        )
        .rule(
            "drop_debug",
            r#"rule "drop_debug"
               when to_string($message.level) == "debug"
               then drop_message();
               end"#,
        )
        .rule(
            "alert",
            r#"rule "alert" when true then set_field("alerted", true); end"#,
        )
        .pipeline(
            "main",
            r#"pipeline "main"
               stage 0 match pass
                   rule "drop_debug";
               stage 1 match either
                   rule "normalize_user";
                   rule "tag_errors";
               end"#,
        )
        .pipeline(
            "alerts",
            r#"pipeline "alerts" stage 0 match all rule "alert"; end"#,
        )
        .connect(DEFAULT_STREAM_ID, ["main"])
        .connect("errors", ["alerts"]);

    println!("Applying configuration...");
    let processor = PipelineProcessor::new(
        Arc::new(FunctionRegistry::with_builtins()),
        ProcessorConfig::default(),
    )
    .expect("default configuration is valid");
    processor.apply(&source).expect("Failed to apply configuration");
    let state = processor.state();
    println!(
        "✓ {} pipeline(s) connected to {} stream(s)\n",
        state.pipeline_count(),
        state.connections().stream_count()
    );

    println!("Example 1: Server error");
    let message = Message::new()
        .with_id("m1")
        .with_field("status", 503)
        .with_field("user", "Alice");
    let result = processor.process(message);
    println!("Pipelines: {:?}", result.pipelines);
    println!("Streams: {:?}", result.message.streams);
    println!("user = {:?}", result.message.field("user"));
    println!("severity = {:?}", result.message.field("severity"));
    println!("alerted = {:?}\n", result.message.field("alerted"));

    println!("Example 2: Debug message");
    let message = Message::new()
        .with_id("m2")
        .with_field("level", "debug")
        .with_field("status", 200);
    let result = processor.process(message);
    println!("Dropped: {}\n", result.is_dropped());

    println!("Example 3: Simulation trace");
    let simulation = processor.simulate(Message::new().with_id("m3").with_field("status", 500));
    for event in &simulation.trace {
        println!("  {}", event.text);
    }
}
