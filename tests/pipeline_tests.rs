// tests/pipeline_tests.rs
//! Stage policies, stream routing and configuration swaps

use pipeline_rule_processor::config::{CodegenConfig, ConfigurationSource, ProcessorConfig};
use pipeline_rule_processor::runtime::RuleError;
use pipeline_rule_processor::{
    ExecutionMode, FunctionRegistry, Message, PipelineProcessor, Value, DEFAULT_STREAM_ID,
};
use pipeline_rule_processor::ConfigurationError;
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("pipeline_rule_processor=debug"))
        .with_test_writer()
        .try_init();
}

fn processor(config: ProcessorConfig) -> PipelineProcessor {
    PipelineProcessor::new(Arc::new(FunctionRegistry::with_builtins()), config).unwrap()
}

/// `matches` is true, `misses` is false, `mark` sets field "marked"
fn base_rules() -> ConfigurationSource {
    ConfigurationSource::new()
        .rule("r-match", r#"rule "matches" when true then set_field("matched", true); end"#)
        .rule("r-miss", r#"rule "misses" when false then set_field("missed", true); end"#)
        .rule("r-mark", r#"rule "mark" when true then set_field("marked", true); end"#)
}

#[test]
fn test_all_requires_every_rule() {
    let processor = processor(ProcessorConfig::default());
    processor
        .apply(
            &base_rules()
                .pipeline(
                    "p",
                    r#"pipeline "all"
                       stage 0 match all
                         rule "matches";
                         rule "misses";
                       stage 1 match all
                         rule "mark";
                       end"#,
                )
                .connect(DEFAULT_STREAM_ID, ["p"]),
        )
        .unwrap();

    let result = processor.process(Message::new());
    assert!(!result.message.has_field("matched"));
    assert!(!result.message.has_field("missed"));
    assert!(!result.message.has_field("marked"));
}

#[test]
fn test_either_runs_matched_and_continues() {
    let processor = processor(ProcessorConfig::default());
    processor
        .apply(
            &base_rules()
                .pipeline(
                    "p",
                    r#"pipeline "either"
                       stage 0 match either
                         rule "matches";
                         rule "misses";
                       stage 1 match all
                         rule "mark";
                       end"#,
                )
                .connect(DEFAULT_STREAM_ID, ["p"]),
        )
        .unwrap();

    let result = processor.process(Message::new());
    assert_eq!(result.message.field("matched"), Some(&Value::Boolean(true)));
    assert!(!result.message.has_field("missed"));
    assert_eq!(result.message.field("marked"), Some(&Value::Boolean(true)));
}

#[test]
fn test_unsatisfied_stage_stops_pipeline() {
    let processor = processor(ProcessorConfig::default());
    processor
        .apply(
            &base_rules()
                .pipeline(
                    "p",
                    r#"pipeline "stop" stage -5 match either rule "misses"; stage 10 match all rule "mark"; end"#,
                )
                .connect(DEFAULT_STREAM_ID, ["p"]),
        )
        .unwrap();

    let result = processor.process(Message::new());
    assert!(!result.message.has_field("marked"));
    assert_eq!(result.pipelines, vec!["p".to_string()]);
}

#[test]
fn test_empty_either_stage_and_pass_stage_continue() {
    let processor = processor(ProcessorConfig::default());
    processor
        .apply(
            &base_rules()
                .pipeline(
                    "p",
                    r#"pipeline "lenient"
                       stage 0 match either
                       stage 1 match pass rule "misses";
                       stage 2 match all rule "mark";
                       end"#,
                )
                .connect(DEFAULT_STREAM_ID, ["p"]),
        )
        .unwrap();

    let result = processor.process(Message::new());
    assert_eq!(result.message.field("marked"), Some(&Value::Boolean(true)));
}

#[test]
fn test_pipelines_run_in_id_order() {
    let processor = processor(ProcessorConfig::default());
    processor
        .apply(
            &ConfigurationSource::new()
                .rule("one", r#"rule "one" when true then set_field("x", 1); end"#)
                .rule("two", r#"rule "two" when true then set_field("x", 2); end"#)
                .pipeline("b", r#"pipeline "second" stage 0 match all rule "two"; end"#)
                .pipeline("a", r#"pipeline "first" stage 0 match all rule "one"; end"#)
                .connect(DEFAULT_STREAM_ID, ["b", "a"]),
        )
        .unwrap();

    let result = processor.process(Message::new());
    assert_eq!(result.pipelines, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(result.message.field("x"), Some(&Value::Long(2)));
}

#[test]
fn test_routing_runs_pipelines_of_new_stream() {
    init_tracing();
    let processor = processor(ProcessorConfig::default());
    processor
        .apply(
            &ConfigurationSource::new()
                .rule(
                    "route",
                    r#"rule "route errors"
                       when to_long($message.status) >= 500
                       then route_to_stream("errors");
                       end"#,
                )
                .rule("tag", r#"rule "tag" when true then set_field("alert", true); end"#)
                .pipeline("ingest", r#"pipeline "ingest" stage 0 match all rule "route errors"; end"#)
                .pipeline("alerts", r#"pipeline "alerts" stage 0 match all rule "tag"; end"#)
                .connect(DEFAULT_STREAM_ID, ["ingest"])
                .connect("errors", ["alerts"]),
        )
        .unwrap();

    let result = processor.process(Message::new().with_field("status", 503));
    assert_eq!(result.pipelines, vec!["ingest".to_string(), "alerts".to_string()]);
    assert!(result.message.in_stream("errors"));
    assert_eq!(result.message.field("alert"), Some(&Value::Boolean(true)));

    let result = processor.process(Message::new().with_field("status", 200));
    assert_eq!(result.pipelines, vec!["ingest".to_string()]);
    assert!(!result.message.has_field("alert"));
}

#[test]
fn test_leaving_only_stream_falls_back_to_default_stream() {
    let processor = processor(ProcessorConfig::default());
    processor
        .apply(
            &base_rules()
                .rule(
                    "release",
                    r#"rule "release" when true then remove_from_stream("quarantine"); end"#,
                )
                .pipeline("q", r#"pipeline "quarantine" stage 0 match all rule "release"; end"#)
                .pipeline("main", r#"pipeline "main" stage 0 match all rule "mark"; end"#)
                .connect("quarantine", ["q"])
                .connect(DEFAULT_STREAM_ID, ["main"]),
        )
        .unwrap();

    let simulation = processor.simulate(Message::new().with_id("m").with_stream("quarantine"));
    let result = simulation.result;

    assert_eq!(result.pipelines, vec!["q".to_string(), "main".to_string()]);
    assert!(result.message.streams.is_empty());
    assert_eq!(result.message.field("marked"), Some(&Value::Boolean(true)));
    assert!(simulation
        .trace
        .iter()
        .any(|e| e.text == "Message m running [\"main\"] for default stream"));
}

#[test]
fn test_dropped_message_skips_remaining_pipelines() {
    let processor = processor(ProcessorConfig::default());
    processor
        .apply(
            &base_rules()
                .rule("drop", r#"rule "drop" when true then drop_message(); end"#)
                .pipeline("a", r#"pipeline "dropper" stage 0 match all rule "drop"; end"#)
                .pipeline("b", r#"pipeline "marker" stage 0 match all rule "mark"; end"#)
                .connect(DEFAULT_STREAM_ID, ["a", "b"]),
        )
        .unwrap();

    let result = processor.process(Message::new());
    assert!(result.is_dropped());
    assert_eq!(result.pipelines, vec!["a".to_string()]);
    assert!(!result.message.has_field("marked"));
}

#[test]
fn test_simulation_trace_order() {
    let processor = processor(ProcessorConfig::default());
    processor
        .apply(
            &base_rules()
                .pipeline("p", r#"pipeline "main" stage 0 match all rule "matches"; end"#)
                .connect(DEFAULT_STREAM_ID, ["p"]),
        )
        .unwrap();

    let simulation = processor.simulate(Message::new().with_id("m-1"));
    let texts: Vec<&str> = simulation.trace.iter().map(|e| e.text.as_str()).collect();

    assert_eq!(
        texts,
        vec![
            "Starting message processing",
            "Message m-1 running [\"p\"] for default stream",
            "Enter Stage 0 of Pipeline main",
            "Evaluate Rule matches in Pipeline main",
            "Evaluation satisfied Rule matches in Pipeline main",
            "Execute Rule matches in Pipeline main",
            "Exit Stage 0 of Pipeline main",
            "Completed Stage 0 for Pipeline main, continuing to next Stage",
            "Finished message processing",
        ]
    );
    assert!(simulation
        .trace
        .windows(2)
        .all(|pair| pair[0].elapsed <= pair[1].elapsed));
    assert_eq!(simulation.result.message.field("matched"), Some(&Value::Boolean(true)));
}

#[test]
fn test_rejected_configuration_keeps_previous_state() {
    init_tracing();
    let processor = processor(ProcessorConfig::default());
    processor
        .apply(
            &base_rules()
                .pipeline("p", r#"pipeline "main" stage 0 match all rule "mark"; end"#)
                .connect(DEFAULT_STREAM_ID, ["p"]),
        )
        .unwrap();

    let broken = ConfigurationSource::new()
        .rule("bad", r#"rule "bad" when no_such_function() then end"#)
        .pipeline("p", r#"pipeline "main" stage 0 match all rule "bad"; end"#)
        .connect(DEFAULT_STREAM_ID, ["p"]);
    let err = processor.apply(&broken).unwrap_err();
    assert!(matches!(err, ConfigurationError::InvalidRule { ref id, .. } if id == "bad"));

    let result = processor.process(Message::new());
    assert_eq!(result.message.field("marked"), Some(&Value::Boolean(true)));
    assert!(processor.state().rule("r-mark").is_some());
}

#[test]
fn test_codegen_fallback_is_observable() {
    init_tracing();
    let config = ProcessorConfig {
        codegen: CodegenConfig {
            enabled: true,
            max_instructions: 3,
        },
        ..ProcessorConfig::default()
    };
    let source = ConfigurationSource::new()
        .rule("small", r#"rule "small" when true then end"#)
        .rule(
            "large",
            r#"rule "large"
               when to_long($message.a) + to_long($message.b) > 10
               then set_field("sum_large", true);
               end"#,
        )
        .pipeline("p", r#"pipeline "p" stage 0 match either rule "small"; rule "large"; end"#)
        .connect(DEFAULT_STREAM_ID, ["p"]);

    let limited = processor(config);
    limited.apply(&source).unwrap();
    let state = limited.state();
    assert_eq!(state.rule("small").unwrap().execution_mode(), ExecutionMode::Generated);
    assert_eq!(state.rule("large").unwrap().execution_mode(), ExecutionMode::Interpreted);

    let unlimited = processor(ProcessorConfig::default());
    unlimited.apply(&source).unwrap();
    assert_eq!(
        unlimited.state().rule("large").unwrap().execution_mode(),
        ExecutionMode::Generated
    );

    let message = Message::new().with_field("a", 7).with_field("b", 8);
    assert_eq!(
        limited.process(message.clone()),
        unlimited.process(message)
    );
}

#[test]
fn test_processing_errors_are_recorded() {
    let source = ConfigurationSource::new()
        .rule(
            "explode",
            r#"rule "explode" when true then set_field("x", 10 / to_long($message.d)); end"#,
        )
        .pipeline("p", r#"pipeline "p" stage 0 match all rule "explode"; end"#)
        .connect(DEFAULT_STREAM_ID, ["p"]);

    let recording = processor(ProcessorConfig::default());
    recording.apply(&source).unwrap();
    let result = recording.process(Message::new().with_field("d", 0));
    assert_eq!(
        result.errors,
        vec![RuleError {
            rule_id: "explode".to_string(),
            error: pipeline_rule_processor::EvaluationError::DivisionByZero,
        }]
    );
    assert_eq!(
        result.message.field("processing_error"),
        Some(&Value::from("rule 'explode': division by zero"))
    );
    assert!(!result.message.has_field("x"));

    let silent = processor(ProcessorConfig {
        record_processing_errors: false,
        ..ProcessorConfig::default()
    });
    silent.apply(&source).unwrap();
    let result = silent.process(Message::new().with_field("d", 0));
    assert_eq!(result.errors.len(), 1);
    assert!(!result.message.has_field("processing_error"));
}
