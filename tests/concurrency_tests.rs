// tests/concurrency_tests.rs
//! Concurrent processing while configurations are swapped

use pipeline_rule_processor::config::{ConfigurationSource, ProcessorConfig};
use pipeline_rule_processor::{FunctionRegistry, Message, PipelineProcessor, Value, DEFAULT_STREAM_ID};
use std::sync::Arc;

fn versioned(version: &str) -> ConfigurationSource {
    ConfigurationSource::new()
        .rule(
            "first",
            format!(r#"rule "first" when true then set_field("version", "{}"); end"#, version),
        )
        .rule(
            "second",
            format!(r#"rule "second" when true then set_field("version_copy", "{}"); end"#, version),
        )
        .pipeline(
            "p",
            r#"pipeline "versioned" stage 0 match all rule "first"; stage 1 match all rule "second"; end"#,
        )
        .connect(DEFAULT_STREAM_ID, ["p"])
}

#[test]
fn test_processor_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<PipelineProcessor>();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_messages_see_one_consistent_state() {
    let processor = Arc::new(PipelineProcessor::new(
        Arc::new(FunctionRegistry::with_builtins()),
        ProcessorConfig::default(),
    )
    .unwrap());
    processor.apply(&versioned("v1")).unwrap();

    let swapper = {
        let processor = Arc::clone(&processor);
        tokio::spawn(async move {
            for i in 0..100 {
                let version = if i % 2 == 0 { "v2" } else { "v1" };
                processor.apply(&versioned(version)).unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let mut workers = Vec::new();
    for worker in 0..8 {
        let processor = Arc::clone(&processor);
        workers.push(tokio::spawn(async move {
            for i in 0..250 {
                let message = Message::new()
                    .with_id(format!("{}-{}", worker, i))
                    .with_field("n", i);
                let result = processor.process(message);

                let version = result.message.field("version").cloned();
                assert!(matches!(
                    version,
                    Some(Value::String(ref v)) if v == "v1" || v == "v2"
                ));
                assert_eq!(version.as_ref(), result.message.field("version_copy"));
                assert!(result.errors.is_empty());
                tokio::task::yield_now().await;
            }
        }));
    }

    for worker in workers {
        worker.await.unwrap();
    }
    swapper.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_in_flight_state_survives_swap() {
    let processor = Arc::new(PipelineProcessor::new(
        Arc::new(FunctionRegistry::with_builtins()),
        ProcessorConfig::default(),
    )
    .unwrap());
    processor.apply(&versioned("old")).unwrap();

    let held = processor.state();
    let swap = {
        let processor = Arc::clone(&processor);
        tokio::task::spawn_blocking(move || processor.apply(&versioned("new")))
    };
    swap.await.unwrap().unwrap();

    assert!(held.rule("first").is_some());
    let result = processor.process(Message::new());
    assert_eq!(result.message.field("version"), Some(&Value::from("new")));
}
