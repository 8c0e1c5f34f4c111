// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end scenario tests exercising a mock adapter, the rule engine,
//! and a sink wired together through the real bus, rather than any one
//! module in isolation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gateway_adapters::MockAdapter;
use gateway_bus::Bus;
use gateway_core::config::{RetryConfig, SinkConfig, SinkSubscriptionConfig, SubscriptionDataType};
use gateway_core::metrics::MetricsCore;
use gateway_core::{CoreError, Health, Point, Sink, Value};
use gateway_rules::engine::{RuleEngine, RuleEngineOptions};
use gateway_rules::rule::Rule;
use gateway_runtime::{AdapterRuntime, AdapterRuntimeOptions, SinkRuntime};
use gateway_sinks::memory_sink::{MemorySink, MemoryStore};

fn rule_from_json(json: serde_json::Value) -> Rule {
    serde_json::from_value(json).unwrap()
}

fn memory_sink_config(name: &str, subject: &str, batch_size: usize) -> SinkConfig {
    SinkConfig {
        name: name.to_string(),
        type_name: "memory".to_string(),
        batch_size,
        buffer_size: 1000,
        tags: HashMap::new(),
        params: serde_json::Value::Null,
        subscriptions: vec![SinkSubscriptionConfig {
            subject: subject.to_string(),
            queue_group: None,
            data_type: SubscriptionDataType::Raw,
            enabled: true,
            tags: HashMap::new(),
            transform: None,
        }],
        filters: vec![],
        retry: RetryConfig::default(),
        target_sinks: vec![],
        enabled: true,
    }
}

/// 1. Mock adapter -> rule (unit_convert C->F) -> memory sink.
#[tokio::test]
async fn mock_adapter_rule_converts_to_memory_sink() {
    let bus = Bus::new();
    let metrics = MetricsCore::new();

    let engine = RuleEngine::new(bus.clone(), metrics.clone());
    let rule = rule_from_json(serde_json::json!({
        "id": "convert-temp",
        "name": "convert-temp",
        "condition": {"simple": {"field": "key", "operator": "eq", "value": "temp"}},
        "actions": [
            {"type": "transform", "sub_type": "unit_convert", "from": "C", "to": "F"}
        ]
    }));
    engine.load_rules(vec![rule]).unwrap();
    engine.start(RuleEngineOptions::default()).await.unwrap();

    let store = MemoryStore::new();
    let sink = Box::new(MemorySink::with_store(store.clone()));
    let sink_runtime = SinkRuntime::new(sink, memory_sink_config("mem1", "iot.data.d1.temp", 1), bus.clone(), metrics.sink("mem1"));
    sink_runtime.init().await.unwrap();
    sink_runtime.start().await.unwrap();

    let adapter = Box::new(MockAdapter::new("sim1"));
    let adapter_runtime = AdapterRuntime::new(
        "sim1",
        "mock",
        adapter,
        bus.clone(),
        metrics.adapter("sim1"),
        AdapterRuntimeOptions::default(),
    );
    adapter_runtime
        .init(serde_json::json!({
            "device_id": "d1",
            "key": "temp",
            "values": [100.0, 101.0, 102.0, 103.0, 104.0],
            "interval_ms": 100,
        }))
        .await
        .unwrap();
    adapter_runtime.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(800)).await;

    let history = store.history("d1", "temp");
    let values: Vec<f64> = history.iter().map(|p| p.value.as_f64().unwrap()).collect();
    let expected = vec![212.0, 213.8, 215.6, 217.4, 219.2];
    assert_eq!(values.len(), expected.len());
    for (got, want) in values.iter().zip(expected.iter()) {
        assert!((got - want).abs() < 1e-6, "got {got}, want {want}");
    }

    adapter_runtime.stop().await.unwrap();
    sink_runtime.stop().await.unwrap();
    engine.stop().await;
}

/// 2. Windowed average aggregate: (count, avg) after each of v=10,20,30,40.
#[tokio::test]
async fn windowed_average_aggregate_emits_running_count_and_avg() {
    let bus = Bus::new();
    let metrics = MetricsCore::new();
    let engine = RuleEngine::new(bus.clone(), metrics);

    let rule = rule_from_json(serde_json::json!({
        "id": "avg3",
        "name": "avg3",
        "condition": {"simple": {"field": "key", "operator": "eq", "value": "temp"}},
        "actions": [
            {
                "type": "aggregate",
                "group_by": ["device_id"],
                "window_size": 3,
                "functions": ["avg", "count"],
                "output": {"key_template": "agg.{{group_key}}", "forward": true}
            }
        ]
    }));
    engine.load_rules(vec![rule]).unwrap();
    engine.start(RuleEngineOptions::default()).await.unwrap();

    let summaries: Arc<std::sync::Mutex<Vec<Point>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let collector = summaries.clone();
    bus.subscribe(
        "iot.rules.avg3",
        Arc::new(move |payload| {
            let collector = collector.clone();
            Box::pin(async move {
                if let Ok(point) = serde_json::from_value::<Point>((*payload).clone()) {
                    collector.lock().unwrap().push(point);
                }
            })
        }),
        gateway_bus::SubscribeOptions::default(),
    )
    .unwrap();

    for (i, v) in [10.0, 20.0, 30.0, 40.0].iter().enumerate() {
        let point = Point::new("d1", "temp", Value::Float(*v), i as i64).unwrap();
        bus.publish(&gateway_bus::subjects::data("d1", "temp"), &point).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let got = summaries.lock().unwrap();
    assert_eq!(got.len(), 4);

    let expect = [(1.0, 10.0), (2.0, 15.0), (3.0, 20.0), (3.0, 30.0)];
    for (summary, (count, avg)) in got.iter().zip(expect.iter()) {
        let Value::GenericVector(vec) = &summary.value else {
            panic!("expected a GenericVector summary point");
        };
        let count_idx = vec.labels.iter().position(|l| l == "count").unwrap();
        let avg_idx = vec.labels.iter().position(|l| l == "avg").unwrap();
        assert!((vec.values[count_idx] - count).abs() < 1e-9);
        assert!((vec.values[avg_idx] - avg).abs() < 1e-9);
    }

    engine.stop().await;
}

/// 3. Duplicate filter: 1.00, 1.005, 1.02, 1.00 with tolerance 0.01 keeps
/// indices 0 and 2.
#[tokio::test]
async fn duplicate_filter_keeps_first_and_third() {
    let bus = Bus::new();
    let metrics = MetricsCore::new();
    let engine = RuleEngine::new(bus.clone(), metrics);

    let rule = rule_from_json(serde_json::json!({
        "id": "dedup",
        "name": "dedup",
        "condition": {"simple": {"field": "key", "operator": "eq", "value": "temp"}},
        "actions": [
            {"type": "filter", "sub_type": "duplicate", "window": 5, "tolerance": 0.01},
            {"type": "forward", "target": "nats", "subject": "iot.rules.dedup.kept"}
        ]
    }));
    engine.load_rules(vec![rule]).unwrap();
    engine.start(RuleEngineOptions::default()).await.unwrap();

    let kept: Arc<std::sync::Mutex<Vec<f64>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let collector = kept.clone();
    bus.subscribe(
        "iot.rules.dedup.kept",
        Arc::new(move |payload| {
            let collector = collector.clone();
            Box::pin(async move {
                if let Ok(point) = serde_json::from_value::<Point>((*payload).clone()) {
                    collector.lock().unwrap().push(point.value.as_f64().unwrap());
                }
            })
        }),
        gateway_bus::SubscribeOptions::default(),
    )
    .unwrap();

    for (i, v) in [1.00, 1.005, 1.02, 1.00].iter().enumerate() {
        let point = Point::new("d1", "temp", Value::Float(*v), i as i64).unwrap();
        engine.dispatch(point).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(*kept.lock().unwrap(), vec![1.00, 1.02]);

    engine.stop().await;
}

/// 4. Rate limit: max_rate 2 per 1 s window fed 5 points in 100 ms lets 2
/// through and drops 3.
#[tokio::test]
async fn rate_limit_admits_two_of_five() {
    let bus = Bus::new();
    let metrics = MetricsCore::new();
    let engine = RuleEngine::new(bus.clone(), metrics);

    let rule = rule_from_json(serde_json::json!({
        "id": "throttle",
        "name": "throttle",
        "condition": {"simple": {"field": "key", "operator": "eq", "value": "temp"}},
        "actions": [
            {"type": "filter", "sub_type": "rate_limit", "max_rate": 2.0, "window_ms": 1000},
            {"type": "forward", "target": "nats", "subject": "iot.rules.throttle.kept"}
        ]
    }));
    engine.load_rules(vec![rule]).unwrap();
    engine.start(RuleEngineOptions::default()).await.unwrap();

    let count = Arc::new(AtomicU32::new(0));
    let counter = count.clone();
    bus.subscribe(
        "iot.rules.throttle.kept",
        Arc::new(move |_payload| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        }),
        gateway_bus::SubscribeOptions::default(),
    )
    .unwrap();

    for i in 0..5i64 {
        let point = Point::new("d1", "temp", Value::Float(i as f64), i).unwrap();
        engine.dispatch(point).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(count.load(Ordering::SeqCst), 2);

    engine.stop().await;
}

/// 5. Forward to HTTP with retry: target 503s on attempts 1-2, 200 on
/// attempt 3; final result is success with the templated body delivered.
#[tokio::test]
async fn forward_http_retries_until_success() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let attempts = Arc::new(AtomicU32::new(0));
    let bodies: Arc<std::sync::Mutex<Vec<String>>> = Arc::new(std::sync::Mutex::new(Vec::new()));

    let server_attempts = attempts.clone();
    let server_bodies = bodies.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { return };
            let attempt = server_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let server_bodies = server_bodies.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]);
                let body = request.split("\r\n\r\n").nth(1).unwrap_or("").to_string();
                server_bodies.lock().unwrap().push(body);

                let response = if attempt < 3 {
                    "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                } else {
                    "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                };
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });

    let bus = Bus::new();
    let metrics = MetricsCore::new();
    let engine = RuleEngine::new(bus.clone(), metrics);

    let rule = rule_from_json(serde_json::json!({
        "id": "forward-http",
        "name": "forward-http",
        "condition": {"simple": {"field": "key", "operator": "eq", "value": "temp"}},
        "actions": [
            {
                "type": "forward",
                "target": "http",
                "url": format!("http://{addr}/ingest"),
                "content": "template",
                "payload_template": "{{device_id}}:{{key}}={{value}}",
                "expect_status": 200,
                "retry": {"attempts": 3, "backoff": "exponential", "base_interval_ms": 100}
            }
        ]
    }));
    engine.load_rules(vec![rule]).unwrap();
    engine.start(RuleEngineOptions::default()).await.unwrap();

    let point = Point::new("d1", "temp", Value::Float(21.5), 0).unwrap();
    engine.dispatch(point).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(bodies.lock().unwrap().last().unwrap(), "d1:temp=21.5");

    engine.stop().await;
}

/// 6. Stop grace: a sink whose `publish` blocks indefinitely is issued
/// `Stop`; after the grace period the runtime returns `StopTimeout`,
/// marks the sink `Stopped`, and never joins the hung publish call.
#[tokio::test(flavor = "multi_thread")]
async fn sink_stop_times_out_on_blocked_publish() {
    struct BlockingSink;

    #[async_trait::async_trait]
    impl Sink for BlockingSink {
        fn name(&self) -> &str {
            "blocker"
        }
        fn type_name(&self) -> &str {
            "blocker"
        }
        async fn init(&mut self, _config: serde_json::Value) -> Result<(), CoreError> {
            Ok(())
        }
        async fn start(&mut self) -> Result<(), CoreError> {
            Ok(())
        }
        async fn publish(&mut self, _batch: Vec<Point>) -> Result<(), CoreError> {
            std::future::pending::<()>().await;
            unreachable!()
        }
        async fn stop(&mut self) -> Result<(), CoreError> {
            Ok(())
        }
        async fn health_check(&self) -> Option<Health> {
            Some(Health::Healthy)
        }
    }

    let bus = Bus::new();
    let metrics = MetricsCore::new();
    let sink = Box::new(BlockingSink);
    let runtime = SinkRuntime::new(sink, memory_sink_config("blocker", "iot.data.d1.temp", 1), bus.clone(), metrics.sink("blocker"));
    runtime.init().await.unwrap();
    runtime.start().await.unwrap();

    let point = Point::new("d1", "temp", Value::Float(1.0), 0).unwrap();
    bus.publish("iot.data.d1.temp", &point).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let result = runtime.stop().await;
    assert!(matches!(result, Err(gateway_core::GatewayError::StopTimeout(_))));
    assert_eq!(runtime.state(), gateway_core::PluginState::Stopped);
}
