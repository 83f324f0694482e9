//! Integration tests for the screening pipeline.

use std::path::PathBuf;
use std::time::Duration;

use codegate::pipeline::{
    Backoff, ConnectionState, Connector, Dispatch, JobSource, JsonLinesSink, LineSource,
    LinesConnector, Record, ResultSink, Screener, Supervisor, Worker,
};
use codegate::Policy;

fn jobs_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("testdata")
        .join("jobs.jsonl")
}

#[tokio::test]
async fn test_worker_screens_job_file() {
    let supervisor = Supervisor::new(LinesConnector::new(Some(jobs_path())), Backoff::default());
    let mut worker = Worker::new(Screener::default(), supervisor);
    let mut published: Vec<Dispatch> = Vec::new();
    let stats = worker.run(&mut published).await.unwrap();

    assert_eq!(stats.received, 6);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.rejected, 3);
    assert_eq!(stats.reconnects, 0);

    let topics: Vec<&str> = published.iter().map(|d| d.topic.as_str()).collect();
    assert_eq!(
        topics,
        vec![
            "programiz_execution",
            "blocked_exec",
            "blocked_exec",
            "blocked_exec",
            "programiz_execution",
        ]
    );

    match &published[1].payload {
        Record::Rejection(r) => {
            assert_eq!(r.id, "job-2");
            assert_eq!(r.job_id, "job-2");
            assert_eq!(r.language, "python");
            assert_eq!(r.socket_id.as_ref().unwrap(), "sock-2");
            assert!(r.reason.contains("'os'"));
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(published[3].reason(), "Unsupported language: ruby");
}

#[tokio::test]
async fn test_policy_topics_are_used() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("testdata")
        .join("policy.yaml");
    let screener = Screener::from_policy(&Policy::parse_file(path).unwrap()).unwrap();

    let input = "{\"id\": 1, \"code\": \"import json\", \"language\": \"py\"}\n{\"id\": 2, \"code\": \"import os\"}\n";
    let mut source = LineSource::new(input.as_bytes());
    let mut sink = JsonLinesSink::new(Vec::new());
    while let Some(payload) = source.next_payload().await.unwrap() {
        let dispatch = screener.screen_payload(&payload).unwrap();
        sink.publish(&dispatch).await.unwrap();
    }

    let written = String::from_utf8(sink.into_inner()).unwrap();
    let lines: Vec<serde_json::Value> = written
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["topic"], "run_code");
    assert_eq!(lines[0]["payload"]["status"], "safe");
    assert_eq!(lines[1]["topic"], "rejected_code");
    assert_eq!(lines[1]["payload"]["status"], "unsafe");
    assert_eq!(lines[1]["payload"]["output"], serde_json::Value::Null);
}

/// Fails its first connections, then serves one line per connection and
/// errors once drained so the worker has to reconnect.
struct Broker {
    failures_left: u32,
    batches: Vec<&'static str>,
}

struct BrokerConnection {
    lines: LineSource,
    last: bool,
}

impl Connector for Broker {
    type Connection = BrokerConnection;

    async fn connect(&mut self) -> anyhow::Result<BrokerConnection> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            anyhow::bail!("connection refused");
        }
        let batch = self.batches.remove(0);
        Ok(BrokerConnection {
            lines: LineSource::new(batch.as_bytes()),
            last: self.batches.is_empty(),
        })
    }
}

impl JobSource for BrokerConnection {
    async fn next_payload(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        match self.lines.next_payload().await? {
            Some(payload) => Ok(Some(payload)),
            None if self.last => Ok(None),
            None => anyhow::bail!("connection reset"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_worker_reconnects_after_failures() {
    let broker = Broker {
        failures_left: 2,
        batches: vec![
            "{\"id\": \"a\", \"code\": \"x = 1\"}\n",
            "{\"id\": \"b\", \"code\": \"import subprocess\"}\n",
        ],
    };
    let supervisor = Supervisor::new(
        broker,
        Backoff::new(Duration::from_millis(100), Duration::from_secs(1)),
    );
    let mut worker = Worker::new(Screener::default(), supervisor);
    let mut published: Vec<Dispatch> = Vec::new();

    let stats = worker.run(&mut published).await.unwrap();
    assert_eq!(stats.received, 2);
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.reconnects, 1);
    assert_eq!(worker.supervisor().state(), ConnectionState::Connected);
    assert!(published[0].is_safe());
    assert!(!published[1].is_safe());
}

#[tokio::test(start_paused = true)]
async fn test_missing_input_file_gives_up() {
    let supervisor = Supervisor::new(
        LinesConnector::new(Some(PathBuf::from("/nonexistent/jobs.jsonl"))),
        Backoff::default(),
    )
    .with_max_attempts(3);
    let mut worker = Worker::new(Screener::default(), supervisor);
    let mut published: Vec<Dispatch> = Vec::new();

    let err = worker.run(&mut published).await.unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("giving up after 3 attempts"), "{}", message);
    assert!(message.contains("/nonexistent/jobs.jsonl"), "{}", message);
    assert!(published.is_empty());
}
