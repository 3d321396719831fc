use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::fixtures::{MemoryClient, ScriptedLogs};
use crate::logs::{stream_logs, LogSink, PodOutcome};

const NS: &str = "mm-installation-acme";
const SESSION_DEADLINE: Duration = Duration::from_secs(5);

/// A sink which collects lines, optionally cancelling or failing after a number of lines.
#[derive(Default)]
struct CollectingSink {
    lines: Vec<String>,
    cancel_after: Option<(usize, CancellationToken)>,
    fail_after: Option<usize>,
}

#[async_trait]
impl LogSink for CollectingSink {
    async fn send(&mut self, line: String) -> Result<()> {
        if self.fail_after == Some(self.lines.len()) {
            bail!("connection closed");
        }
        self.lines.push(line);
        if let Some((limit, token)) = &self.cancel_after {
            if self.lines.len() >= *limit {
                token.cancel();
            }
        }
        Ok(())
    }
}

fn scripted(pod: &str, count: usize, hang: bool) -> ScriptedLogs {
    ScriptedLogs {
        lines: (1..=count).map(|n| Ok(format!("{} line {}", pod, n))).collect(),
        hang,
    }
}

fn pods(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

#[tokio::test]
async fn stream_logs_delivers_every_line_in_per_pod_order() -> Result<()> {
    let client = MemoryClient::new();
    for pod in ["web-0", "web-1", "web-2"] {
        client.script_logs(NS, pod, scripted(pod, 4, false));
    }
    let mut sink = CollectingSink::default();

    let summary = tokio::time::timeout(
        SESSION_DEADLINE,
        stream_logs(client.clone(), &mut sink, NS, &pods(&["web-0", "web-1", "web-2"]), 600, CancellationToken::new()),
    )
    .await?;

    assert!(summary.lines_delivered == 12, "expected 12 lines delivered, got {}", summary.lines_delivered);
    assert!(sink.lines.len() == 12, "expected 12 lines written, got {}", sink.lines.len());
    for pod in ["web-0", "web-1", "web-2"] {
        let own: Vec<&String> = sink.lines.iter().filter(|line| line.starts_with(pod)).collect();
        let expected: Vec<String> = (1..=4).map(|n| format!("{} line {}", pod, n)).collect();
        assert!(
            own.iter().map(|line| line.as_str()).eq(expected.iter().map(|line| line.as_str())),
            "unexpected order for {}, got {:?}, expected {:?}",
            pod,
            own,
            expected
        );
        assert_eq!(summary.pods.get(pod), Some(&PodOutcome::Closed));
    }
    Ok(())
}

#[tokio::test]
async fn stream_logs_isolates_pod_errors() -> Result<()> {
    let client = MemoryClient::new();
    client.script_logs(NS, "web-0", scripted("web-0", 3, false));
    client.script_logs(
        NS,
        "web-1",
        ScriptedLogs {
            lines: vec![Ok("web-1 line 1".into()), Err("stream reset".into()), Ok("web-1 never".into())],
            hang: false,
        },
    );
    let mut sink = CollectingSink::default();

    let summary = tokio::time::timeout(
        SESSION_DEADLINE,
        stream_logs(client.clone(), &mut sink, NS, &pods(&["web-0", "web-1", "missing"]), 600, CancellationToken::new()),
    )
    .await?;

    assert_eq!(summary.pods.get("web-0"), Some(&PodOutcome::Closed));
    assert!(
        matches!(summary.pods.get("web-1"), Some(PodOutcome::Errored(_))),
        "expected web-1 to error, got {:?}",
        summary.pods.get("web-1")
    );
    assert!(
        matches!(summary.pods.get("missing"), Some(PodOutcome::Errored(_))),
        "expected missing pod to error, got {:?}",
        summary.pods.get("missing")
    );
    assert!(summary.lines_delivered == 4, "expected 4 lines delivered, got {}", summary.lines_delivered);
    assert!(!sink.lines.iter().any(|line| line == "web-1 never"), "expected no lines after a stream error");
    Ok(())
}

#[tokio::test]
async fn stream_logs_stops_on_cancellation() -> Result<()> {
    let client = MemoryClient::new();
    client.script_logs(NS, "web-0", scripted("web-0", 5, true));
    client.script_logs(NS, "web-1", scripted("web-1", 5, true));
    let cancel = CancellationToken::new();
    let mut sink = CollectingSink {
        cancel_after: Some((3, cancel.clone())),
        ..Default::default()
    };

    let summary = tokio::time::timeout(
        SESSION_DEADLINE,
        stream_logs(client.clone(), &mut sink, NS, &pods(&["web-0", "web-1"]), 600, cancel.clone()),
    )
    .await?;

    assert!(summary.lines_delivered == 3, "expected 3 lines delivered, got {}", summary.lines_delivered);
    for pod in ["web-0", "web-1"] {
        assert_eq!(summary.pods.get(pod), Some(&PodOutcome::Cancelled));
    }
    Ok(())
}

#[tokio::test]
async fn stream_logs_stops_when_sink_fails() -> Result<()> {
    let client = MemoryClient::new();
    client.script_logs(NS, "web-0", scripted("web-0", 2, true));
    client.script_logs(NS, "web-1", scripted("web-1", 2, true));
    let cancel = CancellationToken::new();
    let mut sink = CollectingSink {
        fail_after: Some(1),
        ..Default::default()
    };

    let summary = tokio::time::timeout(
        SESSION_DEADLINE,
        stream_logs(client.clone(), &mut sink, NS, &pods(&["web-0", "web-1"]), 600, cancel.clone()),
    )
    .await?;

    assert!(summary.lines_delivered == 1, "expected 1 line delivered, got {}", summary.lines_delivered);
    assert!(summary.pods.values().all(|outcome| *outcome == PodOutcome::Cancelled), "unexpected outcomes {:?}", summary.pods);
    assert!(!cancel.is_cancelled(), "expected the caller's token to be left untouched");
    Ok(())
}

#[tokio::test]
async fn stream_logs_with_no_pods_returns_immediately() -> Result<()> {
    let client = MemoryClient::new();
    let mut sink = CollectingSink::default();

    let summary = tokio::time::timeout(SESSION_DEADLINE, stream_logs(client.clone(), &mut sink, NS, &[], 600, CancellationToken::new())).await?;

    assert!(summary.lines_delivered == 0, "expected no lines, got {}", summary.lines_delivered);
    assert!(summary.pods.is_empty(), "expected no pod outcomes, got {:?}", summary.pods);
    Ok(())
}
