//! Multi-pod log aggregation.
//!
//! One task per requested pod follows that pod's log stream and pushes each line into a single
//! bounded channel. The calling task drains the channel and is the only writer to the sink, so
//! lines reach the outbound connection one whole message at a time.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::k8s::ResourceClient;

/// The capacity of the fan-in channel; a single slot keeps every pod task in lockstep with the sink.
const FAN_IN_CAPACITY: usize = 1;

/// The destination of an aggregated log session.
#[async_trait]
pub trait LogSink: Send {
    /// Deliver one line as one discrete message.
    async fn send(&mut self, line: String) -> Result<()>;
}

/// The terminal state of one pod within a log session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PodOutcome {
    /// The pod's log stream ended.
    Closed,
    /// The pod's log stream could not be opened or failed mid-stream.
    Errored(String),
    /// The session was cancelled before the pod's stream ended.
    Cancelled,
}

/// The outcome of a log session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogSessionSummary {
    /// The number of lines written to the sink.
    pub lines_delivered: u64,
    /// The terminal state of each requested pod.
    pub pods: BTreeMap<String, PodOutcome>,
}

/// Stream the logs of the given pods into the given sink.
///
/// Returns once every pod stream has ended, or once the session is cancelled either through the
/// given token or by a failed sink write. Pod stream failures are isolated to their pod.
#[tracing::instrument(level = "debug", skip(client, sink, cancel))]
pub async fn stream_logs(
    client: Arc<dyn ResourceClient>, sink: &mut dyn LogSink, namespace: &str, pods: &[String], since_seconds: i64, cancel: CancellationToken,
) -> LogSessionSummary {
    let session = cancel.child_token();
    let (tx, mut rx) = mpsc::channel::<String>(FAN_IN_CAPACITY);
    let mut tasks = JoinSet::new();
    for pod in pods {
        tasks.spawn(follow_pod(
            client.clone(),
            namespace.to_string(),
            pod.clone(),
            since_seconds,
            tx.clone(),
            session.clone(),
        ));
    }
    // Only pod tasks hold senders now, so the channel closes once they have all finished.
    drop(tx);

    let mut summary = LogSessionSummary::default();
    loop {
        tokio::select! {
            biased;
            _ = session.cancelled() => break,
            line = rx.recv() => match line {
                Some(line) => {
                    if let Err(err) = sink.send(line).await {
                        tracing::debug!(error = ?err, %namespace, "log sink closed, cancelling session");
                        session.cancel();
                        break;
                    }
                    summary.lines_delivered += 1;
                }
                None => break,
            },
        }
    }
    drop(rx);

    while let Some(res) = tasks.join_next().await {
        match res {
            Ok((pod, outcome)) => {
                summary.pods.insert(pod, outcome);
            }
            Err(err) => tracing::error!(error = ?err, %namespace, "pod log task panicked"),
        }
    }
    session.cancel();
    tracing::debug!(%namespace, lines = summary.lines_delivered, "log session finished");
    summary
}

/// Follow one pod's log stream, pushing each line into the fan-in channel.
async fn follow_pod(
    client: Arc<dyn ResourceClient>, namespace: String, pod: String, since_seconds: i64, tx: mpsc::Sender<String>, cancel: CancellationToken,
) -> (String, PodOutcome) {
    // Opening.
    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return (pod, PodOutcome::Cancelled),
        res = client.stream_pod_logs(&namespace, &pod, since_seconds) => res,
    };
    let mut lines = match opened {
        Ok(lines) => lines,
        Err(err) => {
            tracing::error!(error = ?err, %namespace, %pod, "error opening pod log stream");
            return (pod, PodOutcome::Errored(format!("{:#}", err)));
        }
    };

    // Streaming.
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return (pod, PodOutcome::Cancelled),
            next = lines.next() => next,
        };
        let line = match next {
            Some(Ok(line)) => line,
            Some(Err(err)) => {
                tracing::error!(error = ?err, %namespace, %pod, "error reading pod log stream");
                return (pod, PodOutcome::Errored(err.to_string()));
            }
            None => {
                tracing::debug!(%namespace, %pod, "pod log stream closed");
                return (pod, PodOutcome::Closed);
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return (pod, PodOutcome::Cancelled),
            res = tx.send(line) => {
                if res.is_err() {
                    return (pod, PodOutcome::Cancelled);
                }
            }
        }
    }
}
