use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, RawQuery, State};
use axum::response::{IntoResponse, Response};
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use tokio_util::sync::CancellationToken;

use super::error::{OperationExt, ServerResult};
use super::AppState;
use crate::k8s::ResourceClient;
use crate::logs::{self, LogSink};
use bootstrapper_core::error::AppError;

/// The query parameter naming a pod to stream.
const QUERY_PODS: &str = "pods";

/// Upgrade to a WebSocket which streams the logs of the requested pods.
#[tracing::instrument(level = "debug", skip(state, query, ws))]
pub(super) async fn ws_logs(
    State(state): State<AppState>, Path((cluster, name)): Path<(String, String)>, RawQuery(query): RawQuery,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> ServerResult<Response> {
    const OP: &str = "stream installation logs";
    let pods = requested_pods(query.as_deref());
    if pods.is_empty() {
        return Err(AppError::InvalidInput("at least one pods query parameter is required".into())).op(OP);
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };
    let client = state.provider.resource_client(&cluster).await.op(OP)?;
    let since_seconds = state.config.log_since_seconds;
    Ok(ws.on_upgrade(move |socket| serve_logs(socket, client, name, pods, since_seconds)))
}

/// Parse the repeated `pods` query parameter, ignoring empty values. Each pod is named once.
fn requested_pods(query: Option<&str>) -> Vec<String> {
    let query = match query {
        Some(query) => query,
        None => return Vec::new(),
    };
    url::form_urlencoded::parse(query.as_bytes())
        .filter(|(key, val)| key == QUERY_PODS && !val.is_empty())
        .map(|(_, val)| val.into_owned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Drive one log session over the given socket until it ends or the client goes away.
async fn serve_logs(socket: WebSocket, client: Arc<dyn ResourceClient>, namespace: String, pods: Vec<String>, since_seconds: i64) {
    let (tx, mut rx) = socket.split();
    let cancel = CancellationToken::new();

    // Inbound frames are only watched for the close.
    let watcher = cancel.clone();
    let receiver = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = watcher.cancelled() => break,
                msg = rx.next() => match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(error = ?err, "error reading from log websocket");
                        break;
                    }
                    Some(Ok(_)) => continue,
                },
            }
        }
        watcher.cancel();
    });

    let mut sink = WebSocketSink { tx };
    let summary = logs::stream_logs(client, &mut sink, &namespace, &pods, since_seconds, cancel.clone()).await;
    cancel.cancel();
    let _res = sink.tx.close().await;
    if let Err(err) = receiver.await {
        tracing::error!(error = ?err, "error joining log websocket receiver");
    }
    tracing::info!(%namespace, lines = summary.lines_delivered, pods = ?summary.pods, "log session closed");
}

/// A log sink writing one text frame per line.
struct WebSocketSink {
    tx: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl LogSink for WebSocketSink {
    async fn send(&mut self, line: String) -> Result<()> {
        self.tx.send(Message::Text(line.into())).await.context("error writing log line to websocket")
    }
}
