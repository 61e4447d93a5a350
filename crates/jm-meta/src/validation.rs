//! Periodic validation of directory entries
//!
//! Every entry is asked for its `pid`; an entry whose worker does not answer,
//! or answers with another pid, is removed. Removal names the pid that was
//! checked, so an entry replaced in the meantime survives.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use jm_core::{RpcClient, Security, WorkerRecord};
use jm_protocol::WorkerCall;
use serde_json::Value;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::directory::DirectoryHandle;

/// Run validation passes every `period` until `cancel` fires
pub async fn run_validation(
    directory: DirectoryHandle,
    client: RpcClient,
    period: Duration,
    concurrency: usize,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!("Checker starting (interval {:?})", period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = validate_once(&directory, &client, concurrency).await;
                if removed > 0 {
                    tracing::info!("Validation removed {} servers", removed);
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Checker shutting down");
                break;
            }
        }
    }
}

/// One validation pass; returns the number of removed entries
pub async fn validate_once(
    directory: &DirectoryHandle,
    client: &RpcClient,
    concurrency: usize,
) -> usize {
    let entries = directory.snapshot().await;
    tracing::debug!("Start checking {} servers", entries.len());

    let failed: Vec<WorkerRecord> = stream::iter(entries)
        .map(|record| async move {
            if is_valid(client, &record).await {
                None
            } else {
                Some(record)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|record| async move { record })
        .collect()
        .await;

    let mut removed = 0;
    for record in failed {
        tracing::info!("Server {} not OK. Deregistering", record.endpoint);
        if directory
            .remove(record.endpoint.clone(), Some(record.process.pid))
            .await
            .is_some()
        {
            removed += 1;
        }
    }
    removed
}

async fn is_valid(client: &RpcClient, record: &WorkerRecord) -> bool {
    let security = Security::from_ssl(record.ssl);
    match client.call(&record.endpoint, security, &WorkerCall::Pid).await {
        Ok(Value::Number(pid)) => pid.as_u64() == Some(u64::from(record.process.pid)),
        Ok(other) => {
            tracing::debug!("{} answered pid with {}", record.endpoint, other);
            false
        }
        Err(e) if e.is_transport() => {
            tracing::info!("{} seems to be dead: {}", record.endpoint, e);
            false
        }
        Err(e) => {
            tracing::debug!("Checking {} failed: {}", record.endpoint, e);
            false
        }
    }
}
