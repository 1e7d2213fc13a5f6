//! Reading and reconciling configured clients.

use chrono::{DateTime, Utc};
use fw_core::{
    DiagnosticSink, FahLog, Notice, NoticeLog, QueueFile, Reconciler, Reconciliation, Severity,
    TracingSink, UnitInfoFile,
};
use rayon::prelude::*;

use crate::config::ClientConfig;

/// Outcome of one reconciliation pass for one client.
#[derive(Debug, Clone)]
pub struct ClientReport {
    pub name: String,
    /// `Err` carries the contract violation that aborted the pass.
    pub result: Result<Reconciliation, String>,
    pub notices: Vec<Notice>,
}

/// Runs one pass over a client's files.
///
/// A missing or unreadable log counts as an empty log; the pass still runs
/// on the queue and unit info.
pub fn reconcile_client(client: &ClientConfig, now: DateTime<Utc>) -> ClientReport {
    let mut notices = NoticeLog::new();

    let log_path = client.log_path();
    let log = FahLog::read(&log_path).unwrap_or_else(|err| {
        notices.notice(Severity::Warning, format!("{err}, treating log as empty"));
        FahLog::default()
    });
    let queue = QueueFile::new(client.queue_path());
    let unit_info = UnitInfoFile::new(client.unit_info_path(), now);

    let result = Reconciler::new(&mut notices)
        .reconcile(&queue, &log, &unit_info)
        .map_err(|err| err.to_string());

    notices.replay(&mut TracingSink::new(client.name.as_str()));
    if let Err(err) = &result {
        tracing::error!(client = client.name.as_str(), error = %err, "reconciliation failed");
    }

    ClientReport {
        name: client.name.clone(),
        result,
        notices: notices.into_notices(),
    }
}

/// Reconciles every client in parallel, keeping configuration order.
pub fn reconcile_all(clients: &[ClientConfig], now: DateTime<Utc>) -> Vec<ClientReport> {
    clients
        .par_iter()
        .map(|client| reconcile_client(client, now))
        .collect()
}
