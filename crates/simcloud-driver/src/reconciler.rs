//! Pod reconciler
//!
//! Stands in for the kubelet on simulated nodes: pods the scheduler has bound
//! to a node but that are still Pending get their phase flipped to Running.
//!
//! Sweeps are requested through a [`ReconcileTrigger`] and run by a single
//! worker. The queue holds at most one request, so triggers arriving while a
//! sweep is already queued collapse into it, and a trigger arriving mid-sweep
//! schedules exactly one follow-up.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Pod, PodStatus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use simcloud_common::Error;

use crate::client::ClusterStateClient;

const POD_PHASE_PENDING: &str = "Pending";
const POD_PHASE_RUNNING: &str = "Running";

/// Outcome of one reconciliation sweep
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Pods moved to Running
    pub promoted: usize,
    /// Pods whose status update failed
    pub failed: usize,
}

/// Promote every bound, Pending pod to Running
///
/// Listing failures abort the sweep. A failed status write is logged and the
/// sweep moves on to the next pod.
pub async fn reconcile_pods(client: &dyn ClusterStateClient) -> Result<SweepSummary, Error> {
    let pods = client.list_pods().await?;
    let mut summary = SweepSummary::default();

    for pod in pods.into_iter().filter(needs_promotion) {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();

        let mut updated = pod;
        updated
            .status
            .get_or_insert_with(PodStatus::default)
            .phase = Some(POD_PHASE_RUNNING.to_string());

        match client.update_pod_status(&updated).await {
            Ok(_) => {
                debug!(pod = %name, namespace = %namespace, "Pod promoted to Running");
                summary.promoted += 1;
            }
            Err(e) => {
                warn!(pod = %name, namespace = %namespace, error = %e, "Failed to promote pod");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

fn needs_promotion(pod: &Pod) -> bool {
    let pending = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        == Some(POD_PHASE_PENDING);
    let bound = pod
        .spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .is_some_and(|n| !n.is_empty());
    pending && bound
}

/// Non-blocking handle for requesting a sweep
#[derive(Clone, Debug)]
pub struct ReconcileTrigger {
    tx: mpsc::Sender<()>,
}

impl ReconcileTrigger {
    /// Create a trigger and the receiving end for the worker
    pub fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Request a sweep; returns false when it was folded into a queued one
    pub fn trigger(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => false,
            Err(mpsc::error::TrySendError::Closed(())) => {
                debug!("Reconciler stopped, trigger ignored");
                false
            }
        }
    }
}

/// Run sweeps as they are requested until cancelled or every trigger is dropped
pub async fn run_reconciler(
    mut rx: mpsc::Receiver<()>,
    client: Arc<dyn ClusterStateClient>,
    cancel: CancellationToken,
) {
    debug!("Reconciler started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            request = rx.recv() => {
                if request.is_none() {
                    break;
                }
                match reconcile_pods(client.as_ref()).await {
                    Ok(summary) if summary.promoted > 0 || summary.failed > 0 => {
                        info!(
                            promoted = summary.promoted,
                            failed = summary.failed,
                            "Pod reconciliation sweep finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Pod reconciliation sweep failed"),
                }
            }
        }
    }
    debug!("Reconciler stopped");
}
