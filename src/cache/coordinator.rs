//! Invalidation coordinator.
//!
//! Local mutations are applied here first and then broadcast to peers;
//! messages from peers are applied the same way but never re-broadcast.
//!
//! Page directories and the dependency index are tracked per worker, so every
//! worker evicts what it knows about and the union covers the cluster.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::broadcast::Broadcast;
use super::directory::PageDirectory;
use super::events::{
    InvalidationEnvelope, InvalidationMessage, MODULE_INVALIDATION_TOPIC, ModuleCommand,
    NODE_INVALIDATION_TOPIC,
};
use super::page_cache::PageCache;
use super::planner::InvalidationPlan;

const METRIC_INVALIDATION_APPLIED_TOTAL: &str = "pagina_invalidation_applied_total";
const RECEIVE_BATCH_LIMIT: usize = 64;

/// What one invalidation removed on this worker.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationOutcome {
    pub directories: usize,
    pub pages: usize,
}

pub struct InvalidationCoordinator {
    worker_id: Uuid,
    directory: Arc<PageDirectory>,
    page_cache: Arc<PageCache>,
    broadcast: Arc<dyn Broadcast>,
}

impl InvalidationCoordinator {
    pub fn new(
        directory: Arc<PageDirectory>,
        page_cache: Arc<PageCache>,
        broadcast: Arc<dyn Broadcast>,
    ) -> Self {
        Self {
            worker_id: Uuid::new_v4(),
            directory,
            page_cache,
            broadcast,
        }
    }

    /// Identifier stamped on every message this worker publishes.
    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    /// A content node was written or deleted through this worker.
    pub async fn node_changed(
        &self,
        node_id: &str,
        repository_id: &str,
        branch_id: &str,
    ) -> InvalidationOutcome {
        self.local(InvalidationMessage::node(node_id, repository_id, branch_id))
            .await
    }

    /// A module lifecycle command ran on this worker.
    pub async fn module_changed(&self, command: ModuleCommand, host: &str) -> InvalidationOutcome {
        self.local(InvalidationMessage::module(command, host)).await
    }

    /// Apply a locally originated invalidation, then tell the peers.
    ///
    /// Publishing is fire-and-forget: a transport failure is logged and the
    /// local outcome still stands.
    #[instrument(skip(self), fields(worker = %self.worker_id))]
    pub async fn local(&self, message: InvalidationMessage) -> InvalidationOutcome {
        let outcome = self
            .apply(&InvalidationPlan::from_message(&message), "local")
            .await;

        let envelope = InvalidationEnvelope::new(self.worker_id, message);
        let topic = envelope.topic();
        match self.broadcast.publish(topic, envelope).await {
            Ok(peers) => debug!(topic, peers, "Invalidation broadcast"),
            Err(err) => warn!(topic, error = %err, "Failed to broadcast invalidation"),
        }
        outcome
    }

    /// Apply a batch received from peers.
    ///
    /// Messages this worker published are skipped. Returns `None` when nothing
    /// was left to apply.
    pub async fn receive(&self, envelopes: Vec<InvalidationEnvelope>) -> Option<InvalidationOutcome> {
        let foreign: Vec<InvalidationEnvelope> = envelopes
            .into_iter()
            .filter(|envelope| envelope.origin != self.worker_id)
            .collect();
        if foreign.is_empty() {
            return None;
        }

        let plan = InvalidationPlan::from_envelopes(foreign);
        Some(self.apply(&plan, "remote").await)
    }

    /// Execute a plan against this worker's directory and render cache.
    pub async fn apply(&self, plan: &InvalidationPlan, source: &'static str) -> InvalidationOutcome {
        let started = Instant::now();
        let mut outcome = InvalidationOutcome::default();

        // module changes can alter any render served for the host
        for host in &plan.hosts {
            let cleared = self.directory.invalidate_host(host).await;
            for ctx in &cleared {
                outcome.pages += self
                    .page_cache
                    .evict_branch(&ctx.repository_id, &ctx.branch_id)
                    .await;
            }
            outcome.directories += cleared.len();
        }

        for (repository_id, branch_id) in &plan.branches {
            outcome.directories += self
                .directory
                .invalidate_branch(repository_id, branch_id)
                .await
                .len();
        }

        for dependency in &plan.dependencies {
            outcome.pages += self.page_cache.evict_dependents(dependency).await;
        }

        counter!(METRIC_INVALIDATION_APPLIED_TOTAL, "source" => source)
            .increment(plan.message_count as u64);
        info!(
            source,
            plan = %plan,
            directories = outcome.directories,
            pages = outcome.pages,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Invalidation applied"
        );
        outcome
    }

    /// Listen for peer messages on both invalidation topics.
    ///
    /// Subscriptions are in place when this returns. Messages that arrive
    /// together are merged into one plan.
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let nodes = self.broadcast.subscribe(NODE_INVALIDATION_TOPIC);
        let modules = self.broadcast.subscribe(MODULE_INVALIDATION_TOPIC);
        let coordinator = Arc::clone(self);

        tokio::spawn(async move {
            let mut batches = stream::select(nodes, modules).ready_chunks(RECEIVE_BATCH_LIMIT);
            while let Some(batch) = batches.next().await {
                coordinator.receive(batch).await;
            }
            debug!(worker = %coordinator.worker_id, "Invalidation listener stopped");
        })
    }
}
