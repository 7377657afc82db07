use std::sync::Arc;

use sendgate_common::{BucketKey, Clock, Domain, IdentityId, SendLogEntry, UsageIncrement};
use sendgate_store::QuotaStore;
use tracing::{debug, warn};

use crate::{EngineConfig, QuotaCache};

/// Counts send attempts against an identity's usage and appends the send log
///
/// Every attempt counts, successful or not. Storage failures are logged and
/// swallowed: recording never fails the caller.
#[derive(Debug, Clone)]
pub struct UsageRecorder {
    store: Arc<dyn QuotaStore>,
    cache: Arc<QuotaCache>,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
}

impl UsageRecorder {
    #[must_use]
    pub fn new(
        store: Arc<dyn QuotaStore>,
        cache: Arc<QuotaCache>,
        clock: Arc<dyn Clock>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            config,
        }
    }

    pub async fn record_send(
        &self,
        identity: &IdentityId,
        domain: &Domain,
        success: bool,
        error: Option<&str>,
    ) {
        let now = self.clock.now();
        let metrics = sendgate_metrics::try_metrics();

        let increment = UsageIncrement {
            key: BucketKey::at(now, self.config.offset()),
            domain: domain.clone(),
            at: now,
            burst_window: self.config.burst_window(),
        };

        match self.store.upsert_usage(identity, &increment).await {
            Ok(record) => debug!(
                identity = %identity,
                domain = %domain,
                success,
                emails_sent = record.emails_sent,
                burst_count = record.burst_count,
                "Recorded send"
            ),
            Err(err) => {
                warn!(
                    identity = %identity,
                    domain = %domain,
                    error = %err,
                    "Failed to record usage"
                );
                if let Some(metrics) = metrics {
                    metrics.dispatch.record_store_failure("upsert_usage");
                }
            }
        }

        self.cache.invalidate_identity(identity);

        let entry = SendLogEntry::new(
            identity.clone(),
            domain.clone(),
            success,
            error.map(ToOwned::to_owned),
            now,
        );

        if let Err(err) = self.store.insert_log(entry).await {
            warn!(
                identity = %identity,
                domain = %domain,
                error = %err,
                "Failed to append send log"
            );
            if let Some(metrics) = metrics {
                metrics.dispatch.record_store_failure("insert_log");
            }
        }

        if let Some(metrics) = metrics {
            metrics.dispatch.record_send(success);
        }
    }
}
