//! Background sweep for stalled archive runs.
//!
//! A registration still archiving past the configured timeout gets its
//! unfinished providers failed and the run handled as a failure, so
//! initiators are not left waiting on a copy that will never confirm.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use archivio_common::types::{ArchiveStatus, FailureCause};

use crate::archiver::Archiver;
use crate::metrics::archiver_metrics;

impl Archiver {
    /// Fail every registration still archiving past the configured timeout.
    ///
    /// Returns the number of registrations swept.
    pub async fn sweep_once(&self) -> usize {
        let timeout = chrono::Duration::seconds(self.config.archive_timeout_secs as i64);
        let cutoff = Utc::now() - timeout;
        let stalled = self.registry.find_stalled(cutoff);

        let mut swept = 0;
        for registration in stalled {
            let id = registration.id.clone();
            warn!("Registration {} stalled past the archive timeout", id);

            for (provider, state) in &registration.providers {
                if state.status.is_terminal() {
                    continue;
                }
                if let Err(e) =
                    self.registry
                        .set_errors(&id, provider, vec!["archive timed out".to_string()])
                {
                    debug!(
                        "Could not record timeout for provider {} on registration {}: {}",
                        provider, id, e
                    );
                }
                if let Err(e) = self.registry.set_status(&id, provider, ArchiveStatus::Failure) {
                    debug!(
                        "Could not fail stalled provider {} on registration {}: {}",
                        provider, id, e
                    );
                }
            }

            match self.handle_failure(&id, FailureCause::Stalled).await {
                Ok(()) => {
                    archiver_metrics().record_swept();
                    swept += 1;
                }
                Err(e) => error!("Sweeping registration {} failed: {}", id, e),
            }
        }

        if swept > 0 {
            info!("Swept {} stalled registrations", swept);
        }
        swept
    }
}

/// Long-running background task: sweep stalled registrations every `interval`.
pub async fn sweep_loop(archiver: Arc<Archiver>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        archiver.sweep_once().await;
    }
}
