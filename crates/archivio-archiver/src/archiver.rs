//! Archive pipeline orchestration.
//!
//! Drives a registration through its archive run: stat every provider's file
//! tree, gate on total size, request copies into the archive provider, and
//! aggregate per-provider outcomes into registration-level success or failure.
//!
//! # Pipeline
//!
//! ```text
//! start ──► stat stage ──► size gate ──► copy stage ──► aggregation
//!            (fan-out)     (short-       (fan-out)      (per-provider
//!                           circuit)                     callback)
//! ```
//!
//! Synchronous copy outcomes settle inside the pipeline task; asynchronous
//! gateways confirm later through `complete_provider` with the signed
//! callback token minted at start.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use ring::hmac;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use archivio_client::{CopyOutcome, CopyRequest, GatewayClient};
use archivio_common::config::ArchiveConfig;
use archivio_common::stat::AggregateStatResult;
use archivio_common::types::{ArchiveStatus, FailureCause, NodeId, Provider, RegistrationId, UserId};
use archivio_common::{Error, Result, aggregate_file_tree};
use archivio_notify::{NotifyContext, NotifyDetail, NotifyService, ProviderFailure};
use archivio_registry::{Completion, Registration, Registry};

use crate::metrics::archiver_metrics;
use crate::token::{CallbackToken, signing_key};

/// Everything needed to start an archive run for one registration
#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    /// Registration to archive
    pub registration: RegistrationId,
    /// Node the registration was created from
    pub source: NodeId,
    /// Registration title, used in archive folder names and notifications
    pub title: String,
    /// User who initiated the registration
    pub initiator: UserId,
    /// Where outcome notifications for the initiator go
    pub initiator_email: String,
    /// Parent registration for component registrations
    pub parent: Option<RegistrationId>,
    /// Providers to archive from
    pub providers: Vec<Provider>,
    /// Session cookie the gateway presents to the providers
    pub gateway_cookie: String,
}

/// Receipt returned from a successful archive start
#[derive(Debug, Clone)]
pub struct StartReceipt {
    pub registration: RegistrationId,
    /// Encoded token the gateway presents on completion webhooks
    pub callback_token: String,
}

/// Terminal copy outcome reported by a completion webhook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionReport {
    Success,
    Failure(Vec<String>),
}

/// Archive pipeline orchestrator
pub struct Archiver {
    pub(crate) registry: Arc<Registry>,
    gateway: Arc<GatewayClient>,
    notify: Arc<NotifyService>,
    pub(crate) config: ArchiveConfig,
    /// Destination provider for archive copies
    archive_provider: Provider,
    /// HMAC key for callback tokens
    signing_key: hmac::Key,
}

impl Archiver {
    /// Create a new archiver
    pub fn new(
        registry: Arc<Registry>,
        gateway: Arc<GatewayClient>,
        notify: Arc<NotifyService>,
        config: ArchiveConfig,
        signing_key_bytes: &[u8],
    ) -> Result<Self> {
        let archive_provider = Provider::new(config.archive_provider.as_str())
            .map_err(|e| Error::Configuration(format!("bad archive provider name: {e}")))?;
        Ok(Self {
            registry,
            gateway,
            notify,
            config,
            archive_provider,
            signing_key: signing_key(signing_key_bytes),
        })
    }

    /// Start an archive run: validate, record the registration, and spawn
    /// the pipeline task.
    ///
    /// Returns the callback token the gateway must present when reporting
    /// copy outcomes. Starting a registration that is already archiving is
    /// rejected.
    pub fn start(self: Arc<Self>, req: ArchiveRequest) -> Result<StartReceipt> {
        let receipt = self.register(&req)?;
        tokio::spawn(async move {
            self.run_pipeline(req).await;
        });
        Ok(receipt)
    }

    /// Synchronous half of `start`: validation and registry bookkeeping.
    fn register(&self, req: &ArchiveRequest) -> Result<StartReceipt> {
        if req.providers.is_empty() {
            return Err(Error::NoProviders);
        }
        for provider in &req.providers {
            if !self.config.is_archivable(provider) {
                return Err(Error::ProviderNotArchivable(provider.to_string()));
            }
        }
        if let Some(existing) = self.registry.get(&req.registration) {
            if existing.archiving {
                return Err(Error::AlreadyArchiving(req.registration.to_string()));
            }
            return Err(Error::RegistrationAlreadyExists(req.registration.to_string()));
        }

        let registration = Registration::new(
            req.registration.clone(),
            req.source.clone(),
            req.title.clone(),
            req.initiator.clone(),
            req.initiator_email.clone(),
            req.parent.clone(),
            &req.providers,
            Utc::now(),
        );
        self.registry.insert(registration)?;
        if !self.registry.has_archive_provider(&req.registration)? {
            self.registry
                .link_archive_provider(&req.registration, self.archive_provider.clone())?;
        }

        let token = CallbackToken::new(req.registration.clone(), Utc::now(), &self.signing_key);
        let callback_token = token.encode()?;

        archiver_metrics().record_started();
        info!(
            "Archive run started for registration {} ({} providers)",
            req.registration,
            req.providers.len()
        );
        Ok(StartReceipt {
            registration: req.registration.clone(),
            callback_token,
        })
    }

    /// Drive one registration through stat, size gate, and copy.
    async fn run_pipeline(&self, req: ArchiveRequest) {
        let id = req.registration.clone();
        let statted = self.stat_registration(&req).await;

        // Size gate: the run fails before any copy is attempted
        let roll_up = AggregateStatResult::roll_up(
            id.as_str(),
            req.title.as_str(),
            statted.iter().map(|(_, stat)| stat.clone()).collect(),
        );
        if roll_up.disk_usage > self.config.max_archive_size {
            warn!(
                "Registration {} exceeds the archive size limit ({} > {} bytes)",
                id, roll_up.disk_usage, self.config.max_archive_size
            );
            if let Err(e) = self.handle_failure(&id, FailureCause::SizeExceeded).await {
                error!("Failure handling for registration {} failed: {}", id, e);
            }
            return;
        }

        self.copy_registration(&req, &statted).await;

        // Covers runs where no copy reached a terminal state in this task,
        // in particular when every provider already failed during stat.
        if let Err(e) = self.process_callback(&id).await {
            error!("Aggregation for registration {} failed: {}", id, e);
        }
    }

    /// Stat stage: walk every provider's file tree and record the roll-up.
    ///
    /// A provider whose walk fails goes to `Failure` with the error recorded;
    /// the remaining providers continue. Returns the providers that statted
    /// successfully, in provider order.
    async fn stat_registration(
        &self,
        req: &ArchiveRequest,
    ) -> Vec<(Provider, AggregateStatResult)> {
        let id = &req.registration;
        let walks: Vec<_> = req
            .providers
            .iter()
            .map(|provider| {
                let provider = provider.clone();
                async move {
                    if let Err(e) =
                        self.registry
                            .set_status(id, &provider, ArchiveStatus::Checking)
                    {
                        return Err((provider, e));
                    }
                    match self
                        .gateway
                        .get_file_tree(&provider, &req.source, &req.gateway_cookie)
                        .await
                    {
                        Ok(tree) => {
                            let stat = aggregate_file_tree(&provider, &tree);
                            Ok((provider, stat))
                        }
                        Err(e) => Err((provider, e)),
                    }
                }
            })
            .collect();

        let results: Vec<_> = stream::iter(walks)
            .buffer_unordered(self.config.stat_concurrency.max(1))
            .collect()
            .await;

        let mut statted = Vec::new();
        for result in results {
            match result {
                Ok((provider, stat)) => {
                    debug!(
                        "Statted provider {} on registration {}: {} bytes in {} files",
                        provider, id, stat.disk_usage, stat.num_files
                    );
                    archiver_metrics().record_bytes_statted(stat.disk_usage);
                    if let Err(e) = self.registry.set_stat(id, &provider, stat.clone()) {
                        error!(
                            "Could not record stat for provider {} on registration {}: {}",
                            provider, id, e
                        );
                    }
                    statted.push((provider, stat));
                }
                Err((provider, e)) => {
                    warn!(
                        "Stat failed for provider {} on registration {}: {}",
                        provider, id, e
                    );
                    self.fail_provider(id, &provider, vec![e.to_string()]);
                }
            }
        }
        statted.sort_by(|(a, _), (b, _)| a.cmp(b));
        statted
    }

    /// Copy stage: request a root copy into the archive provider for every
    /// provider that statted successfully, then settle synchronous outcomes.
    async fn copy_registration(
        &self,
        req: &ArchiveRequest,
        statted: &[(Provider, AggregateStatResult)],
    ) {
        let id = &req.registration;
        let copies: Vec<_> = statted
            .iter()
            .map(|(provider, _)| {
                let provider = provider.clone();
                async move {
                    if let Err(e) =
                        self.registry
                            .set_status(id, &provider, ArchiveStatus::Pending)
                    {
                        return (provider, Err(e));
                    }
                    let rename = format!("Archive of {}", self.config.display_name_for(&provider));
                    let request = CopyRequest::root_copy(
                        &req.gateway_cookie,
                        req.source.as_str(),
                        &provider,
                        id.as_str(),
                        &self.archive_provider,
                        rename,
                    );
                    let outcome = self.gateway.copy(&request).await;
                    (provider, outcome)
                }
            })
            .collect();

        let results: Vec<(Provider, Result<CopyOutcome>)> = stream::iter(copies)
            .buffer_unordered(self.config.copy_concurrency.max(1))
            .collect()
            .await;

        for (provider, outcome) in results {
            match outcome {
                Ok(CopyOutcome::Done) => {
                    archiver_metrics().record_copy_succeeded();
                    if let Err(e) = self.registry.set_status(id, &provider, ArchiveStatus::Success)
                    {
                        error!(
                            "Could not record copy success for provider {} on registration {}: {}",
                            provider, id, e
                        );
                    }
                }
                Ok(CopyOutcome::Accepted) => {
                    debug!(
                        "Copy accepted for provider {} on registration {}, awaiting callback",
                        provider, id
                    );
                    continue;
                }
                Ok(CopyOutcome::Rejected { status, errors }) => {
                    warn!(
                        "Copy rejected with status {} for provider {} on registration {}",
                        status, provider, id
                    );
                    archiver_metrics().record_copy_failed();
                    let errors = if errors.is_empty() {
                        vec![format!("copy rejected with status {status}")]
                    } else {
                        errors
                    };
                    self.fail_provider(id, &provider, errors);
                }
                Err(e) => {
                    warn!(
                        "Copy failed for provider {} on registration {}: {}",
                        provider, id, e
                    );
                    archiver_metrics().record_copy_failed();
                    self.fail_provider(id, &provider, vec![e.to_string()]);
                }
            }

            // Each terminal outcome re-checks aggregate completion
            if let Err(e) = self.process_callback(id).await {
                error!("Aggregation for registration {} failed: {}", id, e);
            }
        }
    }

    /// Apply a completion webhook from the gateway.
    ///
    /// Callers decode the wire token; it must verify against the server
    /// signing key here. The named provider is moved to its reported terminal
    /// status and aggregate completion is re-checked.
    pub async fn complete_provider(
        &self,
        token: &CallbackToken,
        provider: &Provider,
        report: CompletionReport,
    ) -> Result<()> {
        if !token.verify(&self.signing_key) {
            return Err(Error::TokenSignatureMismatch);
        }
        let id = token.registration.clone();

        match report {
            CompletionReport::Success => {
                let previous = self.registry.set_status(&id, provider, ArchiveStatus::Success)?;
                if previous == ArchiveStatus::Success {
                    debug!(
                        "Duplicate success callback for provider {} on registration {}",
                        provider, id
                    );
                } else {
                    archiver_metrics().record_copy_succeeded();
                    info!(
                        "Provider {} on registration {} completed via callback",
                        provider, id
                    );
                }
            }
            CompletionReport::Failure(errors) => {
                let errors = if errors.is_empty() {
                    vec!["copy failed".to_string()]
                } else {
                    errors
                };
                // Status first: a conflicting report on a settled provider
                // must not touch the recorded errors.
                let previous = self.registry.set_status(&id, provider, ArchiveStatus::Failure)?;
                self.registry.set_errors(&id, provider, errors)?;
                if previous != ArchiveStatus::Failure {
                    archiver_metrics().record_copy_failed();
                    warn!(
                        "Provider {} on registration {} failed via callback",
                        provider, id
                    );
                }
            }
        }

        self.process_callback(&id).await
    }

    /// Aggregation callback: act once every provider has finished.
    ///
    /// Safe to call repeatedly; a registration that already settled is left
    /// alone, and an unfinished one is a no-op.
    pub async fn process_callback(&self, id: &RegistrationId) -> Result<()> {
        let registration = self
            .registry
            .get(id)
            .ok_or_else(|| Error::RegistrationNotFound(id.to_string()))?;
        if registration.is_deleted || !registration.archiving {
            debug!("Aggregation callback for settled registration {} ignored", id);
            return Ok(());
        }

        match registration.completion() {
            Completion::Incomplete => Ok(()),
            Completion::Complete => {
                // Callbacks racing past the snapshot settle here: only the
                // one that newly archived sends the success mail.
                if self.registry.mark_archived(id)? {
                    archiver_metrics().record_succeeded();
                    let ctx = self.notify_context(&registration, NotifyDetail::None);
                    self.notify.send_success(&ctx).await;
                } else {
                    debug!("Registration {} already archived, skipping", id);
                }
                Ok(())
            }
            Completion::Failed(failed) => {
                debug!(
                    "Registration {} finished with {} failed providers",
                    id,
                    failed.len()
                );
                self.handle_failure(id, FailureCause::Copy).await
            }
        }
    }

    /// Fail a registration as a whole: tombstone its tree and send the user
    /// and desk notification pair. Acts at most once per registration.
    pub async fn handle_failure(&self, id: &RegistrationId, cause: FailureCause) -> Result<()> {
        let registration = self
            .registry
            .get(id)
            .ok_or_else(|| Error::RegistrationNotFound(id.to_string()))?;

        let affected = self.registry.mark_deleted_tree(id)?;
        if affected.is_empty() {
            debug!("Registration {} already failed, skipping", id);
            return Ok(());
        }

        archiver_metrics().record_failed(cause);
        error!("Archive of registration {} failed: {}", id, cause);

        let detail = match cause {
            FailureCause::Copy => NotifyDetail::Failures(provider_failures(&registration)),
            FailureCause::SizeExceeded => NotifyDetail::SizeExceeded {
                disk_usage: statted_usage(&registration),
                max: self.config.max_archive_size,
            },
            FailureCause::Stalled => NotifyDetail::None,
        };
        let ctx = self.notify_context(&registration, detail);
        self.notify.send_failure_pair(cause, &ctx).await;
        Ok(())
    }

    /// Force one provider to `Failure` with its errors recorded.
    ///
    /// Settled registrations and already-terminal providers are left alone.
    fn fail_provider(&self, id: &RegistrationId, provider: &Provider, errors: Vec<String>) {
        if let Err(e) = self.registry.set_errors(id, provider, errors) {
            debug!(
                "Could not record errors for provider {} on registration {}: {}",
                provider, id, e
            );
        }
        if let Err(e) = self.registry.set_status(id, provider, ArchiveStatus::Failure) {
            debug!(
                "Could not fail provider {} on registration {}: {}",
                provider, id, e
            );
        }
    }

    fn notify_context(&self, registration: &Registration, detail: NotifyDetail) -> NotifyContext {
        NotifyContext {
            user: registration.initiator.clone(),
            user_email: registration.initiator_email.clone(),
            registration: registration.id.clone(),
            title: registration.title.clone(),
            source: registration.source.clone(),
            detail,
        }
    }
}

/// Collect the failed providers and their recorded errors for notification.
fn provider_failures(registration: &Registration) -> Vec<ProviderFailure> {
    registration
        .providers
        .iter()
        .filter(|(_, state)| state.status == ArchiveStatus::Failure)
        .map(|(provider, state)| ProviderFailure {
            provider: provider.clone(),
            errors: state.errors.clone(),
        })
        .collect()
}

/// Sum the disk usage recorded across a registration's statted providers.
fn statted_usage(registration: &Registration) -> u64 {
    registration
        .providers
        .values()
        .filter_map(|state| state.stat.as_ref())
        .map(|stat| stat.disk_usage)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use archivio_common::config::{GatewayConfig, NotifyConfig};
    use archivio_notify::MemoryNotifier;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SIGNING_KEY: &[u8] = b"archiver-test-key";

    struct TestHarness {
        archiver: Arc<Archiver>,
        registry: Arc<Registry>,
        notifier: Arc<MemoryNotifier>,
    }

    fn harness(mock_url: &str, archive_config: ArchiveConfig) -> TestHarness {
        let registry = Arc::new(Registry::new());
        let gateway = Arc::new(
            GatewayClient::new(&GatewayConfig {
                url: mock_url.to_string(),
                timeout_ms: 5_000,
                max_concurrent_requests: 4,
            })
            .unwrap(),
        );
        let notifier = Arc::new(MemoryNotifier::new());
        let notify = Arc::new(NotifyService::new(notifier.clone(), NotifyConfig::default()));
        let archiver = Arc::new(
            Archiver::new(
                registry.clone(),
                gateway,
                notify,
                archive_config,
                SIGNING_KEY,
            )
            .unwrap(),
        );
        TestHarness {
            archiver,
            registry,
            notifier,
        }
    }

    fn request(providers: &[&str]) -> ArchiveRequest {
        ArchiveRequest {
            registration: RegistrationId::new("regabc12").unwrap(),
            source: NodeId::new("node1234").unwrap(),
            title: "Test Registration".to_string(),
            initiator: UserId::new("user1234").unwrap(),
            initiator_email: "user@example.org".to_string(),
            parent: None,
            providers: providers
                .iter()
                .map(|name| Provider::new(*name).unwrap())
                .collect(),
            gateway_cookie: "cookie".to_string(),
        }
    }

    fn provider(name: &str) -> Provider {
        Provider::new(name).unwrap()
    }

    fn reg_id(id: &str) -> RegistrationId {
        RegistrationId::new(id).unwrap()
    }

    fn callback_token(receipt: &StartReceipt) -> CallbackToken {
        CallbackToken::decode(&receipt.callback_token).unwrap()
    }

    /// Mount a flat file listing for one provider's root folder.
    async fn mount_metadata(server: &MockServer, provider: &str, files: &[(&str, u64)]) {
        let data: Vec<_> = files
            .iter()
            .map(|(name, size)| {
                json!({
                    "path": format!("/{name}"),
                    "name": name,
                    "kind": "file",
                    "size": size.to_string(),
                })
            })
            .collect();
        Mock::given(method("GET"))
            .and(path("/metadata"))
            .and(query_param("provider", provider))
            .and(query_param("path", "/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": data })))
            .mount(server)
            .await;
    }

    /// Mount the copy endpoint for one source provider, matching the payload
    /// the gateway contract expects: source root, destination root on the
    /// archive provider under the registration, and the archive folder name.
    async fn mount_copy(server: &MockServer, source_provider: &str, status: u16) {
        let rename = format!("Archive of {}", provider(source_provider).display_name());
        Mock::given(method("POST"))
            .and(path("/ops/copy"))
            .and(body_partial_json(json!({
                "source": { "nid": "node1234", "provider": source_provider, "path": "/" },
                "destination": { "nid": "regabc12", "provider": "archivestore", "path": "/" },
                "rename": rename,
            })))
            .respond_with(ResponseTemplate::new(status))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_all_providers_success_archives() {
        let server = MockServer::start().await;
        mount_metadata(&server, "dropbox", &[("a.txt", 128), ("b.txt", 256)]).await;
        mount_metadata(&server, "s3", &[("c.bin", 64)]).await;
        mount_copy(&server, "dropbox", 200).await;
        mount_copy(&server, "s3", 200).await;

        let h = harness(&server.uri(), ArchiveConfig::default());
        let req = request(&["dropbox", "s3"]);
        h.archiver.register(&req).unwrap();
        h.archiver.run_pipeline(req).await;

        let registration = h.registry.get(&reg_id("regabc12")).unwrap();
        assert!(!registration.archiving);
        assert!(registration.archived_at.is_some());
        assert!(!registration.is_deleted);
        for state in registration.providers.values() {
            assert_eq!(state.status, ArchiveStatus::Success);
        }
        let dropbox_stat = registration.providers[&provider("dropbox")]
            .stat
            .as_ref()
            .unwrap();
        assert_eq!(dropbox_stat.disk_usage, 384);
        assert_eq!(dropbox_stat.num_files, 2);

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "user@example.org");
        assert!(sent[0].subject.contains("complete"));
    }

    #[tokio::test]
    async fn test_copy_failure_fails_registration() {
        let server = MockServer::start().await;
        mount_metadata(&server, "dropbox", &[("a.txt", 128)]).await;
        mount_metadata(&server, "s3", &[("c.bin", 64)]).await;
        mount_copy(&server, "dropbox", 200).await;
        Mock::given(method("POST"))
            .and(path("/ops/copy"))
            .and(body_partial_json(json!({ "source": { "provider": "s3" } })))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(json!({ "errors": ["backend exploded"] })),
            )
            .mount(&server)
            .await;

        let h = harness(&server.uri(), ArchiveConfig::default());
        let req = request(&["dropbox", "s3"]);
        h.archiver.register(&req).unwrap();
        h.archiver.run_pipeline(req).await;

        let registration = h.registry.get(&reg_id("regabc12")).unwrap();
        assert!(registration.is_deleted);
        assert!(!registration.archiving);
        let s3_state = &registration.providers[&provider("s3")];
        assert_eq!(s3_state.status, ArchiveStatus::Failure);
        assert_eq!(s3_state.errors, vec!["backend exploded".to_string()]);

        // Exactly one user mail and one desk mail
        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to, "user@example.org");
        assert_eq!(sent[1].to, "support@archivio.example");
        assert!(sent[1].body.contains("backend exploded"));
    }

    #[tokio::test]
    async fn test_size_gate_short_circuits_before_copy() {
        let server = MockServer::start().await;
        mount_metadata(&server, "dropbox", &[("big.iso", 384)]).await;
        // The copy endpoint must never be touched
        Mock::given(method("POST"))
            .and(path("/ops/copy"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let config = ArchiveConfig {
            max_archive_size: 100,
            ..ArchiveConfig::default()
        };
        let h = harness(&server.uri(), config);
        let req = request(&["dropbox"]);
        h.archiver.register(&req).unwrap();
        h.archiver.run_pipeline(req).await;

        let registration = h.registry.get(&reg_id("regabc12")).unwrap();
        assert!(registration.is_deleted);
        // The provider never left the checking state
        assert_eq!(
            registration.providers[&provider("dropbox")].status,
            ArchiveStatus::Checking
        );

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].body.contains("could not be archived"));
        assert!(sent[1].body.contains("size limit exceeded"));
        server.verify().await;
    }

    #[tokio::test]
    async fn test_stat_failure_fails_provider_but_others_continue() {
        let server = MockServer::start().await;
        // dropbox metadata 500s; s3 stats and copies fine
        Mock::given(method("GET"))
            .and(path("/metadata"))
            .and(query_param("provider", "dropbox"))
            .respond_with(ResponseTemplate::new(500).set_body_string("listing broke"))
            .mount(&server)
            .await;
        mount_metadata(&server, "s3", &[("c.bin", 64)]).await;
        mount_copy(&server, "s3", 200).await;

        let h = harness(&server.uri(), ArchiveConfig::default());
        let req = request(&["dropbox", "s3"]);
        h.archiver.register(&req).unwrap();
        h.archiver.run_pipeline(req).await;

        let registration = h.registry.get(&reg_id("regabc12")).unwrap();
        assert!(registration.is_deleted);
        assert_eq!(
            registration.providers[&provider("dropbox")].status,
            ArchiveStatus::Failure
        );
        assert!(!registration.providers[&provider("dropbox")].errors.is_empty());
        // The surviving provider still archived before the run failed
        assert_eq!(
            registration.providers[&provider("s3")].status,
            ArchiveStatus::Success
        );
        assert_eq!(h.notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_accepted_copy_completed_by_webhook() {
        let server = MockServer::start().await;
        mount_metadata(&server, "dropbox", &[("a.txt", 128)]).await;
        mount_copy(&server, "dropbox", 202).await;

        let h = harness(&server.uri(), ArchiveConfig::default());
        let req = request(&["dropbox"]);
        let receipt = h.archiver.register(&req).unwrap();
        h.archiver.run_pipeline(req).await;

        // Still pending: the gateway only accepted the copy
        let registration = h.registry.get(&reg_id("regabc12")).unwrap();
        assert!(registration.archiving);
        assert_eq!(
            registration.providers[&provider("dropbox")].status,
            ArchiveStatus::Pending
        );
        assert!(h.notifier.sent().is_empty());

        h.archiver
            .complete_provider(
                &callback_token(&receipt),
                &provider("dropbox"),
                CompletionReport::Success,
            )
            .await
            .unwrap();

        let registration = h.registry.get(&reg_id("regabc12")).unwrap();
        assert!(!registration.archiving);
        assert!(registration.archived_at.is_some());
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_failure_report_fails_registration() {
        let server = MockServer::start().await;
        mount_metadata(&server, "dropbox", &[("a.txt", 128)]).await;
        mount_copy(&server, "dropbox", 202).await;

        let h = harness(&server.uri(), ArchiveConfig::default());
        let req = request(&["dropbox"]);
        let receipt = h.archiver.register(&req).unwrap();
        h.archiver.run_pipeline(req).await;

        h.archiver
            .complete_provider(
                &callback_token(&receipt),
                &provider("dropbox"),
                CompletionReport::Failure(vec!["quota exceeded".to_string()]),
            )
            .await
            .unwrap();

        let registration = h.registry.get(&reg_id("regabc12")).unwrap();
        assert!(registration.is_deleted);
        assert_eq!(
            registration.providers[&provider("dropbox")].errors,
            vec!["quota exceeded".to_string()]
        );
        assert_eq!(h.notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_webhook_bad_token_rejected() {
        let server = MockServer::start().await;
        let h = harness(&server.uri(), ArchiveConfig::default());
        let req = request(&["dropbox"]);
        h.archiver.register(&req).unwrap();

        // Token signed with a different key
        let forged = CallbackToken::new(reg_id("regabc12"), Utc::now(), &signing_key(b"wrong"));
        let err = h
            .archiver
            .complete_provider(&forged, &provider("dropbox"), CompletionReport::Success)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TokenSignatureMismatch));

        // Nothing moved, nothing was sent
        let registration = h.registry.get(&reg_id("regabc12")).unwrap();
        assert_eq!(
            registration.providers[&provider("dropbox")].status,
            ArchiveStatus::Pending
        );
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_late_webhook_after_settled() {
        let server = MockServer::start().await;
        mount_metadata(&server, "dropbox", &[("a.txt", 128)]).await;
        mount_copy(&server, "dropbox", 200).await;

        let h = harness(&server.uri(), ArchiveConfig::default());
        let req = request(&["dropbox"]);
        let receipt = h.archiver.register(&req).unwrap();
        h.archiver.run_pipeline(req).await;
        assert_eq!(h.notifier.sent().len(), 1);

        // Duplicate success callback is an idempotent no-op
        let token = callback_token(&receipt);
        h.archiver
            .complete_provider(&token, &provider("dropbox"), CompletionReport::Success)
            .await
            .unwrap();
        assert_eq!(h.notifier.sent().len(), 1);

        // A conflicting late failure report is rejected without touching state
        let err = h
            .archiver
            .complete_provider(
                &token,
                &provider("dropbox"),
                CompletionReport::Failure(vec!["too late".to_string()]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TerminalStatus { .. }));
        let registration = h.registry.get(&reg_id("regabc12")).unwrap();
        assert!(registration.providers[&provider("dropbox")].errors.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_racing_success_callbacks_send_one_mail() {
        let server = MockServer::start().await;
        let h = harness(&server.uri(), ArchiveConfig::default());
        let receipt = h.archiver.register(&request(&["dropbox"])).unwrap();

        // Both callbacks report the final provider at once; only one of
        // them may settle the registration.
        let token = callback_token(&receipt);
        let callbacks: Vec<_> = (0..2)
            .map(|_| {
                let archiver = h.archiver.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    archiver
                        .complete_provider(
                            &token,
                            &provider("dropbox"),
                            CompletionReport::Success,
                        )
                        .await
                })
            })
            .collect();
        for callback in callbacks {
            callback.await.unwrap().unwrap();
        }

        let registration = h.registry.get(&reg_id("regabc12")).unwrap();
        assert!(!registration.archiving);
        assert!(registration.archived_at.is_some());
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_start_validations() {
        let server = MockServer::start().await;
        let h = harness(&server.uri(), ArchiveConfig::default());

        let err = h.archiver.register(&request(&[])).unwrap_err();
        assert!(matches!(err, Error::NoProviders));

        let err = h.archiver.register(&request(&["mendeley"])).unwrap_err();
        assert!(matches!(err, Error::ProviderNotArchivable(_)));

        h.archiver.register(&request(&["dropbox"])).unwrap();
        let err = h.archiver.register(&request(&["dropbox"])).unwrap_err();
        assert!(matches!(err, Error::AlreadyArchiving(_)));

        // The archive provider is linked on insert
        assert!(h.registry.has_archive_provider(&reg_id("regabc12")).unwrap());
        let registration = h.registry.get(&reg_id("regabc12")).unwrap();
        assert_eq!(
            registration.archive_provider,
            Some(provider("archivestore"))
        );
    }

    #[tokio::test]
    async fn test_start_spawns_pipeline() {
        let server = MockServer::start().await;
        mount_metadata(&server, "dropbox", &[("a.txt", 128)]).await;
        mount_copy(&server, "dropbox", 200).await;

        let h = harness(&server.uri(), ArchiveConfig::default());
        let receipt = h.archiver.clone().start(request(&["dropbox"])).unwrap();
        assert_eq!(receipt.registration, reg_id("regabc12"));
        assert!(!receipt.callback_token.is_empty());

        // The spawned pipeline settles the registration
        for _ in 0..100 {
            if let Some(registration) = h.registry.get(&reg_id("regabc12")) {
                if !registration.archiving {
                    break;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let registration = h.registry.get(&reg_id("regabc12")).unwrap();
        assert!(!registration.archiving);
        assert!(registration.archived_at.is_some());
    }

    #[tokio::test]
    async fn test_failure_tombstones_descendants() {
        let server = MockServer::start().await;
        mount_metadata(&server, "dropbox", &[("a.txt", 128)]).await;
        Mock::given(method("POST"))
            .and(path("/ops/copy"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let h = harness(&server.uri(), ArchiveConfig::default());
        let parent_req = request(&["dropbox"]);
        h.archiver.register(&parent_req).unwrap();

        let mut child_req = request(&["dropbox"]);
        child_req.registration = reg_id("regchild1");
        child_req.parent = Some(reg_id("regabc12"));
        h.archiver.register(&child_req).unwrap();

        h.archiver.run_pipeline(parent_req).await;

        assert!(h.registry.get(&reg_id("regabc12")).unwrap().is_deleted);
        assert!(h.registry.get(&reg_id("regchild1")).unwrap().is_deleted);
        // One failure pair for the root, none for the descendant
        assert_eq!(h.notifier.sent().len(), 2);
    }
}
