// Staging dispatch: publish a staging request and reconcile its reply against the app's live token

use super::app::App;
use super::blobstore::BlobstoreUrlGenerator;
use super::buildpack::{resolve_buildpacks, BuildpackCatalog};
use super::emitter::AppLogEmitter;
use super::repository::{AppRepository, StagingToken};
use super::request::StagingRequest;
use super::response::StagingOutcome;
use crate::bus::{BusReply, MessageBus, Reactor, ReplyHandler};
use crate::config::StagingConfig;
use crate::errors::{DatabaseError, StagingError};
use crate::telemetry;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, info_span, instrument, trace, warn, Instrument};
use uuid::Uuid;

/// Handed to the completion callback after a successful staging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingCompletion {
    pub app_guid: String,
    pub detected_buildpack: Option<String>,
    pub started_instances: u32,
}

/// Runs on the worker pool, never on the reply reactor
pub type CompletionCallback = Box<dyn FnOnce(StagingCompletion) -> BoxFuture<'static, ()> + Send>;

/// How a dispatched staging ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Staged,
    Failed,
    TimedOut,
    /// A newer dispatch for the same app owns the token; the reply was ignored
    Superseded,
    /// The reply could not be applied because app state was unreadable or unwritable
    Unresolved,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Staged => "staged",
            Resolution::Failed => "failed",
            Resolution::TimedOut => "timed_out",
            Resolution::Superseded => "superseded",
            Resolution::Unresolved => "unresolved",
        }
    }
}

/// Receipt for a staging request that is on the bus
#[derive(Debug)]
pub struct DispatchedStaging {
    pub app_guid: String,
    pub token: StagingToken,
    resolution: oneshot::Receiver<Resolution>,
}

impl DispatchedStaging {
    /// Wait until the reply (or timeout) has been handled
    pub async fn resolution(self) -> Resolution {
        self.resolution.await.unwrap_or(Resolution::Unresolved)
    }
}

/// Issues staging requests
pub struct Stager {
    bus: Arc<dyn MessageBus>,
    reactor: Reactor,
    apps: Arc<dyn AppRepository>,
    catalog: Arc<dyn BuildpackCatalog>,
    urls: Arc<dyn BlobstoreUrlGenerator>,
    emitter: Arc<dyn AppLogEmitter>,
    subject: String,
    timeout: Duration,
}

impl Stager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        reactor: Reactor,
        apps: Arc<dyn AppRepository>,
        catalog: Arc<dyn BuildpackCatalog>,
        urls: Arc<dyn BlobstoreUrlGenerator>,
        emitter: Arc<dyn AppLogEmitter>,
        config: &StagingConfig,
    ) -> Self {
        Self {
            bus,
            reactor,
            apps,
            catalog,
            urls,
            emitter,
            subject: config.subject.clone(),
            timeout: config.timeout(),
        }
    }

    /// Start staging `app`.
    ///
    /// Returns as soon as the request is published. The reply is handled later on the reactor,
    /// and `on_complete` runs only if that reply is a success for the app's current token.
    #[instrument(skip_all, fields(app_guid = %app.guid))]
    pub async fn stage(
        &self,
        app: &App,
        on_complete: Option<CompletionCallback>,
    ) -> Result<DispatchedStaging, StagingError> {
        let task_id = Uuid::new_v4();
        let buildpacks =
            resolve_buildpacks(&app.buildpack, self.catalog.as_ref(), self.urls.as_ref()).await?;
        let payload =
            StagingRequest::new(app, task_id.to_string(), self.urls.as_ref(), buildpacks)
                .to_bytes()?;

        let task = StagerTask::create(self, &app.guid, task_id, on_complete).await?;
        task.dispatch(self, payload).await
    }
}

/// One staging attempt. Owns everything its reply handler needs.
struct StagerTask {
    app_guid: String,
    token: StagingToken,
    apps: Arc<dyn AppRepository>,
    emitter: Arc<dyn AppLogEmitter>,
    on_complete: Option<CompletionCallback>,
}

impl StagerTask {
    /// Make the new token current for the app. From here on, replies to earlier dispatches are stale.
    async fn create(
        stager: &Stager,
        app_guid: &str,
        task_id: Uuid,
        on_complete: Option<CompletionCallback>,
    ) -> Result<Self, StagingError> {
        let token = stager
            .apps
            .assign_staging_token(app_guid, task_id)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound(_) => StagingError::AppNotFound(app_guid.to_string()),
                other => StagingError::Database(other),
            })?;

        Ok(Self {
            app_guid: app_guid.to_string(),
            token,
            apps: Arc::clone(&stager.apps),
            emitter: Arc::clone(&stager.emitter),
            on_complete,
        })
    }

    /// Publish the request and hand the reply handler to the reactor
    async fn dispatch(
        self,
        stager: &Stager,
        payload: Bytes,
    ) -> Result<DispatchedStaging, StagingError> {
        let app_guid = self.app_guid.clone();
        let token = self.token;
        let (resolved_tx, resolved_rx) = oneshot::channel();

        let span = info_span!(
            "staging_reply",
            app_guid = %app_guid,
            task_id = %token.task_id,
            sequence = token.sequence
        );
        let handler: ReplyHandler = Box::new(move |reply: BusReply| {
            async move {
                let resolution = self.resolve(reply).await;
                telemetry::record_staging_resolved(resolution.as_str());
                let _ = resolved_tx.send(resolution);
            }
            .instrument(span)
            .boxed()
        });

        stager
            .reactor
            .request(
                stager.bus.as_ref(),
                &stager.subject,
                payload,
                stager.timeout,
                handler,
            )
            .await?;

        telemetry::record_staging_dispatched();
        info!(
            task_id = %token.task_id,
            sequence = token.sequence,
            timeout_secs = stager.timeout.as_secs(),
            "Staging started"
        );

        Ok(DispatchedStaging {
            app_guid,
            token,
            resolution: resolved_rx,
        })
    }

    async fn resolve(self, reply: BusReply) -> Resolution {
        debug!(timed_out = reply.is_timeout(), "Staging reply received");

        // Fresh read: the check must see any dispatch issued after this one
        match self.apps.current_staging_token(&self.app_guid).await {
            Ok(Some(current)) if current == self.token => {}
            Ok(current) => {
                trace!(
                    current = ?current,
                    "Discarding reply for superseded staging task"
                );
                return Resolution::Superseded;
            }
            Err(DatabaseError::NotFound(_)) => {
                trace!("Discarding reply for deleted app");
                return Resolution::Superseded;
            }
            Err(e) => {
                error!(error = %e, "Failed to read current staging token, discarding reply");
                return Resolution::Unresolved;
            }
        }

        match StagingOutcome::from_reply(&reply) {
            StagingOutcome::Succeeded { detected_buildpack } => self.succeed(detected_buildpack).await,
            failure => self.fail(failure).await,
        }
    }

    async fn succeed(self, detected_buildpack: Option<String>) -> Resolution {
        // Guarded write: a dispatch issued since the read above still wins
        match self
            .apps
            .record_detected_buildpack(&self.app_guid, &self.token, detected_buildpack.as_deref())
            .await
        {
            Ok(true) => {}
            Ok(false) => return self.superseded_at_write(),
            Err(e) => {
                error!(error = %e, "Failed to record detected buildpack");
                return Resolution::Unresolved;
            }
        }

        info!(detected_buildpack = detected_buildpack.as_deref(), "Staging succeeded");

        if let Some(callback) = self.on_complete {
            let completion = StagingCompletion {
                app_guid: self.app_guid,
                detected_buildpack,
                started_instances: 0,
            };
            // Off the reactor: the callback may do expensive work
            tokio::spawn(callback(completion).in_current_span());
        }

        Resolution::Staged
    }

    async fn fail(self, outcome: StagingOutcome) -> Resolution {
        match self.apps.mark_failed_to_stage(&self.app_guid, &self.token).await {
            Ok(true) => {}
            Ok(false) => return self.superseded_at_write(),
            Err(e) => {
                error!(error = %e, "Failed to mark app as failed to stage");
                return Resolution::Unresolved;
            }
        }

        if let Some(message) = outcome.failure_message() {
            warn!(failure = %message, "Staging failed");
            if let Err(e) = self.emitter.emit_error(&self.app_guid, &message).await {
                warn!(error = %e, "Failed to emit staging failure to app log");
            }
        }

        match outcome {
            StagingOutcome::TimedOut { .. } => Resolution::TimedOut,
            _ => Resolution::Failed,
        }
    }

    fn superseded_at_write(&self) -> Resolution {
        trace!("Staging token superseded before the reply was applied, discarding");
        Resolution::Superseded
    }
}
