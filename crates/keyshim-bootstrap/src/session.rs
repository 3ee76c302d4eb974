// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-environment bootstrap session.
//!
//! A [`Session`] owns everything that survives between invocations in one
//! execution environment: the staged executable, the rendered configuration
//! and the server process. Every invocation runs the full pipeline
//!
//! ```text
//! ensure executable ─► render config ─► start server ─► await ready ─► translate
//! ```
//!
//! and each stage is idempotent, so on a warm environment the first three
//! are cheap re-validations and readiness succeeds on its first probe. Any
//! stage failing aborts the rest of the pipeline for that invocation only.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::config::{ConfigError, TemplateSource};
use crate::envelope::{ApiGatewayRequest, ApiGatewayResponse, InboundRequest, ProxyResult};
use crate::error::{Error, Result};
use crate::provision::{Artifact, ArtifactProvisioner, EXECUTABLE_MODE, FILE_MODE};
use crate::readiness::{ReadinessGate, ReadinessReport};
use crate::render::{ConfigRenderer, RenderedConfig};
use crate::store::{ContentStore, LocalStore, S3Store};
use crate::supervisor::{ChildProcessHandle, ProcessSupervisor};
use crate::translate::RequestTranslator;
use crate::Config;

/// Grace period given to the server on runtime shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Per-environment state and the bootstrap pipeline.
pub struct Session {
    config: Config,
    store_type: &'static str,
    provisioner: ArtifactProvisioner,
    template_provisioner: ArtifactProvisioner,
    renderer: ConfigRenderer,
    supervisor: ProcessSupervisor,
    gate: ReadinessGate,
    translator: RequestTranslator,
    executable: Option<Artifact>,
    rendered: Option<RenderedConfig>,
    invocations: u64,
}

impl Session {
    /// Create a session reading artifacts from `store`.
    pub fn new(config: Config, store: Arc<dyn ContentStore>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        let store_type = store.store_type();
        let provisioner = ArtifactProvisioner::new(
            store.clone(),
            config.bucket_name.clone(),
            config.staging_dir.clone(),
        );
        let template_provisioner = ArtifactProvisioner::new(
            store,
            config.bucket_name.clone(),
            config.staging_dir.join("templates"),
        );
        let renderer = ConfigRenderer::new(config.known_placeholders());
        let gate = ReadinessGate::with_client(client.clone());
        let translator =
            RequestTranslator::new(client, config.upstream_base_url(), config.request_timeout);

        Ok(Self {
            config,
            store_type,
            provisioner,
            template_provisioner,
            renderer,
            supervisor: ProcessSupervisor::new(),
            gate,
            translator,
            executable: None,
            rendered: None,
            invocations: 0,
        })
    }

    /// Create a session with the store selected by the configuration.
    ///
    /// A configured store root selects [`LocalStore`]; otherwise S3 is used
    /// with the default AWS credential chain.
    pub async fn from_config(config: Config) -> Result<Self> {
        let store: Arc<dyn ContentStore> = match &config.store_root {
            Some(root) => Arc::new(LocalStore::new(root.clone())),
            None => Arc::new(S3Store::from_env().await),
        };
        Self::new(config, store)
    }

    /// The session configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of invocations handled so far.
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    /// The server process, if one was started.
    pub fn server(&self) -> Option<&ChildProcessHandle> {
        self.supervisor.handle()
    }

    /// Number of server processes spawned by this session.
    pub fn spawn_count(&self) -> u32 {
        self.supervisor.spawn_count()
    }

    /// The staged executable, once provisioned.
    pub fn executable(&self) -> Option<&Artifact> {
        self.executable.as_ref()
    }

    /// The most recently rendered configuration.
    pub fn rendered_config(&self) -> Option<&RenderedConfig> {
        self.rendered.as_ref()
    }

    /// Run every stage up to and including readiness.
    ///
    /// `budget` caps the readiness wait when the platform reports how much
    /// time the invocation has left.
    pub async fn bootstrap(&mut self, budget: Option<Duration>) -> Result<ReadinessReport> {
        let executable = self
            .provisioner
            .ensure(&self.config.executable_name, EXECUTABLE_MODE)
            .await?;

        let template_path = match self.config.template_source {
            TemplateSource::Bundled => self.config.bundled_template_path(),
            TemplateSource::Store => {
                self.template_provisioner
                    .ensure(&self.config.template_name, FILE_MODE)
                    .await?
                    .local_path
            }
        };
        let rendered = self.renderer.render(
            &template_path,
            &self.config.rendered_config_path(),
            &self.config.substitutions(),
        )?;

        let mut args = self.config.server_args.clone();
        args.push(format!("-config={}", rendered.path.display()));
        self.supervisor.start(&executable.local_path, &args)?;

        self.executable = Some(executable);
        self.rendered = Some(rendered);

        let timeout = match budget {
            Some(remaining) => remaining.min(self.config.readiness_timeout),
            None => self.config.readiness_timeout,
        };
        let health_url = self.config.health_url();
        match self
            .gate
            .await_ready(&health_url, self.config.poll_interval, timeout)
            .await
        {
            Ok(report) => {
                self.supervisor.mark_ready();
                Ok(report)
            }
            Err(e) => {
                self.supervisor.refresh();
                Err(e)
            }
        }
    }

    /// Bootstrap if needed, then forward `inbound` to the server.
    pub async fn serve(
        &mut self,
        inbound: &InboundRequest,
        budget: Option<Duration>,
    ) -> Result<ProxyResult> {
        self.bootstrap(budget).await?;
        match self.translator.translate(inbound).await {
            Err(e @ Error::UpstreamConnection(_)) => {
                // A server that died mid-session is replaced on the next invocation.
                self.supervisor.refresh();
                Err(e)
            }
            other => other,
        }
    }

    /// Handle one invocation event and produce the platform result.
    ///
    /// Errors never escape: they become non-2xx result envelopes.
    pub async fn handle(
        &mut self,
        event: ApiGatewayRequest,
        budget: Option<Duration>,
    ) -> ApiGatewayResponse {
        let start = Instant::now();
        let cold = self.invocations == 0;
        self.invocations += 1;

        let method = event.http_method.clone();
        let path = event.path.clone();
        let outcome = match event.into_inbound() {
            Ok(inbound) => self.serve(&inbound, budget).await,
            Err(e) => Err(e),
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(result) => {
                info!(
                    method = %method,
                    path = %path,
                    status = result.status_code,
                    cold,
                    elapsed_ms,
                    "Invocation complete"
                );
                result.into()
            }
            Err(e) => {
                error!(
                    method = %method,
                    path = %path,
                    stage = e.stage(),
                    error = %e,
                    cold,
                    elapsed_ms,
                    "Invocation failed"
                );
                ApiGatewayResponse::from(&e)
            }
        }
    }

    /// Decode a raw event payload and handle it.
    pub async fn handle_payload(
        &mut self,
        payload: &[u8],
        budget: Option<Duration>,
    ) -> ApiGatewayResponse {
        match serde_json::from_slice::<ApiGatewayRequest>(payload) {
            Ok(event) => self.handle(event, budget).await,
            Err(e) => {
                self.invocations += 1;
                let err = Error::InvalidRequest(format!("event is not a proxy request: {e}"));
                error!(error = %err, "Invocation failed");
                ApiGatewayResponse::from(&err)
            }
        }
    }

    /// Stop the server process. Called when the runtime terminates.
    pub async fn shutdown(&mut self) {
        debug!(store = self.store_type, invocations = self.invocations, "Shutting down session");
        self.supervisor.shutdown(SHUTDOWN_GRACE).await;
    }
}
