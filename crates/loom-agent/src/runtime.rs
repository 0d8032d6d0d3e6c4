//! Task entrypoint: resolves the session, starts one execution loop and
//! hands back its message stream.

use crate::events::{EventSink, LoopEvent};
use crate::prompt::build_system_prompt;
use crate::session::{LoopServices, LoopSettings, Session};
use crate::stream::{RunStream, StreamMessage};
use crate::tools::builtin_bundle;
use crate::{
    AgentError, ExecutionEnvironment, HttpSearchBackend, LocalExecutionEnvironment,
    PermissionGate, RunOptions, RuntimeConfig, SearchBackend, ToolBundle, ToolRegistry,
};
use loom_llm::{Client, OpenAiCompatibleAdapter, RetryMiddleware, TimeoutMiddleware};
use loom_turnstore::{SessionId, SessionRecord, SessionStatus, SessionStore, StoreError};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

type LeaseSet = Arc<Mutex<HashSet<SessionId>>>;

/// Marks a session as owned by a running loop until dropped.
struct SessionLease {
    session_id: SessionId,
    leases: LeaseSet,
}

impl SessionLease {
    fn acquire(leases: &LeaseSet, session_id: &str) -> Result<Self, AgentError> {
        let mut held = leases.lock().map_err(|_| {
            AgentError::Store(StoreError::Backend(
                "session lease table is poisoned".to_string(),
            ))
        })?;
        if !held.insert(session_id.to_string()) {
            return Err(AgentError::SessionBusy(session_id.to_string()));
        }
        Ok(Self {
            session_id: session_id.to_string(),
            leases: leases.clone(),
        })
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Ok(mut held) = self.leases.lock() {
            held.remove(&self.session_id);
        }
    }
}

#[derive(Clone)]
pub struct AgentRuntime {
    config: RuntimeConfig,
    client: Arc<Client>,
    registry: Arc<ToolRegistry>,
    store: Arc<dyn SessionStore>,
    working_directory: Option<PathBuf>,
    leases: LeaseSet,
}

impl AgentRuntime {
    /// Runtime over an existing client and registry. Credentials are the
    /// client's concern; the remaining limits are validated here.
    pub fn new(
        config: RuntimeConfig,
        client: Arc<Client>,
        store: Arc<dyn SessionStore>,
        registry: ToolRegistry,
    ) -> Result<Self, AgentError> {
        config.validate_limits()?;
        Ok(Self {
            config,
            client,
            registry: Arc::new(registry),
            store,
            working_directory: None,
            leases: Arc::default(),
        })
    }

    /// Production wiring: OpenAI-compatible backend with retry and timeout
    /// middleware, built-in tools rooted at `working_directory`.
    pub fn from_config(
        config: RuntimeConfig,
        store: Arc<dyn SessionStore>,
        working_directory: impl Into<PathBuf>,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        let adapter = OpenAiCompatibleAdapter::new(config.api_key.clone(), config.base_url.clone())?;
        let mut client = Client::default();
        client.register_provider(Arc::new(adapter))?;
        client.add_middleware(Arc::new(RetryMiddleware::new(config.retry.clone())));
        client.add_middleware(Arc::new(TimeoutMiddleware::new(config.backend_timeout)));

        let working_directory = working_directory.into();
        let env: Arc<dyn ExecutionEnvironment> =
            Arc::new(LocalExecutionEnvironment::new(working_directory.clone()));
        let search = config
            .search_api_key
            .clone()
            .map(|key| Arc::new(HttpSearchBackend::new(key)) as Arc<dyn SearchBackend>);
        let mut registry = ToolRegistry::new().with_output_limits(config.output_limits.clone());
        registry.register(builtin_bundle(env, search))?;

        let mut runtime = Self::new(config, Arc::new(client), store, registry)?;
        runtime.working_directory = Some(working_directory);
        tracing::info!(
            model = %runtime.config.model,
            tools = runtime.registry.names().len(),
            bundles = ?runtime.registry.bundles().collect::<Vec<_>>(),
            "runtime ready"
        );
        Ok(runtime)
    }

    /// Adds a bundle. Only possible before the first task starts.
    pub fn register_bundle(&mut self, bundle: ToolBundle) -> Result<(), AgentError> {
        let registry = Arc::get_mut(&mut self.registry).ok_or_else(|| {
            AgentError::invalid_configuration("tools cannot be registered while tasks are running")
        })?;
        registry.register(bundle)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Marks an idle session `completed`.
    pub async fn close_session(&self, session_id: &str) -> Result<SessionRecord, AgentError> {
        let _lease = SessionLease::acquire(&self.leases, session_id)?;
        Ok(self.store.close(&session_id.to_string()).await?)
    }

    /// Marks a session created for a task that never started as `errored`.
    async fn abandon_session(&self, session_id: &str, cause: &AgentError) {
        tracing::warn!(session_id, error = %cause, "task failed to start");
        if let Err(error) = self
            .store
            .set_status(&session_id.to_string(), SessionStatus::Errored)
            .await
        {
            tracing::warn!(session_id, error = %error, "failed to mark abandoned session");
        }
    }

    /// Starts a task and returns its stream.
    ///
    /// Option and session errors (`SessionNotFound`, `SessionBusy`, invalid
    /// configuration) are returned here; everything after the loop starts is
    /// delivered as stream messages.
    pub async fn run_task(
        &self,
        prompt: impl Into<String>,
        options: RunOptions,
    ) -> Result<RunStream, AgentError> {
        options.validate()?;
        if let Some(system_prompt) = &options.system_prompt {
            system_prompt.validate()?;
        }
        for name in options.allowed_tools.iter() {
            if self.registry.resolve(name).is_err() {
                tracing::warn!(tool = name, "allowed tool is not registered");
            }
        }

        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.config.model.clone());
        let tools = self.registry.definitions(&options.allowed_tools);
        let working_directory = self
            .working_directory
            .as_ref()
            .map(|path| path.display().to_string());
        let system_prompt = build_system_prompt(
            options.system_prompt.as_ref(),
            &tools,
            working_directory.as_deref(),
        )?;
        let settings = LoopSettings {
            model: model.clone(),
            system_prompt,
            step_limit: options.step_limit.unwrap_or(self.config.step_limit),
            tool_timeout: Some(options.tool_timeout.unwrap_or(self.config.tool_timeout)),
            backend_timeout: options.backend_timeout,
        };
        let gate = PermissionGate::new(options.permission_mode, options.allowed_tools.clone())
            .with_approver(options.can_use_tool.clone())
            .with_approval_timeout(self.config.approval_timeout);

        let (record, created) = match (&options.resume, options.fork_session) {
            (None, _) => {
                let record = self.store.create().await?;
                tracing::info!(session_id = %record.session_id, "session created");
                (record, true)
            }
            (Some(parent), true) => {
                let record = self.store.fork(parent).await?;
                tracing::info!(
                    session_id = %record.session_id,
                    parent_session_id = %parent,
                    inherited_turns = record.turn_count(),
                    "session forked"
                );
                (record, true)
            }
            (Some(session_id), false) => {
                let record = self.store.load(session_id).await?;
                tracing::info!(
                    session_id = %record.session_id,
                    turns = record.turn_count(),
                    "session resumed"
                );
                (record, false)
            }
        };

        let init = StreamMessage::Init {
            session_id: record.session_id.clone(),
            model,
            tools: tools.into_iter().map(|tool| tool.name).collect(),
            permission_mode: options.permission_mode,
            parent_session_id: record.parent_session_id.clone(),
        };

        let (sink, receiver) = EventSink::channel(self.config.channel_capacity);
        let cancel = CancellationToken::new();
        let services = LoopServices {
            store: self.store.clone(),
            client: self.client.clone(),
            registry: self.registry.clone(),
        };
        let session_id = record.session_id.clone();
        let prepared = async {
            let lease = SessionLease::acquire(&self.leases, &record.session_id)?;
            let session =
                Session::open(record, services, gate, settings, sink.clone(), cancel.clone())
                    .await?;
            Ok::<_, AgentError>((lease, session))
        }
        .await;
        let (lease, mut session) = match prepared {
            Ok(prepared) => prepared,
            Err(error) => {
                if created {
                    self.abandon_session(&session_id, &error).await;
                }
                return Err(error);
            }
        };

        let prompt = prompt.into();
        tokio::spawn(async move {
            let outcome = session.run(prompt).await;
            drop(lease);
            sink.emit(LoopEvent::Finished(outcome)).await;
        });

        Ok(RunStream::new(init, receiver, cancel))
    }
}
