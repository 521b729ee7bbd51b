//! Tide engine: the command and event handlers of the orchestration core.
//!
//! Each call handles exactly one message. The engine rehydrates the tide from
//! the event store, applies the message, and hands the resulting events to
//! the publisher and the resulting commands to the executors.

use std::sync::Arc;

use uuid::Uuid;

use crate::commands::{TideCommand, TideRequest};
use crate::concurrency::{TideConcurrencyManager, START_RETRY_DELAY};
use crate::events::TideEvent;
use crate::flow::FlowError;
use crate::pipeline::{Pipeline, Reaction};
use crate::ports::{DelayedCommandScheduler, EventPublisher, EventStore, RepositoryError, TaskExecutor};
use crate::tide::{Tide, TideError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Tide(#[from] TideError),
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// The flow is at its concurrency limit; the start was rescheduled.
    Deferred,
    AlreadyStarted,
}

pub struct TideEngine {
    store: Arc<dyn EventStore>,
    publisher: Arc<dyn EventPublisher>,
    scheduler: Arc<dyn DelayedCommandScheduler>,
    executor: Arc<dyn TaskExecutor>,
    concurrency: Arc<dyn TideConcurrencyManager>,
}

impl TideEngine {
    pub fn new(
        store: Arc<dyn EventStore>,
        publisher: Arc<dyn EventPublisher>,
        scheduler: Arc<dyn DelayedCommandScheduler>,
        executor: Arc<dyn TaskExecutor>,
        concurrency: Arc<dyn TideConcurrencyManager>,
    ) -> Self {
        Self {
            store,
            publisher,
            scheduler,
            executor,
            concurrency,
        }
    }

    pub async fn handle_command(&self, command: TideCommand) -> Result<StartOutcome, EngineError> {
        command.request().configuration.validate()?;

        match command {
            TideCommand::CreateTide(request) => {
                tracing::info!(
                    tide_uuid = %request.tide_uuid,
                    flow_uuid = %request.flow.uuid,
                    branch = %request.code_reference.branch,
                    sha = %request.code_reference.sha,
                    "Creating tide"
                );
                self.publisher.publish(vec![request.created_event()]).await?;
                self.start(request).await
            }
            TideCommand::StartTide(request) => self.start(request).await,
        }
    }

    async fn start(&self, request: TideRequest) -> Result<StartOutcome, EngineError> {
        let history = self.history(request.tide_uuid).await?;
        if history
            .iter()
            .any(|e| matches!(e, TideEvent::TideStarted { .. }))
        {
            tracing::debug!(tide_uuid = %request.tide_uuid, "Tide already started");
            return Ok(StartOutcome::AlreadyStarted);
        }

        let mut tide = Tide::create(
            request.tide_uuid,
            request.flow.clone(),
            request.code_reference.clone(),
            request.parent_log.clone(),
            request.configuration.clone(),
        )?;

        if !self.concurrency.should_tide_start(&tide).await? {
            tracing::info!(
                tide_uuid = %request.tide_uuid,
                delay_secs = START_RETRY_DELAY.as_secs(),
                "Flow at concurrency limit, start deferred"
            );
            crate::metrics::tide_start_deferred();
            self.scheduler
                .schedule(TideCommand::StartTide(request), START_RETRY_DELAY)
                .await?;
            return Ok(StartOutcome::Deferred);
        }

        self.publisher.publish(tide.pop_new_events()).await?;
        tracing::info!(tide_uuid = %request.tide_uuid, "Tide started");
        Ok(StartOutcome::Started)
    }

    /// Append `event` to its tide and react to it. Returns everything the
    /// event caused: published events and dispatched commands.
    pub async fn process_event(&self, event: TideEvent) -> Result<Reaction, EngineError> {
        let tide_uuid = event.tide_uuid();
        let history = self.history(tide_uuid).await?;

        let mut tide = if history.is_empty() {
            Tide::from_events([event.clone()])?
        } else {
            let mut tide = Tide::from_events(history.iter().cloned())?;
            tide.apply(event.clone())?;
            tide
        };
        self.store.append(event.clone()).await?;

        let mut pipeline = Pipeline::for_tide(&tide);
        pipeline.replay(&history);
        let reaction = pipeline.react(&tide, &event);

        let mut events = tide.pop_new_events();
        events.extend(reaction.events);

        tracing::debug!(
            tide_uuid = %tide_uuid,
            event = event.kind(),
            published = events.len(),
            commands = reaction.commands.len(),
            "Event processed"
        );
        crate::metrics::event_processed(event.kind());
        if event.is_terminal() {
            crate::metrics::tide_status_changed(tide.status().as_str());
        }

        if !events.is_empty() {
            self.publisher.publish(events.clone()).await?;
        }
        for command in &reaction.commands {
            crate::metrics::command_dispatched(command.kind());
            self.executor.dispatch(command.clone()).await?;
        }

        Ok(Reaction {
            events,
            commands: reaction.commands,
        })
    }

    async fn history(&self, tide_uuid: Uuid) -> Result<Vec<TideEvent>, RepositoryError> {
        match self.store.find(tide_uuid).await {
            Ok(events) => Ok(events),
            Err(RepositoryError::TideNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
