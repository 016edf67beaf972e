use std::sync::{Arc, Mutex, MutexGuard, Weak};

use nexus_agent::{
    AgentRunApi, AgentRunResult, AgentStreamEvent, NexusAgentError, StreamHandlers,
    StreamSubscription, StreamTransport,
};
use nexus_chain::{
    BroadcastError, Broadcaster, ChainError, SignerError, SigningContext, Transaction,
    TransactionSigner,
};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::heartbeat::{HeartbeatHandle, TickOutcome};
use crate::state::{
    drop_still_working_steps, is_still_working_step, still_working_step, RunOrchestratorConfig,
    RunPhase, RunSnapshot, NO_RESULT_MESSAGE, NO_TRANSACTION_MESSAGE, RUN_TIMEOUT_MESSAGE,
    START_FAILED_MESSAGE, STREAM_FAILED_MESSAGE, WALLET_NOT_CONNECTED_MESSAGE,
};

#[derive(Debug, Error)]
/// Enumerates supported `ApprovalError` values.
pub enum ApprovalError {
    #[error("failed to decode the pending transaction: {0}")]
    Decode(ChainError),
    #[error(transparent)]
    Sign(#[from] SignerError),
    #[error("failed to encode the signed transaction: {0}")]
    Encode(ChainError),
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
}

struct OrchestratorState {
    run: RunSnapshot,
    last_activity_at: Instant,
    stream: Option<StreamSubscription>,
    heartbeat: Option<HeartbeatHandle>,
}

impl OrchestratorState {
    fn stop_active_run(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.close();
        }
        if let Some(mut heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }
    }

    /// Invalidates every callback tagged with the previous generation.
    fn advance_generation(&mut self, phase: RunPhase) -> u64 {
        self.stop_active_run();
        let generation = self.run.generation.wrapping_add(1);
        self.run = RunSnapshot {
            generation,
            phase,
            ..RunSnapshot::default()
        };
        self.last_activity_at = Instant::now();
        generation
    }

    fn transition(&mut self, phase: RunPhase) {
        tracing::debug!(
            generation = self.run.generation,
            run_id = self.run.run_id.as_deref().unwrap_or(""),
            from = self.run.phase.as_str(),
            to = phase.as_str(),
            "agent run transition"
        );
        self.run.phase = phase;
    }

    fn fail(&mut self, message: impl Into<String>) {
        self.stop_active_run();
        drop_still_working_steps(&mut self.run.steps);
        self.run.error = Some(message.into());
        self.transition(RunPhase::Error);
    }

    fn complete(&mut self, result: Option<AgentRunResult>) {
        self.stop_active_run();
        drop_still_working_steps(&mut self.run.steps);
        let Some(result) = result else {
            self.fail(NO_RESULT_MESSAGE);
            return;
        };

        if let Some(rejection) = &result.rejection {
            self.run.error = Some(rejection.reason.clone());
            self.transition(RunPhase::Rejected);
        } else if result.pending_transaction().is_some() {
            self.transition(RunPhase::AwaitingApproval);
        } else {
            self.run.error = Some(NO_TRANSACTION_MESSAGE.to_string());
            self.transition(RunPhase::Error);
        }
        self.run.result = Some(result);
    }

    fn is_live(&self, generation: u64) -> bool {
        self.run.generation == generation && self.run.phase == RunPhase::Running
    }
}

struct Shared {
    agent: Arc<dyn AgentRunApi>,
    transport: Arc<dyn StreamTransport>,
    signer: Arc<dyn TransactionSigner>,
    broadcaster: Arc<dyn Broadcaster>,
    config: RunOrchestratorConfig,
    state: Mutex<OrchestratorState>,
    snapshots: watch::Sender<RunSnapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, OrchestratorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn publish(&self, state: &OrchestratorState) {
        self.snapshots.send_replace(state.run.clone());
    }

    fn handle_event(&self, generation: u64, event: AgentStreamEvent) {
        let mut state = self.lock();
        if !state.is_live(generation) {
            tracing::debug!(generation, event = event.kind(), "discarding stale stream event");
            return;
        }
        state.last_activity_at = Instant::now();

        match event {
            AgentStreamEvent::Heartbeat => return,
            AgentStreamEvent::Step(step) => {
                drop_still_working_steps(&mut state.run.steps);
                state.run.steps.push(step);
            }
            AgentStreamEvent::Error { message } => {
                let message = message
                    .map(|message| message.trim().to_string())
                    .filter(|message| !message.is_empty())
                    .unwrap_or_else(|| STREAM_FAILED_MESSAGE.to_string());
                tracing::warn!(generation, error = %message, "agent stream signaled failure");
                state.fail(message);
            }
            AgentStreamEvent::Complete { result } => state.complete(result),
        }
        self.publish(&state);
    }

    fn handle_stream_error(&self, generation: u64, error: NexusAgentError) {
        let mut state = self.lock();
        if !state.is_live(generation) {
            tracing::debug!(generation, error = %error, "discarding stale stream error");
            return;
        }
        tracing::warn!(generation, error = %error, "agent stream failed");
        let message = error.to_string();
        state.fail(if message.is_empty() {
            STREAM_FAILED_MESSAGE.to_string()
        } else {
            message
        });
        self.publish(&state);
    }

    fn heartbeat_tick(&self, generation: u64) -> TickOutcome {
        let mut state = self.lock();
        if !state.is_live(generation) {
            return TickOutcome::Stop;
        }

        let elapsed = state.last_activity_at.elapsed();
        if elapsed > self.config.timeout_after {
            tracing::warn!(
                generation,
                run_id = state.run.run_id.as_deref().unwrap_or(""),
                elapsed_ms = elapsed.as_millis() as u64,
                "agent run timed out"
            );
            state.fail(RUN_TIMEOUT_MESSAGE);
            self.publish(&state);
            return TickOutcome::Stop;
        }

        if elapsed > self.config.stall_warning_after
            && !state.run.steps.last().is_some_and(is_still_working_step)
        {
            state.run.steps.push(still_working_step());
            self.publish(&state);
        }
        TickOutcome::Continue
    }
}

/// Drives one agent run at a time through
/// `Idle -> Running -> AwaitingApproval -> Signing -> Confirmed`, with
/// `Rejected` and `Error` as the other terminal phases.
///
/// Every run is tagged with a generation. Starting a new run, resetting, or
/// dropping the orchestrator bumps the generation and tears down the stream
/// subscription and watchdog of the previous one, so late callbacks are
/// discarded.
pub struct RunOrchestrator {
    shared: Arc<Shared>,
}

impl RunOrchestrator {
    pub fn new(
        agent: Arc<dyn AgentRunApi>,
        transport: Arc<dyn StreamTransport>,
        signer: Arc<dyn TransactionSigner>,
        broadcaster: Arc<dyn Broadcaster>,
        config: RunOrchestratorConfig,
    ) -> Self {
        let (snapshots, _) = watch::channel(RunSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                agent,
                transport,
                signer,
                broadcaster,
                config,
                state: Mutex::new(OrchestratorState {
                    run: RunSnapshot::default(),
                    last_activity_at: Instant::now(),
                    stream: None,
                    heartbeat: None,
                }),
                snapshots,
            }),
        }
    }

    pub fn config(&self) -> &RunOrchestratorConfig {
        &self.shared.config
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.shared.snapshots.borrow().clone()
    }

    /// Receiver that observes every published transition.
    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Starts a run for `intent`, superseding any run in progress.
    ///
    /// Returns once the run is streaming or has failed to start; progress is
    /// observed through [`RunOrchestrator::subscribe`].
    pub async fn execute_intent(&self, intent: &str) {
        let shared = &self.shared;
        let Some(identity) = shared.signer.public_key() else {
            let mut state = shared.lock();
            state.advance_generation(RunPhase::Idle);
            state.fail(WALLET_NOT_CONNECTED_MESSAGE);
            shared.publish(&state);
            return;
        };

        let generation = {
            let mut state = shared.lock();
            let generation = state.advance_generation(RunPhase::Running);
            shared.publish(&state);
            generation
        };
        tracing::info!(generation, identity = %identity, "starting agent run");

        let started = shared.agent.start_run(intent, &identity.to_string()).await;

        let run_id = {
            let mut state = shared.lock();
            if state.run.generation != generation {
                tracing::debug!(generation, "agent run superseded before it started");
                return;
            }
            let response = match started {
                Ok(response) => response,
                Err(error) => {
                    tracing::warn!(generation, error = %error, "agent run failed to start");
                    state.fail(error.to_string());
                    shared.publish(&state);
                    return;
                }
            };

            state.run.steps = response.steps;
            if response.run_id.is_empty() {
                state.fail(START_FAILED_MESSAGE);
                shared.publish(&state);
                return;
            }
            state.run.run_id = Some(response.run_id.clone());
            state.last_activity_at = Instant::now();

            let watchdog: Weak<Shared> = Arc::downgrade(shared);
            state.heartbeat = Some(HeartbeatHandle::spawn(
                shared.config.heartbeat_interval,
                move || match watchdog.upgrade() {
                    Some(shared) => shared.heartbeat_tick(generation),
                    None => TickOutcome::Stop,
                },
            ));
            shared.publish(&state);
            response.run_id
        };

        let opened = shared
            .transport
            .open(&run_id, self.stream_handlers(generation));

        let mut state = shared.lock();
        match opened {
            Ok(subscription) => {
                if state.is_live(generation) {
                    tracing::debug!(
                        generation,
                        run_id = %run_id,
                        transport = shared.transport.kind().as_str(),
                        "agent stream opened"
                    );
                    state.stream = Some(subscription);
                } else {
                    subscription.close();
                }
            }
            Err(error) => {
                if state.is_live(generation) {
                    tracing::warn!(generation, error = %error, "agent stream could not be opened");
                    state.fail(error.to_string());
                    shared.publish(&state);
                }
            }
        }
    }

    fn stream_handlers(&self, generation: u64) -> StreamHandlers {
        let on_event_target = Arc::downgrade(&self.shared);
        let on_error_target = on_event_target.clone();
        StreamHandlers::new(
            move |event| {
                if let Some(shared) = on_event_target.upgrade() {
                    shared.handle_event(generation, event);
                }
            },
            move |error| {
                if let Some(shared) = on_error_target.upgrade() {
                    shared.handle_stream_error(generation, error);
                }
            },
        )
    }

    /// Signs and broadcasts the pending transaction of a run awaiting approval.
    ///
    /// Does nothing unless a transaction is pending and a wallet identity is
    /// connected. Failures are terminal for the run; nothing is retried.
    pub async fn approve_transaction(&self) {
        let Some((generation, encoded)) = self.begin_signing() else {
            return;
        };

        let outcome = match self.sign_pending(&encoded).await {
            Ok(signed) => {
                if self.shared.lock().run.generation != generation {
                    tracing::debug!(generation, "run superseded during signing; not broadcasting");
                    return;
                }
                tracing::info!(
                    generation,
                    configured_route = self.shared.broadcaster.route(),
                    "broadcasting signed transaction"
                );
                self.shared
                    .broadcaster
                    .broadcast(&signed)
                    .await
                    .map_err(ApprovalError::from)
            }
            Err(error) => Err(error),
        };

        let mut state = self.shared.lock();
        if state.run.generation != generation {
            return;
        }
        match outcome {
            Ok(signature) => {
                tracing::info!(generation, signature = %signature, "transaction confirmed");
                state.run.confirmed_signature = Some(signature);
                state.transition(RunPhase::Confirmed);
            }
            Err(error) => {
                tracing::warn!(generation, error = %error, "transaction approval failed");
                state.fail(error.to_string());
            }
        }
        self.shared.publish(&state);
    }

    fn begin_signing(&self) -> Option<(u64, String)> {
        let mut state = self.shared.lock();
        if state.run.phase != RunPhase::AwaitingApproval {
            tracing::debug!(phase = state.run.phase.as_str(), "no transaction awaiting approval");
            return None;
        }
        let encoded = state.run.pending_transaction()?.to_string();
        if self.shared.signer.public_key().is_none() {
            tracing::warn!("approval requested without a connected wallet");
            return None;
        }
        state.run.error = None;
        state.transition(RunPhase::Signing);
        self.shared.publish(&state);
        Some((state.run.generation, encoded))
    }

    async fn sign_pending(&self, encoded: &str) -> Result<Vec<u8>, ApprovalError> {
        let transaction = Transaction::from_base64(encoded).map_err(ApprovalError::Decode)?;
        let signed = self
            .shared
            .signer
            .sign_transaction(transaction, SigningContext::default())
            .await?;
        signed.to_bytes().map_err(ApprovalError::Encode)
    }

    /// Abandons the current run and returns to `Idle`.
    pub fn reset_run(&self) {
        let mut state = self.shared.lock();
        let generation = state.advance_generation(RunPhase::Idle);
        tracing::debug!(generation, "agent run reset");
        self.shared.publish(&state);
    }
}

impl Drop for RunOrchestrator {
    fn drop(&mut self) {
        self.reset_run();
    }
}

impl std::fmt::Debug for RunOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("RunOrchestrator")
            .field("generation", &snapshot.generation)
            .field("phase", &snapshot.phase)
            .finish_non_exhaustive()
    }
}
