//! Run scheduler: owns one run per invocation and drives its elements.
//!
//! Elements are visited in their stable order starting at the run's
//! `next_index`. Between elements the scheduler checks the control channel,
//! the invocation budget and the flush interval, and renews its lease, which
//! also takes any pause/stop request stored by another process. It never
//! stops mid-element. Losing the lease ends the invocation without writing.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, SendError, Sender};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::checkpoint::{Acquired, CheckpointManager};
use super::clock::Clock;
use super::processor::{ElementComputation, ElementProcessor};
use super::registry::{DuplicateRegistry, ReleaseOutcome};
use super::summary::RunSummary;
use super::types::{AnalysisRun, RunCommand, RunStatus};
use crate::config::AnalysisConfig;
use crate::elements::{BuildingElement, WallElement, prepare_elements};
use crate::error::{ElementComputationError, InputDataError, RunError};
use crate::store::PersistenceGateway;
use crate::weather::WeatherSeries;

/// Handle for sending pause/stop to a running scheduler.
#[derive(Debug, Clone)]
pub struct RunControl {
    tx: Sender<RunCommand>,
}

impl RunControl {
    /// # Errors
    ///
    /// Fails only if the scheduler was dropped.
    pub fn send(&self, command: RunCommand) -> Result<(), SendError<RunCommand>> {
        self.tx.send(command)
    }

    pub fn pause(&self) -> Result<(), SendError<RunCommand>> {
        self.send(RunCommand::Pause)
    }

    pub fn stop(&self) -> Result<(), SendError<RunCommand>> {
        self.send(RunCommand::Stop)
    }
}

/// Why an element produced no result.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Filtered out before computation.
    Ineligible(String),
    /// No daylight sample under the precision policy.
    ZeroSamples(String),
    /// Already claimed or finished; not counted again.
    AlreadyClaimed,
}

/// Outcome of one per-element step.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementOutcome {
    Processed,
    Skipped(SkipReason),
    Failed(ElementComputationError),
    /// The invocation budget ran out before the element was claimed.
    TimedOut,
}

/// Progress notification sent after each visited element.
#[derive(Debug)]
pub struct ProgressEvent<'a> {
    pub run_id: &'a str,
    pub element_id: &'a str,
    /// Zero-based position of the element in the run order.
    pub index: usize,
    pub elements_total: usize,
    pub elements_processed: usize,
    pub outcome: &'a ElementOutcome,
}

/// Receives per-element progress from the scheduler.
pub trait ProgressObserver {
    fn on_progress(&mut self, event: &ProgressEvent<'_>);
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&mut self, _event: &ProgressEvent<'_>) {}
}

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationOutcome {
    Completed,
    Paused { next_index: usize },
    Stopped { next_index: usize },
    /// Budget exhausted with work left; re-invoke to continue.
    TimedOut { next_index: usize },
}

/// Result of one [`RunScheduler::start`] or [`RunScheduler::resume`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationReport {
    pub run_id: String,
    pub outcome: InvocationOutcome,
    pub summary: RunSummary,
}

/// Validated inputs of a run.
///
/// The same inputs must be supplied on every invocation of a run since the
/// element order defines what `next_index` refers to.
#[derive(Debug, Clone)]
pub struct RunInputs {
    elements: Vec<BuildingElement>,
    walls: Vec<WallElement>,
    weather: WeatherSeries,
}

impl RunInputs {
    /// De-duplicates and orders the elements.
    ///
    /// # Errors
    ///
    /// Returns [`InputDataError`] for an empty or invalid element list.
    pub fn new(
        elements: Vec<BuildingElement>,
        walls: Vec<WallElement>,
        weather: WeatherSeries,
    ) -> Result<Self, InputDataError> {
        Ok(Self {
            elements: prepare_elements(elements)?,
            walls,
            weather,
        })
    }

    pub fn elements(&self) -> &[BuildingElement] {
        &self.elements
    }

    pub fn walls(&self) -> &[WallElement] {
        &self.walls
    }

    pub fn weather(&self) -> &WeatherSeries {
        &self.weather
    }
}

/// Budget bookkeeping for one invocation.
struct Budget {
    started: DateTime<Utc>,
    extended: bool,
}

/// Drives runs to completion, one invocation at a time.
pub struct RunScheduler {
    config: AnalysisConfig,
    gateway: Arc<dyn PersistenceGateway>,
    clock: Arc<dyn Clock>,
    checkpoints: CheckpointManager,
    tx: Sender<RunCommand>,
    rx: Receiver<RunCommand>,
}

impl RunScheduler {
    pub fn new(config: AnalysisConfig, gateway: Arc<dyn PersistenceGateway>, clock: Arc<dyn Clock>) -> Self {
        let checkpoints = CheckpointManager::new(gateway.clone(), clock.clone(), &config.run);
        let (tx, rx) = mpsc::channel();
        Self {
            config,
            gateway,
            clock,
            checkpoints,
            tx,
            rx,
        }
    }

    /// A control handle for this scheduler.
    pub fn control(&self) -> RunControl {
        RunControl { tx: self.tx.clone() }
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Starts a new run, or continues `run_id` if it already exists.
    ///
    /// Without `run_id` a fresh UUID is assigned.
    ///
    /// # Errors
    ///
    /// See [`RunScheduler::resume`].
    pub fn start(
        &self,
        run_id: Option<&str>,
        inputs: &RunInputs,
        observer: &mut dyn ProgressObserver,
    ) -> Result<InvocationReport, RunError> {
        let run_id = run_id.map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        let retry = self.checkpoints.retry();
        let existing = retry.run("load_run", || self.gateway.load_run(&run_id))?;
        if existing.is_none() {
            self.checkpoints.create(&run_id, inputs.elements.len())?;
        }
        self.resume(&run_id, inputs, observer)
    }

    /// Continues an existing run from its checkpoint.
    ///
    /// # Errors
    ///
    /// - [`RunError::UnknownRun`] if the run does not exist
    /// - [`RunError::RunLocked`] while another invocation holds the lease
    /// - [`RunError::Terminal`] for Stopped or Failed runs
    /// - [`RunError::LeaseLost`] if another invocation took the run over
    ///   while this one was running; progress since its last flush is
    ///   redone by the new holder
    /// - [`RunError::Persistence`] after the run was marked Failed
    pub fn resume(
        &self,
        run_id: &str,
        inputs: &RunInputs,
        observer: &mut dyn ProgressObserver,
    ) -> Result<InvocationReport, RunError> {
        let holder = Uuid::new_v4().to_string();
        let (mut run, retried_failed) =
            match self.checkpoints.acquire(run_id, &holder, self.config.analysis.retry_failed)? {
                Acquired::AlreadyCompleted(run) => return self.report(&run, InvocationOutcome::Completed),
                Acquired::Ready { run, retried_failed, .. } => (run, retried_failed),
            };

        if run.elements_total != inputs.elements.len() {
            warn!(
                run_id,
                recorded = run.elements_total,
                supplied = inputs.elements.len(),
                "element count differs from the run record"
            );
        }
        while self.rx.try_recv().is_ok() {}

        let start = if retried_failed > 0 { 0 } else { run.next_index };
        match self.drive(&mut run, &holder, start, inputs, observer) {
            Ok(outcome) => self.report(&run, outcome),
            Err(e @ RunError::Persistence { .. }) => {
                error!(run_id, error = %e, "persistence failed, run marked failed");
                self.checkpoints.mark_failed(&run, &holder, &e.to_string());
                Err(e)
            }
            Err(e @ RunError::LeaseLost { .. }) => {
                warn!(run_id, holder, next_index = run.next_index, "execution lease lost, invocation abandoned");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn drive(
        &self,
        run: &mut AnalysisRun,
        holder: &str,
        start: usize,
        inputs: &RunInputs,
        observer: &mut dyn ProgressObserver,
    ) -> Result<InvocationOutcome, RunError> {
        let processor = ElementProcessor::new(&self.config, &inputs.weather, &inputs.elements, inputs.walls.clone());
        let mut registry =
            DuplicateRegistry::load(&run.run_id, holder, self.gateway.clone(), self.checkpoints.retry())?;
        let total = inputs.elements.len();
        let flush_interval = self.config.analysis.flush_interval.max(1);
        let mut budget = Budget {
            started: self.clock.now(),
            extended: false,
        };

        info!(
            run_id = %run.run_id,
            start,
            elements_total = total,
            precision = %processor.lookup().precision(),
            sampled_timesteps = processor.lookup().sampled_count(),
            daylight_samples = processor.lookup().daylight_count(),
            full_timesteps = processor.lookup().full_timestep_count(),
            "invocation started"
        );

        let mut index = start.min(total);
        if let Some(command) = self.checkpoints.renew(run)? {
            return self.honor(command, run, &mut registry, index);
        }
        while index < total {
            if let Ok(command) = self.rx.try_recv() {
                return self.honor(command, run, &mut registry, index);
            }

            let element = &inputs.elements[index];
            let outcome = self.step(element, total - index, &processor, &mut registry, run, &mut budget)?;
            if outcome == ElementOutcome::TimedOut {
                run.next_index = index;
                run.lease = None;
                run.last_heartbeat = self.clock.now();
                registry.flush(run)?;
                info!(run_id = %run.run_id, next_index = index, "invocation budget used, progress saved");
                return Ok(InvocationOutcome::TimedOut { next_index: index });
            }

            run.next_index = index + 1;
            observer.on_progress(&ProgressEvent {
                run_id: &run.run_id,
                element_id: &element.element_id,
                index,
                elements_total: total,
                elements_processed: run.elements_processed,
                outcome: &outcome,
            });
            index += 1;

            if registry.pending_len() >= flush_interval {
                registry.flush(run)?;
            }
            if index < total {
                if let Some(command) = self.checkpoints.renew(run)? {
                    return self.honor(command, run, &mut registry, index);
                }
            }
        }

        self.checkpoints.transition(run, RunStatus::Completed, None)?;
        run.next_index = total;
        run.lease = None;
        run.last_heartbeat = self.clock.now();
        registry.flush(run)?;
        info!(run_id = %run.run_id, elements_processed = run.elements_processed, "run completed");
        Ok(InvocationOutcome::Completed)
    }

    /// Processes one element.
    ///
    /// Element-level failures are returned as [`ElementOutcome::Failed`];
    /// only persistence problems surface as `Err`.
    fn step(
        &self,
        element: &BuildingElement,
        remaining: usize,
        processor: &ElementProcessor,
        registry: &mut DuplicateRegistry,
        run: &mut AnalysisRun,
        budget: &mut Budget,
    ) -> Result<ElementOutcome, RunError> {
        if self.over_budget(run, remaining, budget) {
            return Ok(ElementOutcome::TimedOut);
        }

        let id = element.element_id.as_str();
        if registry.status(id).is_terminal() || !registry.claim(id)? {
            debug!(run_id = %run.run_id, element_id = id, "already claimed, skipped");
            return Ok(ElementOutcome::Skipped(SkipReason::AlreadyClaimed));
        }

        let outcome = match processor.eligibility(element) {
            Err(reason) => {
                debug!(run_id = %run.run_id, element_id = id, %reason, "excluded");
                registry.release(id, ReleaseOutcome::Skipped(reason.clone()));
                ElementOutcome::Skipped(SkipReason::Ineligible(reason))
            }
            Ok(()) => match processor.compute(element) {
                Ok(ElementComputation::Result(result)) => {
                    debug!(
                        run_id = %run.run_id,
                        element_id = id,
                        annual_kwh_m2 = result.annual_irradiation_kwh_m2,
                        "element processed"
                    );
                    registry.release(id, ReleaseOutcome::Completed(result));
                    ElementOutcome::Processed
                }
                Ok(ElementComputation::ZeroSamples(reason)) => {
                    info!(run_id = %run.run_id, element_id = id, %reason, "excluded with zero samples");
                    registry.release(id, ReleaseOutcome::Skipped(reason.clone()));
                    ElementOutcome::Skipped(SkipReason::ZeroSamples(reason))
                }
                Err(err) => {
                    warn!(run_id = %run.run_id, element_id = id, error = %err, "element failed");
                    registry.release(id, ReleaseOutcome::Failed(err.to_string()));
                    ElementOutcome::Failed(err)
                }
            },
        };

        run.elements_processed += 1;
        Ok(outcome)
    }

    /// Whether the invocation must save and return before the next element.
    ///
    /// A small remainder gets one extension past the budget; the lease
    /// ceiling always wins.
    fn over_budget(&self, run: &AnalysisRun, remaining: usize, budget: &mut Budget) -> bool {
        let now = self.clock.now();
        if self.checkpoints.ceiling_exceeded(run, now) {
            warn!(run_id = %run.run_id, remaining, "wall-clock ceiling reached");
            return true;
        }
        if budget.extended || now - budget.started <= self.config.run.invocation_budget() {
            return false;
        }
        if remaining < self.config.run.small_remainder_threshold {
            info!(run_id = %run.run_id, remaining, "budget exceeded with small remainder, continuing");
            budget.extended = true;
            return false;
        }
        true
    }

    fn honor(
        &self,
        command: RunCommand,
        run: &mut AnalysisRun,
        registry: &mut DuplicateRegistry,
        index: usize,
    ) -> Result<InvocationOutcome, RunError> {
        let (status, outcome) = match command {
            RunCommand::Pause => (RunStatus::Paused, InvocationOutcome::Paused { next_index: index }),
            RunCommand::Stop => (RunStatus::Stopped, InvocationOutcome::Stopped { next_index: index }),
        };
        self.checkpoints
            .transition(run, status, Some(format!("{command} requested")))?;
        run.next_index = index;
        run.lease = None;
        run.last_heartbeat = self.clock.now();
        registry.flush(run)?;
        info!(run_id = %run.run_id, %status, next_index = index, "run control honored");
        Ok(outcome)
    }

    fn report(&self, run: &AnalysisRun, outcome: InvocationOutcome) -> Result<InvocationReport, RunError> {
        let summary = self
            .checkpoints
            .retry()
            .run("load_summary", || RunSummary::load(self.gateway.as_ref(), run))?;
        Ok(InvocationReport {
            run_id: run.run_id.clone(),
            outcome,
            summary,
        })
    }
}
