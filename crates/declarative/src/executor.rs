//! Execution engine - applies a plan with bounded parallelism
//!
//! Each change becomes one or two steps: a delete (destroy, or the first half
//! of a replace) and a create or update. A step starts only after the steps
//! it waits on have succeeded:
//!
//! - the delete of X waits for the deletes of everything recorded as
//!   depending on X, and for in-place updates that drop their reference to X
//! - a create or update waits for the creates and updates of its declared
//!   dependencies
//! - the create half of a replace waits for its own delete
//! - creates of a kind with remote-unique attributes wait for deletes of
//!   other objects of that kind
//!
//! Provider calls run on a rayon pool. The calling thread coordinates: it
//! launches ready steps, receives outcomes over a channel and is the only
//! writer of state, so every confirmed call is recorded before anything that
//! depends on it starts.

use crate::context::{AutoConfirm, ConfirmCallback, NoProgress, ProgressCallback};
use crate::error::{Error, Result};
use crate::expr::{Planned, Reference};
use crate::graph::Graph;
use crate::planner::{Change, ExecutionPlan};
use crate::state::{OutputValue, PendingEntry, StateRecord, StateStore};
use crate::types::{Action, Address, ApplyResult, ChangeOp, ExecuteOptions, ExecuteSummary};
use cloudkit::{Attributes, CloudApi, LogCallback, RemoteObject, RetryConfig, with_retry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::time::Instant;

/// A resource that could not be applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub address: Address,
    pub action: Action,
    /// Error kind, e.g. `provider_terminal`
    pub kind: String,
    pub message: String,
}

/// A finished provider step, in completion order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEvent {
    pub address: Address,
    pub action: Action,
    pub success: bool,
}

/// Outcome of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    /// Result per planned resource, in plan order
    pub results: Vec<(Address, ApplyResult)>,
    /// Provider steps in the order they completed
    pub timeline: Vec<StepEvent>,
    pub summary: ExecuteSummary,
    pub failures: Vec<Failure>,
    /// The run stopped issuing calls because its deadline passed
    pub timed_out: bool,
}

impl ApplyReport {
    /// Every planned change was applied
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.timed_out && self.summary.is_success()
    }

    pub fn result(&self, address: &Address) -> Option<&ApplyResult> {
        self.results
            .iter()
            .find(|(a, _)| a == address)
            .map(|(_, r)| r)
    }
}

struct Step {
    change: usize,
    action: Action,
    waits_on: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
enum StepState {
    Waiting,
    Running,
    Done { id: Option<String> },
    Failed(String),
    Skipped(String),
}

enum Job {
    Create {
        address: Address,
        attributes: Attributes,
    },
    Update {
        address: Address,
        id: String,
        attributes: Attributes,
    },
    Delete {
        address: Address,
        id: String,
    },
}

enum Outcome {
    Created(RemoteObject),
    Updated(RemoteObject),
    Deleted { already_gone: bool },
    Failed(cloudkit::Error),
    Panicked(String),
}

/// Execute a plan with the given options and callbacks
///
/// # Arguments
/// * `plan` - The execution plan to run
/// * `graph` - The graph the plan was built from; create and update steps
///   resolve their attributes from it
/// * `store` - Locked state, updated after every confirmed provider call
/// * `api` - Provider API
/// * `opts` - Execution options (jobs, retry, timeout)
/// * `progress` - Progress callback
/// * `confirm` - Confirmation callback, asked once if the plan has changes
///
/// # Returns
/// Per-resource results. Provider failures are reported there; only state
/// I/O problems and internal errors are returned as `Err`.
pub fn execute<P, C>(
    plan: &ExecutionPlan,
    graph: &Graph,
    store: &mut StateStore,
    api: &dyn CloudApi,
    opts: &ExecuteOptions,
    progress: &mut P,
    confirm: &mut C,
) -> Result<ApplyReport>
where
    P: ProgressCallback,
    C: ConfirmCallback,
{
    let steps = build_steps(plan);
    let mut report = ApplyReport::default();

    if steps.is_empty() {
        for change in &plan.changes {
            report.summary.add_result(&ApplyResult::NoChange);
            report
                .results
                .push((change.address.clone(), ApplyResult::NoChange));
        }
        store_outputs(graph, store)?;
        return Ok(report);
    }

    let prompt = format!("Apply {}?", plan.summary());
    if !confirm.confirm(&prompt)? {
        log::info!("Run not confirmed, nothing applied");
        for change in &plan.changes {
            let result = if change.op.is_change() {
                ApplyResult::Skipped {
                    reason: "not confirmed".to_string(),
                }
            } else {
                ApplyResult::NoChange
            };
            report.summary.add_result(&result);
            report.results.push((change.address.clone(), result));
        }
        return Ok(report);
    }

    progress.on_run_start(steps.len());
    let run = Run {
        plan,
        graph,
        steps: &steps,
        api,
        retry: &opts.retry,
        jobs: opts.jobs.max(1),
        deadline: opts.timeout.map(|t| Instant::now() + t),
    };
    let outcome = run.drive(store, progress)?;

    report.timeline = outcome.timeline;
    report.timed_out = outcome.timed_out;
    report.failures = outcome.failures;

    for (index, change) in plan.changes.iter().enumerate() {
        let result = change_result(change, index, &steps, &outcome.states);
        report.summary.add_result(&result);
        report.results.push((change.address.clone(), result));
    }

    if report.is_success() {
        store_outputs(graph, store)?;
    }
    progress.on_run_complete(&report.summary);

    log::info!(
        "Run finished: {} changed, {} failed, {} skipped",
        report.summary.total_changes(),
        report.summary.failed,
        report.summary.skipped
    );
    Ok(report)
}

/// Simple execution without callbacks
///
/// For basic use cases where you don't need progress or confirmation.
pub fn execute_simple(
    plan: &ExecutionPlan,
    graph: &Graph,
    store: &mut StateStore,
    api: &dyn CloudApi,
    opts: &ExecuteOptions,
) -> Result<ApplyReport> {
    execute(plan, graph, store, api, opts, &mut NoProgress, &mut AutoConfirm)
}

fn build_steps(plan: &ExecutionPlan) -> Vec<Step> {
    let mut steps = Vec::new();
    let mut delete_of: BTreeMap<&Address, usize> = BTreeMap::new();
    let mut build_of: BTreeMap<&Address, usize> = BTreeMap::new();

    for (index, change) in plan.changes.iter().enumerate() {
        if change.destroys() {
            delete_of.insert(&change.address, steps.len());
            steps.push(Step {
                change: index,
                action: Action::Delete,
                waits_on: Vec::new(),
            });
        }
    }

    for (index, change) in plan.changes.iter().enumerate() {
        if change.builds() {
            let action = if change.op == ChangeOp::Update {
                Action::Update
            } else {
                Action::Create
            };
            let waits_on = match delete_of.get(&change.address) {
                Some(&own_delete) => vec![own_delete],
                None => Vec::new(),
            };
            build_of.insert(&change.address, steps.len());
            steps.push(Step {
                change: index,
                action,
                waits_on,
            });
        }
    }

    // Deletes wait for the deletes of their recorded dependents
    for change in plan.changes.iter().filter(|c| c.destroys()) {
        let Some(&dependent) = delete_of.get(&change.address) else {
            continue;
        };
        for dep in &change.prior_dependencies {
            if let Some(&step) = delete_of.get(dep) {
                steps[step].waits_on.push(dependent);
            }
        }
    }

    // Builds wait for the builds of their declared dependencies
    for change in plan.changes.iter().filter(|c| c.builds()) {
        let Some(&step) = build_of.get(&change.address) else {
            continue;
        };
        for dep in &change.dependencies {
            if let Some(&dep_step) = build_of.get(dep) {
                steps[step].waits_on.push(dep_step);
            }
        }
    }

    // Deletes wait for in-place updates that move a reference off them
    for change in plan.changes.iter().filter(|c| c.op == ChangeOp::Update) {
        let Some(&update) = build_of.get(&change.address) else {
            continue;
        };
        for dep in &change.prior_dependencies {
            if change.dependencies.contains(dep) {
                continue;
            }
            if let Some(&delete) = delete_of.get(dep) {
                wait_unless_cycle(&mut steps, delete, update);
            }
        }
    }

    // A new object may claim remote-unique values a deleted one of its kind
    // still holds, so creates of such kinds go after those deletes
    for change in plan.changes.iter().filter(|c| c.builds() && c.op != ChangeOp::Update) {
        if change.address.kind.schema().unique.is_empty() {
            continue;
        }
        let Some(&create) = build_of.get(&change.address) else {
            continue;
        };
        for (&gone, &delete) in &delete_of {
            if gone != &change.address && gone.kind == change.address.kind {
                wait_unless_cycle(&mut steps, create, delete);
            }
        }
    }

    steps
}

/// Make `waiter` wait on `on` unless `on` already waits on `waiter`
fn wait_unless_cycle(steps: &mut [Step], waiter: usize, on: usize) {
    let mut seen = vec![false; steps.len()];
    let mut stack = vec![on];
    while let Some(index) = stack.pop() {
        if index == waiter {
            log::debug!("Not ordering step {waiter} after step {on}: they already wait on each other");
            return;
        }
        if std::mem::replace(&mut seen[index], true) {
            continue;
        }
        stack.extend(&steps[index].waits_on);
    }
    if !steps[waiter].waits_on.contains(&on) {
        steps[waiter].waits_on.push(on);
    }
}

struct Run<'a> {
    plan: &'a ExecutionPlan,
    graph: &'a Graph,
    steps: &'a [Step],
    api: &'a dyn CloudApi,
    retry: &'a RetryConfig,
    jobs: usize,
    deadline: Option<Instant>,
}

struct RunOutcome {
    states: Vec<StepState>,
    timeline: Vec<StepEvent>,
    failures: Vec<Failure>,
    timed_out: bool,
}

impl Run<'_> {
    fn drive<P: ProgressCallback>(&self, store: &mut StateStore, progress: &mut P) -> Result<RunOutcome> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .thread_name(|i| format!("stratum-apply-{i}"))
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;

        let count = self.steps.len();
        let mut states = vec![StepState::Waiting; count];
        let mut pending_deps: Vec<usize> = self.steps.iter().map(|s| s.waits_on.len()).collect();
        let mut unblocks: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (index, step) in self.steps.iter().enumerate() {
            for &dep in &step.waits_on {
                unblocks[dep].push(index);
            }
        }
        let mut ready: VecDeque<usize> = (0..count).filter(|&i| pending_deps[i] == 0).collect();

        let mut timeline = Vec::new();
        let mut failures = Vec::new();
        let mut timed_out = false;
        let mut halted = false;
        let mut fatal: Option<Error> = None;

        let (tx, rx) = mpsc::channel::<(usize, Outcome)>();
        let api = self.api;
        let retry = self.retry;

        pool.in_place_scope(|scope| {
            let mut in_flight = 0usize;
            loop {
                while !halted && in_flight < self.jobs {
                    let Some(index) = ready.pop_front() else {
                        break;
                    };
                    if self.deadline.is_some_and(|d| Instant::now() >= d) {
                        log::warn!("Run timed out; not starting further changes");
                        timed_out = true;
                        halted = true;
                        ready.push_front(index);
                        break;
                    }

                    let step = &self.steps[index];
                    let change = &self.plan.changes[step.change];
                    let job = match self.prepare(step, change, store) {
                        Ok(job) => job,
                        Err(e) => {
                            log::error!("{}: {}", change.address, e);
                            failures.push(Failure {
                                address: change.address.clone(),
                                action: step.action,
                                kind: e.kind().to_string(),
                                message: e.to_string(),
                            });
                            states[index] = StepState::Failed(e.to_string());
                            halted = true;
                            if matches!(e, Error::Io(_) | Error::Json(_)) {
                                fatal = Some(e);
                            }
                            break;
                        }
                    };

                    log::info!("{} {}", step.action, change.address);
                    progress.on_resource_start(&change.address, step.action);
                    states[index] = StepState::Running;
                    in_flight += 1;

                    let tx = tx.clone();
                    scope.spawn(move |_| {
                        let outcome = catch_unwind(AssertUnwindSafe(|| run_job(api, retry, &job)))
                            .unwrap_or_else(|panic| Outcome::Panicked(panic_message(&*panic)));
                        // The coordinator waits for every launched step
                        let _ = tx.send((index, outcome));
                    });
                }

                if in_flight == 0 {
                    break;
                }
                let Ok((index, outcome)) = rx.recv() else {
                    break;
                };
                in_flight -= 1;

                let step = &self.steps[index];
                let change = &self.plan.changes[step.change];
                match self.settle(step, change, outcome, store) {
                    Ok(id) => {
                        let result = step_result(step, change, id.as_deref());
                        progress.on_resource_complete(&change.address, step.action, &result);
                        states[index] = StepState::Done { id };
                        timeline.push(StepEvent {
                            address: change.address.clone(),
                            action: step.action,
                            success: true,
                        });
                        for &next in &unblocks[index] {
                            pending_deps[next] -= 1;
                            if pending_deps[next] == 0 {
                                ready.push_back(next);
                            }
                        }
                    }
                    Err(e) => {
                        log::error!("{} {} failed: {}", step.action, change.address, e);
                        let result = ApplyResult::Failed {
                            error: e.to_string(),
                        };
                        progress.on_resource_complete(&change.address, step.action, &result);
                        failures.push(Failure {
                            address: change.address.clone(),
                            action: step.action,
                            kind: e.kind().to_string(),
                            message: e.to_string(),
                        });
                        states[index] = StepState::Failed(e.to_string());
                        timeline.push(StepEvent {
                            address: change.address.clone(),
                            action: step.action,
                            success: false,
                        });
                        halted = true;
                        if matches!(e, Error::Io(_) | Error::Json(_)) && fatal.is_none() {
                            fatal = Some(e);
                        }
                    }
                }
            }
        });

        if let Some(e) = fatal {
            return Err(e);
        }

        let reason = if timed_out {
            "run timed out before this change started".to_string()
        } else {
            match failures.first() {
                Some(f) => format!("not attempted because {} failed", f.address),
                None => "not attempted".to_string(),
            }
        };
        for state in &mut states {
            if *state == StepState::Waiting {
                *state = StepState::Skipped(reason.clone());
            }
        }

        Ok(RunOutcome {
            states,
            timeline,
            failures,
            timed_out,
        })
    }

    /// Resolve what a step sends to the provider and note pending creates
    fn prepare(&self, step: &Step, change: &Change, store: &mut StateStore) -> Result<Job> {
        let address = change.address.clone();
        match step.action {
            Action::Delete => {
                let id = store
                    .get(&address)
                    .map(|r| r.remote_id.clone())
                    .or_else(|| change.remote_id.clone())
                    .ok_or_else(|| Error::InvalidResource {
                        address: address.to_string(),
                        message: "no remote id recorded".to_string(),
                    })?;
                Ok(Job::Delete { address, id })
            }
            Action::Create | Action::Update => {
                let attributes = self.resolve_attributes(&address, store)?;
                if step.action == Action::Create {
                    store.begin(PendingEntry::new(
                        address.clone(),
                        Action::Create,
                        change.dependencies.clone(),
                    ))?;
                    Ok(Job::Create {
                        address,
                        attributes,
                    })
                } else {
                    let id = store
                        .get(&address)
                        .map(|r| r.remote_id.clone())
                        .ok_or_else(|| Error::InvalidResource {
                            address: address.to_string(),
                            message: "no longer in state".to_string(),
                        })?;
                    Ok(Job::Update {
                        address,
                        id,
                        attributes,
                    })
                }
            }
        }
    }

    fn resolve_attributes(&self, address: &Address, store: &StateStore) -> Result<Attributes> {
        let node = self
            .graph
            .node(address)
            .ok_or_else(|| Error::InvalidResource {
                address: address.to_string(),
                message: "not declared".to_string(),
            })?;

        let resolve = |reference: &Reference| match reference {
            Reference::Attribute { address, attribute } => store
                .get(address)
                .map_or(Planned::Unknown, |r| Planned::Known(r.value(attribute))),
            Reference::Variable(_) => Planned::Unknown,
        };

        let mut attributes = Attributes::new();
        for (name, expr) in &node.attributes {
            match expr.eval(&resolve) {
                Planned::Known(value) => {
                    attributes.insert(name.clone(), value);
                }
                Planned::Unknown => {
                    let missing = expr
                        .references()
                        .iter()
                        .find(|r| r.address().is_some_and(|a| store.get(a).is_none()))
                        .map_or_else(|| expr.to_string(), ToString::to_string);
                    return Err(Error::UnresolvedReference {
                        from: format!("{address}.{name}"),
                        reference: missing,
                    });
                }
            }
        }
        Ok(attributes)
    }

    /// Record a finished call. Returns the remote id for creates.
    fn settle(
        &self,
        step: &Step,
        change: &Change,
        outcome: Outcome,
        store: &mut StateStore,
    ) -> Result<Option<String>> {
        let address = &change.address;
        match outcome {
            Outcome::Created(object) | Outcome::Updated(object) => {
                let id = object.id.clone();
                store.record(StateRecord::from_remote(
                    address.clone(),
                    &object,
                    change.dependencies.clone(),
                ))?;
                Ok(Some(id))
            }
            Outcome::Deleted { already_gone } => {
                if already_gone {
                    log::info!("{address} was already gone");
                }
                store.remove(address)?;
                Ok(None)
            }
            Outcome::Failed(source) => {
                // A create that failed for good never reached the provider;
                // anything else is left for refresh to reconcile
                if step.action == Action::Create && !source.is_retryable() {
                    store.clear_pending(address)?;
                }
                Err(Error::Provider {
                    address: address.to_string(),
                    source,
                })
            }
            Outcome::Panicked(message) => Err(Error::WorkerPool(format!(
                "{} {address} panicked: {message}",
                step.action
            ))),
        }
    }
}

fn run_job(api: &dyn CloudApi, retry: &RetryConfig, job: &Job) -> Outcome {
    match job {
        Job::Create {
            address,
            attributes,
        } => {
            let label = format!("create {address}");
            let callback = LogCallback { label: &label };
            match with_retry(retry, Some(&callback), || {
                api.create(address.kind, &address.to_string(), attributes)
            }) {
                Ok(object) => Outcome::Created(object),
                Err(e) => Outcome::Failed(e),
            }
        }
        Job::Update {
            address,
            id,
            attributes,
        } => {
            let label = format!("update {address}");
            let callback = LogCallback { label: &label };
            match with_retry(retry, Some(&callback), || {
                api.update(address.kind, id, attributes)
            }) {
                Ok(object) => Outcome::Updated(object),
                Err(e) => Outcome::Failed(e),
            }
        }
        Job::Delete { address, id } => {
            let label = format!("delete {address}");
            let callback = LogCallback { label: &label };

            // Recorded ids may be stale; check before deleting
            match with_retry(retry, Some(&callback), || api.read(address.kind, id)) {
                Ok(None) => return Outcome::Deleted { already_gone: true },
                Ok(Some(_)) => {}
                Err(e) => return Outcome::Failed(e),
            }
            match with_retry(retry, Some(&callback), || api.delete(address.kind, id)) {
                Ok(()) => Outcome::Deleted {
                    already_gone: false,
                },
                Err(cloudkit::Error::NotFound { .. }) => Outcome::Deleted { already_gone: true },
                Err(e) => Outcome::Failed(e),
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn step_result(step: &Step, change: &Change, id: Option<&str>) -> ApplyResult {
    match (step.action, change.op) {
        (Action::Delete, _) => ApplyResult::Destroyed,
        (Action::Update, _) => ApplyResult::Updated,
        (Action::Create, ChangeOp::Replace) => ApplyResult::Replaced {
            id: id.unwrap_or_default().to_string(),
        },
        (Action::Create, _) => ApplyResult::Created {
            id: id.unwrap_or_default().to_string(),
        },
    }
}

fn change_result(change: &Change, index: usize, steps: &[Step], states: &[StepState]) -> ApplyResult {
    if !change.op.is_change() {
        return ApplyResult::NoChange;
    }

    let mut result = ApplyResult::NoChange;
    for (step, state) in steps.iter().zip(states).filter(|(s, _)| s.change == index) {
        result = match state {
            StepState::Failed(error) => {
                return ApplyResult::Failed {
                    error: error.clone(),
                };
            }
            StepState::Skipped(reason) => {
                let reason = if result == ApplyResult::Destroyed {
                    format!("destroyed but not recreated: {reason}")
                } else {
                    reason.clone()
                };
                return ApplyResult::Skipped { reason };
            }
            StepState::Done { id } => step_result(step, change, id.as_deref()),
            StepState::Waiting | StepState::Running => ApplyResult::Skipped {
                reason: "not attempted".to_string(),
            },
        };
    }
    result
}

/// Evaluate declared outputs against state and store them
fn store_outputs(graph: &Graph, store: &mut StateStore) -> Result<()> {
    let mut outputs = BTreeMap::new();
    for (name, output) in graph.outputs() {
        let value = output.expr.eval(&|reference: &Reference| match reference {
            Reference::Attribute { address, attribute } => store
                .get(address)
                .map_or(Planned::Unknown, |r| Planned::Known(r.value(attribute))),
            Reference::Variable(_) => Planned::Unknown,
        });
        match value {
            Planned::Known(value) => {
                outputs.insert(
                    name.clone(),
                    OutputValue {
                        value,
                        sensitive: output.sensitive,
                        description: output.description.clone(),
                    },
                );
            }
            Planned::Unknown => log::warn!("Output '{name}' is not known yet"),
        }
    }

    if outputs != store.state().outputs {
        store.set_outputs(outputs)?;
    }
    Ok(())
}
