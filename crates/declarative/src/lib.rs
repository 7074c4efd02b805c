//! # Declarative
//!
//! Declarative resource graphs: parse declarations, plan them against stored
//! state and converge the provider to match.
//!
//! ## Core Concepts
//!
//! - **Declarations**: TOML files declaring resources, variables and outputs
//! - **Graph**: Validated resources and the dependency edges their references imply
//! - **State**: The last known remote identity and attributes of every managed resource
//! - **ExecutionPlan**: Ordered create/update/replace/destroy changes
//! - **Executor**: Applies a plan with bounded parallelism, recording state as it goes
//!
//! ## Example
//!
//! ```ignore
//! use cloudkit::Sandbox;
//! use declarative::{
//!     Declarations, ExecuteOptions, Graph, PlanOptions, StateStore, execute_simple, plan, refresh,
//! };
//! use std::collections::BTreeMap;
//! use std::path::Path;
//!
//! let decls = Declarations::load_dir(Path::new("infra"))?;
//! let vars = decls.variable_values(&BTreeMap::new())?;
//! let graph = Graph::build(&decls, &vars)?;
//!
//! let api = Sandbox::open(Path::new("sandbox.json"))?;
//! let opts = ExecuteOptions::default();
//! let mut store = StateStore::open(Path::new("stratum.state.json"))?;
//! refresh(&mut store, &api, &opts.retry, opts.jobs)?;
//!
//! let plan = plan(&graph, store.state(), &PlanOptions::default())?;
//! println!("{}", plan.summary());
//! let report = execute_simple(&plan, &graph, &mut store, &api, &opts)?;
//! ```
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`cloudkit::CloudApi`]: The provider the graph is applied to
//! - [`ProgressCallback`]: Receives progress updates
//! - [`ConfirmCallback`]: Handles user confirmations
//!
//! This allows the crate to be used without hard dependencies on
//! a specific provider or terminal UI.

pub mod context;
pub mod declaration;
pub mod diff;
pub mod error;
pub mod executor;
pub mod expr;
pub mod graph;
pub mod planner;
pub mod refresh;
pub mod state;
pub mod types;

// Re-export main types at crate root
pub use context::{AutoConfirm, AutoDecline, ConfirmCallback, NoProgress, ProgressCallback};
pub use declaration::{Declarations, OutputBlock, ResourceBlock, VariableBlock, VariableType};
pub use diff::{AttributeDiff, PlanSummary};
pub use error::{Error, Result};
pub use executor::{ApplyReport, Failure, StepEvent, execute, execute_simple};
pub use expr::{Expr, Planned, Reference};
pub use graph::{Graph, Output, ResourceNode};
pub use planner::{Change, ExecutionPlan, PlanMode, PlanOptions, plan};
pub use refresh::{Drift, DriftReport, refresh};
pub use state::{DEFAULT_STATE_FILE, OutputValue, State, StateRecord, StateStore};
pub use types::{Action, Address, ApplyResult, ChangeOp, ExecuteOptions, ExecuteSummary};
