pub mod apply;
pub mod output;
pub mod plan;
pub mod state;
pub mod validate;

use crate::Context;
use crate::config::Settings;
use anyhow::{Context as AnyhowContext, Result};
use cloudkit::Sandbox;
use declarative::{
    Address, Declarations, DriftReport, ExecuteOptions, ExecutionPlan, Graph, PlanMode,
    PlanOptions, StateStore,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Everything a command needs to reach declarations, state and the provider
pub struct Session {
    pub dir: PathBuf,
    pub state_path: PathBuf,
    pub sandbox_path: PathBuf,
    pub options: ExecuteOptions,
    pub refresh: bool,
}

impl Session {
    /// Resolve settings, with command-line flags taking precedence
    pub fn load(ctx: &Context) -> Result<Self> {
        let (settings, source) = Settings::load(&ctx.dir)?;
        if let Some(source) = source {
            log::info!("Using settings from {}", source.display());
        }

        let state_path = match &ctx.state {
            Some(path) => path.clone(),
            None => settings.state_path(&ctx.dir),
        };
        let options = ExecuteOptions {
            jobs: ctx.jobs.unwrap_or(settings.engine.jobs).max(1),
            retry: settings.retry.to_config(),
            timeout: ctx
                .timeout
                .or(settings.engine.timeout_secs)
                .map(Duration::from_secs),
        };

        Ok(Self {
            dir: ctx.dir.clone(),
            state_path,
            sandbox_path: settings.sandbox_path(&ctx.dir),
            options,
            refresh: ctx.refresh.unwrap_or(settings.engine.refresh),
        })
    }

    /// Parse the declarations and build the resource graph
    pub fn graph(&self, ctx: &Context) -> Result<Graph> {
        let decls = Declarations::load_dir(&self.dir)?;
        let overrides: BTreeMap<String, String> = ctx.vars.iter().cloned().collect();
        let vars = decls.variable_values(&overrides)?;
        Ok(Graph::build(&decls, &vars)?)
    }

    pub fn open_store(&self) -> Result<StateStore> {
        StateStore::open(&self.state_path)
            .with_context(|| format!("Could not open state {}", self.state_path.display()))
    }

    pub fn api(&self) -> Result<Sandbox> {
        Sandbox::open(&self.sandbox_path)
            .with_context(|| format!("Could not open sandbox {}", self.sandbox_path.display()))
    }

    /// Reconcile state with the provider unless refresh is disabled
    pub fn refresh(&self, store: &mut StateStore, api: &Sandbox) -> Result<DriftReport> {
        if !self.refresh {
            log::info!("Skipping refresh");
            return Ok(DriftReport::default());
        }
        let report = declarative::refresh(store, api, &self.options.retry, self.options.jobs)
            .context("Refresh failed")?;
        Ok(report)
    }

    pub fn plan(
        &self,
        ctx: &Context,
        graph: &Graph,
        store: &StateStore,
        mode: PlanMode,
    ) -> Result<ExecutionPlan> {
        let targets = ctx
            .targets
            .iter()
            .map(|t| {
                t.parse::<Address>()
                    .map_err(|_| declarative::Error::UnknownTarget(t.clone()))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let opts = PlanOptions { mode, targets };
        Ok(declarative::plan(graph, store.state(), &opts)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{ApplyResult, ChangeOp, execute_simple};
    use std::path::Path;
    use tempfile::TempDir;

    fn demo_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("demos").join("jenkins")
    }

    fn context(dir: &Path, state: &Path) -> Context {
        Context {
            verbose: 0,
            quiet: true,
            dir: dir.to_path_buf(),
            state: Some(state.to_path_buf()),
            vars: Vec::new(),
            targets: Vec::new(),
            jobs: Some(4),
            timeout: None,
            refresh: None,
            auto_approve: true,
        }
    }

    #[test]
    fn test_demo_graph_order() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&demo_dir(), &tmp.path().join("state.json"));
        let session = Session::load(&ctx).unwrap();
        let graph = session.graph(&ctx).unwrap();

        assert_eq!(graph.len(), 10);
        let order: Vec<String> = graph.topological_order().iter().map(ToString::to_string).collect();
        let pos = |a: &str| order.iter().position(|o| o == a).unwrap();
        assert_eq!(pos("network.ci"), 0);
        assert!(pos("route_table_association.public") < pos("instance.jenkins"));
        assert!(pos("instance.jenkins") < pos("elastic_ip.jenkins"));
    }

    #[test]
    fn test_var_override_reaches_graph() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = context(&demo_dir(), &tmp.path().join("state.json"));
        ctx.vars = vec![("instance_type".to_string(), "large".to_string())];
        let session = Session::load(&ctx).unwrap();
        let graph = session.graph(&ctx).unwrap();

        let jenkins = graph.node(&"instance.jenkins".parse().unwrap()).unwrap();
        assert_eq!(
            jenkins.attributes["instance_type"].as_literal(),
            Some(serde_json::json!("large"))
        );
    }

    #[test]
    fn test_demo_apply_and_destroy() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&demo_dir(), &tmp.path().join("state.json"));
        let session = Session::load(&ctx).unwrap();
        let graph = session.graph(&ctx).unwrap();
        let api = Sandbox::in_memory();

        let mut store = session.open_store().unwrap();
        let plan = session.plan(&ctx, &graph, &store, PlanMode::Apply).unwrap();
        assert_eq!(plan.summary().create, 10);
        let report = execute_simple(&plan, &graph, &mut store, &api, &session.options).unwrap();
        assert!(report.is_success(), "{:?}", report.failures);
        assert_eq!(api.objects().len(), 10);

        let url = &store.state().outputs["jenkins_url"].value;
        assert!(url.as_str().unwrap().starts_with("http://"));

        let drift = session.refresh(&mut store, &api).unwrap();
        assert!(drift.is_empty());
        let replan = session.plan(&ctx, &graph, &store, PlanMode::Apply).unwrap();
        assert!(!replan.has_changes());

        let plan = session.plan(&ctx, &graph, &store, PlanMode::Destroy).unwrap();
        assert!(plan.actionable().all(|c| c.op == ChangeOp::Destroy));
        let report = execute_simple(&plan, &graph, &mut store, &api, &session.options).unwrap();
        assert!(report.results.iter().all(|(_, r)| *r == ApplyResult::Destroyed));
        assert!(api.objects().is_empty());
        assert!(store.state().resources.is_empty());
    }

    #[test]
    fn test_unparseable_target() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = context(&demo_dir(), &tmp.path().join("state.json"));
        ctx.targets = vec!["jenkins".to_string()];
        let session = Session::load(&ctx).unwrap();
        let graph = session.graph(&ctx).unwrap();
        let store = session.open_store().unwrap();

        let err = session
            .plan(&ctx, &graph, &store, PlanMode::Apply)
            .unwrap_err();
        assert!(err.to_string().contains("jenkins"));
    }
}
