//! Staged parallel processing.
//!
//! A pipeline is an ordered list of named stages. Each stage runs as one
//! parallel map over the same node list and is fully awaited before the next
//! one starts, so stage N+1 always sees every write of stage N.

use std::sync::Arc;

use serde::Serialize;

use crate::model::NodePath;
use crate::Result;
use super::coordinator::{ParallelCoordinator, ParallelReport, WorkerContext};

type StageFn = Arc<dyn Fn(&WorkerContext, &NodePath) -> Result<()> + Send + Sync>;

struct Stage {
    name: String,
    f: StageFn,
}

#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

/// Per-stage reports, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub stages: Vec<(String, ParallelReport)>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&WorkerContext, &NodePath) -> Result<()> + Send + Sync + 'static,
    {
        self.stages.push(Stage { name: name.into(), f: Arc::new(f) });
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.name.as_str())
    }

    /// Run every stage over `nodes`. Stops after the first failing stage.
    pub fn run(&self, coordinator: &ParallelCoordinator, nodes: &[NodePath]) -> Result<PipelineReport> {
        let mut report = PipelineReport::default();
        for stage in &self.stages {
            let f = Arc::clone(&stage.f);
            let stage_report = coordinator
                .process_in_parallel_with(nodes.to_vec(), move |ctx, node| f(ctx, node))
                .inspect_err(|e| tracing::warn!(stage = %stage.name, error = %e, "pipeline stage failed"))?;
            tracing::debug!(stage = %stage.name, nodes = stage_report.nodes, "pipeline stage done");
            report.stages.push((stage.name.clone(), stage_report));
        }
        Ok(report)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.stage_names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::intern::TokenInterner;
    use crate::Error;
    use hashbrown::HashMap;
    use parking_lot::Mutex;

    #[test]
    fn test_stages_run_in_order() {
        let config = CacheConfig::default().with_worker_threads(4);
        let coordinator = ParallelCoordinator::new(&config, Arc::new(TokenInterner::new())).unwrap();
        let nodes: Vec<NodePath> = (0..40).map(|i| NodePath::new(format!("/N{i}")).unwrap()).collect();
        let values: Arc<Mutex<HashMap<NodePath, i64>>> = Arc::default();

        let (v1, v2) = (Arc::clone(&values), Arc::clone(&values));
        let pipeline = Pipeline::new()
            .stage("seed", move |_, node| {
                v1.lock().insert(node.clone(), 1);
                Ok(())
            })
            .stage("double", move |_, node| {
                let mut map = v2.lock();
                let v = map.get_mut(node).ok_or_else(|| Error::NotFound(node.to_string()))?;
                *v *= 2;
                Ok(())
            });

        let report = pipeline.run(&coordinator, &nodes).unwrap();
        assert_eq!(report.stages.len(), 2);
        assert_eq!(report.stages[0].0, "seed");
        assert!(values.lock().values().all(|&v| v == 2));
    }

    #[test]
    fn test_failing_stage_stops_pipeline() {
        let config = CacheConfig::default().with_worker_threads(2);
        let coordinator = ParallelCoordinator::new(&config, Arc::new(TokenInterner::new())).unwrap();
        let nodes = vec![NodePath::new("/A").unwrap()];
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        let pipeline = Pipeline::new()
            .stage("fail", |_, node| Err(Error::NotFound(node.to_string())))
            .stage("never", move |_, _| {
                *flag.lock() = true;
                Ok(())
            });
        assert!(pipeline.run(&coordinator, &nodes).is_err());
        assert!(!*ran.lock());
        assert_eq!(pipeline.stage_names().collect::<Vec<_>>(), vec!["fail", "never"]);
    }
}
