//! Pipeline definitions: the graph description consumed from the designer /
//! repository boundary.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use rowflow_common::{Result, RowflowError};

/// One stage of a pipeline definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stage name, unique within the pipeline.
    pub name: String,
    /// Step-type name resolved through the step registry.
    pub step_type: String,
    /// Parallelism degree: number of concurrently running copies.
    #[serde(default = "default_copies")]
    pub copies: u16,
    /// Step-specific configuration.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Stage receiving rows this stage fails on, with an error message appended.
    /// Absent means a row-level error is fatal to the stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_to: Option<String>,
    /// Upstream stage whose rows are fully drained before other inputs are
    /// read (lookup-style steps). Absent means round-robin across all inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain_first: Option<String>,
}

fn default_copies() -> u16 {
    1
}

impl StageSpec {
    /// Stage with one copy, empty config, and no error routing.
    pub fn new(name: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            step_type: step_type.into(),
            copies: 1,
            config: serde_json::Value::Null,
            error_to: None,
            drain_first: None,
        }
    }

    /// Set the step configuration.
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Set the parallelism degree.
    pub fn with_copies(mut self, copies: u16) -> Self {
        self.copies = copies;
        self
    }

    /// Route row-level errors to the named stage.
    pub fn with_error_to(mut self, stage: impl Into<String>) -> Self {
        self.error_to = Some(stage.into());
        self
    }

    /// Fully drain the named upstream stage before reading other inputs.
    pub fn with_drain_first(mut self, stage: impl Into<String>) -> Self {
        self.drain_first = Some(stage.into());
        self
    }
}

/// A directed hop between two stages. Expanded to one channel per
/// producer-copy/consumer-copy pair at wiring time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    /// Producing stage name.
    pub from: String,
    /// Consuming stage name.
    pub to: String,
}

/// A whole transformation graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Pipeline name, used in reports and metrics labels.
    pub name: String,
    /// Stages, in definition order.
    pub stages: Vec<StageSpec>,
    /// Hops between stages.
    pub edges: Vec<EdgeSpec>,
}

impl PipelineSpec {
    /// Empty pipeline with a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Builder-style stage append.
    pub fn with_stage(mut self, stage: StageSpec) -> Self {
        self.stages.push(stage);
        self
    }

    /// Builder-style edge append.
    pub fn with_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(EdgeSpec {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    /// Position of the stage named `name`.
    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    /// Check structural soundness: unique stage names, known edge endpoints,
    /// at least one copy per stage, consistent error/drain references, and an
    /// acyclic graph.
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(RowflowError::InvalidConfig(format!(
                "pipeline '{}' has no stages",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name.as_str()) {
                return Err(RowflowError::InvalidConfig(format!(
                    "duplicate stage name '{}'",
                    stage.name
                )));
            }
            if stage.copies == 0 {
                return Err(RowflowError::InvalidConfig(format!(
                    "stage '{}' must run at least one copy",
                    stage.name
                )));
            }
        }
        for edge in &self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !seen.contains(endpoint.as_str()) {
                    return Err(RowflowError::InvalidConfig(format!(
                        "edge {} -> {} references unknown stage '{}'",
                        edge.from, edge.to, endpoint
                    )));
                }
            }
            if edge.from == edge.to {
                return Err(RowflowError::InvalidConfig(format!(
                    "stage '{}' cannot feed itself",
                    edge.from
                )));
            }
        }
        for stage in &self.stages {
            if let Some(target) = &stage.error_to {
                if !seen.contains(target.as_str()) {
                    return Err(RowflowError::InvalidConfig(format!(
                        "stage '{}' routes errors to unknown stage '{}'",
                        stage.name, target
                    )));
                }
                if target == &stage.name {
                    return Err(RowflowError::InvalidConfig(format!(
                        "stage '{}' cannot route errors to itself",
                        stage.name
                    )));
                }
            }
            if let Some(first) = &stage.drain_first {
                let feeds_it = self
                    .edges
                    .iter()
                    .any(|e| &e.from == first && e.to == stage.name);
                if !feeds_it {
                    return Err(RowflowError::InvalidConfig(format!(
                        "stage '{}' drains '{}' first but no such edge exists",
                        stage.name, first
                    )));
                }
            }
        }
        self.topo_order().map(|_| ())
    }

    /// Stage indices in topological order (error hops included, so error
    /// routing cannot create a cycle either).
    pub(crate) fn topo_order(&self) -> Result<Vec<usize>> {
        let index: HashMap<&str, usize> = self
            .stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();

        let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); self.stages.len()];
        let mut indegree = vec![0usize; self.stages.len()];
        let mut hops: Vec<(usize, usize)> = Vec::new();
        for edge in &self.edges {
            let from = index[edge.from.as_str()];
            let to = index[edge.to.as_str()];
            hops.push((from, to));
        }
        for (i, stage) in self.stages.iter().enumerate() {
            if let Some(target) = &stage.error_to {
                hops.push((i, index[target.as_str()]));
            }
        }
        for (from, to) in hops {
            downstream[from].push(to);
            indegree[to] += 1;
        }

        let mut queue: VecDeque<usize> = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.stages.len());
        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &next in &downstream[i] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }
        if order.len() != self.stages.len() {
            return Err(RowflowError::InvalidConfig(format!(
                "pipeline '{}' contains a cycle",
                self.name
            )));
        }
        Ok(order)
    }

    /// Upstream stage indices of `stage`, in edge definition order.
    pub(crate) fn upstream_of(&self, stage: &str) -> Vec<usize> {
        self.edges
            .iter()
            .filter(|e| e.to == stage)
            .filter_map(|e| self.stage_index(&e.from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> PipelineSpec {
        PipelineSpec::new("t")
            .with_stage(StageSpec::new("gen", "row_generator"))
            .with_stage(StageSpec::new("sort", "sort_rows"))
            .with_stage(StageSpec::new("sink", "collect_rows"))
            .with_edge("gen", "sort")
            .with_edge("sort", "sink")
    }

    #[test]
    fn valid_linear_pipeline_passes() {
        linear().validate().expect("valid");
    }

    #[test]
    fn topo_order_respects_edges() {
        let spec = linear();
        let order = spec.topo_order().expect("acyclic");
        let pos = |name: &str| {
            let idx = spec.stage_index(name).expect("stage");
            order.iter().position(|i| *i == idx).expect("in order")
        };
        assert!(pos("gen") < pos("sort"));
        assert!(pos("sort") < pos("sink"));
    }

    #[test]
    fn cycles_are_rejected() {
        let spec = PipelineSpec::new("t")
            .with_stage(StageSpec::new("a", "select_values"))
            .with_stage(StageSpec::new("b", "select_values"))
            .with_edge("a", "b")
            .with_edge("b", "a");
        assert!(spec.validate().is_err());
    }

    #[test]
    fn unknown_edge_endpoint_is_rejected() {
        let spec = PipelineSpec::new("t")
            .with_stage(StageSpec::new("a", "row_generator"))
            .with_edge("a", "ghost");
        assert!(spec.validate().is_err());
    }

    #[test]
    fn duplicate_stage_names_are_rejected() {
        let spec = PipelineSpec::new("t")
            .with_stage(StageSpec::new("a", "row_generator"))
            .with_stage(StageSpec::new("a", "collect_rows"));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn drain_first_requires_a_matching_edge() {
        let spec = PipelineSpec::new("t")
            .with_stage(StageSpec::new("a", "row_generator"))
            .with_stage(StageSpec::new("b", "row_generator"))
            .with_stage(StageSpec::new("sink", "collect_rows").with_drain_first("b"))
            .with_edge("a", "sink");
        assert!(spec.validate().is_err());
    }

    #[test]
    fn specs_round_trip_through_json() {
        let spec = linear();
        let json = serde_json::to_string(&spec).expect("encode");
        let back: PipelineSpec = serde_json::from_str(&json).expect("decode");
        assert_eq!(back.stages.len(), 3);
        assert_eq!(back.edges.len(), 2);
        assert_eq!(back.name, "t");
    }
}
