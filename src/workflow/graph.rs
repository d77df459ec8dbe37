//! Directed-graph executor.
//!
//! A graph is a fixed table of named nodes plus one outgoing transition per
//! node, either a direct edge or a router with labelled branches. The executor
//! threads one mutable state from `START` to `END`, one node at a time.
//!
//! Every node may run once per run unless a higher visit limit is declared
//! with [`GraphBuilder::with_visit_limit`]; that limit is the only cycle bound.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::WorkflowError;

/// Marker for the graph entry.
pub const START: &str = "__start__";
/// Marker for the terminal node.
pub const END: &str = "__end__";

/// A named step in the graph.
#[async_trait]
pub trait Node<S>: Send + Sync {
    fn name(&self) -> &str;

    /// Transform `state` in place. Errors end the run.
    async fn run(&self, state: &mut S, ctx: &mut NodeContext) -> Result<(), WorkflowError>;
}

/// Pure function choosing the next branch label from the post-node state.
pub type Router<S> = Box<dyn Fn(&S) -> &'static str + Send + Sync>;

/// Called after every node with the node name and the post-node state.
pub type Observer<S> = Arc<dyn Fn(&str, &S) + Send + Sync>;

/// A non-fatal degradation recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunWarning {
    pub node: String,
    pub message: String,
}

/// Per-run context handed to each node.
#[derive(Debug)]
pub struct NodeContext {
    run_id: Uuid,
    node: String,
    warnings: Vec<RunWarning>,
}

impl NodeContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            node: String::new(),
            warnings: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Name of the node currently executing.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Log a degradation and keep it for the run output.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(run_id = %self.run_id, node = %self.node, "{}", message);
        self.warnings.push(RunWarning {
            node: self.node.clone(),
            message,
        });
    }

    pub fn warnings(&self) -> &[RunWarning] {
        &self.warnings
    }

    pub(crate) fn enter(&mut self, node: &str) {
        self.node = node.to_string();
    }
}

/// Result of a completed run.
#[derive(Debug)]
pub struct RunOutput<S> {
    pub run_id: Uuid,
    pub state: S,
    /// Nodes in execution order.
    pub visited: Vec<String>,
    pub warnings: Vec<RunWarning>,
    pub elapsed: Duration,
}

impl<S> RunOutput<S> {
    pub fn visit_count(&self, node: &str) -> usize {
        self.visited.iter().filter(|n| *n == node).count()
    }
}

/// Execution record for a run over a borrowed state.
#[derive(Debug, Clone)]
pub struct RunTrace {
    pub run_id: Uuid,
    pub visited: Vec<String>,
    pub warnings: Vec<RunWarning>,
    pub elapsed: Duration,
}

enum Transition<S> {
    Direct(String),
    Conditional {
        router: Router<S>,
        branches: HashMap<String, String>,
    },
}

impl<S> Transition<S> {
    fn targets(&self) -> Vec<&str> {
        match self {
            Self::Direct(to) => vec![to.as_str()],
            Self::Conditional { branches, .. } => branches.values().map(String::as_str).collect(),
        }
    }
}

// ── Builder ─────────────────────────────────────────────────────────

/// Declares the node and edge tables, validated by [`GraphBuilder::compile`].
pub struct GraphBuilder<S> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    transitions: HashMap<String, Transition<S>>,
    entry: Option<String>,
    visit_limits: HashMap<String, usize>,
    problems: Vec<String>,
}

impl<S: Send + Sync + 'static> GraphBuilder<S> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            transitions: HashMap::new(),
            entry: None,
            visit_limits: HashMap::new(),
            problems: Vec::new(),
        }
    }

    pub fn add_node(mut self, node: impl Node<S> + 'static) -> Self {
        let name = node.name().to_string();
        if name == START || name == END {
            self.problems.push(format!("'{name}' is a reserved node name"));
        } else if self.nodes.contains_key(&name) {
            self.problems.push(format!("duplicate node '{name}'"));
        } else {
            self.nodes.insert(name, Arc::new(node));
        }
        self
    }

    /// Unconditional edge. An edge from `START` declares the entry node.
    pub fn add_edge(mut self, from: &str, to: &str) -> Self {
        if from == START {
            if self.entry.replace(to.to_string()).is_some() {
                self.problems.push("multiple entry edges".to_string());
            }
            return self;
        }
        self.set_transition(from, Transition::Direct(to.to_string()));
        self
    }

    /// Routed edge: `router` picks a label, `branches` maps labels to targets.
    pub fn add_conditional_edges<'a>(
        mut self,
        from: &str,
        router: impl Fn(&S) -> &'static str + Send + Sync + 'static,
        branches: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let branches: HashMap<String, String> = branches
            .into_iter()
            .map(|(label, to)| (label.to_string(), to.to_string()))
            .collect();
        if branches.is_empty() {
            self.problems
                .push(format!("conditional edges from '{from}' declare no branches"));
        }
        self.set_transition(
            from,
            Transition::Conditional {
                router: Box::new(router),
                branches,
            },
        );
        self
    }

    /// Allow `node` to run up to `limit` times per run.
    pub fn with_visit_limit(mut self, node: &str, limit: usize) -> Self {
        self.visit_limits.insert(node.to_string(), limit);
        self
    }

    fn set_transition(&mut self, from: &str, transition: Transition<S>) {
        if self.transitions.insert(from.to_string(), transition).is_some() {
            self.problems
                .push(format!("node '{from}' has more than one outgoing transition"));
        }
    }

    /// Validate the tables and freeze them.
    pub fn compile(self) -> Result<CompiledGraph<S>, WorkflowError> {
        let mut problems = self.problems;

        let entry = match self.entry {
            Some(entry) if self.nodes.contains_key(&entry) => entry,
            Some(entry) => {
                problems.push(format!("entry '{entry}' is not a node"));
                entry
            }
            None => {
                problems.push("no edge from START".to_string());
                String::new()
            }
        };

        for (from, transition) in &self.transitions {
            if !self.nodes.contains_key(from) {
                problems.push(format!("edge from unknown node '{from}'"));
            }
            for to in transition.targets() {
                if to != END && !self.nodes.contains_key(to) {
                    problems.push(format!("edge from '{from}' to unknown node '{to}'"));
                }
            }
        }

        let mut names: Vec<&String> = self.nodes.keys().collect();
        names.sort();
        for name in &names {
            if !self.transitions.contains_key(*name) {
                problems.push(format!("node '{name}' has no outgoing transition"));
            }
        }

        for (name, limit) in &self.visit_limits {
            if !self.nodes.contains_key(name) {
                problems.push(format!("visit limit for unknown node '{name}'"));
            } else if *limit == 0 {
                problems.push(format!("visit limit for '{name}' must be positive"));
            }
        }

        if problems.is_empty() {
            let reachable = reachable_from(&entry, &self.transitions);
            for name in &names {
                if !reachable.contains(name.as_str()) {
                    problems.push(format!("node '{name}' is unreachable from START"));
                }
            }
            if !reachable.contains(END) {
                problems.push("END is unreachable from START".to_string());
            }
        }

        if !problems.is_empty() {
            return Err(WorkflowError::Build(problems.join("; ")));
        }

        Ok(CompiledGraph {
            nodes: self.nodes,
            transitions: self.transitions,
            entry,
            visit_limits: self.visit_limits,
            observer: None,
        })
    }
}

impl<S: Send + Sync + 'static> Default for GraphBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

fn reachable_from<'a, S>(
    entry: &'a str,
    transitions: &'a HashMap<String, Transition<S>>,
) -> HashSet<&'a str> {
    let mut seen = HashSet::from([entry]);
    let mut queue = VecDeque::from([entry]);
    while let Some(node) = queue.pop_front() {
        if let Some(transition) = transitions.get(node) {
            for to in transition.targets() {
                if seen.insert(to) {
                    queue.push_back(to);
                }
            }
        }
    }
    seen
}

// ── Executor ────────────────────────────────────────────────────────

/// A validated, immutable graph ready to run.
pub struct CompiledGraph<S> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    transitions: HashMap<String, Transition<S>>,
    entry: String,
    visit_limits: HashMap<String, usize>,
    observer: Option<Observer<S>>,
}

impl<S: Send + Sync + 'static> CompiledGraph<S> {
    /// Attach a callback invoked after every node.
    pub fn with_observer(mut self, observer: Observer<S>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    fn visit_limit(&self, node: &str) -> usize {
        self.visit_limits.get(node).copied().unwrap_or(1)
    }

    /// Run from the entry node to `END`, consuming the state.
    pub async fn run(&self, state: S) -> Result<RunOutput<S>, WorkflowError> {
        self.run_from(state, &self.entry).await
    }

    /// Run from `start` to `END`, consuming the state.
    pub async fn run_from(&self, state: S, start: &str) -> Result<RunOutput<S>, WorkflowError> {
        let mut state = state;
        let trace = self.execute_from(&mut state, start).await?;
        Ok(RunOutput {
            run_id: trace.run_id,
            state,
            visited: trace.visited,
            warnings: trace.warnings,
            elapsed: trace.elapsed,
        })
    }

    /// Run over a borrowed state. On error the state holds every change made
    /// before the failing node.
    pub async fn execute(&self, state: &mut S) -> Result<RunTrace, WorkflowError> {
        self.execute_from(state, &self.entry).await
    }

    pub async fn execute_from(&self, state: &mut S, start: &str) -> Result<RunTrace, WorkflowError> {
        if !self.nodes.contains_key(start) {
            return Err(WorkflowError::UnknownNode {
                name: start.to_string(),
            });
        }

        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let mut ctx = NodeContext::new(run_id);
        let mut visited: Vec<String> = Vec::new();
        let mut visits: HashMap<&str, usize> = HashMap::new();
        let mut current: &str = start;

        info!(run_id = %run_id, start = %start, "Workflow run started");

        while current != END {
            let Some((name, node)) = self.nodes.get_key_value(current) else {
                return Err(WorkflowError::UnknownNode {
                    name: current.to_string(),
                });
            };

            let count = visits.entry(name.as_str()).or_insert(0);
            *count += 1;
            let limit = self.visit_limit(name);
            if *count > limit {
                error!(run_id = %run_id, node = %name, limit, "Visit limit exceeded");
                return Err(WorkflowError::VisitLimit {
                    node: name.clone(),
                    limit,
                });
            }

            ctx.enter(name);
            let node_start = Instant::now();
            if let Err(e) = node.run(state, &mut ctx).await {
                error!(run_id = %run_id, node = %name, error = %e, "Node failed");
                return Err(e);
            }
            info!(
                run_id = %run_id,
                node = %name,
                elapsed_ms = node_start.elapsed().as_millis() as u64,
                "Node complete"
            );

            visited.push(name.clone());
            if let Some(observer) = &self.observer {
                observer(name, state);
            }

            current = self.next_node(name, state, run_id)?;
        }

        let elapsed = started.elapsed();
        info!(
            run_id = %run_id,
            nodes = visited.len(),
            warnings = ctx.warnings().len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Workflow run complete"
        );

        Ok(RunTrace {
            run_id,
            visited,
            warnings: ctx.warnings,
            elapsed,
        })
    }

    fn next_node(&self, from: &str, state: &S, run_id: Uuid) -> Result<&str, WorkflowError> {
        match self.transitions.get(from) {
            Some(Transition::Direct(to)) => Ok(to),
            Some(Transition::Conditional { router, branches }) => {
                let label = router(state);
                match branches.get(label) {
                    Some(to) => {
                        debug!(run_id = %run_id, node = %from, label, next = %to, "Routed");
                        Ok(to)
                    }
                    None => Err(WorkflowError::Routing {
                        node: from.to_string(),
                        label: label.to_string(),
                    }),
                }
            }
            None => Err(WorkflowError::Build(format!(
                "node '{from}' has no outgoing transition"
            ))),
        }
    }
}
