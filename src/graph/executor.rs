use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use super::{Task, TaskGraph, TaskKey, TaskOutput};
use crate::connection::ConnectionCache;
use crate::error::{DocbagError, Result};
use crate::io::write_partition;
use crate::partition::fetch_partition;

/// Outputs of the requested targets, keyed by task.
pub type TaskOutputs = HashMap<TaskKey, TaskOutput>;

/// Knobs for a single execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComputeOptions {
    /// Upper bound on tasks running at once.
    pub workers: usize,
}

impl ComputeOptions {
    /// Options with an explicit worker count (at least one).
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }
}

impl Default for ComputeOptions {
    fn default() -> Self {
        Self::with_workers(
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
        )
    }
}

/// Runs task graphs.
pub trait Executor {
    /// Runs `targets` and their transitive dependencies, returning the
    /// output of every target. The first failing task aborts the run and its
    /// error is returned as is.
    fn execute(
        &self,
        graph: &TaskGraph,
        targets: &[TaskKey],
        options: &ComputeOptions,
    ) -> Result<TaskOutputs>;
}

/// In-process executor backed by scoped threads.
///
/// Ready tasks run in waves of up to [`ComputeOptions::workers`]. Database
/// access goes through the shared connection cache, so every worker reuses
/// the same client per connection config.
pub struct LocalExecutor {
    cache: Arc<ConnectionCache>,
}

impl LocalExecutor {
    /// Executor resolving connections through `cache`.
    pub fn new(cache: Arc<ConnectionCache>) -> Self {
        Self { cache }
    }

    /// The connection cache used by fetch and write tasks.
    pub fn cache(&self) -> &Arc<ConnectionCache> {
        &self.cache
    }

    fn run_task(&self, graph: &TaskGraph, key: &TaskKey, outputs: &TaskOutputs) -> Result<TaskOutput> {
        let task = graph.require(key)?;
        let started = Instant::now();
        let output = match task {
            Task::Literal(docs) => TaskOutput::Documents(Arc::clone(docs)),
            Task::Fetch(args) => TaskOutput::Documents(Arc::new(fetch_partition(&self.cache, args)?)),
            Task::Write { input, args } => {
                let docs = outputs
                    .get(input)
                    .ok_or_else(|| DocbagError::MissingTask(input.to_string()))?
                    .documents()
                    .ok_or_else(|| {
                        DocbagError::invalid(format!("task {input} produced no documents to write"))
                    })?;
                write_partition(&self.cache, args, docs)?;
                TaskOutput::Done
            }
            Task::Checkpoint { .. } => TaskOutput::Done,
        };
        debug!(
            task = %key,
            op = task.operation(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "executor.task"
        );
        Ok(output)
    }

    fn run_wave(
        &self,
        graph: &TaskGraph,
        wave: &[TaskKey],
        outputs: &TaskOutputs,
    ) -> Result<Vec<(TaskKey, TaskOutput)>> {
        if let [key] = wave {
            return Ok(vec![(key.clone(), self.run_task(graph, key, outputs)?)]);
        }
        std::thread::scope(|scope| {
            let handles: Vec<_> = wave
                .iter()
                .map(|key| {
                    scope.spawn(move || {
                        self.run_task(graph, key, outputs)
                            .map(|output| (key.clone(), output))
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                })
                .collect()
        })
    }
}

fn unique_dependencies(task: &Task) -> BTreeSet<&TaskKey> {
    task.dependencies().iter().collect()
}

impl Executor for LocalExecutor {
    fn execute(
        &self,
        graph: &TaskGraph,
        targets: &[TaskKey],
        options: &ComputeOptions,
    ) -> Result<TaskOutputs> {
        let mut needed = BTreeSet::new();
        let mut stack: Vec<&TaskKey> = targets.iter().collect();
        while let Some(key) = stack.pop() {
            if needed.contains(key) {
                continue;
            }
            let task = graph.require(key)?;
            needed.insert(key.clone());
            stack.extend(task.dependencies());
        }

        let mut pending: HashMap<TaskKey, usize> = HashMap::new();
        let mut dependents: HashMap<TaskKey, Vec<TaskKey>> = HashMap::new();
        let mut ready = VecDeque::new();
        for key in &needed {
            let deps = unique_dependencies(graph.require(key)?);
            if deps.is_empty() {
                ready.push_back(key.clone());
            } else {
                pending.insert(key.clone(), deps.len());
            }
            for dep in deps {
                dependents.entry(dep.clone()).or_default().push(key.clone());
            }
        }
        let mut consumers: HashMap<TaskKey, usize> = dependents
            .iter()
            .map(|(key, children)| (key.clone(), children.len()))
            .collect();
        let keep: HashSet<&TaskKey> = targets.iter().collect();

        let workers = options.workers.max(1);
        let mut outputs = TaskOutputs::new();
        let mut completed = 0usize;
        while !ready.is_empty() {
            let take = ready.len().min(workers);
            let wave: Vec<TaskKey> = ready.drain(..take).collect();
            trace!(tasks = wave.len(), "executor.wave");
            for (key, output) in self.run_wave(graph, &wave, &outputs)? {
                completed += 1;
                for dep in unique_dependencies(graph.require(&key)?) {
                    if let Some(left) = consumers.get_mut(dep) {
                        *left -= 1;
                        if *left == 0 && !keep.contains(dep) {
                            outputs.remove(dep);
                        }
                    }
                }
                if let Some(children) = dependents.get(&key) {
                    for child in children {
                        if let Some(left) = pending.get_mut(child) {
                            *left -= 1;
                            if *left == 0 {
                                pending.remove(child);
                                ready.push_back(child.clone());
                            }
                        }
                    }
                }
                outputs.insert(key, output);
            }
        }

        if completed != needed.len() {
            return Err(DocbagError::invalid(format!(
                "task graph has a cycle: {} of {} tasks never became ready",
                needed.len() - completed,
                needed.len()
            )));
        }
        outputs.retain(|key, _| keep.contains(key));
        Ok(outputs)
    }
}
