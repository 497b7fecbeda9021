//! Lazy task graphs.
//!
//! A [`Bag`] is a named set of partition tasks in a [`TaskGraph`]; a
//! [`Delayed`] points at a single task. Nothing touches the database until an
//! [`Executor`] runs the graph.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{DocbagError, Result};
use crate::io::WriteArgs;
use crate::partition::FetchArgs;
use crate::types::Document;

mod executor;
mod token;

pub use executor::{ComputeOptions, Executor, LocalExecutor, TaskOutputs};
pub use token::Tokenizer;

/// Address of one task: a graph layer name and a partition index.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TaskKey {
    /// Layer name, e.g. `read-<token>`.
    pub name: String,
    /// Partition index within the layer.
    pub index: usize,
}

impl TaskKey {
    /// Creates a key.
    pub fn new(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.name, self.index)
    }
}

/// Work attached to a [`TaskKey`].
#[derive(Clone, Debug)]
pub enum Task {
    /// Documents already held in memory.
    Literal(Arc<Vec<Document>>),
    /// Load one `_id` range from the database.
    Fetch(FetchArgs),
    /// Insert the documents produced by `input`.
    Write {
        /// Partition whose documents are written.
        input: TaskKey,
        /// Write destination.
        args: WriteArgs,
    },
    /// Completes once every input has completed.
    Checkpoint {
        /// Tasks that must finish first.
        inputs: Vec<TaskKey>,
    },
}

impl Task {
    /// Keys this task reads from.
    pub fn dependencies(&self) -> &[TaskKey] {
        match self {
            Task::Literal(_) | Task::Fetch(_) => &[],
            Task::Write { input, .. } => std::slice::from_ref(input),
            Task::Checkpoint { inputs } => inputs,
        }
    }

    /// Short operation name used in logs.
    pub fn operation(&self) -> &'static str {
        match self {
            Task::Literal(_) => "literal",
            Task::Fetch(_) => "fetch",
            Task::Write { .. } => "write",
            Task::Checkpoint { .. } => "checkpoint",
        }
    }
}

/// Result of running one task.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskOutput {
    /// A partition's documents.
    Documents(Arc<Vec<Document>>),
    /// Side-effect only.
    Done,
}

impl TaskOutput {
    /// Documents, when the task produced any.
    pub fn documents(&self) -> Option<&Arc<Vec<Document>>> {
        match self {
            TaskOutput::Documents(docs) => Some(docs),
            TaskOutput::Done => None,
        }
    }
}

/// Mapping from keys to tasks.
#[derive(Clone, Debug, Default)]
pub struct TaskGraph {
    tasks: BTreeMap<TaskKey, Task>,
}

impl TaskGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a task.
    pub fn insert(&mut self, key: TaskKey, task: Task) {
        self.tasks.insert(key, task);
    }

    /// Looks up a task.
    pub fn get(&self, key: &TaskKey) -> Option<&Task> {
        self.tasks.get(key)
    }

    /// Looks up a task, failing with [`DocbagError::MissingTask`].
    pub fn require(&self, key: &TaskKey) -> Result<&Task> {
        self.get(key)
            .ok_or_else(|| DocbagError::MissingTask(key.to_string()))
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &TaskKey) -> bool {
        self.tasks.contains_key(key)
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the graph has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Iterates tasks in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&TaskKey, &Task)> {
        self.tasks.iter()
    }

    /// Copies every task of `other` into this graph.
    pub fn merge(&mut self, other: &TaskGraph) {
        for (key, task) in &other.tasks {
            self.tasks.insert(key.clone(), task.clone());
        }
    }
}

/// Partitioned, lazily evaluated collection of documents.
#[derive(Clone, Debug)]
pub struct Bag {
    graph: TaskGraph,
    name: String,
    npartitions: usize,
}

impl Bag {
    /// Wraps a graph whose layer `name` holds partitions `0..npartitions`.
    pub fn new(graph: TaskGraph, name: impl Into<String>, npartitions: usize) -> Self {
        Self {
            graph,
            name: name.into(),
            npartitions,
        }
    }

    /// Bag with one literal task per supplied partition.
    pub fn from_partitions(partitions: Vec<Vec<Document>>) -> Self {
        let mut tokenizer = Tokenizer::new();
        for part in &partitions {
            tokenizer.u64(part.len() as u64);
            for doc in part {
                tokenizer.document(doc);
            }
        }
        let name = format!("from-documents-{}", tokenizer.finish());
        let npartitions = partitions.len();
        let mut graph = TaskGraph::new();
        for (index, part) in partitions.into_iter().enumerate() {
            graph.insert(TaskKey::new(&name, index), Task::Literal(Arc::new(part)));
        }
        Self::new(graph, name, npartitions)
    }

    /// Splits `documents` into partitions of at most `partition_size`.
    pub fn from_documents(documents: Vec<Document>, partition_size: usize) -> Result<Self> {
        if partition_size == 0 {
            return Err(DocbagError::invalid("partition size must be positive"));
        }
        let partitions = documents
            .chunks(partition_size)
            .map(<[Document]>::to_vec)
            .collect();
        Ok(Self::from_partitions(partitions))
    }

    /// Layer name of the partition tasks.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of partitions.
    pub fn npartitions(&self) -> usize {
        self.npartitions
    }

    /// Underlying graph.
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Partition keys in order.
    pub fn keys(&self) -> Vec<TaskKey> {
        (0..self.npartitions)
            .map(|index| TaskKey::new(&self.name, index))
            .collect()
    }

    /// Runs the graph and returns each partition's documents.
    pub fn compute_partitions(
        &self,
        executor: &dyn Executor,
        options: &ComputeOptions,
    ) -> Result<Vec<Vec<Document>>> {
        self.run(executor, self.keys(), options)
    }

    /// Runs only the tasks partition `index` depends on.
    pub fn compute_partition(
        &self,
        executor: &dyn Executor,
        index: usize,
        options: &ComputeOptions,
    ) -> Result<Vec<Document>> {
        if index >= self.npartitions {
            return Err(DocbagError::invalid(format!(
                "partition {index} out of range; bag has {} partitions",
                self.npartitions
            )));
        }
        let mut docs = self.run(executor, vec![TaskKey::new(&self.name, index)], options)?;
        Ok(docs.pop().unwrap_or_default())
    }

    fn run(
        &self,
        executor: &dyn Executor,
        keys: Vec<TaskKey>,
        options: &ComputeOptions,
    ) -> Result<Vec<Vec<Document>>> {
        let mut outputs = executor.execute(&self.graph, &keys, options)?;
        keys.iter()
            .map(|key| match outputs.remove(key) {
                Some(TaskOutput::Documents(docs)) => Ok(Arc::unwrap_or_clone(docs)),
                _ => Err(DocbagError::MissingTask(key.to_string())),
            })
            .collect()
    }

    /// Runs the graph and concatenates the partitions in order.
    pub fn compute(&self, executor: &dyn Executor, options: &ComputeOptions) -> Result<Vec<Document>> {
        Ok(self
            .compute_partitions(executor, options)?
            .into_iter()
            .flatten()
            .collect())
    }
}

/// Handle to a single deferred task and the graph it needs.
#[derive(Clone, Debug)]
pub struct Delayed {
    graph: TaskGraph,
    key: TaskKey,
}

impl Delayed {
    /// Wraps `graph`, targeting `key`.
    pub fn new(graph: TaskGraph, key: TaskKey) -> Self {
        Self { graph, key }
    }

    /// Target key.
    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    /// Underlying graph.
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Runs the target and everything it depends on.
    pub fn compute(&self, executor: &dyn Executor, options: &ComputeOptions) -> Result<TaskOutput> {
        let mut outputs = executor.execute(&self.graph, std::slice::from_ref(&self.key), options)?;
        outputs
            .remove(&self.key)
            .ok_or_else(|| DocbagError::MissingTask(self.key.to_string()))
    }
}
