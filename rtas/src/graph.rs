//! Validated task graphs.
//!
//! A [`TaskGraph`] collects the units emitted by one or more pipelines or
//! batches, checks that labels are unique, that every dependency resolves,
//! and that the graph is acyclic, and computes a deterministic execution
//! order for runners that walk it sequentially.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use tracing::debug;

use crate::core::{Label, TaskUnit, TaskUnitRecord};
use crate::errors::GraphValidationError;

/// An acyclic set of task units with resolved dependencies.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    units: Vec<TaskUnit>,
    index: HashMap<Label, usize>,
    external: BTreeSet<Label>,
    order: Vec<Label>,
}

impl TaskGraph {
    /// Validates `units` into a graph.
    pub fn new(units: impl IntoIterator<Item = TaskUnit>) -> Result<Self, GraphValidationError> {
        Self::with_external(units, std::iter::empty::<Label>())
    }

    /// Validates `units`, treating `external` labels as dependencies that
    /// live outside this graph and are satisfied elsewhere.
    pub fn with_external(
        units: impl IntoIterator<Item = TaskUnit>,
        external: impl IntoIterator<Item = impl Into<Label>>,
    ) -> Result<Self, GraphValidationError> {
        let units: Vec<TaskUnit> = units.into_iter().collect();
        let external: BTreeSet<Label> = external.into_iter().map(Into::into).collect();

        let mut index = HashMap::with_capacity(units.len());
        for (i, unit) in units.iter().enumerate() {
            if index.insert(unit.label().clone(), i).is_some() {
                return Err(GraphValidationError::DuplicateLabel(unit.label().clone()));
            }
        }

        for unit in &units {
            for dep in unit.dependencies() {
                if !index.contains_key(dep) && !external.contains(dep) {
                    return Err(GraphValidationError::MissingDependency {
                        label: unit.label().clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let mut graph = Self {
            units,
            index,
            external,
            order: Vec::new(),
        };
        graph.order = graph.topological_sort()?;
        debug!(units = graph.units.len(), "task graph validated");
        Ok(graph)
    }

    /// Returns the number of units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns true if the graph has no units.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Returns a unit by label.
    #[must_use]
    pub fn get(&self, label: &str) -> Option<&TaskUnit> {
        self.index.get(label).map(|&i| &self.units[i])
    }

    /// Returns the units in insertion order.
    #[must_use]
    pub fn units(&self) -> &[TaskUnit] {
        &self.units
    }

    /// Returns the labels accepted as external dependencies.
    #[must_use]
    pub fn external(&self) -> &BTreeSet<Label> {
        &self.external
    }

    /// Returns every label in an order where dependencies come first.
    ///
    /// Ties are broken by insertion order.
    #[must_use]
    pub fn execution_order(&self) -> &[Label] {
        &self.order
    }

    /// Returns the labels of units that depend directly on `label`.
    #[must_use]
    pub fn dependents(&self, label: &str) -> Vec<&Label> {
        self.units
            .iter()
            .filter(|u| u.dependencies().iter().any(|d| d.as_str() == label))
            .map(TaskUnit::label)
            .collect()
    }

    /// Returns the serialisable records of every unit, in execution order.
    #[must_use]
    pub fn records(&self) -> Vec<TaskUnitRecord> {
        self.order
            .iter()
            .filter_map(|l| self.get(l.as_str()))
            .map(TaskUnit::describe)
            .collect()
    }

    /// Exports the records as pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.records())
    }

    /// Kahn's algorithm over in-graph dependencies. The ready set is keyed
    /// by insertion index so ties resolve in the order units were added.
    fn topological_sort(&self) -> Result<Vec<Label>, GraphValidationError> {
        let mut in_degree = vec![0_usize; self.units.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.units.len()];
        for (i, unit) in self.units.iter().enumerate() {
            for dep in unit.dependencies() {
                if let Some(&j) = self.index.get(dep) {
                    in_degree[i] += 1;
                    dependents[j].push(i);
                }
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut order = Vec::with_capacity(self.units.len());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(self.units[i].label().clone());
            for &child in &dependents[i] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.push(Reverse(child));
                }
            }
        }

        if order.len() < self.units.len() {
            return Err(GraphValidationError::CycleDetected(self.find_cycle(&in_degree)));
        }
        Ok(order)
    }

    /// Walks from the first unit Kahn could not schedule. Every such unit
    /// still waits on another unscheduled unit, so the walk must revisit a
    /// node; the path from that node onward is a cycle.
    fn find_cycle(&self, in_degree: &[usize]) -> Vec<Label> {
        let blocked = |i: usize| in_degree[i] > 0;
        let Some(mut current) = (0..self.units.len()).find(|&i| blocked(i)) else {
            return Vec::new();
        };

        let mut seen: HashMap<usize, usize> = HashMap::new();
        let mut path: Vec<usize> = Vec::new();
        loop {
            if let Some(&start) = seen.get(&current) {
                let mut cycle: Vec<Label> = path[start..]
                    .iter()
                    .map(|&i| self.units[i].label().clone())
                    .collect();
                cycle.push(self.units[current].label().clone());
                return cycle;
            }
            seen.insert(current, path.len());
            path.push(current);

            let next = self.units[current]
                .dependencies()
                .iter()
                .filter_map(|dep| self.index.get(dep).copied())
                .find(|&j| blocked(j));
            match next {
                Some(j) => current = j,
                None => return path.iter().map(|&i| self.units[i].label().clone()).collect(),
            }
        }
    }
}
