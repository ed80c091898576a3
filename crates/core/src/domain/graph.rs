// Dependency Graph (adjacency list keyed by job id, spans all queues)

use crate::domain::error::{DomainError, Result};
use crate::domain::job::JobId;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Directed graph `job -> dependencies` over pending queue entries.
///
/// Must stay acyclic: `add` refuses any edge set that would close a cycle and
/// leaves the graph untouched in that case.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    depends_on: HashMap<JobId, BTreeSet<JobId>>,
    dependents: HashMap<JobId, BTreeSet<JobId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dependencies_of(&self, job_id: &str) -> Option<&BTreeSet<JobId>> {
        self.depends_on.get(job_id)
    }

    /// Direct dependents (jobs waiting on `job_id`)
    pub fn dependents_of(&self, job_id: &str) -> Vec<JobId> {
        self.dependents
            .get(job_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every job that transitively waits on `job_id`
    pub fn transitive_dependents(&self, job_id: &str) -> Vec<JobId> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![job_id];
        while let Some(current) = stack.pop() {
            if let Some(children) = self.dependents.get(current) {
                for child in children {
                    if seen.insert(child.as_str()) {
                        order.push(child.clone());
                        stack.push(child.as_str());
                    }
                }
            }
        }
        order
    }

    /// True if `from` can reach `to` following dependency edges
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(next) = self.depends_on.get(current) {
                stack.extend(next.iter().map(String::as_str));
            }
        }
        false
    }

    /// Check whether adding `job_id -> dependencies` would close a cycle
    pub fn check_acyclic(&self, job_id: &str, dependencies: &BTreeSet<JobId>) -> Result<()> {
        for dep in dependencies {
            if dep == job_id {
                return Err(DomainError::CycleDetected(format!(
                    "job {} cannot depend on itself",
                    job_id
                )));
            }
            // New edge job -> dep closes a cycle iff dep already reaches job
            if self.reaches(dep, job_id) {
                return Err(DomainError::CycleDetected(format!(
                    "{} -> {} would close a cycle",
                    job_id, dep
                )));
            }
        }
        Ok(())
    }

    /// Add edges for a job; rejected without mutation if a cycle would form
    pub fn add(&mut self, job_id: &str, dependencies: &BTreeSet<JobId>) -> Result<()> {
        self.check_acyclic(job_id, dependencies)?;
        if dependencies.is_empty() {
            return Ok(());
        }
        let entry = self.depends_on.entry(job_id.to_string()).or_default();
        for dep in dependencies {
            entry.insert(dep.clone());
            self.dependents
                .entry(dep.clone())
                .or_default()
                .insert(job_id.to_string());
        }
        Ok(())
    }

    /// Drop a job's outgoing edges (entry admitted or removed).
    ///
    /// Incoming edges stay: pending dependents keep waiting on it.
    pub fn remove(&mut self, job_id: &str) {
        if let Some(deps) = self.depends_on.remove(job_id) {
            for dep in deps {
                if let Some(set) = self.dependents.get_mut(&dep) {
                    set.remove(job_id);
                    if set.is_empty() {
                        self.dependents.remove(&dep);
                    }
                }
            }
        }
    }

    pub fn edge_count(&self) -> usize {
        self.depends_on.values().map(BTreeSet::len).sum()
    }
}
