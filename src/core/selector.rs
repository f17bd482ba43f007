// src/core/selector.rs - Dependency-aware, value-per-cost task selection
//
// Selection runs in two phases. Cycle detection (Kahn's algorithm) over the
// candidate graph comes first and fails closed. Then a greedy pass repeatedly
// picks the best eligible task: blockers and everything they transitively
// depend on unconditionally, optional tasks only while they fit the remaining
// budget. A task is eligible once every
// dependency is selected or already completed, so the pick order is itself a
// valid topological order.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use super::budget::BudgetState;
use crate::library::{Lifecycle, TaskDefinition, TaskId, TaskLibrary};

const COST_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    BudgetExceeded,
    DependencyNotSelected { dependency: TaskId },
    MissingDependency { dependency: TaskId },
    Deprecated,
    Experimental,
    AlreadyCompleted,
    DependencyCycle { members: Vec<TaskId> },
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BudgetExceeded => "budget_exceeded",
            Self::DependencyNotSelected { .. } => "dependency_not_selected",
            Self::MissingDependency { .. } => "missing_dependency",
            Self::Deprecated => "deprecated",
            Self::Experimental => "experimental",
            Self::AlreadyCompleted => "already_completed",
            Self::DependencyCycle { .. } => "dependency_cycle",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DependencyNotSelected { dependency } | Self::MissingDependency { dependency } => {
                write!(f, "{} ({dependency})", self.as_str())
            }
            Self::DependencyCycle { members } => write!(f, "{} ({})", self.as_str(), members.join(" -> ")),
            _ => f.write_str(self.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedTask {
    pub task_id: TaskId,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    /// Selected task ids, in execution order.
    pub selected: Vec<TaskId>,
    pub skipped: Vec<SkippedTask>,
    pub execution_order: Vec<TaskId>,
    pub total_expected_value: f64,
    pub total_expected_cost: f64,
    pub total_expected_units: u64,
    /// Members of a dependency cycle; set only when selection failed closed.
    pub cycle: Option<Vec<TaskId>>,
    /// Blockers dropped because a dependency is missing or not selectable.
    #[serde(default)]
    pub unscheduled_blockers: Vec<TaskId>,
}

impl SelectionResult {
    pub fn is_selected(&self, task_id: &str) -> bool {
        self.selected.iter().any(|t| t == task_id)
    }

    pub fn skip_reason(&self, task_id: &str) -> Option<&SkipReason> {
        self.skipped.iter().find(|s| s.task_id == task_id).map(|s| &s.reason)
    }

    pub fn has_cycle(&self) -> bool {
        self.cycle.is_some()
    }
}

/// What to select from and under which constraints.
#[derive(Debug, Clone, Default)]
pub struct SelectionRequest {
    pub lane: String,
    pub stage: Option<String>,
    /// Explicit candidate list; overrides lane/stage lookup.
    pub tasks: Option<Vec<TaskId>>,
    pub completed: HashSet<TaskId>,
    pub budget: Option<BudgetState>,
}

impl SelectionRequest {
    pub fn lane(lane: impl Into<String>) -> Self {
        Self {
            lane: lane.into(),
            ..Default::default()
        }
    }

    pub fn with_stage(mut self, stage: Option<String>) -> Self {
        self.stage = stage;
        self
    }

    pub fn with_tasks(mut self, tasks: Option<Vec<TaskId>>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_completed<I, S>(mut self, completed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.completed = completed.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_budget(mut self, budget: BudgetState) -> Self {
        self.budget = Some(budget);
        self
    }
}

pub struct TaskSelector {
    library: Arc<TaskLibrary>,
    include_experimental: bool,
}

impl TaskSelector {
    pub fn new(library: Arc<TaskLibrary>) -> Self {
        Self {
            library,
            include_experimental: false,
        }
    }

    pub fn with_include_experimental(mut self, include: bool) -> Self {
        self.include_experimental = include;
        self
    }

    /// Select from the held library by lane/stage or explicit task list.
    pub fn select(&self, request: &SelectionRequest) -> SelectionResult {
        let candidates: Vec<&TaskDefinition> = match &request.tasks {
            Some(ids) => ids.iter().filter_map(|id| self.library.get_by_id(id)).collect(),
            None => self
                .library
                .get_by_lane(&request.lane)
                .into_iter()
                .filter(|t| request.stage.is_none() || t.stage == request.stage)
                .collect(),
        };
        self.select_tasks(&candidates, &request.completed, request.budget.as_ref())
    }

    pub fn select_tasks(
        &self,
        candidates: &[&TaskDefinition],
        completed: &HashSet<TaskId>,
        budget: Option<&BudgetState>,
    ) -> SelectionResult {
        let mut result = SelectionResult::default();

        // Dedupe, keeping the first occurrence of each id.
        let mut seen = HashSet::new();
        let candidates: Vec<&TaskDefinition> = candidates
            .iter()
            .copied()
            .filter(|t| seen.insert(t.id.as_str()))
            .collect();
        let candidate_ids: HashSet<&str> = candidates.iter().map(|t| t.id.as_str()).collect();

        // ─── Lifecycle / completion filter ──────────────────────
        let mut pool: BTreeMap<&str, &TaskDefinition> = BTreeMap::new();
        let mut dead: HashSet<&str> = HashSet::new();
        for task in candidates.iter().copied() {
            let reason = if completed.contains(&task.id) {
                Some(SkipReason::AlreadyCompleted)
            } else if task.lifecycle == Lifecycle::Deprecated {
                Some(SkipReason::Deprecated)
            } else if task.lifecycle == Lifecycle::Experimental && !self.include_experimental {
                Some(SkipReason::Experimental)
            } else {
                None
            };
            match reason {
                Some(SkipReason::AlreadyCompleted) => skip(&mut result, &task.id, SkipReason::AlreadyCompleted),
                Some(reason) => {
                    dead.insert(task.id.as_str());
                    skip(&mut result, &task.id, reason);
                }
                None => {
                    pool.insert(task.id.as_str(), task);
                }
            }
        }

        // ─── Cycle detection ────────────────────────────────────
        if let Some(members) = find_cycle(&pool) {
            tracing::error!(members = ?members, "dependency cycle detected; selecting nothing");
            for id in pool.keys() {
                skip(
                    &mut result,
                    id,
                    SkipReason::DependencyCycle {
                        members: members.clone(),
                    },
                );
            }
            result.cycle = Some(members);
            return result;
        }

        // ─── Greedy selection ───────────────────────────────────
        let required = blocker_closure(&pool);
        let mut remaining_cost = budget.and_then(|b| b.remaining_cost());
        let mut remaining_units = budget.and_then(|b| b.remaining_units());
        let mut selected: HashSet<&str> = HashSet::new();

        loop {
            prune_unreachable(&mut pool, &mut dead, &candidate_ids, completed, &mut result);
            if pool.is_empty() {
                break;
            }

            let mut eligible: Vec<&TaskDefinition> = pool
                .values()
                .copied()
                .filter(|t| {
                    t.dependencies
                        .iter()
                        .all(|d| selected.contains(d.as_str()) || completed.contains(d))
                })
                .collect();
            if eligible.is_empty() {
                // Unreachable for an acyclic pool after pruning.
                break;
            }
            eligible.sort_by(|a, b| rank(a, b));

            let pick = if let Some(forced) = eligible.iter().find(|t| required.contains(t.id.as_str())) {
                Some(*forced)
            } else {
                let mut pick = None;
                for task in &eligible {
                    if fits(task, remaining_cost, remaining_units) {
                        pick = Some(*task);
                        break;
                    }
                    pool.remove(task.id.as_str());
                    dead.insert(task.id.as_str());
                    skip(&mut result, &task.id, SkipReason::BudgetExceeded);
                }
                pick
            };

            let Some(task) = pick else { continue };
            let cost = task.expected_cost();
            remaining_cost = remaining_cost.map(|r| (r - cost).max(0.0));
            remaining_units = remaining_units.map(|r| r.saturating_sub(task.budget.max_units));
            result.total_expected_value += task.expected_value;
            result.total_expected_cost += cost;
            result.total_expected_units = result.total_expected_units.saturating_add(task.budget.max_units);
            result.execution_order.push(task.id.clone());
            selected.insert(task.id.as_str());
            pool.remove(task.id.as_str());
        }

        result.selected = result.execution_order.clone();
        result.unscheduled_blockers = candidates
            .iter()
            .filter(|t| t.is_blocker())
            .filter(|t| {
                matches!(
                    result.skip_reason(&t.id),
                    Some(SkipReason::DependencyNotSelected { .. } | SkipReason::MissingDependency { .. })
                )
            })
            .map(|t| t.id.clone())
            .collect();
        if !result.unscheduled_blockers.is_empty() {
            tracing::warn!(blockers = ?result.unscheduled_blockers, "blocker tasks cannot be scheduled");
        }
        tracing::debug!(
            selected = result.selected.len(),
            skipped = result.skipped.len(),
            expected_value = result.total_expected_value,
            expected_cost = result.total_expected_cost,
            "task selection complete"
        );
        result
    }
}

fn skip(result: &mut SelectionResult, task_id: &str, reason: SkipReason) {
    tracing::debug!(task_id, reason = reason.as_str(), "task not selected");
    result.skipped.push(SkippedTask {
        task_id: task_id.to_string(),
        reason,
    });
}

/// Higher value-per-cost first, then higher priority, then id.
fn rank(a: &TaskDefinition, b: &TaskDefinition) -> Ordering {
    b.value_cost_ratio()
        .partial_cmp(&a.value_cost_ratio())
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.id.cmp(&b.id))
}

fn fits(task: &TaskDefinition, remaining_cost: Option<f64>, remaining_units: Option<u64>) -> bool {
    remaining_cost.map_or(true, |r| task.expected_cost() <= r + COST_EPSILON)
        && remaining_units.map_or(true, |r| task.budget.max_units <= r)
}

/// Blockers plus every pool task they transitively depend on.
fn blocker_closure<'a>(pool: &BTreeMap<&'a str, &'a TaskDefinition>) -> HashSet<&'a str> {
    let mut required = HashSet::new();
    let mut stack: Vec<&str> = pool.values().filter(|t| t.is_blocker()).map(|t| t.id.as_str()).collect();
    while let Some(id) = stack.pop() {
        let Some((key, task)) = pool.get_key_value(id) else {
            continue;
        };
        if !required.insert(*key) {
            continue;
        }
        stack.extend(task.dependencies.iter().map(String::as_str));
    }
    required
}

/// Drop pool tasks whose dependencies can no longer be satisfied, until stable.
fn prune_unreachable<'a>(
    pool: &mut BTreeMap<&'a str, &'a TaskDefinition>,
    dead: &mut HashSet<&'a str>,
    candidate_ids: &HashSet<&str>,
    completed: &HashSet<TaskId>,
    result: &mut SelectionResult,
) {
    loop {
        let mut removed = Vec::new();
        for (id, task) in pool.iter() {
            for dep in &task.dependencies {
                if completed.contains(dep) {
                    continue;
                }
                if dead.contains(dep.as_str()) {
                    removed.push((*id, SkipReason::DependencyNotSelected { dependency: dep.clone() }));
                    break;
                }
                if !candidate_ids.contains(dep.as_str()) {
                    removed.push((*id, SkipReason::MissingDependency { dependency: dep.clone() }));
                    break;
                }
            }
        }
        if removed.is_empty() {
            return;
        }
        for (id, reason) in removed {
            pool.remove(id);
            dead.insert(id);
            skip(result, id, reason);
        }
    }
}

/// Kahn's algorithm over the pool; returns the sorted cycle members, if any.
fn find_cycle(pool: &BTreeMap<&str, &TaskDefinition>) -> Option<Vec<TaskId>> {
    let mut indegree: HashMap<&str, usize> = pool.keys().map(|id| (*id, 0)).collect();
    let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
    for (id, task) in pool {
        for dep in task.dependencies.iter().filter(|d| pool.contains_key(d.as_str())) {
            *indegree.entry(*id).or_insert(0) += 1;
            outgoing.entry(dep.as_str()).or_default().push(*id);
        }
    }

    let mut queue: VecDeque<&str> = indegree
        .iter()
        .filter_map(|(id, deg)| (*deg == 0).then_some(*id))
        .collect();
    let mut visited = 0usize;
    while let Some(node) = queue.pop_front() {
        visited += 1;
        for succ in outgoing.get(node).into_iter().flatten() {
            if let Some(entry) = indegree.get_mut(succ) {
                *entry = entry.saturating_sub(1);
                if *entry == 0 {
                    queue.push_back(*succ);
                }
            }
        }
    }
    if visited == pool.len() {
        return None;
    }

    // Unresolved nodes include those merely downstream of a cycle. Peel off
    // nodes with no unresolved successor until only cycle members remain.
    let mut unresolved: BTreeSet<&str> = indegree
        .into_iter()
        .filter_map(|(id, deg)| (deg > 0).then_some(id))
        .collect();
    loop {
        let sinks: Vec<&str> = unresolved
            .iter()
            .copied()
            .filter(|id| {
                !outgoing
                    .get(id)
                    .into_iter()
                    .flatten()
                    .any(|succ| unresolved.contains(succ))
            })
            .collect();
        if sinks.is_empty() {
            break;
        }
        for s in sinks {
            unresolved.remove(s);
        }
    }
    Some(unresolved.into_iter().map(String::from).collect())
}
