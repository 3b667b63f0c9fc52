//! Dependency resolver: turns the active intents of a turn into an
//! execution plan of independent and dependent tasks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::agents::task::AgentTask;
use crate::error::PlanningError;
use crate::intent::{EntityType, Intent, IntentCatalog, IntentType};

/// Tasks for one turn. Built fresh every turn, never persisted.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    /// Tasks with no prerequisites, in intent detection order.
    pub independent_tasks: Vec<AgentTask>,
    /// Tasks with prerequisites, in topological order.
    pub dependent_tasks: Vec<AgentTask>,
}

impl ExecutionPlan {
    pub fn task_count(&self) -> usize {
        self.independent_tasks.len() + self.dependent_tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_count() == 0
    }

    /// All tasks, independent first.
    pub fn tasks(&self) -> impl Iterator<Item = &AgentTask> {
        self.independent_tasks.iter().chain(self.dependent_tasks.iter())
    }

    pub fn task_ids(&self) -> Vec<Uuid> {
        self.tasks().map(|t| t.id).collect()
    }
}

/// Check a dependency graph: every dependency known, no cycles, at most two
/// levels (a dependency may not itself have dependencies).
pub fn validate_dependency_graph(
    edges: &[(IntentType, Vec<IntentType>)],
) -> Result<(), PlanningError> {
    let deps: HashMap<IntentType, &Vec<IntentType>> =
        edges.iter().map(|(t, d)| (*t, d)).collect();

    for (intent, dependencies) in edges {
        for dependency in dependencies {
            if !deps.contains_key(dependency) {
                return Err(PlanningError::MissingDependency {
                    intent: *intent,
                    dependency: *dependency,
                });
            }
        }
    }

    let mut finished: HashSet<IntentType> = HashSet::new();
    for (intent, _) in edges {
        let mut path = Vec::new();
        find_cycle(*intent, &deps, &mut path, &mut finished)?;
    }

    for (intent, dependencies) in edges {
        for dependency in dependencies {
            if deps.get(dependency).is_some_and(|d| !d.is_empty()) {
                return Err(PlanningError::TooDeep {
                    intent: *intent,
                    dependency: *dependency,
                });
            }
        }
    }

    Ok(())
}

fn find_cycle(
    node: IntentType,
    deps: &HashMap<IntentType, &Vec<IntentType>>,
    path: &mut Vec<IntentType>,
    finished: &mut HashSet<IntentType>,
) -> Result<(), PlanningError> {
    if finished.contains(&node) {
        return Ok(());
    }
    if let Some(start) = path.iter().position(|n| *n == node) {
        let mut cycle = path[start..].to_vec();
        cycle.push(node);
        return Err(PlanningError::Cycle { path: cycle });
    }

    path.push(node);
    if let Some(next) = deps.get(&node) {
        for dependency in next.iter() {
            find_cycle(*dependency, deps, path, finished)?;
        }
    }
    path.pop();
    finished.insert(node);
    Ok(())
}

/// Builds one `AgentTask` per active intent and partitions them.
pub struct DependencyResolver {
    catalog: Arc<IntentCatalog>,
    default_timeout: Duration,
}

impl DependencyResolver {
    pub fn new(catalog: Arc<IntentCatalog>, default_timeout: Duration) -> Self {
        Self {
            catalog,
            default_timeout,
        }
    }

    /// Plan the given intents. Edges come only from each intent's declared
    /// dependencies; an invalid graph fails the whole turn.
    pub fn resolve(
        &self,
        intents: &[Intent],
        entities: &BTreeMap<EntityType, String>,
    ) -> Result<ExecutionPlan, PlanningError> {
        if intents.is_empty() {
            return Err(PlanningError::EmptyPlan);
        }

        let mut seen = HashSet::new();
        for intent in intents {
            if !seen.insert(intent.intent_type) {
                return Err(PlanningError::DuplicateIntent(intent.intent_type));
            }
        }

        let edges: Vec<(IntentType, Vec<IntentType>)> = intents
            .iter()
            .map(|i| (i.intent_type, i.dependencies.clone()))
            .collect();
        validate_dependency_graph(&edges)?;

        let mut tasks: Vec<AgentTask> = intents.iter().map(|i| self.build_task(i, entities)).collect();
        let ids: HashMap<IntentType, Uuid> = tasks.iter().map(|t| (t.intent_type, t.id)).collect();
        for (task, intent) in tasks.iter_mut().zip(intents) {
            task.dependencies = intent
                .dependencies
                .iter()
                .filter_map(|d| ids.get(d).copied())
                .collect();
        }

        let (independent_tasks, mut remaining): (Vec<_>, Vec<_>) =
            tasks.into_iter().partition(|t| t.dependencies.is_empty());

        // Stable topological pass over the dependent set.
        let mut placed: HashSet<Uuid> = independent_tasks.iter().map(|t| t.id).collect();
        let mut dependent_tasks = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let next = remaining
                .iter()
                .position(|t| t.dependencies.iter().all(|d| placed.contains(d)));
            match next {
                Some(index) => {
                    let task = remaining.remove(index);
                    placed.insert(task.id);
                    dependent_tasks.push(task);
                }
                None => {
                    return Err(PlanningError::Cycle {
                        path: remaining.iter().map(|t| t.intent_type).collect(),
                    });
                }
            }
        }

        tracing::debug!(
            independent = independent_tasks.len(),
            dependent = dependent_tasks.len(),
            "Execution plan resolved"
        );

        Ok(ExecutionPlan {
            independent_tasks,
            dependent_tasks,
        })
    }

    fn build_task(&self, intent: &Intent, entities: &BTreeMap<EntityType, String>) -> AgentTask {
        let spec = self.catalog.get(intent.intent_type);
        let timeout = spec
            .and_then(|s| s.timeout())
            .unwrap_or(self.default_timeout);
        let mut task = AgentTask::new(
            intent.intent_type,
            self.catalog.label(intent.intent_type),
            timeout,
        );
        task.confidence = intent.confidence;
        task.input_payload = intent
            .relevant_entities()
            .filter_map(|e| entities.get(&e).map(|v| (e, v.clone())))
            .collect();
        task
    }
}
