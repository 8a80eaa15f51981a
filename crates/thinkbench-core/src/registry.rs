use crate::error::EngineError;
use crate::task::Task;
use crate::tasks;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name → task lookup. Registration order is kept for listing.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    order: Vec<&'static str>,
    tasks: BTreeMap<&'static str, Arc<dyn Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for task in tasks::builtin() {
            registry.register(task);
        }
        registry
    }

    /// Adds a task, replacing any task already registered under its name.
    pub fn register(&mut self, task: Arc<dyn Task>) {
        let name = task.name();
        if self.tasks.insert(name, task).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Task>, EngineError> {
        self.tasks
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownTask {
                name: name.to_string(),
                available: self.order.join(", "),
            })
    }

    pub fn names(&self) -> &[&'static str] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_lists_all_tasks_in_order() {
        let registry = TaskRegistry::builtin();
        assert_eq!(registry.len(), 14);
        assert_eq!(registry.names()[0], "sorting");
        assert_eq!(registry.names()[13], "absolute_difference");
    }

    #[test]
    fn unknown_task_names_available_tasks() {
        let registry = TaskRegistry::builtin();
        let err = registry.get("cubing").err().expect("unknown");
        let message = err.to_string();
        assert!(message.contains("unknown task: cubing"));
        assert!(message.contains("median"));
    }

    #[test]
    fn re_registering_keeps_single_entry() {
        let mut registry = TaskRegistry::builtin();
        registry.register(Arc::new(crate::tasks::SumTask));
        assert_eq!(registry.len(), 14);
        assert_eq!(registry.get("sum").expect("sum").name(), "sum");
    }
}
