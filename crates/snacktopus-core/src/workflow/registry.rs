//! Named workflow and activity functions.
//!
//! The registry is filled once at startup and then shared read-only with the
//! runtime behind an `Arc`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use super::context::{ActivityContext, WorkflowContext};
use super::error::{ActivityError, WorkflowError};

pub type WorkflowFn =
    Arc<dyn Fn(WorkflowContext, Option<Value>) -> BoxFuture<'static, Result<Value, WorkflowError>> + Send + Sync>;

pub type ActivityFn =
    Arc<dyn Fn(ActivityContext, Option<Value>) -> BoxFuture<'static, Result<Value, ActivityError>> + Send + Sync>;

#[derive(Default, Clone)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, WorkflowFn>,
    activities: HashMap<String, ActivityFn>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_workflow<F, Fut>(&mut self, name: &str, workflow: F) -> Result<(), WorkflowError>
    where
        F: Fn(WorkflowContext, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, WorkflowError>> + Send + 'static,
    {
        if self.workflows.contains_key(name) {
            return Err(WorkflowError::DuplicateRegistration {
                kind: "workflow",
                name: name.to_string(),
            });
        }
        let f: WorkflowFn = Arc::new(move |ctx, input| Box::pin(workflow(ctx, input)));
        self.workflows.insert(name.to_string(), f);
        tracing::debug!(workflow = name, "registered workflow");
        Ok(())
    }

    pub fn register_activity<F, Fut>(&mut self, name: &str, activity: F) -> Result<(), WorkflowError>
    where
        F: Fn(ActivityContext, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActivityError>> + Send + 'static,
    {
        if self.activities.contains_key(name) {
            return Err(WorkflowError::DuplicateRegistration {
                kind: "activity",
                name: name.to_string(),
            });
        }
        let f: ActivityFn = Arc::new(move |ctx, input| Box::pin(activity(ctx, input)));
        self.activities.insert(name.to_string(), f);
        tracing::debug!(activity = name, "registered activity");
        Ok(())
    }

    pub fn workflow(&self, name: &str) -> Option<WorkflowFn> {
        self.workflows.get(name).cloned()
    }

    pub fn activity(&self, name: &str) -> Option<ActivityFn> {
        self.activities.get(name).cloned()
    }

    /// Registered workflow names, sorted.
    pub fn workflow_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workflows.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered activity names, sorted.
    pub fn activity_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.activities.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("workflows", &self.workflow_names())
            .field("activities", &self.activity_names())
            .finish()
    }
}
