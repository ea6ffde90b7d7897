pub mod condition;
pub mod dag;
pub mod definition;
pub mod task;
pub mod worker;
pub mod workflow;

pub use condition::{Condition, ConditionEnv, Expr, PredicateRegistry};
pub use dag::TaskGraph;
pub use definition::{TaskDefinition, WorkflowDefinition};
pub use task::{Context, ResourceRequirements, Task, TaskId, TaskStatus, TaskType};
pub use worker::{WorkerDirectory, WorkerId, WorkerRegistry};
pub use workflow::{
    CoordinationStrategy, ErrorKind, ExecutionMode, FatalKind, Workflow, WorkflowError,
    WorkflowId, WorkflowStatus,
};
