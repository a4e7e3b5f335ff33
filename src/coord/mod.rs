// src/coord/mod.rs

//! Workflow coordination: request validation, executor lifecycles, status
//! reporting and final result assembly.

pub mod coordinator;
pub mod request;
pub mod result;
pub mod status;

pub use coordinator::Coordinator;
pub use request::{CoordinatorSettings, RequestOverrides, WorkflowRequest};
pub use result::{AssembledDocument, DocumentSection, assemble, count_words};
pub use status::{TaskFailure, WorkflowStatusReport};
