//! Orchestration kernel: a dependency-aware scheduler and serialized merge
//! pipeline coordinating several parallel AI coding agents against one git
//! repository (spec.md §1-2).
//!
//! `domain` holds the pure types and narrow collaborator ports the kernel
//! depends on; `services` implements the components described in spec.md
//! §4 against those ports. `infrastructure` (binary-only) wires a concrete
//! tracing subscriber for the demonstration binary.

pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::{Event, EventPayload, OrchestratorError, OrchestratorResult, Task, TaskId, TaskStatus};
pub use services::{Orchestrator, OrchestratorConfig, OrchestratorDeps, Pool};
