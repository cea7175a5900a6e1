//! Jake Core - Recipe Execution Engine
//!
//! Features:
//! - Dependency resolution with cycle paths and "did you mean" suggestions
//! - Parallel scheduler on OS threads (counter + ready-queue)
//! - Incremental cache: BLAKE3 content fingerprints, mtime fallback
//! - Directive interpreter (`@if`/`@elif`/`@else`, `@each`, `@export`, ...)
//! - `{{var}}` and `{{func(arg)}}` expansion over a layered scope
//! - Global, targeted and per-recipe hooks
//! - Parallel file hashing with Rayon, .gitignore-aware directory walks

pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod env;
pub mod error;
pub mod globs;
pub mod graph;
pub mod hasher;
pub mod interpreter;
pub mod recipe;
pub mod runner;
pub mod scheduler;
pub mod suggest;

pub use cache::{Cache, CacheEntry, CacheInputs, CacheKey, CacheStats};
pub use config::JakeConfig;
pub use context::ExecutionContext;
pub use engine::{Engine, PlanStep, RunReport};
pub use env::Scope;
pub use error::{ErrorKind, JakeError, Result};
pub use graph::{EdgeKind, RecipeGraph};
pub use hasher::{Fingerprint, HashStrategy, Hasher};
pub use interpreter::{DeclineAll, Interpreter, Prompter};
pub use recipe::{
    Hook, HookSet, Jakefile, Node, Param, Predicate, Recipe, RecipeKind, Requirement,
    TargetedHook, TargetedHookKind,
};
pub use runner::{ShellOutcome, ShellRunner};
pub use scheduler::{FailurePolicy, Outcome, Scheduler, SkipReason, TaskResult, TaskStatus};
