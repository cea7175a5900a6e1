//! Execution context - flags and variable layers fixed for one invocation

use crate::config::JakeConfig;
use crate::hasher::HashStrategy;
use crate::scheduler::FailurePolicy;
use std::collections::HashMap;
use std::path::PathBuf;

/// Read-only after construction; shared by every worker thread
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub root: PathBuf,
    pub dry_run: bool,
    pub verbose: bool,
    pub watching: bool,
    /// Auto-confirm `@confirm` prompts
    pub yes: bool,
    pub jobs: usize,
    pub failure_policy: FailurePolicy,
    pub shell: Option<String>,
    pub cache_dir: PathBuf,
    pub hash: HashStrategy,
    pub max_content_hash_files: usize,
    /// Process environment (plus anything the loader merged in)
    pub env: HashMap<String, String>,
    /// `name=value` assignments from the command line
    pub params: HashMap<String, String>,
}

impl ExecutionContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dry_run: false,
            verbose: false,
            watching: false,
            yes: false,
            jobs: 1,
            failure_policy: FailurePolicy::Branch,
            shell: None,
            cache_dir: PathBuf::from(".jake"),
            hash: HashStrategy::Content,
            max_content_hash_files: 4096,
            env: std::env::vars().collect(),
            params: HashMap::new(),
        }
    }

    pub fn from_config(root: impl Into<PathBuf>, config: &JakeConfig) -> Self {
        Self {
            jobs: config.jobs.max(1),
            shell: config.shell.clone(),
            cache_dir: PathBuf::from(&config.cache_dir),
            hash: config.hash,
            max_content_hash_files: config.max_content_hash_files,
            failure_policy: if config.fail_fast {
                FailurePolicy::Halt
            } else {
                FailurePolicy::Branch
            },
            ..Self::new(root)
        }
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    pub fn verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    pub fn watching(mut self, enabled: bool) -> Self {
        self.watching = enabled;
        self
    }

    pub fn yes(mut self, enabled: bool) -> Self {
        self.yes = enabled;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn env_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }
}
