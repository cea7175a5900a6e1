//! Recipe data model
//!
//! This is what the loader hands to the engine: names are already unique and
//! namespace-prefixed, and every `@`-directive has been decided into a closed
//! [`Node`] variant. The engine never re-parses strings to find directives.

use crate::error::{JakeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipeKind {
    #[default]
    Task,
    File,
    Simple,
}

/// A recipe parameter; `default: None` means the parameter is required
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(default)]
    pub default: Option<String>,
}

/// `@needs cmd [hint]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub command: String,
    #[serde(default)]
    pub hint: Option<String>,
}

/// Predicate evaluated by `@if` / `@elif`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "fn", content = "args")]
pub enum Predicate {
    /// Variable is set and not one of `""`, `0`, `false`, `no`, `off`
    Env(String),
    Eq(String, String),
    Neq(String, String),
    Exists(String),
    Command(String),
    Os(String),
    Arch(String),
    DryRun,
    Verbose,
    Watching,
}

/// One entry of a command list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Node {
    Shell {
        line: String,
        /// Command-scoped `@ignore`
        #[serde(default)]
        ignore: bool,
        /// Do not echo the command before running it
        #[serde(default)]
        silent: bool,
    },
    If {
        predicate: Predicate,
    },
    Elif {
        predicate: Predicate,
    },
    Else,
    End,
    /// `@each a b c` or `@each src/*.c`; the body runs once per item with `{{item}}` bound
    Each {
        items: String,
    },
    Export {
        name: String,
        #[serde(default)]
        value: Option<String>,
    },
    Cd {
        dir: String,
    },
    Confirm {
        message: String,
    },
}

impl Node {
    pub fn shell(line: impl Into<String>) -> Self {
        Node::Shell {
            line: line.into(),
            ignore: false,
            silent: false,
        }
    }

    pub fn ignored(line: impl Into<String>) -> Self {
        Node::Shell {
            line: line.into(),
            ignore: true,
            silent: false,
        }
    }
}

/// A hook body. Hooks are plain command lists and cannot declare hooks themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    pub commands: Vec<Node>,
}

impl Hook {
    pub fn new(commands: Vec<Node>) -> Self {
        Self { commands }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSet {
    #[serde(default)]
    pub pre: Vec<Hook>,
    #[serde(default)]
    pub post: Vec<Hook>,
    #[serde(default)]
    pub on_error: Vec<Hook>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetedHookKind {
    Before,
    After,
    OnError,
}

/// `@before name`, `@after name` and `@on_error name` declared outside the recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetedHook {
    pub recipe: String,
    pub kind: TargetedHookKind,
    pub commands: Vec<Node>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub name: String,
    #[serde(default)]
    pub kind: RecipeKind,
    /// Output path of a File recipe
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub file_deps: Vec<String>,
    /// `@cache` inputs; a Task recipe is only cacheable when this is non-empty
    #[serde(default)]
    pub cache_inputs: Vec<String>,
    /// `@watch` patterns, only consulted in watch mode
    #[serde(default)]
    pub watch: Vec<String>,
    #[serde(default)]
    pub commands: Vec<Node>,
    #[serde(default)]
    pub hooks: HookSet,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub needs: Vec<Requirement>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Platform guard: the recipe only runs on these OS names
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub quiet: bool,
    /// Recipe-scoped `@ignore`
    #[serde(default)]
    pub ignore_errors: bool,
    /// Per-recipe timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl Recipe {
    pub fn new(name: impl Into<String>, kind: RecipeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Default::default()
        }
    }

    pub fn task(name: impl Into<String>) -> Self {
        Self::new(name, RecipeKind::Task)
    }

    /// A File recipe whose identity is `output`
    pub fn file(output: impl Into<String>) -> Self {
        let output = output.into();
        Self {
            output: Some(output.clone()),
            ..Self::new(output, RecipeKind::File)
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_file_deps<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_deps.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn cached_on<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache_inputs.extend(inputs.into_iter().map(Into::into));
        self
    }

    pub fn run(mut self, line: impl Into<String>) -> Self {
        self.commands.push(Node::shell(line));
        self
    }

    pub fn node(mut self, node: Node) -> Self {
        self.commands.push(node);
        self
    }

    pub fn is_private(&self) -> bool {
        self.name.starts_with('_')
    }

    pub fn is_file(&self) -> bool {
        self.kind == RecipeKind::File
    }

    /// Patterns whose fingerprint decides whether this recipe can be skipped
    pub fn inputs(&self) -> Vec<String> {
        let mut inputs = Vec::new();
        if self.is_file() {
            inputs.extend(self.file_deps.iter().cloned());
        }
        for input in &self.cache_inputs {
            if !inputs.contains(input) {
                inputs.push(input.clone());
            }
        }
        inputs
    }

    /// Literal text of everything this recipe runs, used to invalidate task caches on edit
    pub fn command_text(&self) -> String {
        serde_json::to_string(&self.commands).unwrap_or_default()
    }

    pub fn matches_platform(&self) -> bool {
        self.platforms.is_empty()
            || self
                .platforms
                .iter()
                .any(|p| platform_matches(p, std::env::consts::OS))
    }
}

/// Accepts the usual aliases for the current OS name
pub fn platform_matches(wanted: &str, os: &str) -> bool {
    let wanted = wanted.to_ascii_lowercase();
    match wanted.as_str() {
        "macos" | "darwin" | "osx" => os == "macos",
        "unix" => os != "windows",
        other => other == os,
    }
}

/// Parsed project: recipes plus the process-wide pieces that surround them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jakefile {
    #[serde(default)]
    pub recipes: Vec<Recipe>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    /// Global `@export`s applied to every child process
    #[serde(default)]
    pub exports: BTreeMap<String, String>,
    #[serde(default)]
    pub hooks: HookSet,
    #[serde(default)]
    pub targeted_hooks: Vec<TargetedHook>,
    #[serde(default)]
    pub default_recipe: Option<String>,
}

impl Jakefile {
    pub fn new(recipes: Vec<Recipe>) -> Self {
        Self {
            recipes,
            ..Default::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| JakeError::Load {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        Self::from_json(&content).map_err(|e| match e {
            JakeError::Load { source, .. } => JakeError::Load {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| JakeError::Load {
            path: "<manifest>".into(),
            source: e.into(),
        })
    }

    /// Find a recipe by name or alias
    pub fn find(&self, name: &str) -> Option<&Recipe> {
        self.recipes
            .iter()
            .find(|r| r.name == name)
            .or_else(|| self.recipes.iter().find(|r| r.aliases.iter().any(|a| a == name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.recipes
            .iter()
            .flat_map(|r| std::iter::once(r.name.as_str()).chain(r.aliases.iter().map(String::as_str)))
    }

    pub fn targeted(&self, recipe: &str, kind: TargetedHookKind) -> impl Iterator<Item = &TargetedHook> {
        let recipe = recipe.to_string();
        self.targeted_hooks
            .iter()
            .filter(move |h| h.kind == kind && h.recipe == recipe)
    }
}
