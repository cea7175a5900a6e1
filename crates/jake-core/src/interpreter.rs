//! Directive interpreter
//!
//! Walks a command list with a program counter and an explicit stack of
//! frames, one per open `@if` or `@each`. A line runs only when the top frame
//! is live; a frame can only be live if its parent was. Block structure is
//! checked up front so the walk itself never meets an unmatched `@end`.

use crate::context::ExecutionContext;
use crate::env::{is_truthy, ExpandError, Scope};
use crate::error::{JakeError, Result};
use crate::globs;
use crate::recipe::{platform_matches, Node, Predicate, Recipe};
use crate::runner::ShellRunner;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, warn};

/// Name `@each` binds the current item to
pub const LOOP_VAR: &str = "item";

/// Answers `@confirm` prompts when `--yes` is not set
pub trait Prompter: Send + Sync {
    fn confirm(&self, message: &str) -> bool;
}

/// Non-interactive default: every prompt is declined
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclineAll;

impl Prompter for DeclineAll {
    fn confirm(&self, message: &str) -> bool {
        warn!(message, "no prompter attached, declining");
        false
    }
}

enum Frame {
    Branch {
        live: bool,
        satisfied: bool,
        parent_live: bool,
    },
    Loop {
        items: Vec<String>,
        index: usize,
        body: usize,
    },
}

impl Frame {
    fn is_live(&self) -> bool {
        match self {
            Frame::Branch { live, .. } => *live,
            // Dead loops are jumped over, never pushed
            Frame::Loop { .. } => true,
        }
    }
}

/// For every `@if`/`@each` at index i, the index of its `@end`
pub fn match_blocks(recipe: &str, nodes: &[Node]) -> Result<Vec<Option<usize>>> {
    let malformed = |index: usize, reason: &str| JakeError::MalformedBlock {
        recipe: recipe.to_string(),
        index,
        reason: reason.to_string(),
    };

    let mut ends = vec![None; nodes.len()];
    let mut open: Vec<(usize, bool)> = Vec::new();

    for (i, node) in nodes.iter().enumerate() {
        match node {
            Node::If { .. } => open.push((i, true)),
            Node::Each { .. } => open.push((i, false)),
            Node::Elif { .. } | Node::Else => match open.last() {
                Some((_, true)) => {}
                Some((_, false)) => return Err(malformed(i, "@elif/@else inside @each")),
                None => return Err(malformed(i, "@elif/@else without @if")),
            },
            Node::End => match open.pop() {
                Some((start, _)) => ends[start] = Some(i),
                None => return Err(malformed(i, "@end without @if or @each")),
            },
            _ => {}
        }
    }

    match open.last() {
        Some((start, _)) => Err(malformed(*start, "block is never closed with @end")),
        None => Ok(ends),
    }
}

/// Executes command lists for one recipe invocation
pub struct Interpreter<'a> {
    recipe: &'a Recipe,
    ctx: &'a ExecutionContext,
    runner: &'a ShellRunner,
    prompter: &'a dyn Prompter,
    scope: Scope,
    exports: BTreeMap<String, String>,
    base_dir: PathBuf,
    cwd: PathBuf,
    deadline: Option<Instant>,
    executed: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        recipe: &'a Recipe,
        ctx: &'a ExecutionContext,
        runner: &'a ShellRunner,
        prompter: &'a dyn Prompter,
        scope: Scope,
    ) -> Self {
        let base_dir = match &recipe.working_dir {
            Some(dir) => ctx.root.join(dir),
            None => ctx.root.clone(),
        };
        Self {
            recipe,
            ctx,
            runner,
            prompter,
            scope,
            exports: BTreeMap::new(),
            cwd: base_dir.clone(),
            base_dir,
            deadline: recipe
                .timeout
                .map(|secs| Instant::now() + std::time::Duration::from_secs(secs)),
            executed: 0,
        }
    }

    /// Seed the child-process environment (global `@export`s)
    pub fn with_exports(mut self, exports: BTreeMap<String, String>) -> Self {
        self.exports = exports;
        self
    }

    pub fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }

    /// Lift the recipe deadline; error hooks run after it may have passed
    pub fn clear_deadline(&mut self) {
        self.deadline = None;
    }

    /// Shell commands spawned so far
    pub fn commands_run(&self) -> usize {
        self.executed
    }

    /// Run one command list. `@cd` lasts until the end of the list;
    /// `@export` lasts for the rest of the recipe, hooks included.
    pub fn run(&mut self, nodes: &[Node]) -> Result<()> {
        let ends = match_blocks(&self.recipe.name, nodes)?;
        let mut stack: Vec<Frame> = Vec::new();
        self.cwd = self.base_dir.clone();

        let result = self.walk(nodes, &ends, &mut stack);
        for frame in &stack {
            if let Frame::Loop { .. } = frame {
                self.scope.unbind();
            }
        }
        result
    }

    fn walk(
        &mut self,
        nodes: &[Node],
        ends: &[Option<usize>],
        stack: &mut Vec<Frame>,
    ) -> Result<()> {
        let mut pc = 0;

        while pc < nodes.len() {
            let live = stack.last().map_or(true, Frame::is_live);

            match &nodes[pc] {
                Node::If { predicate } => {
                    let frame = if live {
                        let taken = self.evaluate(predicate)?;
                        Frame::Branch {
                            live: taken,
                            satisfied: taken,
                            parent_live: true,
                        }
                    } else {
                        Frame::Branch {
                            live: false,
                            satisfied: true,
                            parent_live: false,
                        }
                    };
                    stack.push(frame);
                }
                Node::Elif { predicate } => {
                    if let Some(Frame::Branch {
                        live,
                        satisfied,
                        parent_live,
                    }) = stack.last_mut()
                    {
                        if *parent_live && !*satisfied {
                            let taken = self.evaluate(predicate)?;
                            *live = taken;
                            *satisfied = taken;
                        } else {
                            *live = false;
                        }
                    }
                }
                Node::Else => {
                    if let Some(Frame::Branch {
                        live,
                        satisfied,
                        parent_live,
                    }) = stack.last_mut()
                    {
                        *live = *parent_live && !*satisfied;
                        *satisfied = true;
                    }
                }
                Node::End => match stack.last_mut() {
                    Some(Frame::Loop { items, index, body }) if *index + 1 < items.len() => {
                        *index += 1;
                        self.scope.unbind();
                        self.scope.bind(LOOP_VAR, items[*index].clone());
                        pc = *body;
                        continue;
                    }
                    Some(Frame::Loop { .. }) => {
                        self.scope.unbind();
                        stack.pop();
                    }
                    _ => {
                        stack.pop();
                    }
                },
                Node::Each { items } => {
                    let end = ends[pc].unwrap_or(nodes.len());
                    if !live {
                        pc = end + 1;
                        continue;
                    }
                    let items = self.each_items(items)?;
                    debug!(recipe = %self.recipe.name, count = items.len(), "@each");
                    let Some(first) = items.first().cloned() else {
                        pc = end + 1;
                        continue;
                    };
                    self.scope.bind(LOOP_VAR, first);
                    stack.push(Frame::Loop {
                        items,
                        index: 0,
                        body: pc + 1,
                    });
                }
                _ if !live => {}
                Node::Shell {
                    line,
                    ignore,
                    silent,
                } => self.shell(line, *ignore, *silent)?,
                Node::Export { name, value } => {
                    let value = match value {
                        Some(value) => self.expand(value)?,
                        None => self
                            .variable(name)
                            .ok_or_else(|| self.expansion_error(ExpandError::Undefined(name.clone())))?,
                    };
                    debug!(recipe = %self.recipe.name, name, "@export");
                    self.exports.insert(name.clone(), value);
                }
                Node::Cd { dir } => {
                    let dir = self.expand(dir)?;
                    let target = self.cwd.join(&dir);
                    if !target.is_dir() {
                        return Err(self.expansion_error_msg(format!(
                            "@cd target '{}' is not a directory",
                            dir
                        )));
                    }
                    self.cwd = target;
                }
                Node::Confirm { message } => {
                    let message = self.expand(message)?;
                    if !self.ctx.yes && !self.prompter.confirm(&message) {
                        return Err(JakeError::Declined {
                            recipe: self.recipe.name.clone(),
                        });
                    }
                }
            }
            pc += 1;
        }
        Ok(())
    }

    fn shell(&mut self, line: &str, ignore: bool, silent: bool) -> Result<()> {
        let command = self.expand(line)?;
        let timeout = match self.deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Err(self.timed_out(command));
                }
                Some(left)
            }
            None => None,
        };

        if !(silent || self.recipe.quiet) {
            println!("$ {}", command);
        }

        let outcome = self.runner.run(&command, &self.cwd, &self.exports, timeout)?;
        self.executed += 1;

        if outcome.timed_out {
            return Err(self.timed_out(command));
        }
        if outcome.success() {
            return Ok(());
        }
        if ignore || self.recipe.ignore_errors {
            warn!(
                recipe = %self.recipe.name,
                command,
                code = ?outcome.code,
                "command failed, ignored"
            );
            return Ok(());
        }
        Err(JakeError::CommandFailed {
            recipe: self.recipe.name.clone(),
            command,
            code: outcome.code,
        })
    }

    fn evaluate(&self, predicate: &Predicate) -> Result<bool> {
        let result = match predicate {
            Predicate::Env(name) => self.variable(name).is_some_and(|v| is_truthy(&v)),
            Predicate::Eq(name, value) => {
                self.variable(name).unwrap_or_default() == self.expand(value)?
            }
            Predicate::Neq(name, value) => {
                self.variable(name).unwrap_or_default() != self.expand(value)?
            }
            Predicate::Exists(path) => self.cwd.join(self.expand(path)?).exists(),
            Predicate::Command(name) => which::which(self.expand(name)?).is_ok(),
            Predicate::Os(name) => platform_matches(&self.expand(name)?, std::env::consts::OS),
            Predicate::Arch(name) => arch_matches(&self.expand(name)?, std::env::consts::ARCH),
            Predicate::DryRun => self.ctx.dry_run,
            Predicate::Verbose => self.ctx.verbose,
            Predicate::Watching => self.ctx.watching,
        };
        debug!(recipe = %self.recipe.name, ?predicate, result, "predicate");
        Ok(result)
    }

    /// The scope chain first, then `@export`ed values
    fn variable(&self, name: &str) -> Option<String> {
        self.scope
            .lookup(name)
            .or_else(|| self.exports.get(name).map(String::as_str))
            .map(str::to_string)
    }

    fn each_items(&self, raw: &str) -> Result<Vec<String>> {
        let expanded = self.expand(raw)?;
        let mut items = Vec::new();
        for token in expanded
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
        {
            if globs::is_pattern(token) {
                items.extend(
                    globs::expand(&self.cwd, token)
                        .into_iter()
                        .map(|p| p.to_string_lossy().into_owned()),
                );
            } else {
                items.push(token.to_string());
            }
        }
        Ok(items)
    }

    fn expand(&self, template: &str) -> Result<String> {
        self.scope
            .expand(template)
            .map_err(|e| self.expansion_error(e))
    }

    fn expansion_error(&self, error: ExpandError) -> JakeError {
        self.expansion_error_msg(error.to_string())
    }

    fn expansion_error_msg(&self, message: String) -> JakeError {
        JakeError::Expansion {
            recipe: self.recipe.name.clone(),
            message,
        }
    }

    fn timed_out(&self, command: String) -> JakeError {
        JakeError::TimedOut {
            recipe: self.recipe.name.clone(),
            command,
            seconds: self.recipe.timeout.unwrap_or_default(),
        }
    }
}

fn arch_matches(wanted: &str, arch: &str) -> bool {
    let wanted = wanted.to_ascii_lowercase();
    match wanted.as_str() {
        "amd64" | "x64" => arch == "x86_64",
        "arm64" => arch == "aarch64",
        other => other == arch,
    }
}
