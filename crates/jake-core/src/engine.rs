//! Engine - resolve, schedule, interpret
//!
//! One `Engine` per invocation. It owns the cache for that invocation and
//! flushes it once after the scheduler drains. Structural problems come back
//! as `Err` before any command runs; everything that goes wrong inside a
//! recipe is reported per recipe in the [`RunReport`].

use crate::cache::{Cache, CacheInputs, CacheKey};
use crate::context::ExecutionContext;
use crate::env::Scope;
use crate::error::{JakeError, Result};
use crate::graph::{EdgeKind, RecipeGraph};
use crate::hasher::Hasher;
use crate::interpreter::{match_blocks, DeclineAll, Interpreter, Prompter};
use crate::recipe::{Jakefile, Node, Recipe, TargetedHookKind};
use crate::runner::ShellRunner;
use crate::scheduler::{Outcome, Scheduler, SkipReason, TaskResult, TaskStatus};
use std::borrow::Cow;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One line of a dry-run plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub recipe: String,
    pub would_execute: bool,
    pub skip: Option<SkipReason>,
}

/// Per-recipe outcome of one `run`
#[derive(Debug, Clone)]
pub struct RunReport {
    pub results: Vec<TaskResult>,
    pub duration: Duration,
    pub dry_run: bool,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.results.iter().all(|r| r.status.is_success())
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            1
        }
    }

    pub fn result(&self, name: &str) -> Option<&TaskResult> {
        self.results.iter().find(|r| r.name == name)
    }

    pub fn status(&self, name: &str) -> Option<TaskStatus> {
        self.result(name).map(|r| r.status)
    }

    /// Names of recipes whose commands actually ran
    pub fn executed(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.status == TaskStatus::Completed)
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskResult> {
        self.results
            .iter()
            .filter(|r| r.status == TaskStatus::Failed)
    }

    pub fn count(&self, matches: impl Fn(TaskStatus) -> bool) -> usize {
        self.results.iter().filter(|r| matches(r.status)).count()
    }
}

pub struct Engine<'a> {
    jakefile: &'a Jakefile,
    ctx: ExecutionContext,
    cache: Cache,
    runner: ShellRunner,
    prompter: Box<dyn Prompter>,
}

impl<'a> Engine<'a> {
    pub fn new(jakefile: &'a Jakefile, ctx: ExecutionContext) -> Self {
        let hasher = Hasher::new(&ctx.root)
            .strategy(ctx.hash)
            .max_content_files(ctx.max_content_hash_files);
        let cache = Cache::new(&ctx.root, &ctx.cache_dir, hasher);
        let runner = ShellRunner::new(ctx.shell.as_deref());
        Self {
            jakefile,
            ctx,
            cache,
            runner,
            prompter: Box::new(DeclineAll),
        }
    }

    pub fn with_prompter(mut self, prompter: Box<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    pub fn jakefile(&self) -> &'a Jakefile {
        self.jakefile
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// `default_recipe`, else the first public recipe
    pub fn default_targets(&self) -> Vec<String> {
        self.jakefile
            .default_recipe
            .clone()
            .or_else(|| {
                self.jakefile
                    .recipes
                    .iter()
                    .find(|r| !r.is_private())
                    .map(|r| r.name.clone())
            })
            .into_iter()
            .collect()
    }

    /// Build the graph and check every command list it will touch
    pub fn resolve<S: AsRef<str>>(&self, targets: &[S]) -> Result<RecipeGraph<'a>> {
        let graph = RecipeGraph::resolve(self.jakefile, targets)?;

        for recipe in graph.recipes() {
            check_blocks(&recipe.name, &recipe.commands)?;
            for hook in recipe
                .hooks
                .pre
                .iter()
                .chain(&recipe.hooks.post)
                .chain(&recipe.hooks.on_error)
            {
                check_blocks(&recipe.name, &hook.commands)?;
            }
        }
        let global = &self.jakefile.hooks;
        for hook in global.pre.iter().chain(&global.post).chain(&global.on_error) {
            check_blocks("<global hook>", &hook.commands)?;
        }
        for hook in &self.jakefile.targeted_hooks {
            check_blocks(&hook.recipe, &hook.commands)?;
        }

        Ok(graph)
    }

    /// Build order with what a real run would do for each recipe
    pub fn plan<S: AsRef<str>>(&self, targets: &[S]) -> Result<Vec<PlanStep>> {
        let graph = self.resolve(targets)?;
        Ok(self.plan_graph(&graph))
    }

    fn plan_graph(&self, graph: &RecipeGraph<'a>) -> Vec<PlanStep> {
        let mut would_execute = vec![false; graph.len()];
        let mut steps = Vec::with_capacity(graph.len());

        for idx in graph.topological_order() {
            let recipe = graph.recipe(idx);
            let mut skip = self.skip_reason(recipe);

            // An output about to be rebuilt makes its consumers stale too
            if skip == Some(SkipReason::UpToDate)
                && graph
                    .dependencies(idx)
                    .iter()
                    .any(|(dep, kind)| *kind == EdgeKind::File && would_execute[dep.index()])
            {
                skip = None;
            }

            would_execute[idx.index()] = skip.is_none();
            steps.push(PlanStep {
                recipe: recipe.name.clone(),
                would_execute: skip.is_none(),
                skip,
            });
        }
        steps
    }

    /// Resolve `targets` and run them. Dry runs report the plan instead.
    pub fn run<S: AsRef<str>>(&self, targets: &[S]) -> Result<RunReport> {
        let start = Instant::now();
        let graph = self.resolve(targets)?;
        let names: Vec<&str> = targets.iter().map(AsRef::as_ref).collect();
        info!(
            targets = ?names,
            recipes = graph.len(),
            jobs = self.ctx.jobs,
            dry_run = self.ctx.dry_run,
            "running"
        );

        let results = if self.ctx.dry_run {
            self.plan_graph(&graph)
                .into_iter()
                .map(|step| {
                    let status = match step.skip {
                        Some(reason) => TaskStatus::Skipped(reason),
                        None => TaskStatus::Planned,
                    };
                    TaskResult::new(step.recipe, status)
                })
                .collect()
        } else {
            let results = Scheduler::new(self.ctx.jobs)
                .failure_policy(self.ctx.failure_policy)
                .execute(&graph, |recipe| self.execute(recipe));
            if let Err(e) = self.cache.flush() {
                warn!(error = %e, "failed to write cache store");
            }
            results
        };

        Ok(RunReport {
            results,
            duration: start.elapsed(),
            dry_run: self.ctx.dry_run,
        })
    }

    /// Run a single recipe: guard, cache check, validation, hooks and body
    pub fn execute(&self, recipe: &Recipe) -> Result<Outcome> {
        if !recipe.matches_platform() {
            info!(recipe = %recipe.name, platforms = ?recipe.platforms, "not for this platform, skipping");
            return Ok(Outcome::Skipped(SkipReason::Platform));
        }

        let probe = cache_probe(recipe);
        if let Some((key, inputs)) = &probe {
            if !self.cache.is_stale(key, inputs) {
                info!(recipe = %recipe.name, "up to date");
                return Ok(Outcome::Skipped(SkipReason::UpToDate));
            }
        }

        let runner = match &recipe.shell {
            Some(shell) => Cow::Owned(ShellRunner::new(Some(shell))),
            None => Cow::Borrowed(&self.runner),
        };
        let mut interp = Interpreter::new(
            recipe,
            &self.ctx,
            &runner,
            self.prompter.as_ref(),
            self.scope_for(recipe),
        )
        .with_exports(self.jakefile.exports.clone());

        let start = Instant::now();
        match self
            .validate(recipe)
            .and_then(|()| self.run_stages(recipe, &mut interp))
        {
            Ok(()) => {
                if let Some((key, inputs)) = &probe {
                    self.cache.record(key, inputs);
                }
                if let Some(output) = recipe.output.as_deref().filter(|_| recipe.is_file()) {
                    if !self.ctx.root.join(output).exists() {
                        warn!(recipe = %recipe.name, output, "file recipe did not create its output");
                    }
                }
                info!(
                    recipe = %recipe.name,
                    commands = interp.commands_run(),
                    elapsed = ?start.elapsed(),
                    "recipe finished"
                );
                Ok(Outcome::Ran)
            }
            Err(e) => {
                self.run_error_hooks(recipe, &mut interp, &e);
                Err(e)
            }
        }
    }

    /// Recipes whose cache or watch patterns a watcher should observe
    pub fn watch_patterns<S: AsRef<str>>(&self, targets: &[S]) -> Result<Vec<String>> {
        let graph = self.resolve(targets)?;
        let mut patterns: Vec<String> = Vec::new();
        for recipe in graph.recipes() {
            for pattern in recipe
                .file_deps
                .iter()
                .chain(&recipe.cache_inputs)
                .chain(&recipe.watch)
            {
                if !patterns.contains(pattern) {
                    patterns.push(pattern.clone());
                }
            }
        }
        Ok(patterns)
    }

    pub fn clear_cache(&self) -> anyhow::Result<()> {
        self.cache.clear()
    }

    fn skip_reason(&self, recipe: &Recipe) -> Option<SkipReason> {
        if !recipe.matches_platform() {
            return Some(SkipReason::Platform);
        }
        match cache_probe(recipe) {
            Some((key, inputs)) if !self.cache.is_stale(&key, &inputs) => {
                Some(SkipReason::UpToDate)
            }
            _ => None,
        }
    }

    /// Globals, environment, then declared defaults overridden by `name=value`
    fn scope_for(&self, recipe: &Recipe) -> Scope {
        let mut params: HashMap<String, String> = recipe
            .params
            .iter()
            .filter_map(|p| p.default.clone().map(|d| (p.name.clone(), d)))
            .collect();
        params.extend(self.ctx.params.clone());

        Scope::new(
            self.jakefile.variables.clone(),
            self.ctx.env.clone(),
            &self.ctx.root,
        )
        .with_params(params)
    }

    fn validate(&self, recipe: &Recipe) -> Result<()> {
        for need in &recipe.needs {
            if which::which(&need.command).is_err() {
                return Err(JakeError::MissingCommand {
                    recipe: recipe.name.clone(),
                    command: need.command.clone(),
                    hint: need.hint.clone(),
                });
            }
        }
        for variable in &recipe.requires {
            let set = self.ctx.env.get(variable).is_some_and(|v| !v.is_empty());
            if !set {
                return Err(JakeError::MissingVariable {
                    recipe: recipe.name.clone(),
                    variable: variable.clone(),
                });
            }
        }
        for param in &recipe.params {
            if param.default.is_none() && !self.ctx.params.contains_key(&param.name) {
                return Err(JakeError::MissingParam {
                    recipe: recipe.name.clone(),
                    param: param.name.clone(),
                });
            }
        }
        Ok(())
    }

    fn run_stages(&self, recipe: &Recipe, interp: &mut Interpreter<'_>) -> Result<()> {
        let name = recipe.name.as_str();
        let hooks = &self.jakefile.hooks;

        for hook in &hooks.pre {
            interp.run(&hook.commands)?;
        }
        for hook in self.jakefile.targeted(name, TargetedHookKind::Before) {
            interp.run(&hook.commands)?;
        }
        for hook in &recipe.hooks.pre {
            interp.run(&hook.commands)?;
        }

        interp.run(&recipe.commands)?;

        for hook in &recipe.hooks.post {
            interp.run(&hook.commands)?;
        }
        for hook in self.jakefile.targeted(name, TargetedHookKind::After) {
            interp.run(&hook.commands)?;
        }
        for hook in &hooks.post {
            interp.run(&hook.commands)?;
        }
        Ok(())
    }

    /// Global first, then targeted, then the recipe's own. Failures here are
    /// logged; the original error is what gets reported.
    fn run_error_hooks(&self, recipe: &Recipe, interp: &mut Interpreter<'_>, error: &JakeError) {
        let name = recipe.name.as_str();
        let lists = self
            .jakefile
            .hooks
            .on_error
            .iter()
            .map(|h| &h.commands)
            .chain(
                self.jakefile
                    .targeted(name, TargetedHookKind::OnError)
                    .map(|h| &h.commands),
            )
            .chain(recipe.hooks.on_error.iter().map(|h| &h.commands));

        interp.clear_deadline();
        interp.scope_mut().set_param("error", error.to_string());
        for commands in lists {
            debug!(recipe = name, "running on_error hook");
            if let Err(e) = interp.run(commands) {
                warn!(recipe = name, error = %e, "on_error hook failed");
            }
        }
    }
}

fn check_blocks(owner: &str, nodes: &[Node]) -> Result<()> {
    match_blocks(owner, nodes).map(|_| ())
}

/// Cache key and inputs, or `None` when the recipe always runs
fn cache_probe(recipe: &Recipe) -> Option<(CacheKey, CacheInputs)> {
    if recipe.is_file() {
        let output = recipe.output.clone().unwrap_or_else(|| recipe.name.clone());
        return Some((
            CacheKey::Output(output),
            CacheInputs {
                patterns: recipe.inputs(),
                command_text: None,
            },
        ));
    }
    if recipe.cache_inputs.is_empty() {
        return None;
    }
    Some((
        CacheKey::Recipe(recipe.name.clone()),
        CacheInputs {
            patterns: recipe.inputs(),
            command_text: Some(recipe.command_text()),
        },
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::recipe::{Hook, Param, Requirement, TargetedHook};
    use std::fs;
    use tempfile::TempDir;

    fn log(dir: &TempDir) -> Vec<String> {
        fs::read_to_string(dir.path().join("log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn hook(line: &str) -> Hook {
        Hook::new(vec![Node::shell(line)])
    }

    #[test]
    fn test_hook_order_on_success() {
        let dir = TempDir::new().unwrap();
        let mut build = Recipe::task("build").run("echo body >> log");
        build.hooks.pre.push(hook("echo recipe-pre >> log"));
        build.hooks.post.push(hook("echo recipe-post >> log"));

        let mut jakefile = Jakefile::new(vec![build]);
        jakefile.hooks.pre.push(hook("echo global-pre >> log"));
        jakefile.hooks.post.push(hook("echo global-post >> log"));
        jakefile.targeted_hooks.push(TargetedHook {
            recipe: "build".into(),
            kind: TargetedHookKind::Before,
            commands: vec![Node::shell("echo before >> log")],
        });
        jakefile.targeted_hooks.push(TargetedHook {
            recipe: "build".into(),
            kind: TargetedHookKind::After,
            commands: vec![Node::shell("echo after >> log")],
        });

        let engine = Engine::new(&jakefile, ExecutionContext::new(dir.path()));
        let report = engine.run(&["build"]).unwrap();

        assert!(report.success());
        assert_eq!(
            log(&dir),
            [
                "global-pre",
                "before",
                "recipe-pre",
                "body",
                "recipe-post",
                "after",
                "global-post"
            ]
        );
    }

    #[test]
    fn test_on_error_hooks_after_failure() {
        let dir = TempDir::new().unwrap();
        let mut deploy = Recipe::task("deploy").run("exit 7").run("echo never >> log");
        deploy.hooks.post.push(hook("echo recipe-post >> log"));
        deploy.hooks.on_error.push(hook("echo recipe-on-error >> log"));

        let mut jakefile = Jakefile::new(vec![deploy]);
        jakefile.hooks.on_error.push(hook("echo global-on-error >> log"));
        jakefile.targeted_hooks.push(TargetedHook {
            recipe: "deploy".into(),
            kind: TargetedHookKind::OnError,
            commands: vec![Node::shell("echo targeted-on-error >> log")],
        });

        let engine = Engine::new(&jakefile, ExecutionContext::new(dir.path()));
        let report = engine.run(&["deploy"]).unwrap();

        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.status("deploy"), Some(TaskStatus::Failed));
        assert_eq!(
            log(&dir),
            ["global-on-error", "targeted-on-error", "recipe-on-error"]
        );
    }

    #[test]
    fn test_on_error_hooks_run_after_timeout() {
        let dir = TempDir::new().unwrap();
        let mut slow = Recipe::task("slow").run("sleep 3");
        slow.timeout = Some(1);
        slow.hooks.on_error.push(hook("echo handled >> log"));
        let mut jakefile = Jakefile::new(vec![slow]);
        jakefile.hooks.on_error.push(hook("echo global-handled >> log"));

        let report = Engine::new(&jakefile, ExecutionContext::new(dir.path()))
            .run(&["slow"])
            .unwrap();

        let result = report.result("slow").unwrap();
        assert_eq!(result.status, TaskStatus::Failed);
        assert!(result.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(log(&dir), ["global-handled", "handled"]);
    }

    #[test]
    fn test_error_message_visible_to_on_error_hooks() {
        let dir = TempDir::new().unwrap();
        let mut recipe = Recipe::task("x").run("exit 2");
        recipe
            .hooks
            .on_error
            .push(hook("echo \"{{error}}\" >> log"));
        let jakefile = Jakefile::new(vec![recipe]);

        Engine::new(&jakefile, ExecutionContext::new(dir.path()))
            .run(&["x"])
            .unwrap();
        assert_eq!(log(&dir), ["recipe 'x': command failed with exit code 2: exit 2"]);
    }

    #[test]
    fn test_validation_runs_before_commands() {
        let dir = TempDir::new().unwrap();
        let mut needs = Recipe::task("needs").run("echo ran >> log");
        needs.needs.push(Requirement {
            command: "definitely-not-a-real-command-jake".into(),
            hint: Some("cargo install it".into()),
        });
        let mut requires = Recipe::task("requires").run("echo ran >> log");
        requires.requires.push("JAKE_TEST_UNSET_VARIABLE".into());
        let jakefile = Jakefile::new(vec![needs, requires]);

        let engine = Engine::new(&jakefile, ExecutionContext::new(dir.path()));
        let report = engine.run(&["needs", "requires"]).unwrap();

        assert_eq!(report.count(|s| s == TaskStatus::Failed), 2);
        let needs = report.result("needs").unwrap();
        assert!(needs.error.as_deref().unwrap().contains("cargo install it"));
        assert!(log(&dir).is_empty());
    }

    #[test]
    fn test_params_defaults_and_assignments() {
        let dir = TempDir::new().unwrap();
        let mut greet = Recipe::task("greet").run("echo {{greeting}} {{name}} >> log");
        greet.params.push(Param {
            name: "greeting".into(),
            default: Some("hello".into()),
        });
        greet.params.push(Param {
            name: "name".into(),
            default: None,
        });
        let jakefile = Jakefile::new(vec![greet]);

        let missing = Engine::new(&jakefile, ExecutionContext::new(dir.path()))
            .run(&["greet"])
            .unwrap();
        let error = missing.result("greet").unwrap().error.clone().unwrap();
        assert!(error.contains("missing required parameter 'name'"));

        let ctx = ExecutionContext::new(dir.path()).param("name", "world");
        let report = Engine::new(&jakefile, ctx).run(&["greet"]).unwrap();
        assert!(report.success());
        assert_eq!(log(&dir), ["hello world"]);
    }

    #[test]
    fn test_platform_guard_skips() {
        let dir = TempDir::new().unwrap();
        let mut other = Recipe::task("other").run("echo ran >> log");
        other.platforms.push("plan9".into());
        let jakefile = Jakefile::new(vec![other]);

        let report = Engine::new(&jakefile, ExecutionContext::new(dir.path()))
            .run(&["other"])
            .unwrap();
        assert!(report.success());
        assert_eq!(
            report.status("other"),
            Some(TaskStatus::Skipped(SkipReason::Platform))
        );
        assert!(log(&dir).is_empty());
    }

    #[test]
    fn test_malformed_block_is_structural() {
        let dir = TempDir::new().unwrap();
        let jakefile = Jakefile::new(vec![
            Recipe::task("ok").run("echo ok >> log"),
            Recipe::task("bad").depends_on(["ok"]).node(Node::End),
        ]);

        let err = Engine::new(&jakefile, ExecutionContext::new(dir.path()))
            .run(&["bad"])
            .unwrap_err();
        assert!(err.is_structural());
        assert!(log(&dir).is_empty());
    }

    #[test]
    fn test_plan_propagates_along_file_edges() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("src.txt"), "v1").unwrap();
        let jakefile = Jakefile::new(vec![
            Recipe::file("mid.txt")
                .with_file_deps(["src.txt"])
                .run("cp src.txt mid.txt"),
            Recipe::file("out.txt")
                .with_file_deps(["mid.txt"])
                .run("cp mid.txt out.txt"),
        ]);

        let engine = Engine::new(&jakefile, ExecutionContext::new(dir.path()));
        assert!(engine.run(&["out.txt"]).unwrap().success());

        let engine = Engine::new(&jakefile, ExecutionContext::new(dir.path()));
        let plan = engine.plan(&["out.txt"]).unwrap();
        assert!(plan.iter().all(|step| !step.would_execute));

        fs::write(dir.path().join("src.txt"), "v2").unwrap();
        let plan = engine.plan(&["out.txt"]).unwrap();
        assert_eq!(
            plan.iter().map(|s| (s.recipe.as_str(), s.would_execute)).collect::<Vec<_>>(),
            [("mid.txt", true), ("out.txt", true)]
        );
    }

    #[test]
    fn test_default_targets() {
        let mut jakefile = Jakefile::new(vec![Recipe::task("_setup"), Recipe::task("build")]);
        let dir = TempDir::new().unwrap();
        assert_eq!(
            Engine::new(&jakefile, ExecutionContext::new(dir.path())).default_targets(),
            ["build"]
        );

        jakefile.default_recipe = Some("_setup".into());
        assert_eq!(
            Engine::new(&jakefile, ExecutionContext::new(dir.path())).default_targets(),
            ["_setup"]
        );
    }

    #[test]
    fn test_watch_patterns() {
        let dir = TempDir::new().unwrap();
        let mut serve = Recipe::task("serve").depends_on(["out.txt"]);
        serve.watch.push("static/**".into());
        let jakefile = Jakefile::new(vec![
            Recipe::file("out.txt").with_file_deps(["src/*.c"]),
            serve,
        ]);

        let engine = Engine::new(&jakefile, ExecutionContext::new(dir.path()));
        let mut patterns = engine.watch_patterns(&["serve"]).unwrap();
        patterns.sort();
        assert_eq!(patterns, ["src/*.c", "static/**"]);
    }
}
