//! Task graph construction

use std::collections::HashMap;
use std::path::Path;

use glob::Pattern;
use tracing::{debug, info};

use lazyrepo_core::config::ExecutionMode;
use lazyrepo_core::project::Workspace;
use lazyrepo_core::{Project, RunScope};

use crate::task::{task_command, RequestedTask, ScheduledTask, TaskConfig, TaskKey, TaskStatus};

/// Errors during graph construction
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Cyclic dependency detected
    #[error("Cyclic task dependency: {0}")]
    CyclicDependency(String),

    /// A task has no command to run
    #[error("Script '{script}' has no command in workspace {dir}")]
    UnknownScript { script: String, dir: String },

    /// The project root has no package manifest to attach top-level tasks to
    #[error("Project root has no package manifest")]
    MissingRootManifest,

    /// An output pattern reaches outside the project root
    #[error("Output pattern '{pattern}' of script '{script}' escapes the project root")]
    OutputEscapesRoot { script: String, pattern: String },
}

/// The expanded set of task nodes with a topologically ordered key list.
///
/// The order list is the post-order of the dependency DFS, so every
/// dependency precedes its dependents; the scheduler uses it to break ties
/// deterministically.
#[derive(Debug)]
pub struct TaskGraph {
    nodes: HashMap<TaskKey, ScheduledTask>,
    order: Vec<TaskKey>,
}

impl TaskGraph {
    /// Expand the requested tasks into a full task graph
    pub fn build(project: &Project, requests: &[RequestedTask]) -> Result<Self, GraphError> {
        let mut builder = GraphBuilder {
            project,
            nodes: HashMap::new(),
            order: Vec::new(),
        };

        for request in requests {
            let targets =
                builder.resolve_targets(&request.script, &request.filter_paths)?;
            let mut path = Vec::new();
            for workspace in targets {
                builder.visit(
                    &request.script,
                    workspace,
                    &request.extra_args,
                    request.force,
                    &mut path,
                )?;
            }
        }

        info!(task_count = builder.nodes.len(), "task graph built");
        Ok(Self {
            nodes: builder.nodes,
            order: builder.order,
        })
    }

    /// All nodes, keyed by task key
    pub fn nodes(&self) -> &HashMap<TaskKey, ScheduledTask> {
        &self.nodes
    }

    /// Get a task node
    pub fn get(&self, key: &TaskKey) -> Option<&ScheduledTask> {
        self.nodes.get(key)
    }

    /// Get a task node mutably (scheduler only)
    pub fn get_mut(&mut self, key: &TaskKey) -> Option<&mut ScheduledTask> {
        self.nodes.get_mut(key)
    }

    /// Keys in topological order (dependencies first)
    pub fn order(&self) -> &[TaskKey] {
        &self.order
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no tasks
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Human-readable execution plan in topological order
    pub fn execution_plan(&self) -> String {
        let mut plan = String::new();
        for key in &self.order {
            if let Some(node) = self.nodes.get(key) {
                let deps: Vec<String> = node.deps.iter().map(|d| d.key.to_string()).collect();
                if deps.is_empty() {
                    plan.push_str(&format!("  {} -> {}\n", key, node.command));
                } else {
                    plan.push_str(&format!(
                        "  {} -> {} (after: {})\n",
                        key,
                        node.command,
                        deps.join(", ")
                    ));
                }
            }
        }
        plan
    }
}

struct GraphBuilder<'a> {
    project: &'a Project,
    nodes: HashMap<TaskKey, ScheduledTask>,
    order: Vec<TaskKey>,
}

impl<'a> GraphBuilder<'a> {
    /// Resolve the workspaces a script request targets.
    ///
    /// Top-level scripts target only the root workspace. Everything else
    /// matches the filter paths against workspace directories and keeps
    /// workspaces that declare the script.
    fn resolve_targets(
        &self,
        script: &str,
        filter_paths: &[String],
    ) -> Result<Vec<&'a Workspace>, GraphError> {
        if self.project.is_top_level_script(script) {
            let root = self
                .project
                .root_workspace()
                .map_err(|_| GraphError::MissingRootManifest)?;
            return Ok(vec![root]);
        }

        Ok(self
            .project
            .workspaces_by_dir()
            .values()
            .filter(|w| matches_filter(&w.dir, filter_paths, self.project.root()))
            .filter(|w| w.has_script(script))
            .collect())
    }

    /// Depth-first visit producing the task node for (script, workspace).
    ///
    /// Cycle detection is path-based: a key re-encountered on the current
    /// visitation path is a cycle, while a key merely present in the node
    /// map is already scheduled. The node map doubles as the visited set.
    fn visit(
        &mut self,
        script: &str,
        workspace: &'a Workspace,
        extra_args: &[String],
        force: bool,
        path: &mut Vec<TaskKey>,
    ) -> Result<TaskKey, GraphError> {
        let key = TaskKey::new(script, self.project.rel_dir(&workspace.dir));

        if self.nodes.contains_key(&key) {
            if path.contains(&key) {
                let start = path.iter().position(|k| *k == key).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[start..].iter().map(|k| k.to_string()).collect();
                cycle.push(key.to_string());
                return Err(GraphError::CyclicDependency(cycle.join(" -> ")));
            }
            return Ok(key);
        }

        let config = TaskConfig::resolve(self.project, workspace, script);
        validate_output_patterns(script, &config)?;

        let command =
            task_command(&config, workspace, script).ok_or_else(|| GraphError::UnknownScript {
                script: script.to_string(),
                dir: self.project.rel_dir(&workspace.dir),
            })?;

        debug!(task = %key, "scheduling task");
        self.nodes.insert(
            key.clone(),
            ScheduledTask {
                key: key.clone(),
                workspace_dir: workspace.dir.clone(),
                script: script.to_string(),
                command,
                extra_args: extra_args.to_vec(),
                force,
                config: config.clone(),
                status: TaskStatus::Pending,
                deps: Vec::new(),
                output_files: Vec::new(),
                fingerprint: None,
            },
        );
        path.push(key.clone());

        let mut edges: Vec<(TaskKey, bool)> = Vec::new();

        for relation in &config.runs_after {
            let filter_paths = match relation.scope {
                RunScope::SelfOnly => vec![workspace.dir.to_string_lossy().to_string()],
                RunScope::SelfAndDependencies => {
                    let mut dirs = vec![workspace.dir.to_string_lossy().to_string()];
                    for dep_name in &workspace.local_deps {
                        if let Some(dep) = self.project.workspace_by_name(dep_name) {
                            dirs.push(dep.dir.to_string_lossy().to_string());
                        }
                    }
                    dirs
                }
                RunScope::All => Vec::new(),
            };

            let targets = self.resolve_targets(&relation.script, &filter_paths)?;
            for target in targets {
                let dep_key = self.visit(&relation.script, target, &[], force, path)?;
                edges.push((dep_key, relation.uses_output));
            }
        }

        if config.execution == ExecutionMode::Dependent {
            for dep_name in &workspace.local_deps {
                let Some(dep_ws) = self.project.workspace_by_name(dep_name) else {
                    continue;
                };
                if !dep_ws.has_script(script) {
                    continue;
                }
                let dep_key = self.visit(script, dep_ws, extra_args, force, path)?;
                edges.push((dep_key, config.uses_output_from_dependencies));
            }
        }

        path.pop();

        let node = self.nodes.get_mut(&key).expect("node was just inserted");
        for (dep_key, uses_output) in edges {
            node.add_dep(dep_key, uses_output);
        }

        // Post-order append: dependencies are already in the list.
        self.order.push(key.clone());
        Ok(key)
    }
}

/// Whether a workspace directory matches the request's filter paths.
///
/// Absolute patterns match directly, relative patterns are joined to the
/// project root; an empty filter matches everything.
fn matches_filter(dir: &Path, filter_paths: &[String], root: &Path) -> bool {
    if filter_paths.is_empty() {
        return true;
    }

    filter_paths.iter().any(|raw| {
        let full = if Path::new(raw).is_absolute() {
            raw.clone()
        } else {
            root.join(raw).to_string_lossy().to_string()
        };
        match Pattern::new(&full) {
            Ok(pattern) => pattern.matches_path(dir),
            Err(_) => Path::new(&full) == dir,
        }
    })
}

/// Reject output patterns that can only resolve outside the project root
fn validate_output_patterns(script: &str, config: &TaskConfig) -> Result<(), GraphError> {
    for pattern in &config.outputs {
        let rest = pattern.strip_prefix("<rootDir>/").unwrap_or(pattern);
        if rest.starts_with("..") {
            return Err(GraphError::OutputEscapesRoot {
                script: script.to_string(),
                pattern: pattern.clone(),
            });
        }
    }
    Ok(())
}
