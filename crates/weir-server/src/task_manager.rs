use std::collections::BTreeMap;
use std::sync::Arc;
use weir_alert::TopicStore;
use weir_common::types::{Dbrp, TaskStatus, TaskType};
use weir_dsl::compile::{compile, CompiledGraph};
use weir_dsl::parse::parse;
use weir_dsl::vars::{declared_vars, materialize, DeclaredVar, VarType, VarValue, Vars};
use weir_dsl::{CompileEnv, ScriptError};
use weir_runtime::TaskRuntime;
use weir_storage::{StorageError, TaskRow, TemplateRow, WeirStore};
use weir_udf::UdfSpec;

/// Errors surfaced by task and template operations, mapped onto HTTP
/// statuses at the API edge.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl From<StorageError> for TaskError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { entity, id } => {
                TaskError::NotFound(format!("no {entity} exists with ID {id:?}"))
            }
            StorageError::AlreadyExists { entity, id } => {
                TaskError::Conflict(format!("a {entity} already exists for ID {id:?}"))
            }
            other => TaskError::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TaskError>;

#[derive(Debug, Clone, Default)]
pub struct CreateTaskOptions {
    pub id: String,
    pub task_type: Option<TaskType>,
    pub template_id: Option<String>,
    pub dbrps: Vec<Dbrp>,
    pub script: String,
    pub vars: Vars,
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTaskOptions {
    pub new_id: Option<String>,
    pub task_type: Option<TaskType>,
    pub template_id: Option<String>,
    pub dbrps: Option<Vec<Dbrp>>,
    pub script: Option<String>,
    pub vars: Option<Vars>,
    pub status: Option<TaskStatus>,
}

/// A task record joined with its runtime view.
#[derive(Debug, Clone)]
pub struct TaskDetails {
    pub row: TaskRow,
    pub dot: String,
    pub executing: bool,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct TemplateDetails {
    pub row: TemplateRow,
    pub dot: String,
    pub vars: BTreeMap<String, DeclaredVar>,
}

/// Owns task and template records and their lifecycle transitions.
///
/// All mutation paths validate and compile before anything is persisted, so
/// a failed operation leaves every record as it was.
pub struct TaskManager {
    store: Arc<WeirStore>,
    runtime: Arc<TaskRuntime>,
    topics: Arc<TopicStore>,
    compile_env: CompileEnv,
    udf_specs: BTreeMap<String, UdfSpec>,
}

impl TaskManager {
    pub fn new(
        store: Arc<WeirStore>,
        runtime: Arc<TaskRuntime>,
        topics: Arc<TopicStore>,
        compile_env: CompileEnv,
        udf_specs: BTreeMap<String, UdfSpec>,
    ) -> Self {
        Self {
            store,
            runtime,
            topics,
            compile_env,
            udf_specs,
        }
    }

    // ---- compilation helpers ----

    fn compile_script(&self, script: &str, vars: &Vars) -> std::result::Result<CompiledGraph, ScriptError> {
        let program = parse(script)?;
        let program = materialize(&program, vars)?;
        compile(&program, &self.compile_env)
    }

    fn compile_for_task(&self, row: &TaskRow) -> Result<CompiledGraph> {
        let vars: Vars = serde_json::from_str(&row.vars)
            .map_err(|e| TaskError::Internal(format!("corrupt task vars: {e}")))?;
        self.compile_script(&row.script, &vars)
            .map_err(|e| TaskError::Validation(format!("invalid TICKscript: {e}")))
    }

    /// Placeholder values for a template's declared vars, used to validate
    /// templates that have no bound values yet.
    fn placeholder_vars(script: &str) -> Vars {
        let mut vars = Vars::new();
        let Ok(program) = parse(script) else {
            return vars;
        };
        for (name, typ, _default) in program.declared_vars() {
            let Some(typ) = typ.and_then(VarType::from_name) else {
                continue;
            };
            let value = match typ {
                VarType::Bool => serde_json::json!(false),
                VarType::Int => serde_json::json!(1),
                VarType::Float => serde_json::json!(1.0),
                VarType::Duration => serde_json::json!("1s"),
                VarType::String => serde_json::json!("placeholder"),
                VarType::Regex => serde_json::json!(".*"),
                VarType::Lambda => serde_json::json!("TRUE"),
                VarType::List => serde_json::json!([]),
                VarType::Star => serde_json::Value::Null,
            };
            vars.insert(
                name.to_string(),
                VarValue {
                    var_type: typ,
                    value,
                    description: None,
                },
            );
        }
        vars
    }

    // ---- tasks ----

    pub async fn create_task(&self, opts: CreateTaskOptions) -> Result<TaskDetails> {
        weir_common::id::validate_id("task", &opts.id).map_err(TaskError::Validation)?;
        if opts.dbrps.is_empty() {
            return Err(TaskError::Validation(
                "must specify at least one database and retention policy".to_string(),
            ));
        }

        let (task_type, script) = match &opts.template_id {
            Some(template_id) => {
                let template = self.store.get_template(template_id).map_err(|e| match e {
                    StorageError::NotFound { .. } => TaskError::Validation(format!(
                        "unknown template {template_id:?}"
                    )),
                    other => other.into(),
                })?;
                (template.task_type, template.script)
            }
            None => {
                let task_type = opts.task_type.ok_or_else(|| {
                    TaskError::Validation("must specify task type".to_string())
                })?;
                if opts.script.trim().is_empty() {
                    return Err(TaskError::Validation(
                        "must provide TICKscript".to_string(),
                    ));
                }
                (task_type, opts.script.clone())
            }
        };

        let row = TaskRow {
            id: opts.id.clone(),
            task_type,
            dbrps: opts.dbrps.clone(),
            script,
            template_id: opts.template_id.clone(),
            vars: serde_json::to_string(&opts.vars)
                .map_err(|e| TaskError::Internal(e.to_string()))?,
            status: TaskStatus::Disabled,
            error: String::new(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        // Compile before persisting anything.
        let graph = self.compile_for_task(&row)?;
        let declared_type = graph.task_type;
        if declared_type != task_type {
            return Err(TaskError::Validation(format!(
                "task type mismatch: declared {task_type}, script defines a {declared_type} source"
            )));
        }
        self.store.create_task(&row)?;

        if opts.status == Some(TaskStatus::Enabled) {
            if let Err(e) = self.enable_task(&opts.id).await {
                // Leave the task created but disabled, surfacing the error.
                let _ = self
                    .store
                    .set_task_status(&opts.id, TaskStatus::Disabled, &e.to_string());
                return Err(e);
            }
        }
        self.get_task(&opts.id)
    }

    pub fn get_task(&self, id: &str) -> Result<TaskDetails> {
        let row = self.store.get_task(id)?;
        Ok(self.details(row))
    }

    fn details(&self, row: TaskRow) -> TaskDetails {
        let executing = self.runtime.is_executing(&row.id);
        let dot = match self.compile_for_task(&row) {
            Ok(graph) => {
                let stats = if executing {
                    self.runtime.stats(&row.id)
                } else {
                    None
                };
                weir_dsl::dot::render(&graph, &row.id, stats.as_ref())
            }
            Err(e) => format!("// {e}"),
        };
        let error = self
            .runtime
            .get(&row.id)
            .and_then(|t| t.failure())
            .unwrap_or_else(|| row.error.clone());
        TaskDetails {
            row,
            dot,
            executing,
            error,
        }
    }

    pub fn list_tasks(&self, pattern: &str, offset: usize, limit: usize) -> Result<Vec<TaskDetails>> {
        let rows = self.store.list_tasks()?;
        Ok(rows
            .into_iter()
            .filter(|row| pattern.is_empty() || glob_match::glob_match(pattern, &row.id))
            .skip(offset)
            .take(if limit == 0 { usize::MAX } else { limit })
            .map(|row| self.details(row))
            .collect())
    }

    pub async fn update_task(&self, id: &str, opts: UpdateTaskOptions) -> Result<TaskDetails> {
        let mut row = self.store.get_task(id)?;
        let was_enabled = row.status == TaskStatus::Enabled;

        if let Some(new_id) = &opts.new_id {
            if new_id != id {
                weir_common::id::validate_id("task", new_id).map_err(TaskError::Validation)?;
            }
        }
        if let Some(dbrps) = &opts.dbrps {
            if dbrps.is_empty() {
                return Err(TaskError::Validation(
                    "must specify at least one database and retention policy".to_string(),
                ));
            }
            row.dbrps = dbrps.clone();
        }
        if let Some(task_type) = opts.task_type {
            row.task_type = task_type;
        }
        if let Some(template_id) = &opts.template_id {
            let template = self.store.get_template(template_id)?;
            row.template_id = Some(template_id.clone());
            row.script = template.script;
            row.task_type = template.task_type;
        }
        if let Some(script) = &opts.script {
            if row.template_id.is_some() && opts.template_id.is_none() {
                return Err(TaskError::Validation(
                    "cannot update TICKscript of a template task".to_string(),
                ));
            }
            row.script = script.clone();
        }
        if let Some(vars) = &opts.vars {
            row.vars =
                serde_json::to_string(vars).map_err(|e| TaskError::Internal(e.to_string()))?;
        }

        // Validate the updated definition before touching storage.
        self.compile_for_task(&row)?;

        let renamed = match &opts.new_id {
            Some(new_id) if new_id != id => {
                self.store.rename_task(id, new_id)?;
                row.id = new_id.clone();
                true
            }
            _ => false,
        };
        if renamed && was_enabled {
            // The executing instance still carries the old ID; restart it
            // under the new one.
            self.runtime.stop_task(id).await;
        }
        self.store.update_task(&row)?;

        let target_status = opts.status.unwrap_or(row.status);
        match (was_enabled, target_status) {
            (false, TaskStatus::Enabled) => self.enable_task(&row.id).await?,
            (true, TaskStatus::Disabled) => self.disable_task(&row.id).await?,
            (true, TaskStatus::Enabled) => {
                // Definition may have changed; reload the running instance.
                self.runtime.stop_task(&row.id).await;
                self.enable_task(&row.id).await?;
            }
            (false, TaskStatus::Disabled) => {}
        }
        self.get_task(&row.id)
    }

    pub async fn delete_task(&self, id: &str) -> Result<()> {
        if self.runtime.is_executing(id) {
            self.runtime.stop_task(id).await;
        }
        // Anonymous topics die with the task, persisted state included.
        let prefix = format!("main:{id}:");
        for topic in self.store.list_topics_with_events()? {
            if topic.starts_with(&prefix) {
                self.topics
                    .delete(&topic)
                    .map_err(|e| TaskError::Internal(e.to_string()))?;
            }
        }
        for topic in self.topics.list(&format!("main:{id}:*")) {
            self.topics
                .delete(&topic)
                .map_err(|e| TaskError::Internal(e.to_string()))?;
        }
        self.store.delete_task(id)?;
        Ok(())
    }

    async fn enable_task(&self, id: &str) -> Result<()> {
        let row = self.store.get_task(id)?;
        let graph = self.compile_for_task(&row)?;
        self.runtime
            .start_task(id, row.task_type, row.dbrps.clone(), graph, &self.udf_specs)
            .await
            .map_err(|e| TaskError::Validation(e.to_string()))?;
        self.store.set_task_status(id, TaskStatus::Enabled, "")?;
        Ok(())
    }

    async fn disable_task(&self, id: &str) -> Result<()> {
        self.runtime.stop_task(id).await;
        self.store.set_task_status(id, TaskStatus::Disabled, "")?;
        Ok(())
    }

    /// Restores runtime state after a restart: re-enables every task whose
    /// persisted status is enabled. Topic state is registered before any
    /// data is admitted.
    pub async fn startup(&self) -> Result<()> {
        // Non-anonymous topics with persisted events come back first.
        for topic in self.store.list_topics_with_events()? {
            if !topic.starts_with("main:") {
                self.topics
                    .register(&topic)
                    .map_err(|e| TaskError::Internal(e.to_string()))?;
            }
        }
        for row in self.store.list_tasks()? {
            if row.status == TaskStatus::Enabled {
                if let Err(e) = self.enable_task(&row.id).await {
                    tracing::error!(task = %row.id, error = %e, "failed to re-enable task at startup");
                    let _ = self
                        .store
                        .set_task_status(&row.id, TaskStatus::Enabled, &e.to_string());
                }
            }
        }
        Ok(())
    }

    pub fn num_tasks(&self) -> u64 {
        self.store.count_tasks().unwrap_or(0)
    }

    pub fn num_enabled_tasks(&self) -> u64 {
        self.store.count_enabled_tasks().unwrap_or(0)
    }

    // ---- templates ----

    pub fn create_template(
        &self,
        id: &str,
        task_type: TaskType,
        script: &str,
    ) -> Result<TemplateDetails> {
        weir_common::id::validate_id("template", id).map_err(TaskError::Validation)?;
        let vars = Self::placeholder_vars(script);
        self.compile_script(script, &vars)
            .map_err(|e| TaskError::Validation(format!("invalid TICKscript: {e}")))?;
        let row = TemplateRow {
            id: id.to_string(),
            task_type,
            script: script.to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        self.store.create_template(&row)?;
        self.get_template(id)
    }

    pub fn get_template(&self, id: &str) -> Result<TemplateDetails> {
        let row = self.store.get_template(id)?;
        Ok(self.template_details(row))
    }

    fn template_details(&self, row: TemplateRow) -> TemplateDetails {
        let vars = parse(&row.script)
            .map(|program| declared_vars(&program))
            .unwrap_or_default();
        let placeholder = Self::placeholder_vars(&row.script);
        let dot = match self.compile_script(&row.script, &placeholder) {
            Ok(graph) => weir_dsl::dot::render(&graph, &row.id, None),
            Err(e) => format!("// {e}"),
        };
        TemplateDetails { row, dot, vars }
    }

    pub fn list_templates(&self, pattern: &str, offset: usize, limit: usize) -> Result<Vec<TemplateDetails>> {
        let rows = self.store.list_templates()?;
        Ok(rows
            .into_iter()
            .filter(|row| pattern.is_empty() || glob_match::glob_match(pattern, &row.id))
            .skip(offset)
            .take(if limit == 0 { usize::MAX } else { limit })
            .map(|row| self.template_details(row))
            .collect())
    }

    /// Updates a template. A script change stages a recompile of every
    /// linked task; the first failure aborts the whole update with no
    /// record modified.
    pub async fn update_template(
        &self,
        id: &str,
        new_id: Option<&str>,
        task_type: Option<TaskType>,
        script: Option<&str>,
    ) -> Result<TemplateDetails> {
        let mut row = self.store.get_template(id)?;
        if let Some(task_type) = task_type {
            row.task_type = task_type;
            if script.is_none() {
                self.store.update_template_and_tasks(&row, &[])?;
            }
        }

        if let Some(script) = script {
            let vars = Self::placeholder_vars(script);
            self.compile_script(script, &vars)
                .map_err(|e| TaskError::Validation(format!("invalid TICKscript: {e}")))?;

            // Stage: every linked task must compile against the new source.
            let linked = self.store.list_tasks_by_template(id)?;
            for task in &linked {
                let task_vars: Vars = serde_json::from_str(&task.vars)
                    .map_err(|e| TaskError::Internal(format!("corrupt task vars: {e}")))?;
                if let Err(e) = self.compile_script(script, &task_vars) {
                    return Err(TaskError::Validation(format!(
                        "error reloading associated task {}: {e}",
                        task.id
                    )));
                }
            }

            row.script = script.to_string();
            let task_scripts: Vec<(String, String)> = linked
                .iter()
                .map(|t| (t.id.clone(), script.to_string()))
                .collect();
            self.store.update_template_and_tasks(&row, &task_scripts)?;

            // Reload executing linked tasks against the new source.
            for task in &linked {
                if self.runtime.is_executing(&task.id) {
                    self.runtime.stop_task(&task.id).await;
                    if let Err(e) = self.enable_task(&task.id).await {
                        tracing::error!(task = %task.id, error = %e, "failed to reload task after template update");
                        let _ = self.store.set_task_status(
                            &task.id,
                            TaskStatus::Enabled,
                            &e.to_string(),
                        );
                    }
                }
            }
        }

        if let Some(new_id) = new_id {
            if new_id != id {
                weir_common::id::validate_id("template", new_id).map_err(TaskError::Validation)?;
                self.store.rename_template(id, new_id)?;
                return self.get_template(new_id);
            }
        }
        self.get_template(&row.id)
    }

    pub fn delete_template(&self, id: &str) -> Result<()> {
        let linked = self.store.list_tasks_by_template(id)?;
        if !linked.is_empty() {
            return Err(TaskError::Validation(format!(
                "cannot delete template {id:?}: {} task(s) are associated with it",
                linked.len()
            )));
        }
        self.store.delete_template(id)?;
        Ok(())
    }

    /// Compiles the task's current definition, for callers that need the
    /// graph (replays).
    pub fn compiled_graph(&self, id: &str) -> Result<(TaskRow, CompiledGraph)> {
        let row = self.store.get_task(id)?;
        let graph = self.compile_for_task(&row)?;
        Ok((row, graph))
    }
}
