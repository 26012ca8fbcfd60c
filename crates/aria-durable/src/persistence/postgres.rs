//! Postgres-backed [`ModelStore`], gated behind the `postgres` feature so
//! the in-memory store alone is enough to build and test this crate without
//! a database. Tables: `aria_nodes`, `aria_relationships`,
//! `aria_executions`, `aria_tasks`, `aria_plugins`, `aria_services`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::model::{
    Execution, ExecutionStatus, ExecutorKind, Interface, InvalidTransition, Node, NodeState,
    Plugin, Relationship, RunsOn, Service, StubType, Task, TaskStatus,
};

use super::store::{ModelStore, StoreError};

/// Owns a connection pool; migrations are applied by the embedding
/// application, not by this crate.
pub struct PostgresModelStore {
    pool: PgPool,
}

impl PostgresModelStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound(Uuid::nil()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

fn node_from_row(row: &sqlx::postgres::PgRow) -> Result<Node, StoreError> {
    let state: String = row.try_get("state").map_err(StoreError::from_sqlx)?;
    let interfaces_json: serde_json::Value =
        row.try_get("interfaces").map_err(StoreError::from_sqlx)?;
    let attributes_json: serde_json::Value =
        row.try_get("attributes").map_err(StoreError::from_sqlx)?;
    Ok(Node {
        id: row.try_get("id").map_err(StoreError::from_sqlx)?,
        service_id: row.try_get("service_id").map_err(StoreError::from_sqlx)?,
        node_type: row.try_get("node_type").map_err(StoreError::from_sqlx)?,
        state: parse_node_state(&state)?,
        interfaces: serde_json::from_value(interfaces_json).unwrap_or_default(),
        attributes: match attributes_json {
            serde_json::Value::Object(map) => map,
            _ => Default::default(),
        },
        host_id: row.try_get("host_id").map_err(StoreError::from_sqlx)?,
        version: row.try_get("version").map_err(StoreError::from_sqlx)?,
    })
}

fn parse_node_state(s: &str) -> Result<NodeState, StoreError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| StoreError::Backend(format!("invalid node state {s}: {e}")))
}

impl StoreError {
    fn from_sqlx(err: sqlx::Error) -> Self {
        err.into()
    }
}

#[async_trait]
impl ModelStore for PostgresModelStore {
    async fn get_node(&self, id: Uuid) -> Result<Node, StoreError> {
        let row = sqlx::query("SELECT * FROM aria_nodes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        node_from_row(&row)
    }

    async fn put_node(&self, mut node: Node) -> Result<Node, StoreError> {
        node.version = 0;
        sqlx::query(
            "INSERT INTO aria_nodes (id, service_id, node_type, state, interfaces, attributes, host_id, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(node.id)
        .bind(node.service_id)
        .bind(&node.node_type)
        .bind(node.state.to_string())
        .bind(serde_json::to_value(&node.interfaces).unwrap_or_default())
        .bind(serde_json::Value::Object(node.attributes.clone()))
        .bind(node.host_id)
        .bind(node.version)
        .execute(&self.pool)
        .await?;
        Ok(node)
    }

    async fn update_node(&self, node: Node) -> Result<Node, StoreError> {
        let expected = node.version;
        let result = sqlx::query(
            "UPDATE aria_nodes SET state = $1, attributes = $2, host_id = $3, version = version + 1
             WHERE id = $4 AND version = $5",
        )
        .bind(node.state.to_string())
        .bind(serde_json::Value::Object(node.attributes.clone()))
        .bind(node.host_id)
        .bind(node.id)
        .bind(expected)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            let current = self.get_node(node.id).await?;
            return Err(StoreError::VersionConflict {
                id: node.id,
                expected,
                found: current.version,
            });
        }
        self.get_node(node.id).await
    }

    async fn list_nodes(&self, service_id: Uuid) -> Result<Vec<Node>, StoreError> {
        let rows = sqlx::query("SELECT * FROM aria_nodes WHERE service_id = $1")
            .bind(service_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(node_from_row).collect()
    }

    async fn get_relationship(&self, id: Uuid) -> Result<Relationship, StoreError> {
        let row = sqlx::query("SELECT * FROM aria_relationships WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        relationship_from_row(&row)
    }

    async fn put_relationship(&self, mut relationship: Relationship) -> Result<Relationship, StoreError> {
        relationship.version = 0;
        sqlx::query(
            "INSERT INTO aria_relationships (id, service_id, source_id, target_id, interfaces, version)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(relationship.id)
        .bind(relationship.service_id)
        .bind(relationship.source_id)
        .bind(relationship.target_id)
        .bind(serde_json::to_value(&relationship.interfaces).unwrap_or_default())
        .bind(relationship.version)
        .execute(&self.pool)
        .await?;
        Ok(relationship)
    }

    async fn update_relationship(&self, relationship: Relationship) -> Result<Relationship, StoreError> {
        let expected = relationship.version;
        let result = sqlx::query(
            "UPDATE aria_relationships SET interfaces = $1, version = version + 1
             WHERE id = $2 AND version = $3",
        )
        .bind(serde_json::to_value(&relationship.interfaces).unwrap_or_default())
        .bind(relationship.id)
        .bind(expected)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            let current = self.get_relationship(relationship.id).await?;
            return Err(StoreError::VersionConflict {
                id: relationship.id,
                expected,
                found: current.version,
            });
        }
        self.get_relationship(relationship.id).await
    }

    async fn list_relationships(&self, service_id: Uuid) -> Result<Vec<Relationship>, StoreError> {
        let rows = sqlx::query("SELECT * FROM aria_relationships WHERE service_id = $1")
            .bind(service_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(relationship_from_row).collect()
    }

    async fn get_execution(&self, id: Uuid) -> Result<Execution, StoreError> {
        let row = sqlx::query("SELECT * FROM aria_executions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        execution_from_row(&row)
    }

    async fn put_execution(&self, mut execution: Execution) -> Result<Execution, StoreError> {
        execution.version = 0;
        sqlx::query(
            "INSERT INTO aria_executions
             (id, service_id, workflow_name, status, created_at, started_at, ended_at, inputs, error, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(execution.id)
        .bind(execution.service_id)
        .bind(&execution.workflow_name)
        .bind(execution.status.to_string())
        .bind(execution.created_at)
        .bind(execution.started_at)
        .bind(execution.ended_at)
        .bind(&execution.inputs)
        .bind(&execution.error)
        .bind(execution.version)
        .execute(&self.pool)
        .await?;
        Ok(execution)
    }

    async fn update_execution(&self, execution: Execution) -> Result<Execution, StoreError> {
        let current = self.get_execution(execution.id).await?;
        if current.status != execution.status && !current.status.can_transition_to(execution.status) {
            return Err(StoreError::IllegalTransition(InvalidTransition {
                from: current.status,
                to: execution.status,
            }));
        }
        let expected = execution.version;
        let result = sqlx::query(
            "UPDATE aria_executions SET status = $1, started_at = $2, ended_at = $3, error = $4,
             version = version + 1
             WHERE id = $5 AND version = $6",
        )
        .bind(execution.status.to_string())
        .bind(execution.started_at)
        .bind(execution.ended_at)
        .bind(&execution.error)
        .bind(execution.id)
        .bind(expected)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            let current = self.get_execution(execution.id).await?;
            return Err(StoreError::VersionConflict {
                id: execution.id,
                expected,
                found: current.version,
            });
        }
        self.get_execution(execution.id).await
    }

    async fn list_active_executions(&self, service_id: Uuid) -> Result<Vec<Execution>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM aria_executions WHERE service_id = $1
             AND status NOT IN ('succeeded', 'failed', 'cancelled')",
        )
        .bind(service_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(execution_from_row).collect()
    }

    async fn get_task(&self, id: Uuid) -> Result<Task, StoreError> {
        let row = sqlx::query("SELECT * FROM aria_tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        task_from_row(&row)
    }

    async fn put_task(&self, mut task: Task) -> Result<Task, StoreError> {
        task.version = 0;
        sqlx::query(
            "INSERT INTO aria_tasks
             (id, execution_id, actor_id, runs_on, interface_name, operation_name, function, arguments,
              plugin_id, status, due_at, started_at, ended_at, attempts_count, error, max_attempts,
              retry_interval_ms, ignore_failure, stub_type, executor_kind, dependencies, version)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22)",
        )
        .bind(task.id)
        .bind(task.execution_id)
        .bind(task.actor_id)
        .bind(runs_on_str(task.runs_on))
        .bind(&task.interface_name)
        .bind(&task.operation_name)
        .bind(&task.function)
        .bind(&task.arguments)
        .bind(task.plugin_id)
        .bind(task.status.to_string())
        .bind(task.due_at)
        .bind(task.started_at)
        .bind(task.ended_at)
        .bind(task.attempts_count as i32)
        .bind(&task.error)
        .bind(task.max_attempts)
        .bind(task.retry_interval.as_millis() as i64)
        .bind(task.ignore_failure)
        .bind(task.stub_type.map(stub_type_str))
        .bind(task.executor_kind.map(executor_kind_str))
        .bind(serde_json::to_value(&task.dependencies).unwrap_or_default())
        .bind(task.version)
        .execute(&self.pool)
        .await?;
        Ok(task)
    }

    async fn update_task(&self, task: Task) -> Result<Task, StoreError> {
        let expected = task.version;
        let result = sqlx::query(
            "UPDATE aria_tasks SET status = $1, due_at = $2, started_at = $3, ended_at = $4,
             attempts_count = $5, error = $6, version = version + 1
             WHERE id = $7 AND version = $8",
        )
        .bind(task.status.to_string())
        .bind(task.due_at)
        .bind(task.started_at)
        .bind(task.ended_at)
        .bind(task.attempts_count as i32)
        .bind(&task.error)
        .bind(task.id)
        .bind(expected)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            let current = self.get_task(task.id).await?;
            return Err(StoreError::VersionConflict {
                id: task.id,
                expected,
                found: current.version,
            });
        }
        self.get_task(task.id).await
    }

    async fn list_tasks(&self, execution_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query("SELECT * FROM aria_tasks WHERE execution_id = $1")
            .bind(execution_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn get_plugin(&self, id: Uuid) -> Result<Plugin, StoreError> {
        let row = sqlx::query("SELECT * FROM aria_plugins WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        plugin_from_row(&row)
    }

    async fn put_plugin(&self, plugin: Plugin) -> Result<Plugin, StoreError> {
        sqlx::query(
            "INSERT INTO aria_plugins (id, name, version, prefix) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(plugin.id)
        .bind(&plugin.name)
        .bind(&plugin.version)
        .bind(plugin.prefix.to_string_lossy().to_string())
        .execute(&self.pool)
        .await?;
        Ok(plugin)
    }

    async fn list_plugins(&self) -> Result<Vec<Plugin>, StoreError> {
        let rows = sqlx::query("SELECT * FROM aria_plugins")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(plugin_from_row).collect()
    }

    async fn get_service(&self, id: Uuid) -> Result<Service, StoreError> {
        let row = sqlx::query("SELECT * FROM aria_services WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        service_from_row(&row)
    }

    async fn put_service(&self, mut service: Service) -> Result<Service, StoreError> {
        service.version = 0;
        sqlx::query(
            "INSERT INTO aria_services (id, name, workflows, version) VALUES ($1, $2, $3, $4)",
        )
        .bind(service.id)
        .bind(&service.name)
        .bind(serde_json::to_value(&service.workflows).unwrap_or_default())
        .bind(service.version)
        .execute(&self.pool)
        .await?;
        Ok(service)
    }

    async fn update_service(&self, service: Service) -> Result<Service, StoreError> {
        let expected = service.version;
        let result = sqlx::query(
            "UPDATE aria_services SET name = $1, workflows = $2, version = version + 1
             WHERE id = $3 AND version = $4",
        )
        .bind(&service.name)
        .bind(serde_json::to_value(&service.workflows).unwrap_or_default())
        .bind(service.id)
        .bind(expected)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            let current = self.get_service(service.id).await?;
            return Err(StoreError::VersionConflict {
                id: service.id,
                expected,
                found: current.version,
            });
        }
        self.get_service(service.id).await
    }

    async fn get_service_by_name(&self, name: &str) -> Result<Option<Service>, StoreError> {
        let row = sqlx::query("SELECT * FROM aria_services WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(service_from_row).transpose()
    }

    async fn list_services(&self) -> Result<Vec<Service>, StoreError> {
        let rows = sqlx::query("SELECT * FROM aria_services").fetch_all(&self.pool).await?;
        rows.iter().map(service_from_row).collect()
    }
}

fn service_from_row(row: &sqlx::postgres::PgRow) -> Result<Service, StoreError> {
    let workflows_json: serde_json::Value = row.try_get("workflows").map_err(StoreError::from_sqlx)?;
    Ok(Service {
        id: row.try_get("id").map_err(StoreError::from_sqlx)?,
        name: row.try_get("name").map_err(StoreError::from_sqlx)?,
        workflows: serde_json::from_value(workflows_json).unwrap_or_default(),
        version: row.try_get("version").map_err(StoreError::from_sqlx)?,
    })
}

fn relationship_from_row(row: &sqlx::postgres::PgRow) -> Result<Relationship, StoreError> {
    let interfaces_json: serde_json::Value =
        row.try_get("interfaces").map_err(StoreError::from_sqlx)?;
    Ok(Relationship {
        id: row.try_get("id").map_err(StoreError::from_sqlx)?,
        service_id: row.try_get("service_id").map_err(StoreError::from_sqlx)?,
        source_id: row.try_get("source_id").map_err(StoreError::from_sqlx)?,
        target_id: row.try_get("target_id").map_err(StoreError::from_sqlx)?,
        interfaces: serde_json::from_value::<std::collections::HashMap<String, Interface>>(
            interfaces_json,
        )
        .unwrap_or_default(),
        version: row.try_get("version").map_err(StoreError::from_sqlx)?,
    })
}

fn execution_from_row(row: &sqlx::postgres::PgRow) -> Result<Execution, StoreError> {
    let status: String = row.try_get("status").map_err(StoreError::from_sqlx)?;
    Ok(Execution {
        id: row.try_get("id").map_err(StoreError::from_sqlx)?,
        service_id: row.try_get("service_id").map_err(StoreError::from_sqlx)?,
        workflow_name: row.try_get("workflow_name").map_err(StoreError::from_sqlx)?,
        status: parse_execution_status(&status)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(StoreError::from_sqlx)?,
        started_at: row.try_get("started_at").map_err(StoreError::from_sqlx)?,
        ended_at: row.try_get("ended_at").map_err(StoreError::from_sqlx)?,
        inputs: row.try_get("inputs").map_err(StoreError::from_sqlx)?,
        error: row.try_get("error").map_err(StoreError::from_sqlx)?,
        version: row.try_get("version").map_err(StoreError::from_sqlx)?,
    })
}

fn parse_execution_status(s: &str) -> Result<ExecutionStatus, StoreError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| StoreError::Backend(format!("invalid execution status {s}: {e}")))
}

fn task_from_row(row: &sqlx::postgres::PgRow) -> Result<Task, StoreError> {
    let status: String = row.try_get("status").map_err(StoreError::from_sqlx)?;
    let runs_on: String = row.try_get("runs_on").map_err(StoreError::from_sqlx)?;
    let stub_type: Option<String> = row.try_get("stub_type").map_err(StoreError::from_sqlx)?;
    let executor_kind: Option<String> = row.try_get("executor_kind").map_err(StoreError::from_sqlx)?;
    let dependencies_json: serde_json::Value =
        row.try_get("dependencies").map_err(StoreError::from_sqlx)?;
    let retry_interval_ms: i64 = row.try_get("retry_interval_ms").map_err(StoreError::from_sqlx)?;
    Ok(Task {
        id: row.try_get("id").map_err(StoreError::from_sqlx)?,
        execution_id: row.try_get("execution_id").map_err(StoreError::from_sqlx)?,
        actor_id: row.try_get("actor_id").map_err(StoreError::from_sqlx)?,
        runs_on: parse_runs_on(&runs_on)?,
        interface_name: row.try_get("interface_name").map_err(StoreError::from_sqlx)?,
        operation_name: row.try_get("operation_name").map_err(StoreError::from_sqlx)?,
        function: row.try_get("function").map_err(StoreError::from_sqlx)?,
        arguments: row.try_get("arguments").map_err(StoreError::from_sqlx)?,
        plugin_id: row.try_get("plugin_id").map_err(StoreError::from_sqlx)?,
        status: parse_task_status(&status)?,
        due_at: row.try_get("due_at").map_err(StoreError::from_sqlx)?,
        started_at: row.try_get("started_at").map_err(StoreError::from_sqlx)?,
        ended_at: row.try_get("ended_at").map_err(StoreError::from_sqlx)?,
        attempts_count: row.try_get::<i32, _>("attempts_count").map_err(StoreError::from_sqlx)? as u32,
        error: row.try_get("error").map_err(StoreError::from_sqlx)?,
        max_attempts: row.try_get("max_attempts").map_err(StoreError::from_sqlx)?,
        retry_interval: std::time::Duration::from_millis(retry_interval_ms as u64),
        ignore_failure: row.try_get("ignore_failure").map_err(StoreError::from_sqlx)?,
        stub_type: stub_type.map(|s| parse_stub_type(&s)).transpose()?,
        executor_kind: executor_kind.map(|s| parse_executor_kind(&s)).transpose()?,
        dependencies: serde_json::from_value(dependencies_json).unwrap_or_default(),
        version: row.try_get("version").map_err(StoreError::from_sqlx)?,
    })
}

fn plugin_from_row(row: &sqlx::postgres::PgRow) -> Result<Plugin, StoreError> {
    let prefix: String = row.try_get("prefix").map_err(StoreError::from_sqlx)?;
    Ok(Plugin {
        id: row.try_get("id").map_err(StoreError::from_sqlx)?,
        name: row.try_get("name").map_err(StoreError::from_sqlx)?,
        version: row.try_get("version").map_err(StoreError::from_sqlx)?,
        prefix: prefix.into(),
    })
}

fn runs_on_str(runs_on: RunsOn) -> &'static str {
    match runs_on {
        RunsOn::Node => "node",
        RunsOn::Source => "source",
        RunsOn::Target => "target",
    }
}

fn parse_runs_on(s: &str) -> Result<RunsOn, StoreError> {
    match s {
        "node" => Ok(RunsOn::Node),
        "source" => Ok(RunsOn::Source),
        "target" => Ok(RunsOn::Target),
        other => Err(StoreError::Backend(format!("invalid runs_on {other}"))),
    }
}

fn stub_type_str(stub_type: StubType) -> &'static str {
    match stub_type {
        StubType::StartWorkflow => "start_workflow",
        StubType::EndWorkflow => "end_workflow",
        StubType::StartSubworkflow => "start_subworkflow",
        StubType::EndSubworkflow => "end_subworkflow",
        StubType::Stub => "stub",
    }
}

fn parse_stub_type(s: &str) -> Result<StubType, StoreError> {
    match s {
        "start_workflow" => Ok(StubType::StartWorkflow),
        "end_workflow" => Ok(StubType::EndWorkflow),
        "start_subworkflow" => Ok(StubType::StartSubworkflow),
        "end_subworkflow" => Ok(StubType::EndSubworkflow),
        "stub" => Ok(StubType::Stub),
        other => Err(StoreError::Backend(format!("invalid stub_type {other}"))),
    }
}

fn executor_kind_str(kind: ExecutorKind) -> &'static str {
    match kind {
        ExecutorKind::Thread => "thread",
        ExecutorKind::Subprocess => "subprocess",
    }
}

fn parse_executor_kind(s: &str) -> Result<ExecutorKind, StoreError> {
    match s {
        "thread" => Ok(ExecutorKind::Thread),
        "subprocess" => Ok(ExecutorKind::Subprocess),
        other => Err(StoreError::Backend(format!("invalid executor_kind {other}"))),
    }
}

fn parse_task_status(s: &str) -> Result<TaskStatus, StoreError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| StoreError::Backend(format!("invalid task status {s}: {e}")))
}
