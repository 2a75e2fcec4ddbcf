//! sqlx错误分类
//!
//! - SQLite `SQLITE_BUSY`/`SQLITE_LOCKED`（含扩展码）与 PostgreSQL `40001`/`40P01` 属于瞬时写入冲突
//! - 注册表上的唯一约束冲突映射为 `Conflict`
//! - 投影插入上的唯一约束冲突说明另一个写者抢先插入了同一键，按瞬时冲突重试

use scheduler_core::SchedulerError;

const TRANSIENT_CODES: [&str; 7] = ["5", "6", "261", "262", "517", "40001", "40P01"];

fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().is_some_and(|code| {
            let code: &str = &code;
            TRANSIENT_CODES.contains(&code)
        }),
        _ => false,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// 唯一约束冲突涉及的列，无法判断时返回 "name"
fn violated_column(err: &sqlx::Error) -> &'static str {
    if let sqlx::Error::Database(db) = err {
        let constraint = db.constraint().unwrap_or_default();
        let message = db.message();
        if constraint.ends_with("task_key") || message.contains("periodic_task.task") {
            return "task";
        }
    }
    "name"
}

/// 一般存储错误，只区分瞬时冲突
pub fn storage_error(err: sqlx::Error) -> SchedulerError {
    if is_transient(&err) {
        return SchedulerError::TransientPersistence(err.to_string());
    }
    SchedulerError::Database(err)
}

/// 注册表写入错误
pub fn registry_error(err: sqlx::Error, name: &str, task: &str) -> SchedulerError {
    if is_unique_violation(&err) {
        return match violated_column(&err) {
            "task" => SchedulerError::conflict("task", task),
            _ => SchedulerError::conflict("name", name),
        };
    }
    if is_transient(&err) {
        return SchedulerError::TransientPersistence(err.to_string());
    }
    SchedulerError::Database(err)
}

/// 投影写入错误
pub fn projection_error(err: sqlx::Error) -> SchedulerError {
    if is_transient(&err) || is_unique_violation(&err) {
        return SchedulerError::TransientPersistence(err.to_string());
    }
    SchedulerError::Database(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_pass_through() {
        let err = projection_error(sqlx::Error::RowNotFound);
        assert!(matches!(err, SchedulerError::Database(sqlx::Error::RowNotFound)));

        let err = registry_error(sqlx::Error::PoolTimedOut, "a", "b");
        assert!(!err.is_transient());
    }
}
