use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::InstallError,
    runner::{command_line, CommandOutput, CommandRunner},
};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditLog {
    pub id: String,
    pub timestamp: DateTime<Local>,
    pub action: String,
    pub command: Option<String>,
    pub status: String,
    pub details: Option<String>,
}

impl AuditLog {
    pub fn new(action: &str, command: Option<&str>, status: &str, details: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Local::now(),
            action: action.to_string(),
            command: command.map(|s| s.to_string()),
            status: status.to_string(),
            details: details.map(|s| s.to_string()),
        }
    }
}

/// Дописывает запись в журнал аудита (одна JSON-строка на событие)
pub fn log_audit_event(audit_log: &AuditLog, log_file: &Path) -> Result<(), InstallError> {
    if let Some(parent) = log_file.parent() {
        fs::create_dir_all(parent)?;
    }

    let log_json = serde_json::to_string(audit_log)
        .map_err(|e| InstallError::Config(format!("не удалось сериализовать аудит: {}", e)))?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;
    writeln!(file, "{}", log_json)?;

    debug!("Записан аудит: {} - {}", audit_log.action, audit_log.status);
    Ok(())
}

/// Записывает событие, не прерывая установку при ошибке записи
pub fn record(log_file: Option<&Path>, audit_log: AuditLog) {
    let Some(path) = log_file else {
        return;
    };

    if let Err(e) = log_audit_event(&audit_log, path) {
        warn!("Не удалось записать событие аудита {}: {}", audit_log.action, e);
    }
}

/// Обертка над исполнителем, записывающая каждую команду в журнал аудита
pub struct AuditedRunner<R> {
    inner: R,
    log_file: Option<PathBuf>,
}

impl<R: CommandRunner> AuditedRunner<R> {
    pub fn new(inner: R, log_file: Option<PathBuf>) -> Self {
        Self { inner, log_file }
    }
}

#[async_trait]
impl<R: CommandRunner> CommandRunner for AuditedRunner<R> {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, InstallError> {
        let full_command = command_line(program, args);
        let result = self.inner.run(program, args).await;

        let entry = match &result {
            Ok(output) => {
                let status = if output.success() { "success" } else { "error" };
                let stderr = output.stderr.trim();
                AuditLog::new(
                    "command",
                    Some(&full_command),
                    status,
                    (!stderr.is_empty()).then_some(stderr),
                )
            }
            Err(e) => AuditLog::new(
                "command",
                Some(&full_command),
                "spawn_error",
                Some(&e.to_string()),
            ),
        };
        record(self.log_file.as_deref(), entry);

        result
    }

    async fn spawn_detached(&self, program: &str, args: &[&str]) -> Result<(), InstallError> {
        let full_command = command_line(program, args);
        let result = self.inner.spawn_detached(program, args).await;

        let status = if result.is_ok() { "started" } else { "spawn_error" };
        record(
            self.log_file.as_deref(),
            AuditLog::new("background_command", Some(&full_command), status, None),
        );

        result
    }
}
