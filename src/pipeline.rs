use std::{fmt, path::PathBuf};

use log::{error, info};

use crate::{
    audit::{self, AuditLog},
    config::InstallerConfig,
    docker,
    envfile,
    error::InstallError,
    params::{self, ParamSource},
    preflight,
    runner::CommandRunner,
    stack,
    summary::{self, Summary},
};

/// Этапы установки; переходы только вперед, любая ошибка ведет в `Aborted`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    OsChecked,
    RuntimeInstalled,
    ConfigRendered,
    StackRunning,
    Reported,
    Aborted,
}

impl Stage {
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Start => Some(Stage::OsChecked),
            Stage::OsChecked => Some(Stage::RuntimeInstalled),
            Stage::RuntimeInstalled => Some(Stage::ConfigRendered),
            Stage::ConfigRendered => Some(Stage::StackRunning),
            Stage::StackRunning => Some(Stage::Reported),
            Stage::Reported | Stage::Aborted => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::OsChecked => "os_checked",
            Stage::RuntimeInstalled => "runtime_installed",
            Stage::ConfigRendered => "config_rendered",
            Stage::StackRunning => "stack_running",
            Stage::Reported => "reported",
            Stage::Aborted => "aborted",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Результат успешно завершенного этапа
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Degraded(Vec<String>),
}

impl StepOutcome {
    pub fn from_warnings(warnings: Vec<String>) -> Self {
        if warnings.is_empty() {
            Self::Completed
        } else {
            Self::Degraded(warnings)
        }
    }
}

/// Итог полной установки
#[derive(Debug)]
pub struct InstallOutcome {
    pub env_file: PathBuf,
    pub summary: Summary,
    pub warnings: Vec<String>,
}

/// Последовательная установка: проверка, Docker, `.env`, стек, отчет
pub struct Installer<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a InstallerConfig,
    sources: Vec<Box<dyn ParamSource>>,
    invoking_user: Option<String>,
    stage: Stage,
    warnings: Vec<String>,
}

impl<'a> Installer<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        config: &'a InstallerConfig,
        sources: Vec<Box<dyn ParamSource>>,
        invoking_user: Option<String>,
    ) -> Self {
        Self {
            runner,
            config,
            sources,
            invoking_user,
            stage: Stage::Start,
            warnings: Vec::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn complete(&mut self, stage: Stage, outcome: StepOutcome) {
        debug_assert_eq!(self.stage.next(), Some(stage));

        let status = match &outcome {
            StepOutcome::Completed => "success",
            StepOutcome::Degraded(_) => "warning",
        };
        if let StepOutcome::Degraded(warnings) = outcome {
            self.warnings.extend(warnings);
        }

        info!("Этап завершен: {}", stage);
        audit::record(
            self.config.audit_path().as_deref(),
            AuditLog::new(&format!("stage_{}", stage), None, status, None),
        );
        self.stage = stage;
    }

    fn abort(&mut self, err: &InstallError) {
        error!("Установка прервана после этапа {}: {}", self.stage, err);
        if err.is_precondition() {
            info!("Изменения в систему не вносились");
        }
        audit::record(
            self.config.audit_path().as_deref(),
            AuditLog::new(
                "stage_aborted",
                None,
                "error",
                Some(&format!("после {}: {}", self.stage, err)),
            ),
        );
        self.stage = Stage::Aborted;
    }

    /// Запускает все этапы по порядку
    ///
    /// # Returns
    /// * `Result<InstallOutcome, InstallError>` - Итог установки или ошибка, прервавшая её
    pub async fn run(&mut self) -> Result<InstallOutcome, InstallError> {
        match self.run_stages().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.abort(&e);
                Err(e)
            }
        }
    }

    async fn run_stages(&mut self) -> Result<InstallOutcome, InstallError> {
        info!("Начало установки в {:?}", self.config.work_dir);

        let os = preflight::run(self.config).await?;
        self.complete(Stage::OsChecked, StepOutcome::Completed);

        let mut report = docker::install(
            self.runner,
            self.config,
            &os,
            self.invoking_user.as_deref(),
        )
        .await?;
        if report.remediated {
            report.warnings.push(
                "Docker запущен вручную после изменения параметров ядра, перезагрузите сервер"
                    .to_string(),
            );
        }
        if let Some(user) = &report.granted_user {
            report.warnings.push(format!(
                "Пользователь {} добавлен в группу docker, перелогиньтесь для применения",
                user
            ));
        }
        self.complete(
            Stage::RuntimeInstalled,
            StepOutcome::from_warnings(report.warnings),
        );

        let params = params::collect(&mut self.sources)?;
        let env_file = envfile::write_env(self.config, &params)?;
        self.complete(Stage::ConfigRendered, StepOutcome::Completed);

        stack::launch(self.runner, self.config, &params).await?;
        self.complete(Stage::StackRunning, StepOutcome::Completed);

        let summary = summary::report(self.runner, self.config, &params).await;
        self.complete(Stage::Reported, StepOutcome::Completed);

        Ok(InstallOutcome {
            env_file,
            summary,
            warnings: self.warnings.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path};

    use super::*;
    use crate::{
        envfile::testing::TEMPLATE,
        params::testing::sample_source,
        runner::{testing::ScriptedRunner, CommandOutput},
    };

    fn prepare(dir: &Path, os_release: &str, with_data: bool) -> InstallerConfig {
        let mut config = InstallerConfig::for_work_dir(dir);
        config.os_release_path = dir.join("os-release");
        config.grub_path = dir.join("grub");
        config.remediation_delay_secs = 0;

        fs::write(&config.os_release_path, os_release).unwrap();
        fs::write(&config.grub_path, "GRUB_CMDLINE_LINUX=\"\"\n").unwrap();
        fs::write(config.env_template_path(), TEMPLATE).unwrap();
        if with_data {
            fs::write(config.data_file_path(), b"sqlite").unwrap();
        }
        config
    }

    fn os_release(id: &str, version: &str) -> String {
        format!("ID={}\nVERSION_ID=\"{}\"\nVERSION_CODENAME=noble\n", id, version)
    }

    #[tokio::test]
    async fn full_install_on_supported_ubuntu() {
        let dir = tempfile::tempdir().unwrap();
        let config = prepare(dir.path(), &os_release("ubuntu", "24.04"), true);
        let runner = ScriptedRunner::new();
        runner.respond("curl -fsS --max-time", vec![CommandOutput::ok("203.0.113.7")]);

        let mut installer =
            Installer::new(&runner, &config, vec![sample_source("example.org")], None);
        let outcome = installer.run().await.unwrap();

        assert_eq!(installer.stage(), Stage::Reported);
        assert!(outcome.warnings.is_empty());

        let env = fs::read_to_string(&outcome.env_file).unwrap();
        assert!(env.contains("DOMAIN=example.org\n"));
        assert!(env.contains("WEBHOOK_URL=https://example.org/api/payments/yookassa/webhook\n"));

        assert_eq!(runner.count("docker compose"), 3);
        assert_eq!(runner.count(&format!("docker compose -f {}", config.compose_file_path().display())), 3);
        assert_eq!(outcome.summary.server_ip, "203.0.113.7");

        let audit = fs::read_to_string(config.audit_path().unwrap()).unwrap();
        assert!(audit.contains("stage_reported"));
    }

    #[tokio::test]
    async fn stack_commands_run_once_each() {
        let dir = tempfile::tempdir().unwrap();
        let config = prepare(dir.path(), &os_release("ubuntu", "22.04"), true);
        let runner = ScriptedRunner::new();

        Installer::new(&runner, &config, vec![sample_source("example.org")], None)
            .run()
            .await
            .unwrap();

        let calls = runner.calls();
        for suffix in ["up -d", "exec nginx nginx -s reload"] {
            assert_eq!(calls.iter().filter(|c| c.ends_with(suffix)).count(), 1, "{suffix}");
        }
        assert_eq!(calls.iter().filter(|c| c.contains("certonly")).count(), 1);
    }

    #[tokio::test]
    async fn unsupported_os_aborts_before_any_command() {
        for (id, version) in [("ubuntu", "20.04"), ("debian", "12"), ("ubuntu", "23.10")] {
            let dir = tempfile::tempdir().unwrap();
            let config = prepare(dir.path(), &os_release(id, version), true);
            let runner = ScriptedRunner::new();

            let mut installer =
                Installer::new(&runner, &config, vec![sample_source("example.org")], None);
            let err = installer.run().await.unwrap_err();

            assert_eq!(err.exit_code(), 1);
            assert_eq!(installer.stage(), Stage::Aborted);
            assert!(runner.calls().is_empty(), "{id} {version}");
            assert!(!config.env_file_path().exists());
        }
    }

    #[tokio::test]
    async fn missing_data_file_aborts_without_env() {
        let dir = tempfile::tempdir().unwrap();
        let config = prepare(dir.path(), &os_release("ubuntu", "24.04"), false);
        let runner = ScriptedRunner::new();

        let err = Installer::new(&runner, &config, vec![sample_source("example.org")], None)
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains(&config.data_file));
        assert!(runner.calls().is_empty());
        assert!(!config.env_file_path().exists());
    }

    #[tokio::test]
    async fn dead_runtime_never_launches_stack() {
        let dir = tempfile::tempdir().unwrap();
        let config = prepare(dir.path(), &os_release("ubuntu", "24.04"), true);
        let runner = ScriptedRunner::new();
        runner.respond("systemctl is-active", vec![CommandOutput::failed(3, "")]);
        runner.respond("docker info", vec![CommandOutput::failed(1, "")]);

        let mut installer =
            Installer::new(&runner, &config, vec![sample_source("example.org")], None);
        let err = installer.run().await.unwrap_err();

        assert!(matches!(err, InstallError::RuntimeInactive));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(installer.stage(), Stage::Aborted);
        assert!(!runner.called("docker compose"));
        assert!(!config.env_file_path().exists());

        let audit = fs::read_to_string(config.audit_path().unwrap()).unwrap();
        assert!(audit.contains("stage_aborted"));
        assert!(audit.contains("stage_os_checked"));
    }

    #[tokio::test]
    async fn smoke_warning_does_not_stop_install() {
        let dir = tempfile::tempdir().unwrap();
        let config = prepare(dir.path(), &os_release("ubuntu", "24.04"), true);
        let runner = ScriptedRunner::new();
        runner.respond("docker run", vec![CommandOutput::failed(125, "denied")]);

        let outcome = Installer::new(&runner, &config, vec![sample_source("example.org")], None)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(runner.count("docker compose"), 3);
    }

    #[tokio::test]
    async fn stack_failure_propagates_command_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let config = prepare(dir.path(), &os_release("ubuntu", "24.04"), true);
        let runner = ScriptedRunner::new();
        runner.respond("docker compose", vec![CommandOutput::failed(18, "pull access denied")]);

        let err = Installer::new(&runner, &config, vec![sample_source("example.org")], None)
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 18);
        assert!(config.env_file_path().exists());
    }

    #[test]
    fn stages_only_move_forward() {
        let mut stage = Stage::Start;
        let mut visited = vec![stage];
        while let Some(next) = stage.next() {
            visited.push(next);
            stage = next;
        }

        assert_eq!(
            visited,
            vec![
                Stage::Start,
                Stage::OsChecked,
                Stage::RuntimeInstalled,
                Stage::ConfigRendered,
                Stage::StackRunning,
                Stage::Reported,
            ]
        );
        assert_eq!(Stage::Aborted.next(), None);
    }
}
