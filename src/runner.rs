use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error};
use tokio::process::Command;

use crate::error::InstallError;

/// Результат выполнения внешней команды
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[cfg(test)]
    pub fn ok(stdout: &str) -> Self {
        Self {
            code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    #[cfg(test)]
    pub fn failed(code: i32, stderr: &str) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Все изменения состояния хоста проходят через этот интерфейс
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Выполняет команду и дожидается её завершения
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, InstallError>;

    /// Запускает процесс в фоне, не дожидаясь завершения
    async fn spawn_detached(&self, program: &str, args: &[&str]) -> Result<(), InstallError>;
}

pub fn command_line(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Выполняет команду и превращает ненулевой код возврата в ошибку
pub async fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[&str],
) -> Result<String, InstallError> {
    let output = runner.run(program, args).await?;

    if !output.success() {
        let full_command = command_line(program, args);
        error!(
            "Команда {} завершилась с ошибкой (код {}): {}",
            full_command,
            output.code,
            output.stderr.trim()
        );
        return Err(InstallError::Command {
            command: full_command,
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        });
    }

    Ok(output.stdout)
}

/// Исполнитель, запускающий реальные процессы
pub struct SystemRunner;

impl SystemRunner {
    fn spinner(message: String) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(message);
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, InstallError> {
        let full_command = command_line(program, args);
        debug!("Выполнение команды: {}", full_command);

        let spinner = Self::spinner(full_command);
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await;
        spinner.finish_and_clear();

        let output = output?;
        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn spawn_detached(&self, program: &str, args: &[&str]) -> Result<(), InstallError> {
        debug!("Фоновый запуск: {}", command_line(program, args));

        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use std::{collections::VecDeque, sync::Mutex};

    use super::*;

    /// Исполнитель для тестов: записывает вызовы и отвечает по сценарию
    ///
    /// Ответы сопоставляются по префиксу командной строки. Последний ответ
    /// в очереди повторяется для всех последующих вызовов.
    #[derive(Default)]
    pub struct ScriptedRunner {
        calls: Mutex<Vec<String>>,
        detached: Mutex<Vec<String>>,
        rules: Mutex<Vec<(String, VecDeque<CommandOutput>)>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(&self, prefix: &str, outputs: Vec<CommandOutput>) -> &Self {
            self.rules
                .lock()
                .unwrap()
                .push((prefix.to_string(), outputs.into_iter().collect()));
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn detached(&self) -> Vec<String> {
            self.detached.lock().unwrap().clone()
        }

        pub fn count(&self, prefix: &str) -> usize {
            self.calls()
                .iter()
                .filter(|call| call.starts_with(prefix))
                .count()
        }

        pub fn called(&self, prefix: &str) -> bool {
            self.count(prefix) > 0
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, InstallError> {
            let line = command_line(program, args);
            self.calls.lock().unwrap().push(line.clone());

            let mut rules = self.rules.lock().unwrap();
            for (prefix, outputs) in rules.iter_mut() {
                if !line.starts_with(prefix.as_str()) {
                    continue;
                }
                let output = if outputs.len() > 1 {
                    outputs.pop_front()
                } else {
                    outputs.front().cloned()
                };
                return Ok(output.unwrap_or_default());
            }

            Ok(CommandOutput::default())
        }

        async fn spawn_detached(&self, program: &str, args: &[&str]) -> Result<(), InstallError> {
            self.detached
                .lock()
                .unwrap()
                .push(command_line(program, args));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::ScriptedRunner, *};

    #[tokio::test]
    async fn run_checked_reports_failed_command() {
        let runner = ScriptedRunner::new();
        runner.respond("apt-get install", vec![CommandOutput::failed(100, "E: no space\n")]);

        let err = run_checked(&runner, "apt-get", &["install", "-y", "curl"])
            .await
            .unwrap_err();

        match err {
            InstallError::Command {
                command,
                code,
                stderr,
            } => {
                assert_eq!(command, "apt-get install -y curl");
                assert_eq!(code, 100);
                assert_eq!(stderr, "E: no space");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn scripted_runner_replays_queue_then_repeats_last() {
        let runner = ScriptedRunner::new();
        runner.respond(
            "systemctl is-active",
            vec![CommandOutput::failed(3, ""), CommandOutput::ok("")],
        );

        let args = ["is-active", "--quiet", "docker"];
        assert!(!runner.run("systemctl", &args).await.unwrap().success());
        assert!(runner.run("systemctl", &args).await.unwrap().success());
        assert!(runner.run("systemctl", &args).await.unwrap().success());
        assert_eq!(runner.count("systemctl is-active"), 3);
    }

    #[tokio::test]
    async fn system_runner_captures_output() {
        let output = SystemRunner.run("sh", &["-c", "echo out; echo err >&2; exit 4"]).await.unwrap();
        assert_eq!(output.code, 4);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }
}
