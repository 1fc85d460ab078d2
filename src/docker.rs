use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::fs;

use crate::{
    config::InstallerConfig,
    error::InstallError,
    preflight::OsRelease,
    runner::{run_checked, CommandRunner},
    utils,
};

const CONFLICTING_PACKAGES: [&str; 7] = [
    "docker.io",
    "docker-doc",
    "docker-compose",
    "docker-compose-v2",
    "podman-docker",
    "containerd",
    "runc",
];
const RESIDUAL_DIRS: [&str; 2] = ["/var/lib/docker", "/var/lib/containerd"];
const PREREQUISITES: [&str; 3] = ["ca-certificates", "curl", "gnupg"];
const ENGINE_PACKAGES: [&str; 5] = [
    "docker-ce",
    "docker-ce-cli",
    "containerd.io",
    "docker-buildx-plugin",
    "docker-compose-plugin",
];

const DOCKER_GPG_URL: &str = "https://download.docker.com/linux/ubuntu/gpg";
const DOCKER_REPO_URL: &str = "https://download.docker.com/linux/ubuntu";
const KEYRING_DIR: &str = "/etc/apt/keyrings";
const KEYRING_PATH: &str = "/etc/apt/keyrings/docker.asc";
const SOURCES_LIST: &str = "/etc/apt/sources.list.d/docker.list";

/// Итог установки Docker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeReport {
    /// Служба поднялась только после восстановления
    pub remediated: bool,
    /// Пользователь, добавленный в группу docker
    pub granted_user: Option<String>,
    /// Некритичные проблемы, о которых стоит сообщить оператору
    pub warnings: Vec<String>,
}

/// Удаляет конфликтующие пакеты и остатки прежних установок
///
/// Ошибки на этом шаге не прерывают установку
pub async fn remove_conflicting(runner: &dyn CommandRunner) {
    info!("Удаление предыдущих установок Docker...");

    for pkg in CONFLICTING_PACKAGES {
        match runner.run("apt-get", &["remove", "-y", pkg]).await {
            Ok(output) if output.success() => debug!("Пакет {} удален", pkg),
            Ok(output) => debug!("Пакет {} не удален: {}", pkg, output.stderr.trim()),
            Err(e) => debug!("Не удалось запустить удаление {}: {}", pkg, e),
        }
    }

    let mut args = vec!["-rf"];
    args.extend_from_slice(&RESIDUAL_DIRS);
    if let Err(e) = runner.run("rm", &args).await {
        debug!("Не удалось удалить остаточные директории: {}", e);
    }
}

/// Регистрирует репозиторий Docker с ключом подписи
pub async fn add_repository(runner: &dyn CommandRunner, os: &OsRelease) -> Result<(), InstallError> {
    info!("Добавление GPG ключа Docker...");
    run_checked(runner, "install", &["-m", "0755", "-d", KEYRING_DIR]).await?;
    run_checked(runner, "curl", &["-fsSL", DOCKER_GPG_URL, "-o", KEYRING_PATH]).await?;
    run_checked(runner, "chmod", &["a+r", KEYRING_PATH]).await?;

    info!("Добавление репозитория Docker...");
    let arch = run_checked(runner, "dpkg", &["--print-architecture"]).await?;
    let codename = match &os.codename {
        Some(codename) => codename.clone(),
        None => run_checked(runner, "lsb_release", &["-cs"]).await?,
    };

    let repo_line = format!(
        "deb [arch={} signed-by={}] {} {} stable",
        arch.trim(),
        KEYRING_PATH,
        DOCKER_REPO_URL,
        codename.trim()
    );
    let cmd = format!("echo '{}' > {}", repo_line, SOURCES_LIST);
    run_checked(runner, "sh", &["-c", &cmd]).await?;

    Ok(())
}

/// Проверяет, активна ли служба docker
pub async fn is_service_active(runner: &dyn CommandRunner) -> Result<bool, InstallError> {
    let output = runner
        .run("systemctl", &["is-active", "--quiet", "docker"])
        .await?;
    Ok(output.success())
}

/// Разбирает значение присваивания из `/etc/default/grub`
///
/// Возвращает кавычку, в которую было взято значение, и аргументы.
/// Значения с подстановками или вложенными кавычками не разбираются.
fn parse_cmdline_value(raw: &str) -> Result<(Option<char>, Vec<&str>), String> {
    let raw = raw.trim();

    let (quote, inner) = match raw.chars().next() {
        Some(q @ ('"' | '\'')) if raw.len() >= 2 && raw.ends_with(q) => {
            (Some(q), &raw[1..raw.len() - 1])
        }
        _ => (None, raw),
    };

    if inner.contains(['"', '\'', '$', '`', '\\']) {
        return Err(format!("значение {} содержит кавычки или подстановки", raw));
    }
    if quote.is_none() && inner.contains(char::is_whitespace) {
        return Err(format!("значение {} содержит пробелы без кавычек", raw));
    }

    Ok((quote, inner.split_whitespace().collect()))
}

/// Добавляет параметры ядра в `GRUB_CMDLINE_LINUX`
///
/// # Returns
/// * `Ok(None)` - Все параметры уже присутствуют, файл менять не нужно
/// * `Ok(Some(contents))` - Новое содержимое файла
/// * `Err(reason)` - Строку не удалось безопасно разобрать, файл трогать нельзя
pub fn add_kernel_params(grub: &str, params: &[String]) -> Result<Option<String>, String> {
    let mut changed = false;
    let mut found = false;
    let mut lines = Vec::new();

    for line in grub.lines() {
        let Some(value) = line.strip_prefix("GRUB_CMDLINE_LINUX=") else {
            lines.push(line.to_string());
            continue;
        };

        found = true;
        let (quote, mut args) = parse_cmdline_value(value)?;
        for param in params {
            if !args.contains(&param.as_str()) {
                args.push(param);
                changed = true;
            }
        }
        let quote = quote.unwrap_or('"');
        lines.push(format!("GRUB_CMDLINE_LINUX={}{}{}", quote, args.join(" "), quote));
    }

    if !found && !params.is_empty() {
        lines.push(format!("GRUB_CMDLINE_LINUX=\"{}\"", params.join(" ")));
        changed = true;
    }

    Ok(changed.then(|| lines.join("\n") + "\n"))
}

/// Прописывает параметры ядра в конфигурацию загрузчика
///
/// Любая ошибка только логируется: правка загрузчика не должна мешать
/// запуску dockerd.
async fn apply_kernel_params(runner: &dyn CommandRunner, config: &InstallerConfig) {
    let grub_path = &config.grub_path;

    let contents = match fs::read_to_string(grub_path).await {
        Ok(contents) => contents,
        Err(e) => {
            warn!("Не удалось прочитать {:?}: {}, параметры ядра не изменены", grub_path, e);
            return;
        }
    };

    let updated = match add_kernel_params(&contents, &config.kernel_params) {
        Ok(Some(updated)) => updated,
        Ok(None) => {
            debug!("Параметры ядра уже заданы в {:?}", grub_path);
            return;
        }
        Err(reason) => {
            warn!("{:?} не изменен: {}", grub_path, reason);
            return;
        }
    };

    // Запись через временный файл, чтобы не оставить загрузчик с обрезанным конфигом
    let tmp_path = grub_path.with_extension("tmp");
    let written = match fs::write(&tmp_path, updated).await {
        Ok(()) => fs::rename(&tmp_path, grub_path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        warn!("Не удалось записать {:?}: {}, параметры ядра не изменены", grub_path, e);
        let _ = fs::remove_file(&tmp_path).await;
        return;
    }

    info!(
        "В {:?} добавлены параметры ядра: {}",
        grub_path,
        config.kernel_params.join(" ")
    );
    match runner.run("update-grub", &[]).await {
        Ok(output) if output.success() => {}
        Ok(output) => warn!("update-grub завершился с ошибкой: {}", output.stderr.trim()),
        Err(e) => warn!("Не удалось запустить update-grub: {}", e),
    }
}

/// Единственная попытка восстановления службы
///
/// Включает учет памяти в cgroup через параметры загрузки и запускает
/// dockerd напрямую. Возвращает `true`, если после паузы Docker работает.
pub async fn remediate(
    runner: &dyn CommandRunner,
    config: &InstallerConfig,
) -> Result<bool, InstallError> {
    warn!("Служба Docker не активна, попытка восстановления...");

    apply_kernel_params(runner, config).await;

    if let Err(e) = runner.spawn_detached("dockerd", &[]).await {
        warn!("Не удалось запустить dockerd напрямую: {}", e);
    }

    tokio::time::sleep(Duration::from_secs(config.remediation_delay_secs)).await;

    if is_service_active(runner).await? {
        return Ok(true);
    }
    Ok(runner.run("docker", &["info"]).await?.success())
}

/// Гарантирует, что служба Docker работает; не более одной попытки восстановления
///
/// # Returns
/// * `Ok(false)` - Служба активна сразу после установки
/// * `Ok(true)` - Служба заработала после восстановления
/// * `Err(RuntimeInactive)` - Docker так и не запустился
pub async fn ensure_running(
    runner: &dyn CommandRunner,
    config: &InstallerConfig,
) -> Result<bool, InstallError> {
    if is_service_active(runner).await? {
        return Ok(false);
    }

    if remediate(runner, config).await? {
        warn!("Docker запущен после восстановления, для полного применения параметров ядра нужна перезагрузка");
        return Ok(true);
    }

    error!("Docker не удалось запустить. Проверьте вручную:");
    error!("  systemctl status docker");
    error!("  journalctl -xeu docker.service");
    error!("  dockerd --debug");
    error!("После исправления перезагрузите сервер и запустите установку повторно");
    Err(InstallError::RuntimeInactive)
}

/// Добавляет пользователя в группу docker, если он ещё не в ней
///
/// # Returns
/// * `Ok(Err(warning))` - Не удалось изменить группу, установка продолжается
pub async fn grant_socket_access(
    runner: &dyn CommandRunner,
    user: &str,
) -> Result<Result<bool, String>, InstallError> {
    let groups = runner.run("id", &["-nG", user]).await?;
    if groups.success() && groups.stdout.split_whitespace().any(|g| g == "docker") {
        info!("Пользователь {} уже состоит в группе docker", user);
        return Ok(Ok(false));
    }

    info!("Добавление пользователя {} в группу docker...", user);
    let output = runner.run("usermod", &["-aG", "docker", user]).await?;
    if !output.success() {
        let warning = format!(
            "Не удалось добавить {} в группу docker: {}",
            user,
            output.stderr.trim()
        );
        warn!("{}", warning);
        return Ok(Err(warning));
    }

    Ok(Ok(true))
}

/// Запускает тестовый контейнер; ошибка только предупреждение
pub async fn smoke_test(runner: &dyn CommandRunner, config: &InstallerConfig) -> Option<String> {
    info!("Проверка запуска контейнеров...");

    let result = runner
        .run("docker", &["run", "--rm", &config.smoke_test_image])
        .await;

    let reason = match result {
        Ok(output) if output.success() => {
            info!("Тестовый контейнер успешно запущен");
            return None;
        }
        Ok(output) => output.stderr.trim().to_string(),
        Err(e) => e.to_string(),
    };

    let warning = format!(
        "Тестовый контейнер {} не запустился ({}). Возможно, права группы docker ещё не применились",
        config.smoke_test_image, reason
    );
    warn!("{}", warning);
    Some(warning)
}

/// Устанавливает Docker Engine и плагин Compose
///
/// # Arguments
/// * `runner` - Исполнитель команд
/// * `config` - Настройки установщика
/// * `os` - Результат предварительной проверки ОС
/// * `invoking_user` - Непривилегированный пользователь для доступа к сокету
///
/// # Returns
/// * `Result<RuntimeReport, InstallError>` - Итог установки или фатальная ошибка
pub async fn install(
    runner: &dyn CommandRunner,
    config: &InstallerConfig,
    os: &OsRelease,
    invoking_user: Option<&str>,
) -> Result<RuntimeReport, InstallError> {
    info!("Начало установки Docker...");
    let mut report = RuntimeReport::default();

    remove_conflicting(runner).await;

    utils::apt_update(runner).await?;
    utils::apt_install(runner, &PREREQUISITES).await?;

    add_repository(runner, os).await?;

    utils::apt_update(runner).await?;
    info!("Установка Docker Engine...");
    utils::apt_install(runner, &ENGINE_PACKAGES).await?;

    for action in ["start", "enable"] {
        let output = runner.run("systemctl", &[action, "docker"]).await?;
        if !output.success() {
            warn!("systemctl {} docker: {}", action, output.stderr.trim());
        }
    }

    report.remediated = ensure_running(runner, config).await?;

    if let Some(user) = invoking_user {
        match grant_socket_access(runner, user).await? {
            Ok(true) => report.granted_user = Some(user.to_string()),
            Ok(false) => {}
            Err(warning) => report.warnings.push(warning),
        }
    }

    if let Some(warning) = smoke_test(runner, config).await {
        report.warnings.push(warning);
    }

    info!("Docker успешно установлен");
    Ok(report)
}
