use std::env;

use log::{debug, info};

use crate::{
    error::InstallError,
    runner::{run_checked, CommandRunner},
};

/// Обновляет список пакетов
pub async fn apt_update(runner: &dyn CommandRunner) -> Result<(), InstallError> {
    info!("Обновление списка пакетов...");
    run_checked(runner, "apt-get", &["update"]).await?;
    Ok(())
}

/// Устанавливает пакеты одной командой apt-get
pub async fn apt_install(runner: &dyn CommandRunner, packages: &[&str]) -> Result<(), InstallError> {
    info!("Установка пакетов: {}", packages.join(", "));

    let mut args = vec!["install", "-y"];
    args.extend_from_slice(packages);
    run_checked(runner, "apt-get", &args).await?;

    Ok(())
}

/// Проверяет, запущен ли процесс с эффективным uid root
pub fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

/// Непривилегированный пользователь, запустивший установку через sudo
pub fn invoking_user() -> Option<String> {
    env::var("SUDO_USER")
        .ok()
        .filter(|user| !user.is_empty() && user != "root")
}

/// Получает локальный IP-адрес сервера (первый из `hostname -I`)
pub async fn get_server_ip(runner: &dyn CommandRunner) -> Result<String, InstallError> {
    let output = run_checked(runner, "hostname", &["-I"]).await?;

    let first_ip = output
        .split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or_else(|| InstallError::Config("hostname -I не вернул адресов".to_string()))?;

    debug!("IP-адрес сервера: {}", first_ip);
    Ok(first_ip)
}
