use std::fs;

use log::info;

use crate::{
    config::{self, InstallerConfig},
    error::InstallError,
    params::InstallParams,
    runner::{run_checked, CommandRunner},
};

/// Выполняет `docker compose -f <compose_file> ...`
async fn compose(
    runner: &dyn CommandRunner,
    config: &InstallerConfig,
    args: &[&str],
) -> Result<String, InstallError> {
    let compose_file = config.compose_file_path();
    let compose_file = compose_file.to_string_lossy();

    let mut full_args = vec!["compose", "-f", &*compose_file];
    full_args.extend_from_slice(args);
    run_checked(runner, "docker", &full_args).await
}

/// Создает директории для TLS сертификатов и webroot certbot
pub fn create_tls_dirs(config: &InstallerConfig) -> Result<(), InstallError> {
    for dir in [
        config::NGINX_SSL_DIR,
        config::CERTBOT_WWW_DIR,
        config::CERTBOT_CONF_DIR,
    ] {
        fs::create_dir_all(config.path(dir))?;
    }
    Ok(())
}

/// Запускает стек, выпускает сертификат и перезагружает прокси
///
/// Любая ошибка прерывает установку без отката уже запущенных контейнеров
pub async fn launch(
    runner: &dyn CommandRunner,
    config: &InstallerConfig,
    params: &InstallParams,
) -> Result<(), InstallError> {
    create_tls_dirs(config)?;

    info!("Запуск контейнеров...");
    compose(runner, config, &["up", "-d"]).await?;

    info!("Получение SSL сертификата для {}...", params.domain);
    compose(
        runner,
        config,
        &[
            "run",
            "--rm",
            &config.certbot_service,
            "certonly",
            "--webroot",
            "--webroot-path=/var/www/certbot",
            "--email",
            &params.ssl_email,
            "--agree-tos",
            "--no-eff-email",
            "-d",
            &params.domain,
        ],
    )
    .await?;

    info!("Перезагрузка конфигурации {}...", config.proxy_service);
    compose(
        runner,
        config,
        &["exec", &config.proxy_service, "nginx", "-s", "reload"],
    )
    .await?;

    info!("Стек успешно запущен");
    Ok(())
}

/// Останавливает стек
pub async fn stop(runner: &dyn CommandRunner, config: &InstallerConfig) -> Result<(), InstallError> {
    info!("Остановка контейнеров...");
    compose(runner, config, &["down"]).await?;
    info!("Контейнеры остановлены");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        params::testing::sample_params,
        runner::{testing::ScriptedRunner, CommandOutput},
    };

    #[tokio::test]
    async fn launch_runs_each_step_once_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = InstallerConfig::for_work_dir(dir.path());
        let runner = ScriptedRunner::new();

        launch(&runner, &config, &sample_params("example.org"))
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].ends_with("docker-compose.yml up -d"));
        assert!(calls[1].contains("run --rm certbot certonly"));
        assert!(calls[1].contains("-d example.org"));
        assert!(calls[1].contains("--email ops@example.org"));
        assert!(calls[2].ends_with("exec nginx nginx -s reload"));
        assert!(dir.path().join("nginx/ssl").is_dir());
        assert!(dir.path().join("certbot/www").is_dir());
    }

    #[tokio::test]
    async fn certificate_failure_stops_before_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config = InstallerConfig::for_work_dir(dir.path());
        let runner = ScriptedRunner::new();
        runner.respond(
            "docker compose",
            vec![CommandOutput::ok(""), CommandOutput::failed(1, "challenge failed")],
        );

        let err = launch(&runner, &config, &sample_params("example.org"))
            .await
            .unwrap_err();

        assert!(matches!(err, InstallError::Command { .. }));
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn stop_brings_stack_down() {
        let dir = tempfile::tempdir().unwrap();
        let config = InstallerConfig::for_work_dir(dir.path());
        let runner = ScriptedRunner::new();

        stop(&runner, &config).await.unwrap();
        assert!(runner.calls()[0].ends_with("docker-compose.yml down"));
    }
}
