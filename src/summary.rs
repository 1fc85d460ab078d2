use std::net::IpAddr;

use log::{info, warn};

use crate::{
    config::InstallerConfig,
    envfile,
    logger,
    params::InstallParams,
    runner::{run_checked, CommandRunner},
    utils,
};

/// Данные для итогового отчета оператору
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub server_ip: String,
    pub admin_panel_url: String,
    pub payment_webhook_url: String,
    pub bot_webhook_url: String,
    pub admin_login: String,
    pub admin_password: String,
}

impl Summary {
    pub fn new(server_ip: &str, config: &InstallerConfig, params: &InstallParams) -> Self {
        Self {
            server_ip: server_ip.to_string(),
            admin_panel_url: format!("https://{}/admin", params.domain),
            payment_webhook_url: envfile::webhook_url(&params.domain),
            bot_webhook_url: envfile::bot_webhook_url(&params.domain),
            admin_login: config.admin_login.clone(),
            admin_password: config.admin_password.clone(),
        }
    }

    /// Выводит отчет на терминал
    pub fn print(&self) {
        logger::success("Установка завершена");
        logger::summary_line("IP сервера:", &self.server_ip);
        logger::summary_line("Админ-панель:", &self.admin_panel_url);
        logger::summary_line("Webhook ЮKassa:", &self.payment_webhook_url);
        logger::summary_line("Webhook бота:", &self.bot_webhook_url);
        logger::secret_info(&format!(
            "Логин: {}  Пароль: {}",
            self.admin_login, self.admin_password
        ));
        logger::warning("Пароль администратора задан по умолчанию, смените его после первого входа");
    }
}

/// Определяет публичный IP через внешний сервис, при ошибке берет локальный адрес
pub async fn resolve_public_ip(runner: &dyn CommandRunner, config: &InstallerConfig) -> String {
    let lookup = run_checked(
        runner,
        "curl",
        &["-fsS", "--max-time", "10", &config.public_ip_url],
    )
    .await;
    match lookup {
        Ok(body) => match body.trim().parse::<IpAddr>() {
            Ok(ip) => return ip.to_string(),
            Err(_) => warn!(
                "Сервис {} вернул не IP-адрес: {:?}",
                config.public_ip_url,
                body.chars().take(64).collect::<String>()
            ),
        },
        Err(e) => warn!("Не удалось определить публичный IP: {}", e),
    }

    match utils::get_server_ip(runner).await {
        Ok(ip) => ip,
        Err(e) => {
            warn!("Не удалось определить IP сервера: {}", e);
            "unknown".to_string()
        }
    }
}

/// Формирует итоговый отчет
pub async fn report(
    runner: &dyn CommandRunner,
    config: &InstallerConfig,
    params: &InstallParams,
) -> Summary {
    info!("Определение публичного IP...");
    let ip = resolve_public_ip(runner, config).await;
    Summary::new(&ip, config, params)
}
