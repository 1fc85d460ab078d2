//! Рендеринг `.env` из шаблона
//!
//! Каждая строка шаблона вида `KEY=...` для известного ключа заменяется на
//! `KEY=<значение>`, остальные строки копируются без изменений. Каждый из
//! известных ключей должен встретиться в шаблоне ровно один раз.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
};

use log::info;

use crate::{
    backup,
    config::InstallerConfig,
    error::InstallError,
    params::{Field, InstallParams},
    secret,
};

pub const JWT_SECRET_KEY: &str = "JWT_SECRET";
pub const WEBHOOK_URL_KEY: &str = "WEBHOOK_URL";
pub const BOT_WEBHOOK_URL_KEY: &str = "BOT_WEBHOOK_URL";

const PAYMENT_WEBHOOK_PATH: &str = "/api/payments/yookassa/webhook";
const BOT_WEBHOOK_PATH: &str = "/api/bot/webhook";

pub fn webhook_url(domain: &str) -> String {
    format!("https://{}{}", domain, PAYMENT_WEBHOOK_PATH)
}

pub fn bot_webhook_url(domain: &str) -> String {
    format!("https://{}{}", domain, BOT_WEBHOOK_PATH)
}

/// Значения всех ключей `.env` в порядке записи
pub fn build_values(params: &InstallParams, jwt_secret: &str) -> Vec<(&'static str, String)> {
    let mut values: Vec<(&'static str, String)> = Field::ALL
        .iter()
        .map(|field| (field.env_key(), params.get(*field).to_string()))
        .collect();

    values.push((JWT_SECRET_KEY, jwt_secret.to_string()));
    values.push((WEBHOOK_URL_KEY, webhook_url(&params.domain)));
    values.push((BOT_WEBHOOK_URL_KEY, bot_webhook_url(&params.domain)));

    values
}

fn assignment_key(line: &str, values: &[(&'static str, String)]) -> Option<usize> {
    let trimmed = line.trim_start();
    values.iter().position(|(key, _)| {
        trimmed
            .strip_prefix(key)
            .is_some_and(|rest| rest.starts_with('='))
    })
}

/// Подставляет значения в шаблон
///
/// # Returns
/// * `Err(MissingKey)` - Ключ отсутствует в шаблоне
/// * `Err(DuplicateKey)` - Ключ встречается больше одного раза
pub fn render(template: &str, values: &[(&'static str, String)]) -> Result<String, InstallError> {
    let mut counts = vec![0usize; values.len()];
    let mut output = String::with_capacity(template.len());

    for line in template.lines() {
        match assignment_key(line, values) {
            Some(index) => {
                counts[index] += 1;
                let (key, value) = &values[index];
                output.push_str(key);
                output.push('=');
                output.push_str(value);
            }
            None => output.push_str(line),
        }
        output.push('\n');
    }

    for ((key, _), count) in values.iter().zip(&counts) {
        match count {
            0 => return Err(InstallError::MissingKey(key.to_string())),
            1 => {}
            n => {
                return Err(InstallError::DuplicateKey {
                    key: key.to_string(),
                    count: *n,
                })
            }
        }
    }

    Ok(output)
}

/// Создает `.env` заново: бекап старого файла, новый секрет, подстановка значений
pub fn write_env(config: &InstallerConfig, params: &InstallParams) -> Result<PathBuf, InstallError> {
    let template_path = config.env_template_path();
    let template = match fs::read_to_string(&template_path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(InstallError::TemplateMissing(template_path))
        }
        Err(e) => return Err(e.into()),
    };

    let jwt_secret = secret::generate_secret();
    info!("Сгенерирован новый {}", JWT_SECRET_KEY);

    let rendered = render(&template, &build_values(params, &jwt_secret))?;

    let env_path = config.env_file_path();
    let backup_dir = config.backup_dir();
    if backup::backup_file(&env_path, &backup_dir)?.is_some() {
        backup::clean_old_backups(&backup_dir, config.keep_backups)?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&env_path)?;

    // Режим при создании не действует на уже существующий файл;
    // после truncate он пуст, поэтому права меняются до записи секретов
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(rendered.as_bytes())?;

    info!("Файл окружения записан: {:?}", env_path);
    Ok(env_path)
}

#[cfg(test)]
pub mod testing {
    pub const TEMPLATE: &str = "\
# Платежи
YOOKASSA_SHOP_ID=your_shop_id
YOOKASSA_SECRET_KEY=your_secret_key

# 3X-UI
XUI_URL=https://your-panel:2053
XUI_TOKEN=your_token

TELEGRAM_BOT_TOKEN=your_bot_token
ADMIN_TELEGRAM_ID=your_telegram_id
DOMAIN=your-domain.com
SSL_EMAIL=your-email@example.com
JWT_SECRET=change_me
WEBHOOK_URL=https://your-domain.com/api/payments/yookassa/webhook
BOT_WEBHOOK_URL=https://your-domain.com/api/bot/webhook
DATABASE_URL=sqlite:///data/users.db
";
}
