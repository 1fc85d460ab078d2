use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::InstallError;

// Пути внутри рабочей директории установки
pub const INSTALLER_CONFIG_FILE: &str = "installer.toml";
pub const NGINX_SSL_DIR: &str = "nginx/ssl";
pub const CERTBOT_WWW_DIR: &str = "certbot/www";
pub const CERTBOT_CONF_DIR: &str = "certbot/conf";
pub const BACKUP_DIR: &str = "backups";
pub const AUDIT_FILE: &str = "install-audit.jsonl";

/// Настройки самого установщика
///
/// Все поля имеют значения по умолчанию, поэтому `installer.toml`
/// может содержать только переопределяемые параметры.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct InstallerConfig {
    #[serde(skip)]
    pub work_dir: PathBuf,
    pub data_file: String,
    pub env_template: String,
    pub env_file: String,
    pub compose_file: String,
    pub os_release_path: PathBuf,
    pub supported_versions: Vec<String>,
    pub grub_path: PathBuf,
    pub kernel_params: Vec<String>,
    pub remediation_delay_secs: u64,
    pub smoke_test_image: String,
    pub public_ip_url: String,
    pub proxy_service: String,
    pub certbot_service: String,
    pub admin_login: String,
    pub admin_password: String,
    pub keep_backups: usize,
    pub audit_enabled: bool,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            data_file: "users.db".to_string(),
            env_template: ".env.template".to_string(),
            env_file: ".env".to_string(),
            compose_file: "docker-compose.yml".to_string(),
            os_release_path: PathBuf::from("/etc/os-release"),
            supported_versions: vec!["22.04".to_string(), "24.04".to_string()],
            grub_path: PathBuf::from("/etc/default/grub"),
            kernel_params: vec![
                "cgroup_enable=memory".to_string(),
                "swapaccount=1".to_string(),
            ],
            remediation_delay_secs: 5,
            smoke_test_image: "hello-world".to_string(),
            public_ip_url: "https://ifconfig.me".to_string(),
            proxy_service: "nginx".to_string(),
            certbot_service: "certbot".to_string(),
            admin_login: "admin".to_string(),
            admin_password: "123456".to_string(),
            keep_backups: 5,
            audit_enabled: true,
        }
    }
}

impl InstallerConfig {
    /// Загружает конфигурацию для рабочей директории
    ///
    /// # Arguments
    /// * `work_dir` - Рабочая директория установки
    /// * `path` - Явный путь к файлу конфигурации (должен существовать); по умолчанию `<work_dir>/installer.toml`
    ///
    /// # Returns
    /// * `Result<Self, InstallError>` - Конфигурация или ошибка разбора
    pub fn load(work_dir: &Path, path: Option<&Path>) -> Result<Self, InstallError> {
        // Отсутствовать может только файл по умолчанию
        if let Some(explicit) = path {
            if !explicit.is_file() {
                return Err(InstallError::Config(format!(
                    "файл конфигурации {:?} не найден",
                    explicit
                )));
            }
        }

        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| work_dir.join(INSTALLER_CONFIG_FILE));

        let mut config = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let config: Self = toml::from_str(&contents).map_err(|e| {
                InstallError::Config(format!("не удалось разобрать {:?}: {}", path, e))
            })?;
            info!("Загружена конфигурация установщика из {:?}", path);
            config
        } else {
            debug!("Файл {:?} не найден, используются настройки по умолчанию", path);
            Self::for_work_dir(work_dir)
        };

        config.work_dir = work_dir.to_path_buf();
        Ok(config)
    }

    /// Конфигурация с корнем в указанной директории и настройками по умолчанию
    pub fn for_work_dir(work_dir: &Path) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            ..Self::default()
        }
    }

    /// Полный путь внутри рабочей директории
    pub fn path(&self, relative: &str) -> PathBuf {
        self.work_dir.join(relative)
    }

    pub fn data_file_path(&self) -> PathBuf {
        self.path(&self.data_file)
    }

    pub fn env_template_path(&self) -> PathBuf {
        self.path(&self.env_template)
    }

    pub fn env_file_path(&self) -> PathBuf {
        self.path(&self.env_file)
    }

    pub fn compose_file_path(&self) -> PathBuf {
        self.path(&self.compose_file)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.path(BACKUP_DIR)
    }

    /// Путь журнала аудита, если аудит включен
    pub fn audit_path(&self) -> Option<PathBuf> {
        self.audit_enabled.then(|| self.path(AUDIT_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = InstallerConfig::load(dir.path(), None).unwrap();

        assert_eq!(config.work_dir, dir.path());
        assert_eq!(config.supported_versions, vec!["22.04", "24.04"]);
        assert_eq!(config.env_file_path(), dir.path().join(".env"));
        assert_eq!(config.data_file_path(), dir.path().join("users.db"));
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(INSTALLER_CONFIG_FILE),
            "data_file = \"vpn.sqlite\"\nremediation_delay_secs = 0\naudit_enabled = false\n",
        )
        .unwrap();

        let config = InstallerConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.data_file, "vpn.sqlite");
        assert_eq!(config.remediation_delay_secs, 0);
        assert!(config.audit_path().is_none());
        assert_eq!(config.proxy_service, "nginx");
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "keep_backups = \"many\"").unwrap();

        let err = InstallerConfig::load(dir.path(), Some(&path)).unwrap_err();
        assert!(matches!(err, InstallError::Config(_)));
    }

    #[test]
    fn explicit_missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typo.toml");

        let err = InstallerConfig::load(dir.path(), Some(&path)).unwrap_err();
        assert!(matches!(err, InstallError::Config(ref msg) if msg.contains("typo.toml")));
    }
}
