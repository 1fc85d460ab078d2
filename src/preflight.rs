use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use log::{error, info};
use regex::Regex;
use tokio::fs;

use crate::{config::InstallerConfig, error::InstallError};

/// Идентификация ОС из `/etc/os-release`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub version_id: String,
    pub codename: Option<String>,
}

impl OsRelease {
    /// Разбирает содержимое os-release (строки `KEY=VALUE`, значения могут быть в кавычках)
    pub fn parse(contents: &str) -> Self {
        let re = Regex::new(r#"^\s*([A-Z0-9_]+)=(?:"(.*)"|'(.*)'|(.*))\s*$"#)
            .expect("valid os-release pattern");

        let fields: HashMap<String, String> = contents
            .lines()
            .filter_map(|line| re.captures(line))
            .map(|caps| {
                let value = caps
                    .get(2)
                    .or_else(|| caps.get(3))
                    .or_else(|| caps.get(4))
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default();
                (caps[1].to_string(), value)
            })
            .collect();

        Self {
            id: fields.get("ID").cloned().unwrap_or_default(),
            version_id: fields.get("VERSION_ID").cloned().unwrap_or_default(),
            codename: fields
                .get("VERSION_CODENAME")
                .filter(|c| !c.is_empty())
                .cloned(),
        }
    }

    pub async fn read(path: &Path) -> Result<Self, InstallError> {
        match fs::read_to_string(path).await {
            Ok(contents) => Ok(Self::parse(&contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(InstallError::OsReleaseMissing(path.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Проверяет, что система — поддерживаемая версия Ubuntu
pub fn check_os(os: &OsRelease, supported: &[String]) -> Result<(), InstallError> {
    if os.id != "ubuntu" {
        return Err(InstallError::UnsupportedOs(os.id.clone()));
    }

    if !supported.iter().any(|v| v == &os.version_id) {
        return Err(InstallError::UnsupportedVersion {
            version: os.version_id.clone(),
            supported: supported.join(", "),
        });
    }

    Ok(())
}

/// Проверяет наличие файла данных пользователей в рабочей директории
pub fn check_data_file(config: &InstallerConfig) -> Result<PathBuf, InstallError> {
    let path = config.data_file_path();
    if !path.is_file() {
        return Err(InstallError::MissingDataFile(path));
    }
    Ok(path)
}

/// Выполняет все предварительные проверки, ничего не изменяя в системе
pub async fn run(config: &InstallerConfig) -> Result<OsRelease, InstallError> {
    info!("Проверка операционной системы...");

    let os = OsRelease::read(&config.os_release_path).await?;
    if let Err(e) = check_os(&os, &config.supported_versions) {
        error!("{}", e);
        return Err(e);
    }
    info!("Обнаружена Ubuntu {}", os.version_id);

    match check_data_file(config) {
        Ok(path) => info!("Файл данных найден: {:?}", path),
        Err(e) => {
            error!("{}. Поместите его в {:?} и запустите установку повторно", e, config.work_dir);
            return Err(e);
        }
    }

    Ok(os)
}
