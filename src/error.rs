use std::path::PathBuf;

use thiserror::Error;

/// Ошибки установки, сгруппированные по политике обработки
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Файл описания ОС не найден: {0:?}")]
    OsReleaseMissing(PathBuf),
    #[error("Неподдерживаемая ОС: '{0}', требуется ubuntu")]
    UnsupportedOs(String),
    #[error("Неподдерживаемая версия Ubuntu: '{version}' (поддерживаются: {supported})")]
    UnsupportedVersion { version: String, supported: String },
    #[error("Не найден обязательный файл данных: {0:?}")]
    MissingDataFile(PathBuf),
    #[error("Docker не запущен после попытки восстановления")]
    RuntimeInactive,
    #[error("Шаблон окружения не найден: {0:?}")]
    TemplateMissing(PathBuf),
    #[error("Ключ {0} отсутствует в шаблоне окружения")]
    MissingKey(String),
    #[error("Ключ {key} встречается в шаблоне окружения {count} раз(а)")]
    DuplicateKey { key: String, count: usize },
    #[error("Не задан обязательный параметр: {0}")]
    MissingParam(String),
    #[error("Некорректное значение параметра {field}: {reason}")]
    InvalidParam { field: String, reason: String },
    #[error("Ошибка конфигурации: {0}")]
    Config(String),
    #[error("Команда `{command}` завершилась с кодом {code}: {stderr}")]
    Command {
        command: String,
        code: i32,
        stderr: String,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl InstallError {
    /// Ошибки предварительной проверки: установка не начиналась
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::OsReleaseMissing(_)
                | Self::UnsupportedOs(_)
                | Self::UnsupportedVersion { .. }
                | Self::MissingDataFile(_)
        )
    }

    /// Код завершения процесса для данной ошибки
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Command { code, .. } if *code > 0 => *code,
            _ => 1,
        }
    }
}
