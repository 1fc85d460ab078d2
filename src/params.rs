use std::{collections::HashMap, env, fmt, fs, path::Path};

use dialoguer::{Input, Password};
use log::{debug, error, info};
use regex::Regex;

use crate::error::InstallError;

/// Параметры, которые оператор передает установщику
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    ShopId,
    SecretKey,
    XuiUrl,
    XuiToken,
    BotToken,
    AdminTelegramId,
    Domain,
    SslEmail,
}

impl Field {
    /// Порядок запроса параметров
    pub const ALL: [Field; 8] = [
        Field::ShopId,
        Field::SecretKey,
        Field::XuiUrl,
        Field::XuiToken,
        Field::BotToken,
        Field::AdminTelegramId,
        Field::Domain,
        Field::SslEmail,
    ];

    /// Имя поля в TOML-файле параметров
    pub fn name(self) -> &'static str {
        match self {
            Field::ShopId => "shop_id",
            Field::SecretKey => "secret_key",
            Field::XuiUrl => "xui_url",
            Field::XuiToken => "xui_token",
            Field::BotToken => "bot_token",
            Field::AdminTelegramId => "admin_telegram_id",
            Field::Domain => "domain",
            Field::SslEmail => "ssl_email",
        }
    }

    /// Ключ в `.env` и в переменных окружения
    pub fn env_key(self) -> &'static str {
        match self {
            Field::ShopId => "YOOKASSA_SHOP_ID",
            Field::SecretKey => "YOOKASSA_SECRET_KEY",
            Field::XuiUrl => "XUI_URL",
            Field::XuiToken => "XUI_TOKEN",
            Field::BotToken => "TELEGRAM_BOT_TOKEN",
            Field::AdminTelegramId => "ADMIN_TELEGRAM_ID",
            Field::Domain => "DOMAIN",
            Field::SslEmail => "SSL_EMAIL",
        }
    }

    pub fn prompt(self) -> &'static str {
        match self {
            Field::ShopId => "Введите Shop ID ЮKassa",
            Field::SecretKey => "Введите секретный ключ ЮKassa",
            Field::XuiUrl => "Введите URL панели 3X-UI (например, https://panel.example.com:2053)",
            Field::XuiToken => "Введите API токен 3X-UI",
            Field::BotToken => "Введите токен Telegram бота",
            Field::AdminTelegramId => "Введите Telegram ID администратора",
            Field::Domain => "Введите домен (например, vpn.example.com)",
            Field::SslEmail => "Введите email для SSL сертификата",
        }
    }

    /// Значение не должно попадать на экран при вводе
    pub fn is_secret(self) -> bool {
        matches!(self, Field::SecretKey | Field::XuiToken | Field::BotToken)
    }
}

/// Проверяет значение параметра
pub fn validate(field: Field, value: &str) -> Result<(), InstallError> {
    let invalid = |reason: &str| InstallError::InvalidParam {
        field: field.env_key().to_string(),
        reason: reason.to_string(),
    };

    if value.trim().is_empty() {
        return Err(invalid("значение не может быть пустым"));
    }
    if value.contains(['\n', '\r']) {
        return Err(invalid("значение должно быть в одну строку"));
    }

    match field {
        Field::Domain => {
            let re = Regex::new(
                r"^(?i)[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)+$",
            )
            .expect("valid domain pattern");
            if !re.is_match(value) {
                return Err(invalid("ожидается доменное имя без схемы и пути"));
            }
        }
        Field::SslEmail => {
            let re = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email pattern");
            if !re.is_match(value) {
                return Err(invalid("ожидается адрес вида user@example.com"));
            }
        }
        Field::XuiUrl => {
            if !(value.starts_with("http://") || value.starts_with("https://")) {
                return Err(invalid("URL должен начинаться с http:// или https://"));
            }
        }
        Field::AdminTelegramId => {
            if !value.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid("Telegram ID должен состоять из цифр"));
            }
        }
        _ => {}
    }

    Ok(())
}

/// Нормализует введенное оператором значение и проверяет его
pub fn accept_input(field: Field, raw: &str) -> Result<String, InstallError> {
    let value = raw.trim();
    validate(field, value)?;
    Ok(value.to_string())
}

/// Проверенный набор параметров установки
#[derive(Clone, PartialEq, Eq)]
pub struct InstallParams {
    pub shop_id: String,
    pub secret_key: String,
    pub xui_url: String,
    pub xui_token: String,
    pub bot_token: String,
    pub admin_telegram_id: String,
    pub domain: String,
    pub ssl_email: String,
}

impl InstallParams {
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::ShopId => &self.shop_id,
            Field::SecretKey => &self.secret_key,
            Field::XuiUrl => &self.xui_url,
            Field::XuiToken => &self.xui_token,
            Field::BotToken => &self.bot_token,
            Field::AdminTelegramId => &self.admin_telegram_id,
            Field::Domain => &self.domain,
            Field::SslEmail => &self.ssl_email,
        }
    }

    fn from_values(mut values: HashMap<Field, String>) -> Result<Self, InstallError> {
        let mut take = |field: Field| {
            values
                .remove(&field)
                .ok_or_else(|| InstallError::MissingParam(field.env_key().to_string()))
        };

        Ok(Self {
            shop_id: take(Field::ShopId)?,
            secret_key: take(Field::SecretKey)?,
            xui_url: take(Field::XuiUrl)?,
            xui_token: take(Field::XuiToken)?,
            bot_token: take(Field::BotToken)?,
            admin_telegram_id: take(Field::AdminTelegramId)?,
            domain: take(Field::Domain)?,
            ssl_email: take(Field::SslEmail)?,
        })
    }
}

impl fmt::Debug for InstallParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallParams")
            .field("shop_id", &self.shop_id)
            .field("secret_key", &"***")
            .field("xui_url", &self.xui_url)
            .field("xui_token", &"***")
            .field("bot_token", &"***")
            .field("admin_telegram_id", &self.admin_telegram_id)
            .field("domain", &self.domain)
            .field("ssl_email", &self.ssl_email)
            .finish()
    }
}

/// Источник значений параметров
pub trait ParamSource {
    fn name(&self) -> &str;

    /// Возвращает значение поля или `None`, если источник его не знает
    fn lookup(&mut self, field: Field) -> Result<Option<String>, InstallError>;
}

/// Как называются ключи в источнике
#[derive(Debug, Clone, Copy)]
pub enum KeyStyle {
    FieldName,
    EnvKey,
}

/// Источник на основе готовой таблицы значений (TOML, dotenv-файл)
pub struct MapSource {
    name: String,
    style: KeyStyle,
    values: HashMap<String, String>,
}

impl MapSource {
    pub fn new(name: &str, style: KeyStyle, values: HashMap<String, String>) -> Self {
        Self {
            name: name.to_string(),
            style,
            values,
        }
    }

    /// Читает TOML-файл вида `domain = "vpn.example.com"`
    pub fn from_toml(path: &Path) -> Result<Self, InstallError> {
        let contents = fs::read_to_string(path)?;
        let table: toml::Table = toml::from_str(&contents)
            .map_err(|e| InstallError::Config(format!("не удалось разобрать {:?}: {}", path, e)))?;

        let values = table
            .into_iter()
            .filter_map(|(key, value)| match value {
                toml::Value::String(s) => Some((key, s)),
                toml::Value::Integer(i) => Some((key, i.to_string())),
                _ => None,
            })
            .collect();

        Ok(Self::new(&path.display().to_string(), KeyStyle::FieldName, values))
    }

    /// Читает файл в формате dotenv, не изменяя окружение процесса
    pub fn from_dotenv(path: &Path) -> Result<Self, InstallError> {
        let iter = dotenv::from_path_iter(path)
            .map_err(|e| InstallError::Config(format!("не удалось открыть {:?}: {}", path, e)))?;

        let mut values = HashMap::new();
        for item in iter {
            let (key, value) = item.map_err(|e| {
                InstallError::Config(format!("не удалось разобрать {:?}: {}", path, e))
            })?;
            values.insert(key, value);
        }

        Ok(Self::new(&path.display().to_string(), KeyStyle::EnvKey, values))
    }
}

impl ParamSource for MapSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup(&mut self, field: Field) -> Result<Option<String>, InstallError> {
        let key = match self.style {
            KeyStyle::FieldName => field.name(),
            KeyStyle::EnvKey => field.env_key(),
        };
        Ok(self.values.get(key).cloned())
    }
}

/// Переменные окружения процесса
pub struct EnvSource;

impl ParamSource for EnvSource {
    fn name(&self) -> &str {
        "окружение"
    }

    fn lookup(&mut self, field: Field) -> Result<Option<String>, InstallError> {
        Ok(env::var(field.env_key()).ok())
    }
}

/// Интерактивный ввод с терминала
pub struct PromptSource;

impl ParamSource for PromptSource {
    fn name(&self) -> &str {
        "терминал"
    }

    fn lookup(&mut self, field: Field) -> Result<Option<String>, InstallError> {
        loop {
            let raw = if field.is_secret() {
                Password::new().with_prompt(field.prompt()).interact()?
            } else {
                Input::<String>::new()
                    .with_prompt(field.prompt())
                    .interact_text()?
            };

            match accept_input(field, &raw) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => error!("{}, попробуйте еще раз", e),
            }
        }
    }
}

/// Собирает источники в порядке приоритета
///
/// # Arguments
/// * `params_file` - TOML-файл с параметрами
/// * `env_params_file` - Файл в формате dotenv
/// * `interactive` - Запрашивать недостающие значения с терминала
pub fn default_sources(
    params_file: Option<&Path>,
    env_params_file: Option<&Path>,
    interactive: bool,
) -> Result<Vec<Box<dyn ParamSource>>, InstallError> {
    let mut sources: Vec<Box<dyn ParamSource>> = Vec::new();

    if let Some(path) = params_file {
        sources.push(Box::new(MapSource::from_toml(path)?));
    }
    if let Some(path) = env_params_file {
        sources.push(Box::new(MapSource::from_dotenv(path)?));
    }
    sources.push(Box::new(EnvSource));
    if interactive {
        sources.push(Box::new(PromptSource));
    }

    Ok(sources)
}

/// Получает все параметры: для каждого поля берется первое непустое значение
pub fn collect(sources: &mut [Box<dyn ParamSource>]) -> Result<InstallParams, InstallError> {
    info!("Сбор параметров установки...");

    let mut values = HashMap::new();

    for field in Field::ALL {
        let mut found = None;
        for source in sources.iter_mut() {
            if let Some(value) = source.lookup(field)? {
                let value = value.trim().to_string();
                if !value.is_empty() {
                    debug!("{} получен из источника: {}", field.env_key(), source.name());
                    found = Some(value);
                    break;
                }
            }
        }

        let value =
            found.ok_or_else(|| InstallError::MissingParam(field.env_key().to_string()))?;
        validate(field, &value)?;
        values.insert(field, value);
    }

    InstallParams::from_values(values)
}
