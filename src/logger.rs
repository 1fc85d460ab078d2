use anyhow::Result;
use colored::*;
use env_logger::{Builder, Env};
use log::LevelFilter;

/// Инициализирует логирование
///
/// # Arguments
/// * `verbose` - Включить отладочные сообщения
///
/// # Returns
/// * `Result<()>` - Успех или ошибка инициализации
///
/// # Examples
/// ```rust
/// logger::init(false)?;
/// ```
pub fn init(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let env = Env::default()
        .filter_or("RUST_LOG", default_level)
        .write_style_or("RUST_LOG_STYLE", "always");

    let mut builder = Builder::from_env(env);
    builder.format_timestamp_secs().format_module_path(true);
    if verbose {
        builder.filter(None, LevelFilter::Debug);
    }
    builder.try_init()?;

    Ok(())
}

/// Выводит сгенерированный секрет или учетные данные
///
/// # Examples
/// ```rust
/// logger::secret_info("Логин: admin");
/// ```
pub fn secret_info(message: &str) {
    println!(
        "{} {}",
        "[CREDENTIALS]".magenta().bold(),
        message.cyan().bold()
    );
}

/// Логирует успешное выполнение этапа
pub fn success(message: &str) {
    println!("{} {}", "[SUCCESS]".green().bold(), message);
}

/// Предупреждение для оператора, которое не должно потеряться среди логов
pub fn warning(message: &str) {
    println!("{} {}", "[WARNING]".yellow().bold(), message);
}

/// Строка итоговой сводки
pub fn summary_line(label: &str, value: &str) {
    println!("  {:<22} {}", label.bold(), value.cyan());
}
