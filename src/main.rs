use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};

mod audit;
mod backup;
mod config;
mod docker;
mod envfile;
mod error;
mod logger;
mod params;
mod pipeline;
mod preflight;
mod runner;
mod secret;
mod stack;
mod summary;
mod utils;

use crate::{
    audit::AuditedRunner, config::InstallerConfig, error::InstallError, pipeline::Installer,
    runner::SystemRunner,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Рабочая директория с .env.template, docker-compose.yml и файлом данных
    #[arg(short, long, global = true, default_value = ".")]
    work_dir: PathBuf,

    /// Файл настроек установщика (по умолчанию <work-dir>/installer.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// TOML-файл с параметрами установки
    #[arg(long, global = true)]
    params: Option<PathBuf>,

    /// Файл с параметрами в формате dotenv
    #[arg(long, global = true)]
    env_params: Option<PathBuf>,

    /// Не задавать вопросов: недостающий параметр — ошибка
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Подробный вывод
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Полная установка: проверка, Docker, .env, запуск стека
    Install,
    /// Только предварительные проверки
    Preflight,
    /// Только сбор параметров и генерация .env
    Render,
    /// Остановка стека
    Down,
}

async fn run(cli: Cli) -> Result<()> {
    let config = InstallerConfig::load(&cli.work_dir, cli.config.as_deref())?;
    let sources = || {
        params::default_sources(
            cli.params.as_deref(),
            cli.env_params.as_deref(),
            !cli.non_interactive,
        )
    };

    match cli.command.as_ref().unwrap_or(&Commands::Install) {
        Commands::Install => {
            if !utils::is_root() {
                return Err(anyhow::anyhow!("Установку нужно запускать от имени root (sudo)"));
            }

            let runner = AuditedRunner::new(SystemRunner, config.audit_path());
            let mut installer = Installer::new(&runner, &config, sources()?, utils::invoking_user());
            let outcome = installer.run().await?;

            outcome.summary.print();
            for warning in &outcome.warnings {
                logger::warning(warning);
            }
            info!("Файл окружения: {:?}", outcome.env_file);
        }
        Commands::Preflight => {
            let os = preflight::run(&config).await?;
            logger::success(&format!(
                "Система готова к установке: Ubuntu {}",
                os.version_id
            ));
        }
        Commands::Render => {
            let mut param_sources = sources()?;
            let install_params = params::collect(&mut param_sources)?;
            let path = envfile::write_env(&config, &install_params)?;
            logger::success(&format!("Файл окружения создан: {}", path.display()));
        }
        Commands::Down => {
            let runner = AuditedRunner::new(SystemRunner, config.audit_path());
            stack::stop(&runner, &config)
                .await
                .context("Не удалось остановить стек")?;
        }
    }

    Ok(())
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<InstallError>()
        .or_else(|| err.chain().find_map(|cause| cause.downcast_ref::<InstallError>()))
        .map(InstallError::exit_code)
        .unwrap_or(1)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = logger::init(cli.verbose) {
        eprintln!("Не удалось инициализировать логирование: {}", e);
    }

    if let Err(e) = ctrlc::set_handler(|| {
        eprintln!("\nУстановка прервана пользователем");
        std::process::exit(130);
    }) {
        error!("Не удалось установить обработчик Ctrl-C: {}", e);
    }

    info!("Запуск установщика VPN бота");

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(exit_code(&e));
    }
}
