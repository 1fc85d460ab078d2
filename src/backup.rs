use std::{
    collections::HashMap,
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use chrono::Local;
use log::{debug, info, warn};

use crate::error::InstallError;

/// Создает бекап файла перед его перезаписью
///
/// # Returns
/// * `Ok(None)` - Файл не существует, бекап не требуется
/// * `Ok(Some(path))` - Путь к созданной копии
pub fn backup_file(file_path: &Path, backup_dir: &Path) -> Result<Option<PathBuf>, InstallError> {
    if !file_path.exists() {
        debug!("Файл {:?} не существует, бекап не требуется", file_path);
        return Ok(None);
    }

    fs::create_dir_all(backup_dir)?;

    let file_name = file_path
        .file_name()
        .ok_or_else(|| {
            InstallError::Config(format!("не удалось получить имя файла из {:?}", file_path))
        })?
        .to_string_lossy();

    // Существующий бекап никогда не перезаписывается
    let timestamp = Local::now().format("%Y%m%d%H%M%S%3f").to_string();
    let mut attempt = 0;
    let backup_path = loop {
        let candidate = if attempt == 0 {
            backup_dir.join(format!("{}_{}", file_name, timestamp))
        } else {
            backup_dir.join(format!("{}_{}-{:03}", file_name, timestamp, attempt))
        };

        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut target) => {
                let mut source = fs::File::open(file_path)?;
                io::copy(&mut source, &mut target)?;
                break candidate;
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    };

    info!("Создан бекап {:?} -> {:?}", file_path, backup_path);

    Ok(Some(backup_path))
}

/// Удаляет старые бекапы, оставляя последние `keep_last` для каждого файла
pub fn clean_old_backups(backup_dir: &Path, keep_last: usize) -> Result<(), InstallError> {
    if !backup_dir.exists() {
        debug!("Директория бекапов не существует, нечего очищать");
        return Ok(());
    }

    let entries = fs::read_dir(backup_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file());

    // Имя файла до последнего '_' — исходное имя, после — метка времени
    let mut files_by_name: HashMap<String, Vec<PathBuf>> = HashMap::new();
    for path in entries {
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if let Some((base_name, _)) = file_name.rsplit_once('_') {
            files_by_name
                .entry(base_name.to_string())
                .or_default()
                .push(path.clone());
        }
    }

    for (_, mut files) in files_by_name {
        if files.len() <= keep_last {
            continue;
        }

        // Метка времени в имени сортируется лексикографически
        files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

        for file in files.iter().skip(keep_last) {
            if let Err(e) = fs::remove_file(file) {
                warn!("Не удалось удалить старый бекап {:?}: {}", file, e);
            } else {
                debug!("Удален старый бекап: {:?}", file);
            }
        }
    }

    Ok(())
}
