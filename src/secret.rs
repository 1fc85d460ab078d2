use rand::{rngs::OsRng, RngCore};

/// Размер секрета JWT в байтах
pub const SECRET_BYTES: usize = 32;

/// Генерирует секрет из системного CSPRNG в виде hex-строки (64 символа)
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
