use std::path::Path;

use crate::{BotConfig, Result};

/// A missing file yields the defaults; a malformed one is an error.
pub(crate) fn load_file_config(path: &Path) -> Result<BotConfig> {
    match std::fs::read_to_string(path) {
        Ok(data) => Ok(serde_json::from_str(&data)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BotConfig::default()),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn save_file_config(path: &Path, config: &BotConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
