//! Standard locations of platter's files

use std::path::PathBuf;

/// `~/.config/platter`, or `./platter` if no config directory is known
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("platter")
}

/// `~/.config/platter/config.yaml`
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_layout() {
        let path = default_config_path();
        assert!(path.ends_with("platter/config.yaml"));
        assert_eq!(path.parent(), Some(default_config_dir().as_path()));
    }
}
