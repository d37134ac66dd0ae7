//! 引擎配置：结果上限、回收站仓库名、受保护属性键。
//! 支持从 JSON 文件加载，缺省值见 [`EngineConfig::default`]。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 单次查询可返回的最大行数；装饰器会把更大的 limit 压到这个值。
    #[serde(default = "default_max_limit")]
    pub max_limit: u64,
    /// 软删除内容所在的仓库名，装饰器会排除它。
    #[serde(default = "default_trash_repo")]
    pub trash_repo: String,
    /// properties 域中对调用方隐藏的属性键。
    #[serde(default)]
    pub hidden_properties: Vec<String>,
}

fn default_max_limit() -> u64 {
    50_000
}

fn default_trash_repo() -> String {
    "auto-trashcan".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_limit: default_max_limit(),
            trash_repo: default_trash_repo(),
            hidden_properties: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// 从 JSON 文件加载配置。
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_limit, 50_000);
        assert_eq!(config.trash_repo, "auto-trashcan");
        assert!(config.hidden_properties.is_empty());
    }

    #[test]
    fn test_load_partial_json_uses_defaults() {
        let temp_file = "test_engine_config.json";
        let mut file = std::fs::File::create(temp_file).unwrap();
        writeln!(file, r#"{{"max_limit": 100}}"#).unwrap();

        let config = EngineConfig::from_json_file(temp_file).unwrap();
        assert_eq!(config.max_limit, 100);
        assert_eq!(config.trash_repo, "auto-trashcan");

        std::fs::remove_file(temp_file).ok();
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let temp_file = "test_engine_config_bad.json";
        let mut file = std::fs::File::create(temp_file).unwrap();
        writeln!(file, "not json").unwrap();

        assert!(matches!(
            EngineConfig::from_json_file(temp_file),
            Err(ConfigError::Parse { .. })
        ));

        std::fs::remove_file(temp_file).ok();
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            EngineConfig::from_json_file("no_such_config.json"),
            Err(ConfigError::Io { .. })
        ));
    }
}
