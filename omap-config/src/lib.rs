use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 应用配置的根结构。
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub io: IoConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            io: IoConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 自动发现配置文件：优先读取环境变量 `OMAP_CONFIG`，否则寻找
    /// `./config/default.toml`。若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os("OMAP_CONFIG") {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 文件读写配置：旧版二进制文件中窄/宽字符串的编码。
#[derive(Debug, Clone, Deserialize)]
pub struct IoConfig {
    #[serde(default = "IoConfig::default_narrow_encoding")]
    pub narrow_encoding: String,
    #[serde(default = "IoConfig::default_wide_encoding")]
    pub wide_encoding: String,
}

impl IoConfig {
    fn default_narrow_encoding() -> String {
        "windows-1252".to_string()
    }

    fn default_wide_encoding() -> String {
        "utf-16-le".to_string()
    }
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            narrow_encoding: Self::default_narrow_encoding(),
            wide_encoding: Self::default_wide_encoding(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_returned_when_file_missing() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.io.narrow_encoding, "windows-1252");
        assert_eq!(cfg.io.wide_encoding, "utf-16-le");
    }

    #[test]
    fn load_from_temp_file() {
        let mut file = tempfile::NamedTempFile::new().expect("创建临时文件失败");
        writeln!(
            file,
            r#"
            [logging]
            level = "debug"

            [io]
            narrow_encoding = "latin-1"
            "#
        )
        .expect("写入临时配置失败");

        let cfg = AppConfig::from_file(file.path()).expect("读取临时配置失败");
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.io.narrow_encoding, "latin-1");
        // 未出现的键取默认值
        assert_eq!(cfg.io.wide_encoding, "utf-16-le");
    }

    #[test]
    fn parse_error_reports_path() {
        let mut file = tempfile::NamedTempFile::new().expect("创建临时文件失败");
        writeln!(file, "logging = 1").expect("写入临时配置失败");
        let err = AppConfig::from_file(file.path()).expect_err("应当解析失败");
        matches!(err, ConfigError::Parse { .. });
    }
}
