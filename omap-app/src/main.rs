use std::path::PathBuf;

use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use omap_config::{AppConfig, ConfigError};
use omap_io::{MapLoader, MapSaver, OcdFacade};

fn main() {
    let mut args = std::env::args().skip(1);
    let mut symbols_only = false;
    let mut config_override: Option<PathBuf> = None;
    let mut input: Option<PathBuf> = None;
    let mut output: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--symbols-only" => symbols_only = true,
            "--config" => {
                let Some(path) = args.next() else {
                    eprintln!("`--config` 需要提供配置文件路径");
                    std::process::exit(1);
                };
                config_override = Some(PathBuf::from(path));
            }
            other if other.starts_with("--") => {
                eprintln!("未知参数：{other}");
                std::process::exit(1);
            }
            other => {
                if input.is_none() {
                    input = Some(PathBuf::from(other));
                } else if output.is_none() {
                    output = Some(PathBuf::from(other));
                } else {
                    eprintln!("多余的参数：{other}");
                    std::process::exit(1);
                }
            }
        }
    }

    let Some(input) = input else {
        eprintln!("用法：omap [--symbols-only] [--config 路径] 输入.ocd [输出.ocd]");
        std::process::exit(1);
    };

    let config = load_configuration(config_override);
    init_logging(&config);

    let facade = match OcdFacade::with_encodings(&config.io.narrow_encoding, &config.io.wide_encoding)
    {
        Ok(facade) => facade.symbols_only(symbols_only),
        Err(err) => {
            error!(error = %err, "无法识别配置的字符串编码");
            std::process::exit(1);
        }
    };

    info!(path = %input.display(), "读取 OCD 地图");
    let imported = match facade.load(&input) {
        Ok(imported) => imported,
        Err(err) => {
            error!(error = %err, "导入失败");
            std::process::exit(1);
        }
    };

    for warning in &imported.warnings {
        warn!("{warning}");
    }
    info!(
        scale = imported.map.scale_denominator,
        colors = imported.map.color_count(),
        symbols = imported.map.symbol_count(),
        objects = imported.map.object_count(),
        templates = imported.map.templates.len(),
        warnings = imported.warnings.len(),
        "导入完成"
    );

    if let Some(output) = output {
        info!(path = %output.display(), "写出 OCD 地图");
        match facade.save(&imported.map, Some(&imported.view), &output) {
            Ok(warnings) => {
                for warning in &warnings {
                    warn!("{warning}");
                }
                info!(warnings = warnings.len(), "写出完成");
            }
            Err(err) => {
                error!(error = %err, "导出失败");
                std::process::exit(1);
            }
        }
    }
}

fn load_configuration(override_path: Option<PathBuf>) -> AppConfig {
    match override_path {
        Some(path) => AppConfig::from_file(&path).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "加载指定配置失败，使用默认配置");
            AppConfig::default()
        }),
        None => match AppConfig::discover() {
            Ok(cfg) => cfg,
            Err(err) => {
                match &err {
                    ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                        warn!(path = %path.display(), error = %err, "加载默认配置失败，使用内建默认值");
                    }
                    ConfigError::Context { .. } => {
                        warn!(error = %err, "加载默认配置失败，使用内建默认值");
                    }
                }
                AppConfig::default()
            }
        },
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}
