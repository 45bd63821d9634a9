use std::{
    collections::HashMap,
    env,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{anyhow, Result};
use clap::ValueEnum;
use directories::BaseDirs;

use crate::cli::Cli;

/// Which execution backend the playground talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Python interpreter subprocess on this machine.
    Local,
    /// Kernel hosted by the notebook server (REST + WebSocket).
    Remote,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(anyhow!("unknown kernel backend '{other}' (expected local or remote)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(default_config_path())
    }

    /// Defaults, overlaid by the rc file at `config_path` if present, overlaid
    /// by environment variables.
    pub fn load_from(config_path: PathBuf) -> Self {
        let mut map = default_map();

        if let Ok(text) = fs::read_to_string(&config_path) {
            map.extend(parse_rc(&text));
        }

        for (k, v) in env::vars() {
            if let Some(key) = config_key(&k) {
                map.insert(key, v);
            }
        }

        Self { inner: map, config_path }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    /// no-color.org convention: any non-empty `NO_COLOR` turns colour off.
    pub fn no_color(&self) -> bool {
        self.get("NO_COLOR").is_some_and(|v| !v.is_empty())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse::<u64>().ok())
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).filter(|v| !v.trim().is_empty()).map(PathBuf::from)
    }

    pub fn log_path(&self) -> PathBuf {
        self.get_path("LOG_FILE")
            .unwrap_or_else(|| env::temp_dir().join("nbplay").join("nbplay.log"))
    }
}

/// Effective runtime settings: CLI flags over config over defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub backend: BackendKind,
    pub url: String,
    pub kernel_id: Option<String>,
    pub kernel_name: String,
    pub python: String,
    pub request_timeout: Duration,
    pub tick_interval: Duration,
    pub log_file: PathBuf,
    pub color: String,
    pub use_color: bool,
}

impl Settings {
    pub fn resolve(args: &Cli, cfg: &Config) -> Result<Self> {
        let backend = match args.backend {
            Some(kind) => kind,
            None => cfg.get("KERNEL_BACKEND").as_deref().unwrap_or("local").parse()?,
        };
        let tick_ms = args
            .tick_ms
            .or_else(|| cfg.get_u64("TICK_INTERVAL_MS"))
            .unwrap_or(100)
            .max(10);

        Ok(Self {
            backend,
            url: args
                .url
                .clone()
                .or_else(|| cfg.get("KERNEL_URL"))
                .unwrap_or_else(|| "http://localhost:8000".to_string()),
            kernel_id: args
                .kernel_id
                .clone()
                .or_else(|| cfg.get("KERNEL_ID"))
                .filter(|id| !id.trim().is_empty()),
            kernel_name: args
                .kernel_name
                .clone()
                .or_else(|| cfg.get("KERNEL_NAME"))
                .unwrap_or_else(|| "python3".to_string()),
            python: args
                .python
                .clone()
                .or_else(|| cfg.get("PYTHON_BIN"))
                .unwrap_or_else(|| "python3".to_string()),
            request_timeout: Duration::from_secs(cfg.get_u64("REQUEST_TIMEOUT").unwrap_or(60)),
            tick_interval: Duration::from_millis(tick_ms),
            log_file: args.log_file.clone().unwrap_or_else(|| cfg.log_path()),
            color: cfg.get("DEFAULT_COLOR").unwrap_or_else(|| "cyan".to_string()),
            use_color: !args.no_color && !cfg.no_color(),
        })
    }
}

/// Parse `KEY=VALUE` lines; blank lines and `#` comments are skipped.
pub fn parse_rc(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Map an environment variable onto a config key. Known keys are taken as
/// is; `NBPLAY_<KEY>` is accepted for any key.
fn config_key(k: &str) -> Option<String> {
    const KEYS: &[&str] = &[
        "KERNEL_BACKEND",
        "KERNEL_URL",
        "KERNEL_ID",
        "KERNEL_NAME",
        "PYTHON_BIN",
        "REQUEST_TIMEOUT",
        "TICK_INTERVAL_MS",
        "LOG_FILE",
        "DEFAULT_COLOR",
        "NO_COLOR",
    ];

    if let Some(stripped) = k.strip_prefix("NBPLAY_") {
        return Some(stripped.to_string());
    }
    KEYS.contains(&k).then(|| k.to_string())
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("nbplay").join(".nbplayrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();

    m.insert("KERNEL_BACKEND".into(), "local".into());
    m.insert("KERNEL_URL".into(), "http://localhost:8000".into());
    m.insert("KERNEL_NAME".into(), "python3".into());
    m.insert("PYTHON_BIN".into(), "python3".into());

    // Numbers
    m.insert("REQUEST_TIMEOUT".into(), "60".into());
    m.insert("TICK_INTERVAL_MS".into(), "100".into());

    m.insert("DEFAULT_COLOR".into(), "cyan".into());

    m
}

/// Make sure the directory holding `path` exists.
pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn config_with(text: &str) -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".nbplayrc");
        fs::write(&path, text).unwrap();
        let cfg = Config::load_from(path);
        (dir, cfg)
    }

    #[test]
    fn test_parse_rc_skips_comments_and_blank_lines() {
        let map = parse_rc("# comment\n\nKERNEL_URL = http://host:9000\nbogus line\nPYTHON_BIN=python3.12\n");
        assert_eq!(map.len(), 2);
        assert_eq!(map["KERNEL_URL"], "http://host:9000");
        assert_eq!(map["PYTHON_BIN"], "python3.12");
    }

    #[test]
    fn test_rc_file_overrides_defaults() {
        let (_dir, cfg) = config_with("TICK_INTERVAL_MS=250\nDEFAULT_COLOR=green\n");
        assert_eq!(cfg.get_u64("TICK_INTERVAL_MS"), Some(250));
        assert_eq!(cfg.get("DEFAULT_COLOR").as_deref(), Some("green"));
        assert_eq!(cfg.get_u64("REQUEST_TIMEOUT"), Some(60));
    }

    #[test]
    fn test_missing_rc_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_from(dir.path().join("absent"));
        assert_eq!(cfg.get("KERNEL_NAME").as_deref(), Some("python3"));
    }

    #[test]
    fn test_any_no_color_value_disables_colour() {
        let with = |value: Option<&str>| {
            let mut inner = default_map();
            if let Some(value) = value {
                inner.insert("NO_COLOR".into(), value.into());
            }
            Config { inner, config_path: PathBuf::from(".nbplayrc") }
        };
        assert!(!with(None).no_color());
        assert!(!with(Some("")).no_color());
        for value in ["1", "true", "0", "false", "anything"] {
            assert!(with(Some(value)).no_color(), "NO_COLOR={value}");
        }

        let args = Cli::try_parse_from(["nbplay"]).unwrap();
        assert!(!Settings::resolve(&args, &with(Some("0"))).unwrap().use_color);
        assert!(Settings::resolve(&args, &with(None)).unwrap().use_color);
    }

    #[test]
    fn test_config_key_mapping() {
        assert_eq!(config_key("KERNEL_URL").as_deref(), Some("KERNEL_URL"));
        assert_eq!(config_key("NBPLAY_KERNEL_ID").as_deref(), Some("KERNEL_ID"));
        assert_eq!(config_key("HOME"), None);
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("Remote".parse::<BackendKind>().unwrap(), BackendKind::Remote);
        assert_eq!(" local ".parse::<BackendKind>().unwrap(), BackendKind::Local);
        assert!("docker".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_settings_cli_overrides_config() {
        let (_dir, cfg) =
            config_with("KERNEL_BACKEND=remote\nKERNEL_URL=http://cfg:1\nTICK_INTERVAL_MS=5\nKERNEL_ID=\n");
        let args = Cli::try_parse_from(["nbplay", "--url", "http://cli:2"]).unwrap();
        let settings = Settings::resolve(&args, &cfg).unwrap();
        assert_eq!(settings.backend, BackendKind::Remote);
        assert_eq!(settings.url, "http://cli:2");
        assert_eq!(settings.kernel_id, None);
        // clamped so the ticker never spins
        assert_eq!(settings.tick_interval, Duration::from_millis(10));

        let args = Cli::try_parse_from(["nbplay", "--backend", "local", "--tick-ms", "200"]).unwrap();
        let settings = Settings::resolve(&args, &cfg).unwrap();
        assert_eq!(settings.backend, BackendKind::Local);
        assert_eq!(settings.tick_interval, Duration::from_millis(200));
    }
}
