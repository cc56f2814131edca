use std::collections::HashMap;
use std::path::PathBuf;

/// Resolved settings the CLI needs, sourced from the flat `KEY=VALUE` file
/// (if present) and then overridden by the process environment — env wins,
/// per the documented config precedence.
pub struct CliConfig {
    pub db_path: PathBuf,
    pub pid_dir: PathBuf,
    pub host: String,
    pub port: u16,
}

impl Default for CliConfig {
    fn default() -> Self {
        let home = dirs_home();
        Self {
            db_path: home.join(".ocg").join("ocg.db"),
            pid_dir: home.join(".ocg").join("run"),
            host: "127.0.0.1".to_string(),
            port: 18789,
        }
    }
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}

/// Parses `#`-comment-tolerant `KEY=VALUE` lines into a map.
fn parse_flat_file(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

pub fn load(explicit_path: Option<&str>) -> CliConfig {
    let mut cfg = CliConfig::default();

    let path = explicit_path
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("OCG_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| dirs_home().join(".ocg").join("ocg.conf"));

    let mut values = std::fs::read_to_string(&path).map(|c| parse_flat_file(&c)).unwrap_or_default();
    for key in ["OCG_DB_PATH", "OCG_PID_DIR", "OCG_HOST", "OCG_PORT"] {
        if let Ok(v) = std::env::var(key) {
            values.insert(key.to_string(), v);
        }
    }

    if let Some(v) = values.get("OCG_DB_PATH") {
        cfg.db_path = PathBuf::from(v);
    }
    if let Some(v) = values.get("OCG_PID_DIR") {
        cfg.pid_dir = PathBuf::from(v);
    }
    if let Some(v) = values.get("OCG_HOST") {
        cfg.host = v.clone();
    }
    if let Some(v) = values.get("OCG_PORT") {
        if let Ok(p) = v.parse() {
            cfg.port = p;
        }
    }
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comments_and_blank_lines() {
        let map = parse_flat_file("# comment\nOCG_PORT=9000\n\nOCG_HOST=0.0.0.0\n");
        assert_eq!(map.get("OCG_PORT").unwrap(), "9000");
        assert_eq!(map.get("OCG_HOST").unwrap(), "0.0.0.0");
        assert_eq!(map.len(), 2);
    }
}
