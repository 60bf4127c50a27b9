//! User configuration file and per-user directories.
//!
//! The configuration file holds default command-line options, one option
//! (plus its argument, if any) per line. They are prepended to the real
//! command line so that explicit arguments win.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

pub const APP_NAME: &str = "vodcat";
pub const CONFIG_FILE_NAME: &str = "vodcat.conf";
pub const DATABASE_FILE_NAME: &str = "data.db";

pub const USER_CONFIG_DIR_ENV: &str = "VODCAT_USER_CONFIG_DIR";
pub const USER_DATA_DIR_ENV: &str = "VODCAT_USER_DATA_DIR";
pub const NO_USER_CONFIG_ENV: &str = "VODCAT_NO_USER_CONFIG";
pub const NO_CACHE_ENV: &str = "VODCAT_NO_CACHE";

pub const CONFIG_FILE_TEMPLATE: &str = "\
# You may configure default options here so that you don't need to
# specify the same options on the command line every time.
#
# Each option, along with its argument (if any), should be on a separate
# line; unlike on the command line, you don't need to quote or escape
# whitespace or other special characters in an argument, e.g., a line
#
#     --workdir Temporary Directory
#
# is interpreted as two command line arguments \"--workdir\" and
# \"Temporary Directory\".
#
# Positional arguments are not allowed, i.e., option lines must begin
# with -.
#
# Blank lines and lines starting with a pound (#) are ignored.
#
# You can always override the default options here on the command line.
#
# Examples:
#
#     --jobs 32
#     --concat-method concat_protocol
";

/// Locations of per-user state, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub user_config_disabled: bool,
    pub cache_disabled: bool,
}

fn env_flag(name: &str) -> bool {
    std::env::var_os(name).is_some_and(|v| !v.is_empty())
}

fn env_dir(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

impl AppPaths {
    /// Resolve directories from the environment, falling back to the
    /// platform defaults from `dirs`.
    pub fn from_env() -> Self {
        let config_dir = env_dir(USER_CONFIG_DIR_ENV)
            .or_else(|| dirs::config_dir().map(|d| d.join(APP_NAME)))
            .unwrap_or_else(|| PathBuf::from(format!(".{APP_NAME}")));
        let data_dir = env_dir(USER_DATA_DIR_ENV)
            .or_else(|| dirs::data_dir().map(|d| d.join(APP_NAME)))
            .unwrap_or_else(|| config_dir.clone());
        Self {
            config_dir,
            data_dir,
            user_config_disabled: env_flag(NO_USER_CONFIG_ENV),
            cache_disabled: env_flag(NO_CACHE_ENV),
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    pub fn database_file(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE_NAME)
    }
}

/// Turn configuration file text into command-line arguments.
///
/// Each option line is split once on whitespace: `--workdir Temporary
/// Directory` yields `--workdir` and `Temporary Directory`.
pub fn parse_config_lines(content: &str, source: &Path) -> Vec<OsString> {
    let mut args = Vec::new();
    for line in content.lines() {
        let line = line.trim().trim_start_matches('\u{feff}');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !line.starts_with('-') {
            warn!(file = %source.display(), line, "Illegal line in config file");
            continue;
        }
        match line.split_once(char::is_whitespace) {
            Some((option, value)) => {
                args.push(OsString::from(option));
                args.push(OsString::from(value.trim_start()));
            }
            None => args.push(OsString::from(line)),
        }
    }
    args
}

/// Read the default options from `path`, creating the file from
/// [`CONFIG_FILE_TEMPLATE`] when it does not exist yet.
pub fn load_user_config(path: &Path) -> Result<Vec<OsString>> {
    if path.is_file() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        return Ok(parse_config_lines(&content, path));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
    }
    std::fs::write(path, CONFIG_FILE_TEMPLATE)
        .with_context(|| format!("Failed to write config file {}", path.display()))?;
    info!(path = %path.display(), "Created config file template");
    Ok(Vec::new())
}

/// Insert configuration defaults right after the program name.
pub fn merge_with_command_line<I>(defaults: Vec<OsString>, command_line: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut command_line = command_line.into_iter();
    let mut merged = Vec::new();
    merged.extend(command_line.next());
    merged.extend(defaults);
    merged.extend(command_line);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<&str> {
        args.iter().map(|a| a.to_str().unwrap()).collect()
    }

    #[test]
    fn test_parse_config_lines() {
        let content = "\u{feff}# comment\n\n--jobs 32\n  --workdir   Temporary Directory  \nstray\n-k\n";
        let args = parse_config_lines(content, Path::new("vodcat.conf"));
        assert_eq!(
            strings(&args),
            ["--jobs", "32", "--workdir", "Temporary Directory", "-k"]
        );
    }

    #[test]
    fn test_template_yields_no_options() {
        assert!(parse_config_lines(CONFIG_FILE_TEMPLATE, Path::new("t")).is_empty());
    }

    #[test]
    fn test_load_user_config_creates_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        assert!(load_user_config(&path).unwrap().is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), CONFIG_FILE_TEMPLATE);

        std::fs::write(&path, "--concat-method concat_protocol\n").unwrap();
        let args = load_user_config(&path).unwrap();
        assert_eq!(strings(&args), ["--concat-method", "concat_protocol"]);
    }

    #[test]
    fn test_merge_puts_defaults_before_command_line() {
        let merged = merge_with_command_line(
            vec!["--jobs".into(), "4".into()],
            ["vodcat", "--jobs", "8", "https://a/b.m3u8"].map(OsString::from),
        );
        assert_eq!(
            strings(&merged),
            ["vodcat", "--jobs", "4", "--jobs", "8", "https://a/b.m3u8"]
        );
    }
}
