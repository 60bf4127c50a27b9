//! Subprocess helpers: console-less command construction and `PATH` lookup
//! for external tools such as `ffmpeg`.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
///
/// The child inherits a `C` locale so that diagnostic text stays in English
/// regardless of the user's environment.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.env("LC_ALL", "C");
    cmd.no_window();
    cmd
}

#[cfg(windows)]
fn candidate_names(program: &OsStr) -> Vec<std::ffi::OsString> {
    let mut names = vec![program.to_os_string()];
    if Path::new(program).extension().is_none() {
        let pathext = std::env::var("PATHEXT").unwrap_or_else(|_| ".EXE;.BAT;.CMD".to_string());
        for ext in pathext.split(';').filter(|e| !e.is_empty()) {
            let mut name = program.to_os_string();
            name.push(ext);
            names.push(name);
        }
    }
    names
}

#[cfg(not(windows))]
fn candidate_names(program: &OsStr) -> Vec<std::ffi::OsString> {
    vec![program.to_os_string()]
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = path.metadata() else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Locate `program` in the directories listed by `search_path`.
///
/// A program given with a directory component is checked as-is.
pub fn find_program_in(program: impl AsRef<OsStr>, search_path: &OsStr) -> Option<PathBuf> {
    let program = program.as_ref();
    let as_path = Path::new(program);
    if as_path.components().count() > 1 {
        return is_executable(as_path).then(|| as_path.to_path_buf());
    }

    let names = candidate_names(program);
    std::env::split_paths(search_path)
        .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
        .find(|candidate| is_executable(candidate))
}

/// Locate `program` on the current `PATH`.
pub fn find_program(program: impl AsRef<OsStr>) -> Option<PathBuf> {
    let search_path = std::env::var_os("PATH")?;
    find_program_in(program, &search_path)
}
