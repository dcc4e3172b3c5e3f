use std::path::{Component, Path, PathBuf};

pub const CONTROL_TCP_PORT: u16 = 9877;
pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/trackdeck/ (XDG standard)
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("trackdeck")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("trackdeck")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("trackdeck")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("trackdeck")
    }
}

pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(unix)]
fn executable_names(name: &str) -> Vec<String> {
    vec![name.to_string()]
}

#[cfg(windows)]
fn executable_names(name: &str) -> Vec<String> {
    if name.ends_with(".exe") {
        vec![name.to_string()]
    } else {
        vec![format!("{}.exe", name), name.to_string()]
    }
}

fn find_beside_exe(names: &[String]) -> Option<PathBuf> {
    let current_exe = std::env::current_exe().ok()?;
    let dir = current_exe.parent()?;
    for name in names {
        let p = dir.join(name);
        if p.exists() {
            return Some(p);
        }
        let p = dir.join("external").join(name);
        if p.exists() {
            return Some(p);
        }
    }
    None
}

fn find_on_path(names: &[String]) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        for name in names {
            let p = dir.join(name);
            if p.is_file() {
                return Some(p);
            }
        }
    }
    None
}

/// Resolve a backend program name to an executable path.
///
/// Anything containing a path separator is taken as-is (and must exist).
/// Bare names are looked up beside the current executable first, then on
/// `PATH`.
pub fn find_binary(program: &str) -> Option<PathBuf> {
    let as_path = Path::new(program);
    if as_path.components().count() > 1 || as_path.is_absolute() {
        return as_path.exists().then(|| as_path.to_path_buf());
    }

    let names = executable_names(program);
    if let Some(p) = find_beside_exe(&names) {
        return Some(p);
    }
    find_on_path(&names)
}

/// Absolute, lexically normalised form of `path`.
///
/// Relative paths are joined onto the current directory; `.` segments are
/// dropped and `..` pops the previous segment.  Symlinks are not resolved
/// so this works for files that no longer exist.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !matches!(
                    out.components().next_back(),
                    None | Some(Component::RootDir) | Some(Component::Prefix(_))
                ) {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn normalize_strips_dots() {
        assert_eq!(
            normalize_path(Path::new("/music/./midi/../a.mid")),
            PathBuf::from("/music/a.mid")
        );
        assert_eq!(normalize_path(Path::new("/../x")), PathBuf::from("/x"));
    }

    #[test]
    fn normalize_makes_relative_absolute() {
        assert!(normalize_path(Path::new("a.mid")).is_absolute());
    }

    #[cfg(unix)]
    #[test]
    fn find_binary_on_path() {
        assert!(find_binary("sh").is_some());
        assert!(find_binary("definitely-not-a-real-backend-xyz").is_none());
        assert!(find_binary("/nonexistent/dir/fluidsynth").is_none());
    }
}
