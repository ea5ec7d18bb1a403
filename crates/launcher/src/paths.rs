//! Chrome executable discovery.

use std::path::{Path, PathBuf};

use kibbutz_relay::LaunchError;

#[cfg(target_os = "linux")]
const LINUX_CHROME: &str = "/opt/google/chrome/chrome";

#[cfg(target_os = "macos")]
const MACOS_CHROME: &str = "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome";

#[cfg_attr(not(windows), allow(dead_code))]
const WINDOWS_SUFFIX: &str = r"\Google\Chrome\Application\chrome.exe";

/// Returns the Chrome executable, preferring `override_path` when given.
pub fn find_chrome(override_path: Option<&Path>) -> Result<PathBuf, LaunchError> {
    if let Some(path) = override_path {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(LaunchError::ExecutableNotFound(path.display().to_string()))
        };
    }

    platform_candidates()
        .into_iter()
        .find(|p| p.is_file())
        .ok_or_else(|| LaunchError::ExecutableNotFound(std::env::consts::OS.to_string()))
}

#[cfg(target_os = "linux")]
fn platform_candidates() -> Vec<PathBuf> {
    vec![PathBuf::from(LINUX_CHROME)]
}

#[cfg(target_os = "macos")]
fn platform_candidates() -> Vec<PathBuf> {
    vec![PathBuf::from(MACOS_CHROME)]
}

#[cfg(windows)]
fn platform_candidates() -> Vec<PathBuf> {
    windows_candidates(|name| std::env::var(name).ok())
}

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
fn platform_candidates() -> Vec<PathBuf> {
    Vec::new()
}

/// Per-user install first, then the machine-wide program folders.
#[cfg_attr(not(windows), allow(dead_code))]
fn windows_candidates(env: impl Fn(&str) -> Option<String>) -> Vec<PathBuf> {
    let home_drive = env("HOMEDRIVE").filter(|d| !d.is_empty());
    let bases = [
        env("LOCALAPPDATA"),
        env("PROGRAMFILES"),
        env("PROGRAMFILES(X86)"),
        home_drive.as_ref().map(|d| format!(r"{d}\Program Files")),
        home_drive.as_ref().map(|d| format!(r"{d}\Program Files (x86)")),
    ];
    bases
        .into_iter()
        .flatten()
        .filter(|base| !base.is_empty())
        .map(|base| PathBuf::from(format!("{}{WINDOWS_SUFFIX}", base.trim_end_matches('\\'))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn windows_candidates_follow_install_order() {
        let env: HashMap<&str, &str> = [
            ("LOCALAPPDATA", r"C:\Users\me\AppData\Local"),
            ("PROGRAMFILES", r"C:\Program Files"),
            ("HOMEDRIVE", "D:"),
        ]
        .into_iter()
        .collect();

        let found = windows_candidates(|name| env.get(name).map(|v| v.to_string()));
        let found: Vec<String> = found.iter().map(|p| p.display().to_string()).collect();
        assert_eq!(
            found,
            vec![
                r"C:\Users\me\AppData\Local\Google\Chrome\Application\chrome.exe",
                r"C:\Program Files\Google\Chrome\Application\chrome.exe",
                r"D:\Program Files\Google\Chrome\Application\chrome.exe",
                r"D:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            ]
        );
    }

    #[test]
    fn windows_candidates_skip_unset_variables() {
        assert!(windows_candidates(|_| None).is_empty());
        assert_eq!(windows_candidates(|_| Some(String::new())).len(), 0);
    }

    #[test]
    fn override_must_exist() {
        let err = find_chrome(Some(Path::new("/definitely/not/here"))).unwrap_err();
        match err {
            LaunchError::ExecutableNotFound(p) => assert!(p.contains("definitely")),
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn existing_override_wins() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(find_chrome(Some(file.path())).unwrap(), file.path());
    }
}
