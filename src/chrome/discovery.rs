use crate::{CaptureError, Result};
use std::path::PathBuf;

#[cfg(target_os = "macos")]
const KNOWN_LOCATIONS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
    "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
];

#[cfg(target_os = "linux")]
const KNOWN_LOCATIONS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
];

#[cfg(target_os = "windows")]
const KNOWN_LOCATIONS: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files\Chromium\Application\chrome.exe",
    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
];

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
const KNOWN_LOCATIONS: &[&str] = &[];

const PATH_BINARIES: &[&str] = if cfg!(windows) {
    &["chrome.exe", "chromium.exe", "msedge.exe"]
} else {
    &["google-chrome", "chromium", "chromium-browser", "chrome"]
};

/// Locates a Chrome/Chromium binary: well-known install locations first, then `PATH`.
pub fn find_chrome_executable() -> Result<PathBuf> {
    KNOWN_LOCATIONS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .or_else(find_in_path)
        .ok_or_else(|| {
            CaptureError::LaunchFailed(
                "Could not find Chrome/Chromium executable. Please specify with --chrome-path"
                    .into(),
            )
        })
}

fn find_in_path() -> Option<PathBuf> {
    PATH_BINARIES
        .iter()
        .find_map(|binary| which::which(binary).ok())
}
