//! Detection of the installed Objets Métiers component and its version.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

#[cfg(any(test, feature = "test-support"))]
use mockall::automock;

/// File name of the Objets Métiers COM server.
pub const COMPONENT_BINARY: &str = "objets100c.dll";

/// Known install roots of the component, probed in order.
pub fn default_component_locations() -> Vec<PathBuf> {
    [
        r"C:\Program Files (x86)\Common Files\Sage\Objets métiers",
        r"C:\Program Files\Common Files\Sage\Objets métiers",
        r"C:\Sage\Objets métiers",
    ]
    .into_iter()
    .map(|root| Path::new(root).join(COMPONENT_BINARY))
    .collect()
}

/// Version resource strings embedded in a binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileVersionInfo {
    pub file_version: Option<String>,
    pub product_version: Option<String>,
    pub product_name: Option<String>,
}

/// Reads embedded version metadata. Best-effort: `None` when unreadable.
#[cfg_attr(any(test, feature = "test-support"), automock)]
pub trait VersionProbe: Send + Sync {
    fn read(&self, path: &Path) -> Option<FileVersionInfo>;
}

/// [`VersionProbe`] backed by the Win32 version resource API.
///
/// On non-Windows targets no version resource can be read and every probe
/// yields `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileVersionProbe;

impl VersionProbe for FileVersionProbe {
    #[cfg(windows)]
    fn read(&self, path: &Path) -> Option<FileVersionInfo> {
        win32::read_version_resource(path)
    }

    #[cfg(not(windows))]
    fn read(&self, path: &Path) -> Option<FileVersionInfo> {
        tracing::trace!(path = %path.display(), "version resources unavailable on this platform");
        None
    }
}

/// Replaces every non-alphanumeric character so the version can be used in
/// a file name. A missing version maps to `unknown`.
pub fn sanitize_version(version: Option<&str>) -> String {
    match version.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => v
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect(),
        None => "unknown".to_owned(),
    }
}

/// Installed component description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SageVersionInfo {
    /// Full path to the component, empty when not found.
    pub file_path: String,
    pub file_version: Option<String>,
    pub product_version: Option<String>,
    pub product_name: Option<String>,
}

impl SageVersionInfo {
    /// Whether the component path is set and still present on disk.
    pub fn is_available(&self) -> bool {
        !self.file_path.is_empty() && Path::new(&self.file_path).exists()
    }
}

impl fmt::Display for SageVersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_available() {
            write!(
                f,
                "{} v{}",
                self.product_name.as_deref().unwrap_or("Sage 100 Objets Métiers"),
                self.file_version.as_deref().unwrap_or("?")
            )
        } else {
            f.write_str("Non détecté")
        }
    }
}

/// Finds the first installed component among the known locations.
pub struct SageVersionDetector<P: VersionProbe = FileVersionProbe> {
    locations: Vec<PathBuf>,
    probe: P,
}

impl Default for SageVersionDetector<FileVersionProbe> {
    fn default() -> Self {
        Self::new(default_component_locations(), FileVersionProbe)
    }
}

impl<P: VersionProbe> SageVersionDetector<P> {
    pub fn new(locations: Vec<PathBuf>, probe: P) -> Self {
        Self { locations, probe }
    }

    /// First existing component path, re-checked on every call.
    pub fn locate(&self) -> Option<PathBuf> {
        self.locations.iter().find(|p| p.is_file()).cloned()
    }

    pub fn detect(&self) -> SageVersionInfo {
        let Some(path) = self.locate() else {
            tracing::warn!("No Sage 100 Objets Métiers installation detected");
            return SageVersionInfo {
                file_version: Some("Non détecté".into()),
                product_version: Some("Non détecté".into()),
                product_name: Some("Sage 100 Objets Métiers".into()),
                ..SageVersionInfo::default()
            };
        };

        let meta = self.probe.read(&path).unwrap_or_default();
        let info = SageVersionInfo {
            file_path: path.display().to_string(),
            file_version: meta.file_version,
            product_version: meta.product_version,
            product_name: meta.product_name,
        };
        tracing::info!(
            product = ?info.product_name,
            version = ?info.file_version,
            path = %info.file_path,
            "Sage 100 Objets Métiers detected"
        );
        info
    }

    pub fn is_installed(&self) -> bool {
        self.detect().is_available()
    }
}

#[cfg(windows)]
mod win32 {
    use super::FileVersionInfo;
    use std::ffi::c_void;
    use std::path::Path;
    use windows::Win32::Storage::FileSystem::{
        GetFileVersionInfoSizeW, GetFileVersionInfoW, VerQueryValueW,
    };
    use windows::core::{HSTRING, w};

    pub(super) fn read_version_resource(path: &Path) -> Option<FileVersionInfo> {
        let wide = HSTRING::from(path.as_os_str());
        // SAFETY: `wide` is a valid null-terminated path for the call.
        let size = unsafe { GetFileVersionInfoSizeW(&wide, None) };
        if size == 0 {
            return None;
        }

        let mut block = vec![0u8; size as usize];
        // SAFETY: `block` is exactly `size` bytes as requested by the API.
        unsafe { GetFileVersionInfoW(&wide, None, size, block.as_mut_ptr().cast()) }.ok()?;

        let (lang, codepage) = translation(&block)?;
        let read = |key: &str| query_string(&block, &format!("\\StringFileInfo\\{lang:04x}{codepage:04x}\\{key}"));

        Some(FileVersionInfo {
            file_version: read("FileVersion"),
            product_version: read("ProductVersion"),
            product_name: read("ProductName"),
        })
    }

    fn translation(block: &[u8]) -> Option<(u16, u16)> {
        let mut ptr: *mut c_void = std::ptr::null_mut();
        let mut len = 0u32;
        // SAFETY: `block` holds a version resource returned by
        // `GetFileVersionInfoW`; `ptr` will point inside it.
        let found = unsafe {
            VerQueryValueW(block.as_ptr().cast(), w!("\\VarFileInfo\\Translation"), &mut ptr, &mut len)
        };
        if !found.as_bool() || ptr.is_null() || len < 4 {
            return None;
        }
        // SAFETY: The translation table holds at least one (lang, codepage) pair.
        let pair = unsafe { std::slice::from_raw_parts(ptr.cast::<u16>(), 2) };
        Some((pair[0], pair[1]))
    }

    fn query_string(block: &[u8], key: &str) -> Option<String> {
        let key = HSTRING::from(key);
        let mut ptr: *mut c_void = std::ptr::null_mut();
        let mut len = 0u32;
        // SAFETY: As in `translation`; `len` counts UTF-16 units including the
        // terminator.
        let found = unsafe { VerQueryValueW(block.as_ptr().cast(), &key, &mut ptr, &mut len) };
        if !found.as_bool() || ptr.is_null() || len == 0 {
            return None;
        }
        // SAFETY: `ptr` points to `len` UTF-16 units inside `block`.
        let units = unsafe { std::slice::from_raw_parts(ptr.cast::<u16>(), len as usize) };
        let text = String::from_utf16_lossy(units).trim_end_matches('\0').trim().to_owned();
        (!text.is_empty()).then_some(text)
    }
}
