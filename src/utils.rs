//! Utility functions: disk space queries, path sanitizing, title tokens

use serde::{Deserialize, Serialize};
use std::path::Path;
use utoipa::ToSchema;

/// Usage snapshot of the filesystem backing a path
#[derive(Clone, Copy, Debug, Serialize, Deserialize, ToSchema)]
pub struct DiskUsage {
    /// Total size of the mount in bytes
    pub total_bytes: u64,
    /// Bytes available to unprivileged writers
    pub available_bytes: u64,
}

impl DiskUsage {
    /// Bytes in use
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }

    /// Percentage of the mount in use (0.0 when the size is unknown)
    pub fn percent_used(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.used_bytes() as f64 / self.total_bytes as f64) * 100.0
    }
}

/// Query filesystem usage for a given path
///
/// Uses platform-specific APIs:
/// - Unix: statvfs
/// - Windows: GetDiskFreeSpaceExW
pub fn disk_usage(path: &Path) -> std::io::Result<DiskUsage> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid null-terminated C string, stat is zeroed
        // before the call, and the struct is only read after a success return.
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // f_bavail is the block count available to unprivileged users;
            // f_frsize is the fragment size (preferred over f_bsize).
            Ok(DiskUsage {
                total_bytes: stat.f_blocks.saturating_mul(stat.f_frsize),
                available_bytes: stat.f_bavail.saturating_mul(stat.f_frsize),
            })
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: wide_path is null-terminated and the output pointers are
        // valid aligned u64s, only read after a success return.
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut total_bytes: u64 = 0;
            let mut _total_free_bytes: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut total_bytes as *mut u64 as *mut _,
                &mut _total_free_bytes as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok(DiskUsage {
                total_bytes,
                available_bytes: free_bytes_available,
            })
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Disk space checking is not supported on this platform",
        ))
    }
}

/// Available bytes on the filesystem backing a path
pub fn available_space(path: &Path) -> std::io::Result<u64> {
    Ok(disk_usage(path)?.available_bytes)
}

/// Sanitize a string for use as a single path component.
///
/// Path separators, reserved characters, and control characters become
/// spaces; runs of whitespace collapse; leading/trailing dots and spaces are
/// trimmed so the result is safe on every supported filesystem. An input
/// that sanitizes to nothing yields "untitled".
pub fn sanitize_component(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => ' ',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c| c == '.' || c == ' ');

    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Break a title into lowercase comparison tokens for duplicate detection.
///
/// Tokens are alphanumeric runs of two or more characters, so punctuation
/// and release-name separators do not defeat the match.
pub fn title_tokens(title: &str) -> Vec<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_lowercase())
        .collect()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn disk_usage_reports_nonzero_for_a_real_directory() {
        let temp_dir = TempDir::new().unwrap();
        let usage = disk_usage(temp_dir.path()).unwrap();
        assert!(
            usage.total_bytes > 0,
            "a real mount must report a total size"
        );
        assert!(
            usage.available_bytes <= usage.total_bytes,
            "available space cannot exceed the mount size"
        );
    }

    #[test]
    fn disk_usage_fails_for_nonexistent_path() {
        let result = disk_usage(Path::new("/nonexistent/path/that/should/not/exist"));
        assert!(result.is_err());
    }

    #[test]
    fn percent_used_handles_zero_total() {
        let usage = DiskUsage {
            total_bytes: 0,
            available_bytes: 0,
        };
        assert_eq!(usage.percent_used(), 0.0);
    }

    #[test]
    fn percent_used_computes_ratio() {
        let usage = DiskUsage {
            total_bytes: 100,
            available_bytes: 25,
        };
        assert_eq!(usage.used_bytes(), 75);
        assert!((usage.percent_used() - 75.0).abs() < f64::EPSILON);
    }

    // --- sanitize_component ---

    #[test]
    fn sanitize_replaces_path_separators() {
        assert_eq!(
            sanitize_component("The/Matrix\\1999"),
            "The Matrix 1999",
            "separators must not survive into a path component"
        );
    }

    #[test]
    fn sanitize_strips_reserved_characters() {
        assert_eq!(sanitize_component("What? A: \"Movie\" <x>|*"), "What A Movie x");
    }

    #[test]
    fn sanitize_collapses_whitespace_and_trims_dots() {
        assert_eq!(sanitize_component("  Title   Two  "), "Title Two");
        assert_eq!(
            sanitize_component("..hidden.."),
            "hidden",
            "leading dots would hide files or escape matching"
        );
    }

    #[test]
    fn sanitize_preserves_normal_titles() {
        assert_eq!(
            sanitize_component("The Matrix (1999)"),
            "The Matrix (1999)"
        );
    }

    #[test]
    fn sanitize_empty_input_falls_back_to_untitled() {
        assert_eq!(sanitize_component(""), "untitled");
        assert_eq!(sanitize_component("///"), "untitled");
        assert_eq!(sanitize_component("..."), "untitled");
    }

    // --- title_tokens ---

    #[test]
    fn title_tokens_lowercases_and_splits_on_punctuation() {
        assert_eq!(
            title_tokens("The.Matrix (1999)"),
            vec!["the", "matrix", "1999"]
        );
    }

    #[test]
    fn title_tokens_drops_single_character_fragments() {
        assert_eq!(title_tokens("A Bug's Life"), vec!["bug", "life"]);
    }

    #[test]
    fn title_tokens_of_empty_string_is_empty() {
        assert!(title_tokens("").is_empty());
        assert!(title_tokens("- -").is_empty());
    }
}
