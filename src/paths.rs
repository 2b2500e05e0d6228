//! Identifier and output path composition
//!
//! Batch identifiers are plain strings as given on the command line or in a
//! listing file. These helpers derive base names and output locations from
//! them, accepting both `/` and `\` separators.

use std::path::{Path, PathBuf};

/// Extension of compressed containers
pub const CONTAINER_EXTENSION: &str = "tbc";

/// Get the filename from an identifier (handles both / and \)
pub fn file_name(path: &str) -> &str {
    path.rfind(['\\', '/'])
        .map(|idx| &path[idx + 1..])
        .unwrap_or(path)
}

/// Get file extension (without the dot)
pub fn extension(path: &str) -> Option<&str> {
    let name = file_name(path);
    name.rfind('.').map(|idx| &name[idx + 1..])
}

/// Filename with its last extension removed
/// `textures/rock.png` -> `rock`
pub fn base_name(path: &str) -> &str {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

/// Whether an identifier names a compressed container
pub fn is_container(path: &str) -> bool {
    extension(path).is_some_and(|ext| ext.eq_ignore_ascii_case(CONTAINER_EXTENSION))
}

/// Output container path for a job whose first source is `source`
/// `in/rock.png` + `out` -> `out/rock.tbc`
pub fn container_output_path(source: &str, output_dir: Option<&Path>) -> PathBuf {
    let name = format!("{}.{}", base_name(source), CONTAINER_EXTENSION);
    match output_dir {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// Place an export artifact in the output directory, if any
pub fn export_path(output_dir: Option<&Path>, file_name: String) -> PathBuf {
    match output_dir {
        Some(dir) => dir.join(file_name),
        None => PathBuf::from(file_name),
    }
}

/// Create parent directories for a path if they don't exist
pub fn ensure_parent_dirs(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
