//! File access scoped to the job directory

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Errors of scoped file access
#[derive(Error, Debug)]
pub enum FileAccessError {
    /// The requested path leaves the job directory
    #[error("Path {0:?} is outside the job directory")]
    OutsideJob(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolve `relative` below `root`, refusing absolute paths and `..`
pub fn resolve(root: &Path, relative: &str) -> Result<PathBuf, FileAccessError> {
    let path = Path::new(relative);
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(FileAccessError::OutsideJob(relative.to_string()))
            }
        }
    }
    Ok(root.join(path))
}

/// Names of the regular files in a sub-directory, sorted
pub fn list_files(root: &Path, directory: &str) -> Result<Vec<String>, FileAccessError> {
    let dir = resolve(root, directory)?;
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

fn file_path(root: &Path, directory: &str, name: &str) -> Result<PathBuf, FileAccessError> {
    let dir = resolve(root, directory)?;
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(dir.join(name)),
        _ => Err(FileAccessError::OutsideJob(name.to_string())),
    }
}

/// Text of one file
pub fn read_text(root: &Path, directory: &str, name: &str) -> Result<String, FileAccessError> {
    Ok(std::fs::read_to_string(file_path(root, directory, name)?)?)
}

/// Replace the text of one file
pub fn write_text(
    root: &Path,
    directory: &str,
    name: &str,
    text: &str,
) -> Result<(), FileAccessError> {
    std::fs::write(file_path(root, directory, name)?, text)?;
    Ok(())
}
