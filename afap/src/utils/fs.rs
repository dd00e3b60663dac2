use std::borrow::Cow;
use std::fs::{self, create_dir_all, File};
use std::io::{self, ErrorKind, Write};
use std::path::Path;

use tempfile::NamedTempFile;

pub fn ensure_dir_exists(p: &Path) -> io::Result<()> {
    if p.exists() {
        return Ok(());
    }

    create_dir_all(p)
}

/// Lossy string form of a path, suitable for messages and logs
pub fn path_str(path: &Path) -> Cow<'_, str> {
    path.to_string_lossy()
}

pub fn open_file(path: &Path) -> crate::Result<File> {
    match File::open(path) {
        Ok(v) => Ok(v),
        Err(e) => match e.kind() {
            ErrorKind::NotFound => Err(crate::Error::MissingFile(path_str(path).into_owned())),
            _ => Err(e.into()),
        },
    }
}

pub fn read_file(path: &Path) -> crate::Result<String> {
    match fs::read_to_string(path) {
        Ok(v) => Ok(v),
        Err(e) => match e.kind() {
            ErrorKind::NotFound => Err(crate::Error::MissingFile(path_str(path).into_owned())),
            _ => Err(e.into()),
        },
    }
}

/// Replace the file at `path` with whatever `write` produces.
///
/// The content goes to a temporary file in the same directory first and is
/// renamed over `path` only once `write` succeeded, so readers never observe a
/// half written file.
pub fn write_file_atomic<F>(path: &Path, write: F) -> crate::Result<()>
where
    F: FnOnce(&mut dyn Write) -> crate::Result<()>,
{
    let parent = match path.parent() {
        Some(p) => p,
        None => return Err(crate::Error::Generic(format!("{} has no parent", path_str(path)))),
    };
    ensure_dir_exists(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    {
        let mut buffered = io::BufWriter::new(tmp.as_file_mut());
        write(&mut buffered)?;
        buffered.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| crate::Error::IO(e.error))?;
    Ok(())
}
