use std::fs::File;
use std::io;
use std::path::Path;

/// Hex BLAKE3 digest of a file's content.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn blake3_file(path: &Path) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    hasher.update_reader(File::open(path)?)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Hash a set of files into one digest, in the order given.
///
/// Each entry contributes its path and its content hash, so renaming a file
/// changes the digest as well as editing it.
///
/// # Errors
/// Returns an error if any file cannot be read.
pub fn blake3_files<'a, I>(paths: I) -> io::Result<String>
where
    I: IntoIterator<Item = &'a Path>,
{
    let mut hasher = blake3::Hasher::new();
    for path in paths {
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(&[0]);
        hasher.update(blake3_file(path)?.as_bytes());
        hasher.update(&[0]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}
