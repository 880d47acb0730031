//! Single-key commands.

use std::path::Path;
use stowdb_core::StorageFile;

/// Stores `value` under `key`, creating the file if needed.
pub fn put(path: &Path, key: &str, value: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = StorageFile::open(path)?;
    file.put(key.as_bytes(), value.as_bytes())?;
    file.sync()?;
    println!("✓ Stored {key}");
    Ok(())
}

/// Prints the value stored under `key`.
pub fn get(path: &Path, key: &str) -> Result<(), Box<dyn std::error::Error>> {
    let file = StorageFile::open_read_only(path)?;
    match file.get(key.as_bytes())? {
        Some(value) => {
            println!("{}", String::from_utf8_lossy(&value));
            Ok(())
        }
        None => Err(format!("Key not found: {key}").into()),
    }
}

/// Deletes `key`.
pub fn delete(path: &Path, key: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = StorageFile::open_with(path, false)?;
    if file.delete(key.as_bytes())?.is_some() {
        file.sync()?;
        println!("✓ Deleted {key}");
    } else {
        println!("Key not found: {key}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_get_delete() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");

        put(&path, "todo:1", "buy milk").unwrap();
        get(&path, "todo:1").unwrap();
        delete(&path, "todo:1").unwrap();
        assert!(get(&path, "todo:1").is_err());
        assert!(put(&path, "", "empty key").is_err());
    }

    #[test]
    fn get_on_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(get(&dir.path().join("absent.stow"), "k").is_err());
    }
}
