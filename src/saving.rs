use bincode::{deserialize_from, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Write `value` to `path` as gzip-compressed bincode.
///
/// The snapshot is written to a sibling `.tmp` file and renamed into place,
/// so a crash mid-write leaves the previous snapshot intact.
pub fn save_snapshot<T: Serialize>(value: &T, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("tmp");
    let file = File::create(&tmp_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut writer = BufWriter::new(encoder);

    serialize_into(&mut writer, value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    writer.flush()?;

    let encoder = writer.into_inner().map_err(|e| e.into_error())?;
    let file = encoder.finish()?;
    file.sync_all()?;

    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Read a snapshot previously written by [`save_snapshot`].
pub fn load_snapshot<T: DeserializeOwned>(path: &Path) -> std::io::Result<T> {
    let file = File::open(path)?;
    let decoder = GzDecoder::new(file);
    let mut reader = BufReader::new(decoder);

    let value: T = deserialize_from(&mut reader)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_survives_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("values.bin.gz");

        let values = vec![(1u64, "one".to_string()), (2, "two".to_string())];
        save_snapshot(&values, &path).unwrap();

        let loaded: Vec<(u64, String)> = load_snapshot(&path).unwrap();
        assert_eq!(loaded, values);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_garbage_is_invalid_data() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.bin.gz");
        fs::write(&path, b"not gzip at all").unwrap();

        let err = load_snapshot::<Vec<u64>>(&path).unwrap_err();
        assert!(matches!(
            err.kind(),
            std::io::ErrorKind::InvalidData | std::io::ErrorKind::InvalidInput
        ));
    }
}
