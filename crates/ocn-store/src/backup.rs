//! Backup/restore bundles (spec §6), grounded on the original
//! `lifelog_backup_restore` helper: a `.tar.gz` containing the sqlite
//! file plus an optional image asset directory.

use std::fs::File;
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ocn_domain::{Error, Result};

fn to_internal(e: impl std::fmt::Display) -> Error {
    Error::Internal(e.to_string())
}

/// Archive `sqlite_path` (already backed up via `DurableStore::backup_to`)
/// and, if present, `image_asset_dir`, into a single `.tar.gz` at
/// `archive_path`.
pub fn create_backup_archive(archive_path: &Path, sqlite_path: &Path, image_asset_dir: Option<&Path>) -> Result<()> {
    let tar_gz = File::create(archive_path).map_err(Error::from)?;
    let enc = GzEncoder::new(tar_gz, Compression::default());
    let mut tar = tar::Builder::new(enc);

    tar.append_path_with_name(sqlite_path, "lifelog.db").map_err(Error::from)?;
    if let Some(dir) = image_asset_dir {
        if dir.is_dir() {
            tar.append_dir_all("images", dir).map_err(Error::from)?;
        }
    }
    tar.finish().map_err(Error::from)?;
    Ok(())
}

/// Extract `archive_path` into `destination_dir`. Refuses to overwrite an
/// existing `lifelog.db` unless `overwrite` is set.
pub fn restore_backup_archive(archive_path: &Path, destination_dir: &Path, overwrite: bool) -> Result<()> {
    let dest_db = destination_dir.join("lifelog.db");
    if dest_db.exists() && !overwrite {
        return Err(Error::BadRequest(format!("{} already exists; pass overwrite", dest_db.display())));
    }
    std::fs::create_dir_all(destination_dir).map_err(Error::from)?;
    let tar_gz = File::open(archive_path).map_err(Error::from)?;
    let dec = GzDecoder::new(tar_gz);
    let mut archive = tar::Archive::new(dec);
    archive.unpack(destination_dir).map_err(to_internal)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn round_trips_a_sqlite_file_through_backup_and_restore() {
        let tmp = tempfile::tempdir().unwrap();
        let sqlite_path = tmp.path().join("lifelog.db");
        std::fs::File::create(&sqlite_path).unwrap().write_all(b"fake sqlite bytes").unwrap();

        let archive_path = tmp.path().join("backup.tar.gz");
        create_backup_archive(&archive_path, &sqlite_path, None).unwrap();

        let dest = tmp.path().join("restored");
        restore_backup_archive(&archive_path, &dest, false).unwrap();
        let restored = std::fs::read(dest.join("lifelog.db")).unwrap();
        assert_eq!(restored, b"fake sqlite bytes");
    }

    #[test]
    fn restore_refuses_overwrite_by_default() {
        let tmp = tempfile::tempdir().unwrap();
        let sqlite_path = tmp.path().join("lifelog.db");
        std::fs::write(&sqlite_path, b"x").unwrap();
        let archive_path = tmp.path().join("backup.tar.gz");
        create_backup_archive(&archive_path, &sqlite_path, None).unwrap();

        let dest = tmp.path().join("restored");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("lifelog.db"), b"existing").unwrap();

        let err = restore_backup_archive(&archive_path, &dest, false).unwrap_err();
        assert_eq!(err.error_code(), "bad_request");
    }
}
