//! File transfer and camera lifecycle operations.

use super::{ChdkDevice, ExecOptions};
use crate::errors::{ChdkError, Result};
use crate::types::{FileEntry, LuaValue};
use crate::util::{camera_basename, join_camera_path, lua_string_literal, to_camerapath};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

fn local_path_string(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| ChdkError::invalid_argument(format!("{} is not valid UTF-8", path.display())))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

impl ChdkDevice {
    /// Upload a local file.
    ///
    /// A remote path ending in `/` names a directory; the local file name is
    /// appended to it. Unless `skip_checks` is set, that directory must
    /// already exist. Checks have to be skipped while a script runs.
    pub fn upload_file(&self, local_path: &Path, remote_path: &str, skip_checks: bool) -> Result<String> {
        self.ensure_connected()?;
        let local_path = absolute(local_path)?;
        if local_path.is_dir() {
            return Err(ChdkError::invalid_argument(
                "`local_path` must be a file, not a directory.",
            ));
        }
        let mut remote_path = to_camerapath(remote_path);

        if remote_path.ends_with('/') {
            if !skip_checks && !self.is_remote_dir(&remote_path) {
                return Err(ChdkError::invalid_argument(format!(
                    "Remote path '{remote_path}' is not a directory. Leave out the \
                     trailing slash if you are referring to a file"
                )));
            }
            let name = local_path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| ChdkError::invalid_argument("`local_path` has no file name"))?;
            remote_path = join_camera_path(&remote_path, name);
        }

        log::debug!("Uploading {} to {}", local_path.display(), remote_path);
        self.ctx
            .call("con:upload", (local_path_string(&local_path)?, remote_path.as_str()), None)?;
        Ok(remote_path)
    }

    fn is_remote_dir(&self, remote_path: &str) -> bool {
        match self.ctx.call_value("con:stat", remote_path, None) {
            Ok(status) => status.get("is_dir").is_some_and(LuaValue::is_truthy),
            Err(e) => {
                log::debug!("stat {} failed: {}", remote_path, e);
                false
            }
        }
    }

    /// Upload several files or directories into `remote_path`.
    pub fn batch_upload(&self, local_paths: &[PathBuf], remote_path: &str) -> Result<()> {
        self.ensure_connected()?;
        let remote_path = to_camerapath(remote_path);
        let locals = local_paths
            .iter()
            .map(|p| absolute(p).and_then(|p| local_path_string(&p)))
            .collect::<Result<Vec<_>>>()?;
        let sources = self.ctx.sequence(locals)?;
        let opts = self.ctx.table()?;
        opts.set("dirs", true)?;
        opts.set("mtime", true)?;
        opts.set("maxdepth", self.config.transfer.max_depth)?;
        self.ctx
            .call("con:mupload", (sources, remote_path.as_str()), Some(opts))?;
        Ok(())
    }

    /// Download one file.
    ///
    /// With a `local_path` the file is written there and `None` is returned,
    /// otherwise the content is returned.
    pub fn download_file(&self, remote_path: &str, local_path: Option<&Path>) -> Result<Option<Vec<u8>>> {
        self.ensure_connected()?;
        let remote_path = to_camerapath(remote_path);

        if let Some(local_path) = local_path {
            self.ctx.call(
                "con:download",
                (remote_path.as_str(), local_path_string(local_path)?),
                None,
            )?;
            return Ok(None);
        }

        let temp = tempfile::NamedTempFile::new()?;
        self.ctx.call(
            "con:download",
            (remote_path.as_str(), local_path_string(temp.path())?),
            None,
        )?;
        let data = fs::read(temp.path())?;
        log::debug!("Downloaded {} ({} bytes)", remote_path, data.len());
        Ok(Some(data))
    }

    /// Download several files or directories into `local_path`.
    pub fn batch_download<S: AsRef<str>>(&self, remote_paths: &[S], local_path: &Path, overwrite: bool) -> Result<()> {
        self.ensure_connected()?;
        let remotes: Vec<String> = remote_paths.iter().map(|p| to_camerapath(p.as_ref())).collect();
        let local_path = local_path_string(&absolute(local_path)?)?;
        let sources = self.ctx.sequence(remotes)?;
        let opts = self.ctx.table()?;
        opts.set("maxdepth", self.config.transfer.max_depth)?;
        opts.set("batchsize", self.config.transfer.batch_size)?;
        opts.set("dbgmem", false)?;
        opts.set("overwrite", overwrite)?;
        self.ctx
            .call("con:mdownload", (sources, local_path), Some(opts))?;
        Ok(())
    }

    /// Delete files or directories; paths without a drive get `A/`.
    pub fn delete_files<S: AsRef<str>>(&self, remote_paths: &[S]) -> Result<()> {
        self.ensure_connected()?;
        if remote_paths.is_empty() {
            return Ok(());
        }
        let targets: Vec<String> = remote_paths.iter().map(|p| to_camerapath(p.as_ref())).collect();
        log::debug!("Deleting {:?}", targets);
        let targets = self.ctx.sequence(targets)?;
        let opts = self.ctx.table_from([("skip_topdirs", true)])?;
        self.ctx.call("con:mdelete", targets, Some(opts))?;
        Ok(())
    }

    /// Paths of the entries in a camera directory. Directories end in `/`.
    pub fn list_files(&self, remote_path: &str) -> Result<Vec<String>> {
        self.ensure_connected()?;
        let remote_path = to_camerapath(remote_path);
        let opts = self.ctx.table()?;
        opts.set("dirsonly", false)?;
        opts.set("stat", "/")?;
        let listing = self
            .ctx
            .call_value("con:listdir", remote_path.as_str(), Some(opts))?;

        Ok(listing_entries(&listing)
            .filter_map(LuaValue::as_str)
            .map(|name| join_camera_path(&remote_path, name))
            .collect())
    }

    /// Entries in a camera directory with their stat information.
    pub fn list_files_detailed(&self, remote_path: &str) -> Result<Vec<FileEntry>> {
        self.ensure_connected()?;
        let remote_path = to_camerapath(remote_path);
        let opts = self.ctx.table()?;
        opts.set("dirsonly", false)?;
        opts.set("stat", "*")?;
        let listing = self
            .ctx
            .call_value("con:listdir", remote_path.as_str(), Some(opts))?;

        listing_entries(&listing)
            .map(|stat| file_entry(&remote_path, stat))
            .collect()
    }

    /// Create a directory, including missing parents.
    pub fn mkdir(&self, remote_path: &str) -> Result<()> {
        self.ensure_connected()?;
        let remote_path = to_camerapath(remote_path);
        self.ctx.call("con:mkdir_m", remote_path.as_str(), None)?;
        Ok(())
    }

    /// Reset the connection, waiting `wait_ms` (default from the
    /// configuration) before reconnecting.
    pub fn reconnect(&self, wait_ms: Option<u64>) -> Result<()> {
        self.ensure_connected()?;
        let wait = wait_ms.unwrap_or(self.config.connection.reconnect_wait_ms);
        let opts = self.ctx.table()?;
        opts.set("wait", wait)?;
        opts.set("strict", true)?;
        self.ctx.call("con:reconnect", (), Some(opts))?;
        log::info!("Reconnected to {}", self.info.address());
        Ok(())
    }

    /// Reboot the camera, optionally into `bootfile`, then reconnect.
    ///
    /// The boot file must be an unencoded binary or, on DryOS, an encoded
    /// `.FI2` already on the card.
    pub fn reboot(&self, wait_ms: Option<u64>, bootfile: Option<&str>) -> Result<()> {
        let code = match bootfile {
            Some(file) => format!("sleep(1000) reboot({})", lua_string_literal(&to_camerapath(file))),
            None => "sleep(1000) reboot()".to_string(),
        };
        let options = ExecOptions {
            clobber: true,
            ..ExecOptions::no_wait()
        };
        self.lua_execute(&code, &options)?;
        log::info!("Rebooting {}", self.info.model_name);
        self.reconnect(Some(wait_ms.unwrap_or(self.config.connection.reboot_wait_ms)))
    }
}

/// Entries of a listing, whether it came back as a sequence or keyed by name.
fn listing_entries(listing: &LuaValue) -> Box<dyn Iterator<Item = &LuaValue> + '_> {
    match listing {
        LuaValue::List(items) => Box::new(items.iter()),
        LuaValue::Table(map) => Box::new(map.values()),
        _ => Box::new(std::iter::empty()),
    }
}

fn file_entry(dir: &str, stat: &LuaValue) -> Result<FileEntry> {
    let fields = stat
        .as_table()
        .ok_or_else(|| ChdkError::Runtime(format!("unexpected stat entry: {stat:?}")))?;
    let name = fields
        .get("name")
        .and_then(LuaValue::as_str)
        .ok_or_else(|| ChdkError::Runtime("stat entry without a name".to_string()))?;

    let mut extra: BTreeMap<String, LuaValue> = fields.clone();
    extra.remove("name");
    let is_dir = extra.remove("is_dir").is_some_and(|v| v.is_truthy());
    let size = extra
        .remove("size")
        .and_then(|v| v.as_i64())
        .and_then(|v| u64::try_from(v).ok());
    let mtime = extra.remove("mtime").and_then(|v| v.as_i64());

    Ok(FileEntry {
        path: join_camera_path(dir, camera_basename(name)),
        is_dir,
        size,
        mtime,
        extra,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_entry_splits_known_fields() {
        let mut stat = BTreeMap::new();
        stat.insert("name".to_string(), LuaValue::from("IMG_0001.JPG"));
        stat.insert("is_dir".to_string(), LuaValue::Boolean(false));
        stat.insert("size".to_string(), LuaValue::Integer(2048));
        stat.insert("mtime".to_string(), LuaValue::Integer(1_400_000_000));
        stat.insert("attrib".to_string(), LuaValue::Integer(32));

        let entry = file_entry("A/DCIM/100CANON", &LuaValue::Table(stat)).unwrap();
        assert_eq!(entry.path, "A/DCIM/100CANON/IMG_0001.JPG");
        assert!(!entry.is_dir);
        assert_eq!(entry.size, Some(2048));
        assert_eq!(entry.mtime, Some(1_400_000_000));
        assert_eq!(entry.extra.len(), 1);
        assert_eq!(entry.extra.get("attrib"), Some(&LuaValue::Integer(32)));
    }

    #[test]
    fn test_file_entry_requires_name() {
        let stat = LuaValue::Table(BTreeMap::new());
        assert!(file_entry("A/", &stat).is_err());
    }
}
