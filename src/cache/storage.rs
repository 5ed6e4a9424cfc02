// 该文件是 Shouyu （手语） 项目的一部分。
// src/cache/storage.rs - 缓存存储后端
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  collections::HashMap,
  io::ErrorKind,
  path::{Path, PathBuf},
  sync::{Arc, Mutex},
};

use super::CacheError;

/// 字符串键值存储
pub trait Storage {
  fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
  fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;
  fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// 进程内存储，克隆后共享同一份数据
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
  entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl Storage for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
    let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    Ok(entries.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
    let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    entries.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), CacheError> {
    let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    entries.remove(key);
    Ok(())
  }
}

/// 每个键一个文件
#[derive(Debug, Clone)]
pub struct FileStorage {
  dir: PathBuf,
}

impl FileStorage {
  pub fn new(dir: impl AsRef<Path>) -> Self {
    Self {
      dir: dir.as_ref().to_path_buf(),
    }
  }

  fn path(&self, key: &str) -> PathBuf {
    self.dir.join(format!("{}.json", key))
  }
}

impl Storage for FileStorage {
  fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
    match std::fs::read_to_string(self.path(key)) {
      Ok(value) => Ok(Some(value)),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
    std::fs::create_dir_all(&self.dir)?;
    std::fs::write(self.path(key), value)?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), CacheError> {
    match std::fs::remove_file(self.path(key)) {
      Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
      _ => Ok(()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn exercise(storage: &dyn Storage) {
    assert_eq!(storage.get("k").unwrap(), None);
    storage.set("k", "v1").unwrap();
    storage.set("k", "v2").unwrap();
    assert_eq!(storage.get("k").unwrap().as_deref(), Some("v2"));
    storage.remove("k").unwrap();
    storage.remove("k").unwrap();
    assert_eq!(storage.get("k").unwrap(), None);
  }

  #[test]
  fn memory_storage() {
    let storage = MemoryStorage::new();
    exercise(&storage);
    let shared = storage.clone();
    storage.set("x", "1").unwrap();
    assert_eq!(shared.get("x").unwrap().as_deref(), Some("1"));
  }

  #[test]
  fn file_storage() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(dir.path().join("cache"));
    exercise(&storage);
    storage.set("x", "1").unwrap();
    let reopened = FileStorage::new(dir.path().join("cache"));
    assert_eq!(reopened.get("x").unwrap().as_deref(), Some("1"));
  }
}
