// 该文件是 Shouyu （手语） 项目的一部分。
// src/cache.rs - 手语词条缓存
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

//! # 词条缓存
//!
//! 全部词条按编号缓存，另建一个小写词到编号的索引。缓存连同过期时间
//! 以 JSON 形式写入 [`Storage`]，过期后下次 [`SignCache::initialize`] 会重新拉取。
//! 缓存未命中时回落到 [`SignSource`] 并写回。

use std::collections::HashMap;

use chrono::{TimeDelta, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::retry::{fallback_image_url, fetch_with_validation, is_valid_image_url};

mod source;
pub use self::source::{HttpSignSource, SignSource};

mod storage;
pub use self::storage::{FileStorage, MemoryStorage, Storage};

pub const SIGN_CACHE_KEY: &str = "triosigno_sign_cache";
pub const SIGN_CACHE_EXPIRY_KEY: &str = "triosigno_sign_cache_expiry";

pub fn default_ttl() -> TimeDelta {
  TimeDelta::hours(24)
}

#[derive(Error, Debug)]
pub enum CacheError {
  #[error("存储错误: {0}")]
  Storage(#[from] std::io::Error),
  #[error("缓存数据格式错误: {0}")]
  Malformed(#[from] serde_json::Error),
  #[error("请求失败: {0}")]
  Http(String),
  #[error("响应解析失败 {url}: {message}")]
  Decode { url: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sign {
  pub id: String,
  pub word: String,
  #[serde(default)]
  pub definition: Option<String>,
  #[serde(default)]
  pub media_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheData {
  signs: HashMap<String, Sign>,
  word_to_id: HashMap<String, String>,
  last_updated: i64,
}

impl CacheData {
  fn insert(&mut self, sign: Sign) {
    self
      .word_to_id
      .insert(sign.word.to_lowercase(), sign.id.clone());
    self.signs.insert(sign.id.clone(), sign);
  }
}

pub struct SignCache<S, F> {
  storage: S,
  source: F,
  ttl: TimeDelta,
  data: Option<CacheData>,
}

impl<S: Storage, F: SignSource> SignCache<S, F> {
  pub fn new(storage: S, source: F) -> Self {
    Self {
      storage,
      source,
      ttl: default_ttl(),
      data: None,
    }
  }

  pub fn with_ttl(mut self, ttl: TimeDelta) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn is_initialized(&self) -> bool {
    self.data.is_some()
  }

  /// 优先使用未过期的持久化缓存，否则重新拉取
  pub fn initialize(&mut self) -> Result<(), CacheError> {
    let cached = self.storage.get(SIGN_CACHE_KEY)?;
    let expiry = self
      .storage
      .get(SIGN_CACHE_EXPIRY_KEY)?
      .and_then(|v| v.trim().parse::<i64>().ok());

    if let (Some(cached), Some(expiry)) = (cached, expiry)
      && Utc::now().timestamp_millis() < expiry
    {
      match serde_json::from_str::<CacheData>(&cached) {
        Ok(data) => {
          info!("使用本地词条缓存，共 {} 条", data.signs.len());
          self.data = Some(data);
          return Ok(());
        }
        Err(e) => warn!("本地词条缓存损坏，重新拉取: {}", e),
      }
    }

    self.refresh()
  }

  pub fn refresh(&mut self) -> Result<(), CacheError> {
    let signs = self.source.all_signs()?;
    let now = Utc::now();
    let mut data = CacheData {
      last_updated: now.timestamp_millis(),
      ..CacheData::default()
    };
    for sign in signs {
      data.insert(sign);
    }
    info!("刷新词条缓存，共 {} 条", data.signs.len());

    self
      .storage
      .set(SIGN_CACHE_KEY, &serde_json::to_string(&data)?)?;
    self.storage.set(
      SIGN_CACHE_EXPIRY_KEY,
      &(now + self.ttl).timestamp_millis().to_string(),
    )?;
    self.data = Some(data);
    Ok(())
  }

  /// 使持久化缓存立即过期，内存中的数据保留到下次初始化
  pub fn expire(&mut self) -> Result<(), CacheError> {
    debug!("词条缓存标记为过期");
    self.storage.remove(SIGN_CACHE_EXPIRY_KEY)
  }

  fn persist(&self) {
    let Some(data) = &self.data else {
      return;
    };
    let result = serde_json::to_string(data)
      .map_err(CacheError::from)
      .and_then(|json| self.storage.set(SIGN_CACHE_KEY, &json));
    if let Err(e) = result {
      warn!("写入词条缓存失败: {}", e);
    }
  }

  fn remember(&mut self, sign: Sign) {
    if let Some(data) = self.data.as_mut() {
      data.insert(sign);
    }
    self.persist();
  }

  /// 未初始化时返回 `None`；未命中时从数据源获取并写回
  pub fn get_by_id(&mut self, id: &str) -> Option<Sign> {
    let data = self.data.as_ref()?;
    if let Some(sign) = data.signs.get(id) {
      return Some(sign.clone());
    }

    match self.source.sign_by_id(id) {
      Ok(sign) => {
        self.remember(sign.clone());
        Some(sign)
      }
      Err(e) => {
        warn!("获取词条 {} 失败: {}", id, e);
        None
      }
    }
  }

  pub fn get_by_word(&mut self, word: &str) -> Option<Sign> {
    let data = self.data.as_ref()?;
    let normalized = word.to_lowercase();
    if let Some(sign) = data
      .word_to_id
      .get(&normalized)
      .and_then(|id| data.signs.get(id))
    {
      return Some(sign.clone());
    }

    match self.source.sign_by_word(word) {
      Ok(Some(sign)) => {
        self.remember(sign.clone());
        Some(sign)
      }
      Ok(None) => None,
      Err(e) => {
        warn!("按词 {} 获取词条失败: {}", word, e);
        None
      }
    }
  }

  /// 取图片地址有效的词条，缓存中的地址无效时向数据源重试，
  /// 最终仍无效则换成占位图
  pub fn get_valid_by_id(&mut self, id: &str, max_attempts: usize) -> Option<Sign> {
    let cached = self.get_by_id(id)?;
    if is_valid_image_url(cached.media_url.as_deref()) {
      return Some(cached);
    }

    let mut sign = fetch_with_validation(
      || self.source.sign_by_id(id),
      |s: &Sign| is_valid_image_url(s.media_url.as_deref()),
      max_attempts,
    )
    .unwrap_or(cached);
    if !is_valid_image_url(sign.media_url.as_deref()) {
      sign.media_url = Some(fallback_image_url(&sign.word));
    }
    self.remember(sign.clone());
    Some(sign)
  }

  pub fn all_signs(&self) -> Vec<Sign> {
    self
      .data
      .as_ref()
      .map(|d| d.signs.values().cloned().collect())
      .unwrap_or_default()
  }

  /// 随机取若干词条（用于生成选项），可排除一个编号
  pub fn random_signs(&self, count: usize, exclude: Option<&str>) -> Vec<Sign> {
    let mut signs: Vec<Sign> = self
      .all_signs()
      .into_iter()
      .filter(|s| exclude != Some(s.id.as_str()))
      .collect();
    signs.shuffle(&mut rand::thread_rng());
    signs.truncate(count);
    signs
  }
}

#[cfg(test)]
mod tests {
  use std::cell::{Cell, RefCell};

  use super::*;

  #[derive(Default)]
  struct FakeSource {
    signs: Vec<Sign>,
    calls: Cell<usize>,
    // sign_by_id 依次返回的图片地址
    media: RefCell<Vec<Option<String>>>,
  }

  fn sign(id: &str, word: &str) -> Sign {
    Sign {
      id: id.into(),
      word: word.into(),
      definition: None,
      media_url: Some(format!("https://x.supabase.co/{}.png", id)),
    }
  }

  impl SignSource for FakeSource {
    fn all_signs(&self) -> Result<Vec<Sign>, CacheError> {
      self.calls.set(self.calls.get() + 1);
      Ok(self.signs.clone())
    }

    fn sign_by_id(&self, id: &str) -> Result<Sign, CacheError> {
      self.calls.set(self.calls.get() + 1);
      let mut s = sign(id, &id.to_uppercase());
      let mut media = self.media.borrow_mut();
      if !media.is_empty() {
        s.media_url = media.remove(0);
      }
      Ok(s)
    }

    fn sign_by_word(&self, word: &str) -> Result<Option<Sign>, CacheError> {
      self.calls.set(self.calls.get() + 1);
      Ok(self.signs.iter().find(|s| s.word == word).cloned())
    }
  }

  fn source() -> FakeSource {
    FakeSource {
      signs: vec![sign("a", "A"), sign("b", "B"), sign("c", "Hello")],
      ..FakeSource::default()
    }
  }

  #[test]
  fn initialize_reuses_fresh_storage() {
    let storage = MemoryStorage::new();
    let mut first = SignCache::new(storage.clone(), source());
    first.initialize().unwrap();
    assert_eq!(first.all_signs().len(), 3);
    assert!(storage.get(SIGN_CACHE_EXPIRY_KEY).unwrap().is_some());

    let mut second = SignCache::new(storage.clone(), FakeSource::default());
    second.initialize().unwrap();
    assert_eq!(second.all_signs().len(), 3);
    assert_eq!(second.source.calls.get(), 0);
  }

  #[test]
  fn expired_storage_is_refreshed() {
    let storage = MemoryStorage::new();
    let mut first = SignCache::new(storage.clone(), source()).with_ttl(TimeDelta::zero());
    first.initialize().unwrap();

    let mut second = SignCache::new(storage.clone(), source());
    second.initialize().unwrap();
    assert_eq!(second.source.calls.get(), 1);

    second.expire().unwrap();
    let mut third = SignCache::new(storage, source());
    third.initialize().unwrap();
    assert_eq!(third.source.calls.get(), 1);
  }

  #[test]
  fn lookups_fall_through_and_write_back() {
    let storage = MemoryStorage::new();
    let mut cache = SignCache::new(storage.clone(), source());
    assert!(cache.get_by_id("a").is_none());

    cache.initialize().unwrap();
    assert_eq!(cache.get_by_word("hello").unwrap().id, "c");
    assert_eq!(cache.source.calls.get(), 1);

    let z = cache.get_by_id("z").unwrap();
    assert_eq!(z.word, "Z");
    assert_eq!(cache.source.calls.get(), 2);
    assert!(cache.get_by_id("z").is_some());
    assert_eq!(cache.source.calls.get(), 2);
    assert!(storage.get(SIGN_CACHE_KEY).unwrap().unwrap().contains("\"z\""));

    assert!(cache.get_by_word("nothing").is_none());
  }

  #[test]
  fn invalid_media_is_retried_then_replaced() {
    let src = source();
    *src.media.borrow_mut() = vec![
      Some("http://bad".into()),
      Some("http://bad".into()),
      Some("https://ok.supabase.co/q.png".into()),
    ];
    let mut cache = SignCache::new(MemoryStorage::new(), src);
    cache.initialize().unwrap();
    // 第一次未命中取到无效地址，随后重试拿到有效地址
    let q = cache.get_valid_by_id("q", 3).unwrap();
    assert_eq!(q.media_url.as_deref(), Some("https://ok.supabase.co/q.png"));

    *cache.source.media.borrow_mut() = vec![None, None, None, None];
    let r = cache.get_valid_by_id("r", 2).unwrap();
    assert_eq!(
      r.media_url.as_deref(),
      Some("https://placehold.co/200x200?text=R")
    );
  }

  #[test]
  fn random_signs_respect_exclusion() {
    let mut cache = SignCache::new(MemoryStorage::new(), source());
    cache.initialize().unwrap();
    for _ in 0..10 {
      let picked = cache.random_signs(5, Some("a"));
      assert_eq!(picked.len(), 2);
      assert!(picked.iter().all(|s| s.id != "a"));
    }
    assert_eq!(cache.random_signs(1, None).len(), 1);
  }
}
