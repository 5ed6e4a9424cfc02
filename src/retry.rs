// 该文件是 Shouyu （手语） 项目的一部分。
// src/retry.rs - 带校验的重试
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

use std::fmt::Display;

use tracing::{debug, warn};

/// 重复调用 `fetch`，直到结果满足 `predicate` 或用完 `max_attempts` 次
///
/// 用完次数时返回最后一次成功取得的值；所有尝试都失败时返回最后一个错误。
/// `max_attempts` 为 0 时按 1 次处理。
pub fn fetch_with_validation<T, E, F, P>(
  mut fetch: F,
  predicate: P,
  max_attempts: usize,
) -> Result<T, E>
where
  F: FnMut() -> Result<T, E>,
  P: Fn(&T) -> bool,
  E: Display,
{
  let attempts = max_attempts.max(1);
  let mut last_value = None;
  let mut attempt = 0;

  loop {
    attempt += 1;
    match fetch() {
      Ok(value) if predicate(&value) => {
        debug!("第 {} 次请求通过校验", attempt);
        return Ok(value);
      }
      Ok(value) => {
        warn!("第 {}/{} 次请求结果未通过校验", attempt, attempts);
        if attempt >= attempts {
          return Ok(value);
        }
        last_value = Some(value);
      }
      Err(e) => {
        warn!("第 {}/{} 次请求失败: {}", attempt, attempts, e);
        if attempt >= attempts {
          return last_value.ok_or(e);
        }
      }
    }
  }
}

/// 图片地址必须是 https 且来自 supabase 存储
pub fn is_valid_image_url(url: Option<&str>) -> bool {
  match url {
    Some(url) if !url.is_empty() => {
      let valid = url.contains("https") && url.contains("supabase.co");
      if !valid {
        warn!("无效的图片地址: {}", url);
      }
      valid
    }
    _ => false,
  }
}

pub fn fallback_image_url(word: &str) -> String {
  format!(
    "https://placehold.co/200x200?text={}",
    urlencoding::encode(word)
  )
}
