// 该文件是 Shouyu （手语） 项目的一部分。
// src/cache/source.rs - 手语词条数据源
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

use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::{CacheError, Sign};

pub trait SignSource {
  fn all_signs(&self) -> Result<Vec<Sign>, CacheError>;
  fn sign_by_id(&self, id: &str) -> Result<Sign, CacheError>;
  /// 按词查找，没有结果时返回 `None`
  fn sign_by_word(&self, word: &str) -> Result<Option<Sign>, CacheError>;
}

/// REST 接口：`/signs`、`/signs/{id}`、`/signs/search/{word}`
#[derive(Debug, Clone)]
pub struct HttpSignSource {
  base: String,
}

impl HttpSignSource {
  pub fn new(base: &Url) -> Self {
    Self {
      base: base.as_str().trim_end_matches('/').to_string(),
    }
  }

  fn route(&self, path: &str) -> String {
    format!("{}/{}", self.base, path)
  }

  fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, CacheError> {
    debug!("GET {}", url);
    let response = ureq::get(url)
      .call()
      .map_err(|e| CacheError::Http(format!("{}: {}", url, e)))?;
    let body = response
      .into_string()
      .map_err(|e| CacheError::Http(format!("{}: {}", url, e)))?;
    decode_body(url, &body)
  }
}

/// 响应体解析失败与本地存储损坏分开报告
fn decode_body<T: DeserializeOwned>(url: &str, body: &str) -> Result<T, CacheError> {
  serde_json::from_str(body).map_err(|e| CacheError::Decode {
    url: url.to_string(),
    message: e.to_string(),
  })
}

impl SignSource for HttpSignSource {
  fn all_signs(&self) -> Result<Vec<Sign>, CacheError> {
    self.get_json(&self.route("signs"))
  }

  fn sign_by_id(&self, id: &str) -> Result<Sign, CacheError> {
    self.get_json(&self.route(&format!("signs/{}", urlencoding::encode(id))))
  }

  fn sign_by_word(&self, word: &str) -> Result<Option<Sign>, CacheError> {
    let signs: Vec<Sign> =
      self.get_json(&self.route(&format!("signs/search/{}", urlencoding::encode(word))))?;
    Ok(signs.into_iter().next())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn routes_are_encoded() {
    let source = HttpSignSource::new(&Url::parse("https://api.example.com/v1/").unwrap());
    assert_eq!(source.route("signs"), "https://api.example.com/v1/signs");
    assert_eq!(
      source.route(&format!("signs/search/{}", urlencoding::encode("thank you"))),
      "https://api.example.com/v1/signs/search/thank%20you"
    );
  }

  #[test]
  fn bad_response_body_is_a_decode_error() {
    let url = "https://api.example.com/v1/signs";
    let err = decode_body::<Vec<Sign>>(url, "<html>502 Bad Gateway</html>").unwrap_err();
    match err {
      CacheError::Decode { url: got, .. } => assert_eq!(got, url),
      other => panic!("unexpected error: {}", other),
    }

    let signs: Vec<Sign> = decode_body(
      url,
      r#"[{"id":"1","word":"hello","definition":"greeting","mediaUrl":null}]"#,
    )
    .unwrap();
    assert_eq!(signs[0].word, "hello");
  }
}
