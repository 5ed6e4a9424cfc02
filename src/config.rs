// 该文件是 Shouyu （手语） 项目的一部分。
// src/config.rs - 编译期配置与识别器选项
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

use url::Url;

use crate::matcher::RearmPolicy;

/// 无手势标签
pub const NULL_LABEL: &str = "_null";

pub const DEFAULT_MODEL_ID: &str = "alphabet2.0";

/// 模型下载地址，编译时可用 `SHOUYU_MODEL_BASE_URL` 覆盖
pub const MODEL_BASE_URL: &str = match option_env!("SHOUYU_MODEL_BASE_URL") {
  Some(url) => url,
  None => "https://triosigno.com/api/files/models",
};

/// `<base>/<model-id>`，模型编号做 URL 编码
pub fn model_url(base: &str, model_id: &str) -> Result<Url, url::ParseError> {
  let base = base.trim_end_matches('/');
  Url::parse(&format!("{}/{}", base, urlencoding::encode(model_id)))
}

pub fn default_model_url(model_id: Option<&str>) -> Result<Url, url::ParseError> {
  model_url(MODEL_BASE_URL, model_id.unwrap_or(DEFAULT_MODEL_ID))
}

/// 识别器对外的配置项
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizerOptions {
  pub target_label: String,
  pub model_id: Option<String>,
  pub rearm: RearmPolicy,
  /// 覆盖模型配置里的置信度下限
  pub confidence_floor: Option<f32>,
}

impl RecognizerOptions {
  pub fn new(target_label: impl Into<String>) -> Self {
    Self {
      target_label: target_label.into(),
      model_id: None,
      rearm: RearmPolicy::default(),
      confidence_floor: None,
    }
  }

  pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
    self.model_id = Some(model_id.into());
    self
  }

  pub fn with_rearm(mut self, rearm: RearmPolicy) -> Self {
    self.rearm = rearm;
    self
  }

  pub fn with_confidence_floor(mut self, floor: f32) -> Self {
    self.confidence_floor = Some(floor);
    self
  }

  pub fn model_url(&self) -> Result<Url, url::ParseError> {
    default_model_url(self.model_id.as_deref())
  }
}
