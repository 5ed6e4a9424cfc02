// 该文件是 Shouyu （手语） 项目的一部分。
// src/model/bundle.rs - 模型包（权重 + 配置）
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # 模型包
//!
//! 模型包是一个 zip 文件，内含：
//! - `model.onnx` - 分类器权重
//! - `config.json` - 形如 `{"inputShape": [1, 126], "labels": ["_null", "A", ...]}` 的配置
//!
//! 支持 `http(s)://` 远程获取和 `file://` 本地读取。

use std::io::{Cursor, Read};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;
use zip::{ZipArchive, result::ZipError};

use crate::config::NULL_LABEL;

pub const WEIGHTS_ENTRY: &str = "model.onnx";
pub const CONFIG_ENTRY: &str = "config.json";

// 模型包大小上限 256 MiB
const MAX_BUNDLE_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum BundleError {
  #[error("模型包中缺少权重文件 model.onnx")]
  MissingWeights,
  #[error("模型包中缺少配置文件 config.json")]
  MissingConfig,
  #[error("config.json 解析失败: {0}")]
  MalformedConfig(#[from] serde_json::Error),
  #[error("config.json 内容无效: {0}")]
  InvalidConfig(String),
  #[error("model.onnx 无效: {0}")]
  MalformedWeights(String),
  #[error("获取模型包失败: {0}")]
  Fetch(String),
  #[error("模型包不是有效的 zip 文件: {0}")]
  Archive(#[from] ZipError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

fn default_null_label() -> String {
  NULL_LABEL.to_string()
}

fn default_softmax() -> bool {
  true
}

/// 分类器配置，加载后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
  pub input_shape: Vec<usize>,
  pub labels: Vec<String>,
  #[serde(default = "default_null_label")]
  pub null_label: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub mean: Option<Vec<f32>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub std: Option<Vec<f32>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub confidence_floor: Option<f32>,
  /// 模型输出为 logits 时需要 softmax
  #[serde(default = "default_softmax")]
  pub softmax: bool,
}

impl Default for ModelConfig {
  fn default() -> Self {
    Self {
      input_shape: vec![1, 126],
      labels: Vec::new(),
      null_label: default_null_label(),
      mean: None,
      std: None,
      confidence_floor: None,
      softmax: default_softmax(),
    }
  }
}

impl ModelConfig {
  pub fn from_json(bytes: &[u8]) -> Result<Self, BundleError> {
    let config: ModelConfig = serde_json::from_slice(bytes)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), BundleError> {
    if self.input_shape.is_empty() || self.feature_len() == 0 {
      return Err(BundleError::InvalidConfig(format!(
        "inputShape 无效: {:?}",
        self.input_shape
      )));
    }
    if self.labels.is_empty() {
      return Err(BundleError::InvalidConfig("labels 为空".to_string()));
    }
    if self.null_index().is_none() {
      return Err(BundleError::InvalidConfig(format!(
        "labels 中缺少无手势标签 '{}'",
        self.null_label
      )));
    }
    for (name, values) in [("mean", &self.mean), ("std", &self.std)] {
      if let Some(values) = values
        && values.len() != 1
        && values.len() != self.feature_len()
      {
        return Err(BundleError::InvalidConfig(format!(
          "{} 长度应为 1 或 {}, 实际为 {}",
          name,
          self.feature_len(),
          values.len()
        )));
      }
    }
    if let Some(floor) = self.confidence_floor
      && !(0.0..=1.0).contains(&floor)
    {
      return Err(BundleError::InvalidConfig(format!(
        "confidenceFloor 超出范围: {}",
        floor
      )));
    }
    Ok(())
  }

  /// 特征向量长度，即 `inputShape` 各维之积
  pub fn feature_len(&self) -> usize {
    self.input_shape.iter().product()
  }

  pub fn null_index(&self) -> Option<usize> {
    self.labels.iter().position(|l| *l == self.null_label)
  }

  pub fn label(&self, index: usize) -> Option<&str> {
    self.labels.get(index).map(String::as_str)
  }

  /// 对第 `index` 个分量做 `(v - mean) / std`；`std == 0` 按 1 处理
  pub fn normalize(&self, index: usize, value: f32) -> f32 {
    let pick = |values: &Option<Vec<f32>>, default: f32| match values {
      Some(v) if v.len() == 1 => v[0],
      Some(v) => v.get(index).copied().unwrap_or(default),
      None => default,
    };
    let mean = pick(&self.mean, 0.0);
    let std = pick(&self.std, 1.0);
    let std = if std == 0.0 { 1.0 } else { std };
    (value - mean) / std
  }
}

/// 解包后的模型包
#[derive(Debug, Clone)]
pub struct ModelBundle {
  pub config: ModelConfig,
  pub weights: Vec<u8>,
}

impl ModelBundle {
  /// 按 URL 获取模型包
  pub fn fetch(url: &Url) -> Result<Self, BundleError> {
    let bytes = match url.scheme() {
      "http" | "https" => fetch_remote(url)?,
      "file" => {
        let path = url
          .to_file_path()
          .map_err(|_| BundleError::Fetch(format!("无效的文件路径: {}", url)))?;
        std::fs::read(path)?
      }
      other => {
        return Err(BundleError::SchemeMismatch(format!(
          "期望 'http'、'https' 或 'file', 实际为 '{}'",
          other
        )));
      }
    };
    info!("模型包已获取: {} ({} 字节)", url, bytes.len());
    Self::from_zip_bytes(&bytes)
  }

  pub fn from_zip_bytes(bytes: &[u8]) -> Result<Self, BundleError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let weights = read_entry(&mut archive, WEIGHTS_ENTRY)?.ok_or(BundleError::MissingWeights)?;
    let config = read_entry(&mut archive, CONFIG_ENTRY)?.ok_or(BundleError::MissingConfig)?;

    if weights.is_empty() {
      return Err(BundleError::MalformedWeights("权重文件为空".to_string()));
    }
    let config = ModelConfig::from_json(&config)?;

    Ok(Self { config, weights })
  }
}

fn fetch_remote(url: &Url) -> Result<Vec<u8>, BundleError> {
  let response = ureq::get(url.as_str())
    .call()
    .map_err(|e| BundleError::Fetch(e.to_string()))?;
  let mut bytes = Vec::new();
  response
    .into_reader()
    .take(MAX_BUNDLE_BYTES)
    .read_to_end(&mut bytes)?;
  Ok(bytes)
}

fn read_entry<R: Read + std::io::Seek>(
  archive: &mut ZipArchive<R>,
  name: &str,
) -> Result<Option<Vec<u8>>, BundleError> {
  match archive.by_name(name) {
    Ok(mut file) => {
      let mut buf = Vec::with_capacity(file.size() as usize);
      file.read_to_end(&mut buf)?;
      Ok(Some(buf))
    }
    Err(ZipError::FileNotFound) => Ok(None),
    Err(e) => Err(e.into()),
  }
}
