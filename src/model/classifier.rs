// 该文件是 Shouyu （手语） 项目的一部分。
// src/model/classifier.rs - 手语分类器
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  collections::HashMap,
  io::Cursor,
  sync::{Arc, Mutex, OnceLock},
  time::Instant,
};

use thiserror::Error;
use tracing::{debug, info};
use tract_onnx::prelude::*;
use url::Url;

use super::{BundleError, Model, ModelBundle, ModelConfig};
use crate::{FromUrl, feature::FeatureVector};

/// 未在配置中指定时使用的置信度下限
pub const DEFAULT_CONFIDENCE_FLOOR: f32 = 0.5;

#[derive(Error, Debug)]
pub enum ClassifierError {
  #[error("分类器尚未加载")]
  NotLoaded,
  #[error("分类器已经加载过")]
  AlreadyLoaded,
  #[error("模型包错误: {0}")]
  Bundle(#[from] BundleError),
  #[error("特征长度不匹配: 期望 {expected}, 实际 {actual}")]
  ShapeMismatch { expected: usize, actual: usize },
  #[error("输出长度与标签数不一致: 期望 {expected}, 实际 {actual}")]
  OutputMismatch { expected: usize, actual: usize },
  #[error("推理失败: {0}")]
  Inference(String),
}

/// 不透明的打分器：输入特征，输出每个标签的分数
pub type Scorer =
  Box<dyn Model<Input = FeatureVector, Output = Vec<f32>, Error = ClassifierError> + Send + Sync>;

/// 单帧分类结果
///
/// `sign_id` 为 `None` 表示无手势，此时 `sign_label` 为配置中的无手势标签。
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
  pub sign_id: Option<usize>,
  pub sign_label: String,
  pub confidence: f32,
}

impl Classification {
  pub fn none(null_label: impl Into<String>) -> Self {
    Self {
      sign_id: None,
      sign_label: null_label.into(),
      confidence: 0.0,
    }
  }

  pub fn is_sign(&self) -> bool {
    self.sign_id.is_some()
  }
}

struct LoadedModel {
  config: ModelConfig,
  scorer: Scorer,
}

/// 手语分类器
///
/// 每个实例只下载一次模型；加载完成前 `predict` 返回 [`ClassifierError::NotLoaded`]。
/// 内部使用 `OnceLock`，因此可以放进 `Arc` 在多个流水线间共享。
pub struct SignClassifier {
  url: Option<Url>,
  floor_override: Option<f32>,
  loading: Mutex<()>,
  loaded: OnceLock<LoadedModel>,
}

impl FromUrl for SignClassifier {
  type Error = ClassifierError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      "http" | "https" | "file" => Ok(Self::new(url.clone())),
      other => Err(
        BundleError::SchemeMismatch(format!(
          "期望 'http'、'https' 或 'file', 实际为 '{}'",
          other
        ))
        .into(),
      ),
    }
  }
}

impl SignClassifier {
  pub fn new(url: Url) -> Self {
    Self {
      url: Some(url),
      floor_override: None,
      loading: Mutex::new(()),
      loaded: OnceLock::new(),
    }
  }

  /// 用现成的配置和打分器构造一个已加载的分类器
  pub fn from_parts(config: ModelConfig, scorer: Scorer) -> Result<Self, ClassifierError> {
    config.validate()?;
    let classifier = Self {
      url: None,
      floor_override: None,
      loading: Mutex::new(()),
      loaded: OnceLock::new(),
    };
    classifier.install(config, scorer)?;
    Ok(classifier)
  }

  pub fn with_confidence_floor(mut self, floor: Option<f32>) -> Self {
    self.floor_override = floor;
    self
  }

  pub fn url(&self) -> Option<&Url> {
    self.url.as_ref()
  }

  /// 已经加载过时直接返回；并发调用只会下载一次
  pub fn load(&self) -> Result<(), ClassifierError> {
    let _guard = self.loading.lock().unwrap_or_else(|e| e.into_inner());
    if self.is_loaded() {
      debug!("分类器已加载，跳过");
      return Ok(());
    }
    let Some(url) = &self.url else {
      return Err(ClassifierError::NotLoaded);
    };

    info!("开始加载分类器: {}", url);
    let now = Instant::now();
    let bundle = ModelBundle::fetch(url)?;
    let scorer = TractScorer::from_onnx_bytes(&bundle.weights, &bundle.config.input_shape)?;
    self.install(bundle.config, Box::new(scorer))?;
    info!("分类器加载完成，耗时: {:.2?}", now.elapsed());
    Ok(())
  }

  fn install(&self, config: ModelConfig, scorer: Scorer) -> Result<(), ClassifierError> {
    self
      .loaded
      .set(LoadedModel { config, scorer })
      .map_err(|_| ClassifierError::AlreadyLoaded)
  }

  /// 生效的置信度下限：显式设置 > 配置文件 > 默认值
  pub fn confidence_floor(&self) -> f32 {
    self
      .floor_override
      .or_else(|| self.config().and_then(|c| c.confidence_floor))
      .unwrap_or(DEFAULT_CONFIDENCE_FLOOR)
  }

  pub fn is_loaded(&self) -> bool {
    self.loaded.get().is_some()
  }

  pub fn config(&self) -> Option<&ModelConfig> {
    self.loaded.get().map(|m| &m.config)
  }

  pub fn predict(&self, features: &FeatureVector) -> Result<Classification, ClassifierError> {
    let model = self.loaded.get().ok_or(ClassifierError::NotLoaded)?;
    let config = &model.config;

    if features.len() != config.feature_len() {
      return Err(ClassifierError::ShapeMismatch {
        expected: config.feature_len(),
        actual: features.len(),
      });
    }

    let scores = model.scorer.infer(features)?;
    if scores.len() != config.labels.len() {
      return Err(ClassifierError::OutputMismatch {
        expected: config.labels.len(),
        actual: scores.len(),
      });
    }

    let probs = if config.softmax {
      softmax(&scores)
    } else {
      scores
    };
    let Some((index, confidence)) = arg_max(&probs) else {
      return Ok(Classification::none(&config.null_label));
    };

    if Some(index) == config.null_index() || confidence < self.confidence_floor() {
      debug!("无手势: index={} confidence={:.3}", index, confidence);
      return Ok(Classification {
        confidence,
        ..Classification::none(&config.null_label)
      });
    }

    Ok(Classification {
      sign_id: Some(index),
      sign_label: config.labels[index].clone(),
      confidence,
    })
  }
}

impl Model for SignClassifier {
  type Input = FeatureVector;
  type Output = Classification;
  type Error = ClassifierError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.predict(input)
  }
}

fn softmax(scores: &[f32]) -> Vec<f32> {
  let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
  let sum: f32 = exps.iter().sum();
  if sum == 0.0 || !sum.is_finite() {
    return exps;
  }
  exps.into_iter().map(|e| e / sum).collect()
}

// 相同分数取靠前的下标；NaN 永远不会胜出
fn arg_max(values: &[f32]) -> Option<(usize, f32)> {
  values
    .iter()
    .copied()
    .enumerate()
    .filter(|(_, v)| !v.is_nan())
    .fold(None, |best, (i, v)| match best {
      Some((_, b)) if b >= v => best,
      _ => Some((i, v)),
    })
}

/// 基于 tract 的 ONNX 打分器
pub struct TractScorer {
  model: TypedRunnableModel<TypedModel>,
  input_shape: Vec<usize>,
}

impl TractScorer {
  pub fn from_onnx_bytes(bytes: &[u8], input_shape: &[usize]) -> Result<Self, BundleError> {
    let shape: TVec<TDim> = input_shape.iter().map(|d| d.to_dim()).collect();
    let model = tract_onnx::onnx()
      .model_for_read(&mut Cursor::new(bytes))
      .and_then(|mut model| {
        model.set_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), shape))?;
        Ok(model)
      })
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(|e| BundleError::MalformedWeights(e.to_string()))?;

    Ok(Self {
      model,
      input_shape: input_shape.to_vec(),
    })
  }
}

impl Model for TractScorer {
  type Input = FeatureVector;
  type Output = Vec<f32>;
  type Error = ClassifierError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let tensor = Tensor::from_shape(&self.input_shape, input.as_slice())
      .map_err(|e| ClassifierError::Inference(e.to_string()))?;
    let outputs = self
      .model
      .run(tvec!(tensor.into()))
      .map_err(|e| ClassifierError::Inference(e.to_string()))?;
    let first = outputs
      .first()
      .ok_or_else(|| ClassifierError::Inference("模型没有输出".to_string()))?;
    let view = first
      .to_array_view::<f32>()
      .map_err(|e| ClassifierError::Inference(e.to_string()))?;
    Ok(view.iter().copied().collect())
  }
}

/// 按模型 URL 共享已加载的分类器
#[derive(Default)]
pub struct ModelCache {
  entries: Mutex<HashMap<Url, Arc<SignClassifier>>>,
}

impl ModelCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// 命中时直接返回共享实例，否则加载一次并缓存
  pub fn get_or_load(&self, url: &Url) -> Result<Arc<SignClassifier>, ClassifierError> {
    let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(classifier) = entries.get(url) {
      debug!("模型缓存命中: {}", url);
      return Ok(classifier.clone());
    }
    let classifier = Arc::new(SignClassifier::new(url.clone()));
    classifier.load()?;
    entries.insert(url.clone(), classifier.clone());
    Ok(classifier)
  }

  pub fn insert(&self, url: Url, classifier: Arc<SignClassifier>) {
    let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    entries.insert(url, classifier);
  }

  pub fn len(&self) -> usize {
    self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
