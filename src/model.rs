// 该文件是 Shouyu （手语） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use crate::landmark::LandmarkSet;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

mod bundle;
pub use self::bundle::{BundleError, CONFIG_ENTRY, ModelBundle, ModelConfig, WEIGHTS_ENTRY};

mod classifier;
pub use self::classifier::{
  Classification, ClassifierError, DEFAULT_CONFIDENCE_FLOOR, ModelCache, Scorer, SignClassifier,
  TractScorer,
};

mod handpose;
pub use self::handpose::HandposeExtractor;

/// 一轮识别的结果，每轮覆盖上一轮
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
  pub sign_id: Option<usize>,
  pub sign_label: String,
  pub confidence: f32,
  pub landmarks: LandmarkSet,
}

impl Prediction {
  pub fn new(classification: Classification, landmarks: LandmarkSet) -> Self {
    Self {
      sign_id: classification.sign_id,
      sign_label: classification.sign_label,
      confidence: classification.confidence,
      landmarks,
    }
  }

  /// 本轮没有可用结果（推理失败等）时的无手势预测
  pub fn none(null_label: impl Into<String>) -> Self {
    Self::new(Classification::none(null_label), LandmarkSet::default())
  }

  pub fn is_sign(&self) -> bool {
    self.sign_id.is_some()
  }
}
