// 该文件是 Shouyu （手语） 项目的一部分。
// src/feature.rs - 关键点到特征向量的编码
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

//! # 特征编码
//!
//! 布局：左手 21×(x, y, z)，右手 21×(x, y, z)，之后依次是 pose 与 face。
//! 缺失的部位补零；超出 `inputShape` 的部分截断；最后按配置做
//! `(v - mean) / std` 归一化。

use std::ops::Deref;

use crate::{
  landmark::{HAND_LANDMARK_COUNT, HandLandmarks, LandmarkSet, Point3},
  model::ModelConfig,
};

/// 单手编码后的长度
pub const HAND_FEATURE_LEN: usize = HAND_LANDMARK_COUNT * 3;

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
  values: Box<[f32]>,
}

impl FeatureVector {
  pub fn as_slice(&self) -> &[f32] {
    &self.values
  }

  pub fn into_inner(self) -> Box<[f32]> {
    self.values
  }
}

impl Deref for FeatureVector {
  type Target = [f32];

  fn deref(&self) -> &Self::Target {
    &self.values
  }
}

impl From<Vec<f32>> for FeatureVector {
  fn from(values: Vec<f32>) -> Self {
    Self {
      values: values.into_boxed_slice(),
    }
  }
}

struct Writer {
  values: Vec<f32>,
  len: usize,
}

impl Writer {
  fn push_point(&mut self, point: &Point3) {
    for v in [point.x, point.y, point.z] {
      if self.values.len() < self.len {
        self.values.push(v);
      }
    }
  }

  fn push_hand(&mut self, hand: Option<&HandLandmarks>) {
    match hand {
      Some(hand) => hand.points.iter().for_each(|p| self.push_point(p)),
      None => self.pad(HAND_FEATURE_LEN),
    }
  }

  fn push_points(&mut self, points: Option<&Vec<Point3>>) {
    if let Some(points) = points {
      points.iter().for_each(|p| self.push_point(p));
    }
  }

  fn pad(&mut self, n: usize) {
    let n = n.min(self.len.saturating_sub(self.values.len()));
    self.values.extend(std::iter::repeat_n(0.0, n));
  }
}

/// 按模型配置把关键点编码为定长特征向量
///
/// 纯函数：同样的输入总是得到逐位相同的输出，长度恒等于
/// [`ModelConfig::feature_len`]。
pub fn encode(landmarks: &LandmarkSet, config: &ModelConfig) -> FeatureVector {
  let len = config.feature_len();
  let mut writer = Writer {
    values: Vec::with_capacity(len),
    len,
  };

  writer.push_hand(landmarks.left_hand.as_ref());
  writer.push_hand(landmarks.right_hand.as_ref());
  writer.push_points(landmarks.pose.as_ref());
  writer.push_points(landmarks.face.as_ref());
  writer.pad(len);

  let mut values = writer.values;
  for (i, v) in values.iter_mut().enumerate() {
    *v = config.normalize(i, *v);
  }

  FeatureVector::from(values)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config(input_shape: Vec<usize>) -> ModelConfig {
    ModelConfig {
      input_shape,
      labels: vec!["_null".into(), "A".into(), "B".into()],
      ..ModelConfig::default()
    }
  }

  fn hand(base: f32) -> HandLandmarks {
    let mut points = [Point3::default(); HAND_LANDMARK_COUNT];
    for (i, p) in points.iter_mut().enumerate() {
      *p = Point3::new(base + i as f32 / 100.0, base, -base);
    }
    HandLandmarks::new(points)
  }

  #[test]
  fn encoding_is_deterministic() {
    let set = LandmarkSet {
      left_hand: Some(hand(0.2)),
      right_hand: Some(hand(0.6)),
      ..Default::default()
    };
    let cfg = config(vec![1, 2 * HAND_FEATURE_LEN]);
    let a = encode(&set, &cfg);
    let b = encode(&set, &cfg);
    let a_bits: Vec<u32> = a.iter().map(|v| v.to_bits()).collect();
    let b_bits: Vec<u32> = b.iter().map(|v| v.to_bits()).collect();
    assert_eq!(a_bits, b_bits);
  }

  #[test]
  fn missing_hands_are_zero_filled() {
    let cfg = config(vec![1, 2 * HAND_FEATURE_LEN]);
    let empty = encode(&LandmarkSet::default(), &cfg);
    assert_eq!(empty.len(), 2 * HAND_FEATURE_LEN);
    assert!(empty.iter().all(|v| *v == 0.0));

    let right_only = LandmarkSet {
      right_hand: Some(hand(0.5)),
      ..Default::default()
    };
    let v = encode(&right_only, &cfg);
    assert_eq!(v.len(), 2 * HAND_FEATURE_LEN);
    assert!(v[..HAND_FEATURE_LEN].iter().all(|x| *x == 0.0));
    assert_eq!(v[HAND_FEATURE_LEN], 0.5);
  }

  #[test]
  fn absent_and_zeroed_hands_encode_identically() {
    let cfg = config(vec![2 * HAND_FEATURE_LEN]);
    let zeroed = LandmarkSet {
      left_hand: Some(HandLandmarks::new([Point3::default(); HAND_LANDMARK_COUNT])),
      ..Default::default()
    };
    assert_eq!(encode(&zeroed, &cfg), encode(&LandmarkSet::default(), &cfg));
  }

  #[test]
  fn length_follows_input_shape() {
    let set = LandmarkSet {
      left_hand: Some(hand(0.1)),
      right_hand: Some(hand(0.2)),
      pose: Some(vec![Point3::new(1.0, 1.0, 1.0); 4]),
      ..Default::default()
    };

    // 截断
    let short = encode(&set, &config(vec![10]));
    assert_eq!(short.len(), 10);

    // 双手之后追加 pose，再补零
    let long = encode(&set, &config(vec![2 * HAND_FEATURE_LEN + 20]));
    assert_eq!(long.len(), 2 * HAND_FEATURE_LEN + 20);
    assert_eq!(long[2 * HAND_FEATURE_LEN], 1.0);
    assert_eq!(long[2 * HAND_FEATURE_LEN + 11], 1.0);
    assert_eq!(long[2 * HAND_FEATURE_LEN + 12], 0.0);
  }

  #[test]
  fn normalization_is_applied() {
    let mut cfg = config(vec![3]);
    cfg.mean = Some(vec![1.0]);
    cfg.std = Some(vec![2.0, 0.0, 4.0]);
    let v = encode(&LandmarkSet::default(), &cfg);
    assert_eq!(v.as_slice(), &[-0.5, -1.0, -0.25]);
  }
}
