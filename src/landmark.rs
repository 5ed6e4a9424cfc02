// 该文件是 Shouyu （手语） 项目的一部分。
// src/landmark.rs - 关键点定义与提取接口
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

//! # 关键点
//!
//! 坐标全部归一化到 `[0, 1]`，原点在（未镜像的）画面左上角；`z` 为相对深度。
//! 没有检测到的部位用 `None` 表示，而不是全零的点。

use std::collections::BTreeMap;

use thiserror::Error;

use crate::frame::RgbNhwcFrame;

/// 单手关键点个数
pub const HAND_LANDMARK_COUNT: usize = 21;

pub const HAND_LANDMARK_NAMES: [&str; HAND_LANDMARK_COUNT] = [
  "wrist",
  "thumb_cmc",
  "thumb_mcp",
  "thumb_ip",
  "thumb_tip",
  "index_mcp",
  "index_pip",
  "index_dip",
  "index_tip",
  "middle_mcp",
  "middle_pip",
  "middle_dip",
  "middle_tip",
  "ring_mcp",
  "ring_pip",
  "ring_dip",
  "ring_tip",
  "pinky_mcp",
  "pinky_pip",
  "pinky_dip",
  "pinky_tip",
];

/// 手部骨架连线
pub const HAND_CONNECTIONS: [(usize, usize); 23] = [
  // 拇指
  (0, 1),
  (1, 2),
  (2, 3),
  (3, 4),
  // 食指
  (0, 5),
  (5, 6),
  (6, 7),
  (7, 8),
  // 中指
  (0, 9),
  (9, 10),
  (10, 11),
  (11, 12),
  // 无名指
  (0, 13),
  (13, 14),
  (14, 15),
  (15, 16),
  // 小指
  (0, 17),
  (17, 18),
  (18, 19),
  (19, 20),
  // 手掌
  (5, 9),
  (9, 13),
  (13, 17),
];

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point3 {
  pub x: f32,
  pub y: f32,
  pub z: f32,
}

impl Point3 {
  pub const fn new(x: f32, y: f32, z: f32) -> Self {
    Self { x, y, z }
  }
}

impl From<[f32; 3]> for Point3 {
  fn from([x, y, z]: [f32; 3]) -> Self {
    Self { x, y, z }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Handedness {
  Left,
  Right,
}

impl Handedness {
  fn prefix(self) -> &'static str {
    match self {
      Handedness::Left => "l_",
      Handedness::Right => "r_",
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandLandmarks {
  pub points: [Point3; HAND_LANDMARK_COUNT],
}

impl HandLandmarks {
  pub fn new(points: [Point3; HAND_LANDMARK_COUNT]) -> Self {
    Self { points }
  }

  pub fn wrist(&self) -> Point3 {
    self.points[0]
  }
}

/// 一帧中检测到的全部关键点
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LandmarkSet {
  pub left_hand: Option<HandLandmarks>,
  pub right_hand: Option<HandLandmarks>,
  pub pose: Option<Vec<Point3>>,
  pub face: Option<Vec<Point3>>,
}

impl LandmarkSet {
  pub fn is_empty(&self) -> bool {
    self.left_hand.is_none()
      && self.right_hand.is_none()
      && self.pose.is_none()
      && self.face.is_none()
  }

  pub fn hand(&self, handedness: Handedness) -> Option<&HandLandmarks> {
    match handedness {
      Handedness::Left => self.left_hand.as_ref(),
      Handedness::Right => self.right_hand.as_ref(),
    }
  }

  pub fn hands(&self) -> impl Iterator<Item = &HandLandmarks> {
    self.left_hand.iter().chain(self.right_hand.iter())
  }

  /// 以 `l_wrist`、`r_index_tip` 这样的名字导出手部关键点
  pub fn named_hand_points(&self) -> BTreeMap<String, Point3> {
    let mut named = BTreeMap::new();
    for handedness in [Handedness::Left, Handedness::Right] {
      if let Some(hand) = self.hand(handedness) {
        for (name, point) in HAND_LANDMARK_NAMES.iter().zip(hand.points.iter()) {
          named.insert(format!("{}{}", handedness.prefix(), name), *point);
        }
      }
    }
    named
  }
}

#[derive(Error, Debug)]
pub enum ExtractorError {
  #[error("关键点模型尚未加载")]
  NotLoaded,
  #[error("关键点模型已经加载过")]
  AlreadyLoaded,
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("模型加载失败: {0}")]
  Load(String),
  #[error("推理失败: {0}")]
  Inference(String),
}

/// 关键点提取器
///
/// `load_model` 必须在任何 `detect` 之前成功完成一次；
/// 未加载时 `detect` 返回 [`ExtractorError::NotLoaded`]。
/// 提取器可能在后台线程上加载，因此要求 `Send`。
pub trait LandmarkExtractor<const W: u32, const H: u32>: Send {
  fn load_model(&mut self) -> Result<(), ExtractorError>;
  fn is_loaded(&self) -> bool;
  fn detect(&self, frame: &RgbNhwcFrame<W, H>) -> Result<LandmarkSet, ExtractorError>;
}
