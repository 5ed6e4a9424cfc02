// 该文件是 Shouyu （手语） 项目的一部分。
// src/model/handpose.rs - 基于 tract 的手部关键点提取
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # Handpose 关键点模型
//!
//! 输入 `1 × 224 × 224 × 3`（取值 `[0, 1]`），输出：
//! 1. 21 × 3 个关键点坐标（输入像素空间）
//! 2. 手部存在置信度
//! 3. 左右手得分（`>= 0.5` 视为右手）
//!
//! URL 形如 `handpose:///path/to/hand_landmark.onnx?threshold=0.2`。

use std::{collections::HashMap, path::PathBuf, time::Instant};

use image::{RgbImage, imageops::FilterType};
use tracing::{debug, info};
use tract_onnx::prelude::*;
use url::Url;

use super::Model;
use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNhwcFrame,
  input::AsNhwcFrame,
  landmark::{
    ExtractorError, HAND_LANDMARK_COUNT, HandLandmarks, LandmarkExtractor, LandmarkSet, Point3,
  },
};

const INPUT_SIZE: u32 = 224;
const DEFAULT_PRESENCE_THRESHOLD: f32 = 0.2;

pub struct HandposeExtractor<const W: u32, const H: u32> {
  path: PathBuf,
  presence_threshold: f32,
  model: Option<TypedRunnableModel<TypedModel>>,
}

impl<const W: u32, const H: u32> FromUrlWithScheme for HandposeExtractor<W, H> {
  const SCHEME: &'static str = "handpose";
}

impl<const W: u32, const H: u32> FromUrl for HandposeExtractor<W, H> {
  type Error = ExtractorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ExtractorError::SchemeMismatch(format!(
        "期望 '{}', 实际为 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let presence_threshold = query
      .get("threshold")
      .and_then(|v| v.parse::<f32>().ok())
      .unwrap_or(DEFAULT_PRESENCE_THRESHOLD);

    Ok(Self {
      path: PathBuf::from(url.path()),
      presence_threshold,
      model: None,
    })
  }
}

impl<const W: u32, const H: u32> LandmarkExtractor<W, H> for HandposeExtractor<W, H> {
  fn load_model(&mut self) -> Result<(), ExtractorError> {
    if self.model.is_some() {
      return Err(ExtractorError::AlreadyLoaded);
    }

    info!("开始加载关键点模型: {}", self.path.display());
    let now = Instant::now();
    let shape: TVec<TDim> = [1, INPUT_SIZE as usize, INPUT_SIZE as usize, 3]
      .iter()
      .map(|d| d.to_dim())
      .collect();
    let model = tract_onnx::onnx()
      .model_for_path(&self.path)
      .and_then(|mut model| {
        model.set_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), shape))?;
        Ok(model)
      })
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(|e| ExtractorError::Load(e.to_string()))?;
    info!("关键点模型加载完成，耗时: {:.2?}", now.elapsed());

    self.model = Some(model);
    Ok(())
  }

  fn is_loaded(&self) -> bool {
    self.model.is_some()
  }

  fn detect(&self, frame: &RgbNhwcFrame<W, H>) -> Result<LandmarkSet, ExtractorError> {
    let model = self.model.as_ref().ok_or(ExtractorError::NotLoaded)?;

    let (input, letterbox) = prepare_frame(frame)?;
    let outputs = model
      .run(tvec!(input.into()))
      .map_err(|e| ExtractorError::Inference(e.to_string()))?;
    let decoded = decode_outputs(&outputs)?;

    if decoded.presence < self.presence_threshold {
      debug!("未检测到手部: presence={:.3}", decoded.presence);
      return Ok(LandmarkSet::default());
    }

    let hand = HandLandmarks::new(letterbox.project(&decoded.points));
    let mut set = LandmarkSet::default();
    if decoded.handedness >= 0.5 {
      set.right_hand = Some(hand);
    } else {
      set.left_hand = Some(hand);
    }
    Ok(set)
  }
}

impl<const W: u32, const H: u32> Model for HandposeExtractor<W, H> {
  type Input = RgbNhwcFrame<W, H>;
  type Output = LandmarkSet;
  type Error = ExtractorError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.detect(input)
  }
}

#[derive(Debug, Clone, PartialEq)]
struct Letterbox {
  scale: f32,
  pad_x: f32,
  pad_y: f32,
  width: f32,
  height: f32,
}

impl Letterbox {
  fn new(width: u32, height: u32) -> Self {
    let scale = INPUT_SIZE as f32 / width.max(height) as f32;
    let new_w = (width as f32 * scale).round();
    let new_h = (height as f32 * scale).round();
    Self {
      scale,
      pad_x: ((INPUT_SIZE as f32 - new_w) / 2.0).max(0.0).floor(),
      pad_y: ((INPUT_SIZE as f32 - new_h) / 2.0).max(0.0).floor(),
      width: width as f32,
      height: height as f32,
    }
  }

  // 输入像素坐标 -> 原图归一化坐标
  fn project(&self, points: &[[f32; 3]; HAND_LANDMARK_COUNT]) -> [Point3; HAND_LANDMARK_COUNT] {
    let mut out = [Point3::default(); HAND_LANDMARK_COUNT];
    for (dst, [x, y, z]) in out.iter_mut().zip(points.iter()) {
      let px = (x - self.pad_x) / self.scale;
      let py = (y - self.pad_y) / self.scale;
      *dst = Point3::new(
        (px / self.width).clamp(0.0, 1.0),
        (py / self.height).clamp(0.0, 1.0),
        z / (INPUT_SIZE as f32),
      );
    }
    out
  }
}

fn prepare_frame<const W: u32, const H: u32>(
  frame: &RgbNhwcFrame<W, H>,
) -> Result<(Tensor, Letterbox), ExtractorError> {
  let image = RgbImage::from_raw(W, H, frame.as_nhwc().to_vec())
    .ok_or_else(|| ExtractorError::Inference("帧数据无法构造图像".to_string()))?;

  let letterbox = Letterbox::new(W, H);
  let new_w = ((W as f32 * letterbox.scale).round() as u32).max(1);
  let new_h = ((H as f32 * letterbox.scale).round() as u32).max(1);
  let resized = image::imageops::resize(&image, new_w, new_h, FilterType::Triangle);

  let mut input =
    tract_ndarray::Array4::<f32>::zeros((1, INPUT_SIZE as usize, INPUT_SIZE as usize, 3));
  let (ox, oy) = (letterbox.pad_x as u32, letterbox.pad_y as u32);
  for (x, y, pixel) in resized.enumerate_pixels() {
    let (lx, ly) = ((x + ox) as usize, (y + oy) as usize);
    if lx >= INPUT_SIZE as usize || ly >= INPUT_SIZE as usize {
      continue;
    }
    for c in 0..3 {
      input[[0, ly, lx, c]] = pixel[c] as f32 / 255.0;
    }
  }

  Ok((input.into_tensor(), letterbox))
}

struct Decoded {
  points: [[f32; 3]; HAND_LANDMARK_COUNT],
  presence: f32,
  handedness: f32,
}

fn first_scalar(outputs: &[TValue], index: usize) -> f32 {
  outputs
    .get(index)
    .and_then(|t| t.to_array_view::<f32>().ok())
    .and_then(|v| v.iter().next().copied())
    .unwrap_or(0.0)
}

fn decode_outputs(outputs: &[TValue]) -> Result<Decoded, ExtractorError> {
  let coords = outputs
    .first()
    .ok_or_else(|| ExtractorError::Inference("模型没有输出".to_string()))?
    .to_array_view::<f32>()
    .map_err(|e| ExtractorError::Inference(e.to_string()))?;
  let coords: Vec<f32> = coords.iter().copied().collect();
  if coords.len() < HAND_LANDMARK_COUNT * 3 {
    return Err(ExtractorError::Inference(format!(
      "关键点输出长度不足: {}",
      coords.len()
    )));
  }

  let mut points = [[0.0f32; 3]; HAND_LANDMARK_COUNT];
  for (dst, chunk) in points.iter_mut().zip(coords.chunks_exact(3)) {
    dst.copy_from_slice(chunk);
  }

  Ok(Decoded {
    points,
    presence: first_scalar(outputs, 1),
    handedness: first_scalar(outputs, 2),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_url_with_threshold() {
    let url = Url::parse("handpose:///models/hand.onnx?threshold=0.4").unwrap();
    let extractor = HandposeExtractor::<640, 480>::from_url(&url).unwrap();
    assert_eq!(extractor.path, PathBuf::from("/models/hand.onnx"));
    assert!((extractor.presence_threshold - 0.4).abs() < 1e-6);
    assert!(!LandmarkExtractor::is_loaded(&extractor));
  }

  #[test]
  fn detect_requires_loaded_model() {
    let url = Url::parse("handpose:///models/hand.onnx").unwrap();
    let extractor = HandposeExtractor::<8, 6>::from_url(&url).unwrap();
    assert!(matches!(
      extractor.detect(&RgbNhwcFrame::default()),
      Err(ExtractorError::NotLoaded)
    ));
  }

  #[test]
  fn missing_model_file_fails_to_load() {
    let url = Url::parse("handpose:///definitely/not/here.onnx").unwrap();
    let mut extractor = HandposeExtractor::<8, 6>::from_url(&url).unwrap();
    assert!(matches!(
      extractor.load_model(),
      Err(ExtractorError::Load(_))
    ));
  }

  #[test]
  fn letterbox_projects_back_to_frame() {
    // 640x480 -> 224x168，上下各留 28 像素
    let lb = Letterbox::new(640, 480);
    assert!((lb.scale - 0.35).abs() < 1e-6);
    assert_eq!(lb.pad_x, 0.0);
    assert_eq!(lb.pad_y, 28.0);

    let mut points = [[0.0f32; 3]; HAND_LANDMARK_COUNT];
    points[0] = [112.0, 112.0, 0.0];
    points[1] = [224.0, 28.0, 0.0];
    let projected = lb.project(&points);
    assert!((projected[0].x - 0.5).abs() < 1e-4);
    assert!((projected[0].y - 0.5).abs() < 1e-4);
    assert!((projected[1].x - 1.0).abs() < 1e-4);
    assert!(projected[1].y.abs() < 1e-4);
  }

  #[test]
  fn decodes_presence_and_handedness() {
    let coords: Vec<f32> = (0..HAND_LANDMARK_COUNT * 3).map(|i| i as f32).collect();
    let outputs: TVec<TValue> = tvec!(
      tensor1(&coords[..]).into(),
      tensor1(&[0.9f32]).into(),
      tensor1(&[0.7f32]).into()
    );
    let decoded = decode_outputs(&outputs).unwrap();
    assert_eq!(decoded.points[1], [3.0, 4.0, 5.0]);
    assert!((decoded.presence - 0.9).abs() < 1e-6);
    assert!((decoded.handedness - 0.7).abs() < 1e-6);
  }

  #[test]
  fn short_output_is_an_error() {
    let outputs: TVec<TValue> = tvec!(tensor1(&[1.0f32, 2.0]).into());
    assert!(decode_outputs(&outputs).is_err());
  }
}
