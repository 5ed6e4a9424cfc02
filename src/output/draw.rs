// 该文件是 Shouyu （手语） 项目的一部分。
// src/output/draw.rs - 识别结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{Rgb, RgbImage, imageops::flip_horizontal};
use imageproc::{
  drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut},
  rect::Rect,
};

use crate::{
  frame::RgbNhwcFrame,
  landmark::{HAND_CONNECTIONS, HandLandmarks, LandmarkSet, Point3},
  model::Prediction,
};

const POINT_COLOR: [u8; 3] = [255, 0, 0];
const LINE_COLOR: [u8; 3] = [0, 255, 0];
const POINT_RADIUS: i32 = 5;
const LINE_WIDTH: i32 = 2;
const CONFIDENCE_BAR_HEIGHT: u32 = 6;

// 画布尺寸
const ASPECT_RATIO: f32 = 4.0 / 3.0;
const MOBILE_BREAKPOINT: u32 = 768;
const DESKTOP_MAX_WIDTH: f32 = 640.0;
const MOBILE_MAX_WIDTH: f32 = 320.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceLevel {
  High,
  Medium,
  Low,
}

impl ConfidenceLevel {
  pub fn of(confidence: f32) -> Self {
    if confidence >= 0.9 {
      ConfidenceLevel::High
    } else if confidence >= 0.8 {
      ConfidenceLevel::Medium
    } else {
      ConfidenceLevel::Low
    }
  }

  fn color(self) -> [u8; 3] {
    match self {
      ConfidenceLevel::High => [46, 204, 113],
      ConfidenceLevel::Medium => [241, 196, 15],
      ConfidenceLevel::Low => [231, 76, 60],
    }
  }
}

/// 按容器和窗口大小计算画布尺寸，保持 4:3
///
/// 窗口宽度小于 768 视为移动端；竖屏最多 320 像素宽、40% 窗口高，
/// 横屏取 60% 窗口高、最多 70% 窗口宽；桌面端最多 640 像素宽。
pub fn fit_canvas(container_width: u32, window_width: u32, window_height: u32) -> (u32, u32) {
  let container = container_width as f32;
  let win_w = window_width as f32;
  let win_h = window_height as f32;

  let (width, height) = if window_width < MOBILE_BREAKPOINT {
    if window_height > window_width {
      let mut width = container.min((win_w * 0.9).min(MOBILE_MAX_WIDTH));
      let mut height = width / ASPECT_RATIO;
      let max_height = win_h * 0.4;
      if height > max_height {
        height = max_height;
        width = height * ASPECT_RATIO;
      }
      (width, height)
    } else {
      let mut height = win_h * 0.6;
      let mut width = height * ASPECT_RATIO;
      let max_width = win_w * 0.7;
      if width > max_width {
        width = max_width;
        height = width / ASPECT_RATIO;
      }
      (width, height)
    }
  } else {
    let width = container.min(DESKTOP_MAX_WIDTH);
    (width, width / ASPECT_RATIO)
  };

  (width.floor() as u32, height.floor() as u32)
}

/// 叠加层绘制
///
/// 画面按自拍习惯水平镜像，关键点使用同一个镜像变换 `x' = (1 - x) * width`，
/// 保证两者对齐。
#[derive(Debug, Clone)]
pub struct Draw {
  mirror: bool,
  point_color: [u8; 3],
  line_color: [u8; 3],
  point_radius: i32,
  line_width: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      mirror: true,
      point_color: POINT_COLOR,
      line_color: LINE_COLOR,
      point_radius: POINT_RADIUS,
      line_width: LINE_WIDTH,
    }
  }
}

impl Draw {
  pub fn with_mirror(mut self, mirror: bool) -> Self {
    self.mirror = mirror;
    self
  }

  pub fn overlay<const W: u32, const H: u32>(
    &self,
    frame: &RgbNhwcFrame<W, H>,
    prediction: &Prediction,
  ) -> RgbImage {
    let image = frame.to_rgb_image();
    let mut image = if self.mirror {
      flip_horizontal(&image)
    } else {
      image
    };
    self.draw_landmarks(&mut image, &prediction.landmarks);
    if prediction.is_sign() {
      self.draw_confidence_bar(&mut image, prediction.confidence);
    }
    image
  }

  /// 归一化坐标 -> 画布像素坐标
  pub fn to_canvas(&self, point: &Point3, width: u32, height: u32) -> (f32, f32) {
    let x = if self.mirror {
      (1.0 - point.x) * width as f32
    } else {
      point.x * width as f32
    };
    (x, point.y * height as f32)
  }

  pub fn draw_landmarks(&self, image: &mut RgbImage, landmarks: &LandmarkSet) {
    for hand in landmarks.hands() {
      self.draw_hand(image, hand);
    }
  }

  fn draw_hand(&self, image: &mut RgbImage, hand: &HandLandmarks) {
    let (w, h) = image.dimensions();
    let points: Vec<(f32, f32)> = hand
      .points
      .iter()
      .map(|p| self.to_canvas(p, w, h))
      .collect();

    for (start, end) in HAND_CONNECTIONS {
      let (x0, y0) = points[start];
      let (x1, y1) = points[end];
      for offset in 0..self.line_width {
        let d = offset as f32;
        draw_line_segment_mut(image, (x0 + d, y0), (x1 + d, y1), Rgb(self.line_color));
        draw_line_segment_mut(image, (x0, y0 + d), (x1, y1 + d), Rgb(self.line_color));
      }
    }

    for (x, y) in points {
      draw_filled_circle_mut(
        image,
        (x.round() as i32, y.round() as i32),
        self.point_radius,
        Rgb(self.point_color),
      );
    }
  }

  fn draw_confidence_bar(&self, image: &mut RgbImage, confidence: f32) {
    let (w, h) = image.dimensions();
    let bar_width = (confidence.clamp(0.0, 1.0) * w as f32).round() as u32;
    if bar_width == 0 || h < CONFIDENCE_BAR_HEIGHT {
      return;
    }
    let rect = Rect::at(0, (h - CONFIDENCE_BAR_HEIGHT) as i32).of_size(bar_width, CONFIDENCE_BAR_HEIGHT);
    draw_filled_rect_mut(
      image,
      rect,
      Rgb(ConfidenceLevel::of(confidence).color()),
    );
  }
}
