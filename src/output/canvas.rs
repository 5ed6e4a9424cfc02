// 该文件是 Shouyu （手语） 项目的一部分。
// src/output/canvas.rs - 内存画布输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  cell::{Cell, RefCell},
  convert::Infallible,
  rc::Rc,
};

use image::RgbImage;

use crate::{
  frame::RgbNhwcFrame,
  model::Prediction,
  output::{Render, draw::Draw},
};

#[derive(Default)]
struct CanvasState {
  image: RefCell<Option<RgbImage>>,
  frames: Cell<u64>,
}

/// 把每一轮的叠加层画到内存中的画布上，只保留最新一帧
///
/// 克隆出来的句柄共享同一块画布。
#[derive(Clone, Default)]
pub struct CanvasOutput {
  state: Rc<CanvasState>,
  draw: Draw,
}

impl CanvasOutput {
  pub const SCHEME: &'static str = "canvas";

  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn snapshot(&self) -> Option<RgbImage> {
    self.state.image.borrow().clone()
  }

  pub fn frames_drawn(&self) -> u64 {
    self.state.frames.get()
  }
}

impl<const W: u32, const H: u32> Render<RgbNhwcFrame<W, H>, Prediction> for CanvasOutput {
  type Error = Infallible;

  fn render_result(
    &self,
    frame: &RgbNhwcFrame<W, H>,
    result: &Prediction,
  ) -> Result<(), Self::Error> {
    let image = self.draw.overlay(frame, result);
    *self.state.image.borrow_mut() = Some(image);
    self.state.frames.set(self.state.frames.get() + 1);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn keeps_only_latest_frame() {
    let canvas = CanvasOutput::new();
    let shared = canvas.clone();
    assert!(shared.snapshot().is_none());

    let frame = RgbNhwcFrame::<4, 2>::try_from(vec![9u8; 4 * 2 * 3]).unwrap();
    canvas
      .render_result(&frame, &Prediction::none("_null"))
      .unwrap();
    canvas
      .render_result(&frame, &Prediction::none("_null"))
      .unwrap();

    assert_eq!(shared.frames_drawn(), 2);
    let image = shared.snapshot().unwrap();
    assert_eq!(image.dimensions(), (4, 2));
    assert_eq!(image.get_pixel(0, 0).0, [9, 9, 9]);
  }
}
