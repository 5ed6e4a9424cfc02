// 该文件是 Shouyu （手语） 项目的一部分。
// src/frame.rs - NHWC 帧定义
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

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;

use crate::input::AsNhwcFrame;

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  SizeMismatch { expected: usize, actual: usize },
}

/// 摄像头的一帧 RGB 图像，按行优先 (H × W × C) 存放。
///
/// 帧只在产生它的那一轮识别中使用，不跨帧保留。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbNhwcFrame<const W: u32, const H: u32> {
  data: Box<[u8]>,
}

impl<const W: u32, const H: u32> RgbNhwcFrame<W, H> {
  pub const BYTES: usize = RGB_CHANNELS * W as usize * H as usize;

  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// 从任意尺寸的图像构造帧，尺寸不符时缩放到 W × H
  pub fn from_rgb_image(image: &RgbImage) -> Self {
    let data = if image.dimensions() == (W, H) {
      image.as_raw().clone()
    } else {
      image::imageops::resize(image, W, H, FilterType::Triangle).into_raw()
    };
    Self {
      data: data.into_boxed_slice(),
    }
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    RgbImage::from_raw(W, H, self.data.to_vec()).unwrap_or_else(|| RgbImage::new(W, H))
  }

  /// 读取 (x, y) 处的像素
  pub fn pixel(&self, x: usize, y: usize) -> Option<[u8; 3]> {
    if x >= self.width() || y >= self.height() {
      return None;
    }
    let idx = (y * self.width() + x) * RGB_CHANNELS;
    Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
  }
}

impl<const W: u32, const H: u32> TryFrom<Vec<u8>> for RgbNhwcFrame<W, H> {
  type Error = FrameError;

  fn try_from(data: Vec<u8>) -> Result<Self, Self::Error> {
    if data.len() != Self::BYTES {
      return Err(FrameError::SizeMismatch {
        expected: Self::BYTES,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
    })
  }
}

impl<const W: u32, const H: u32> Default for RgbNhwcFrame<W, H> {
  fn default() -> Self {
    let data = vec![0u8; Self::BYTES].into_boxed_slice();
    Self { data }
  }
}

impl<const W: u32, const H: u32> AsMut<[u8]> for RgbNhwcFrame<W, H> {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl<const W: u32, const H: u32> AsNhwcFrame<W, H> for RgbNhwcFrame<W, H> {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_wrong_length() {
    let err = RgbNhwcFrame::<4, 2>::try_from(vec![0u8; 10]).unwrap_err();
    assert_eq!(
      err,
      FrameError::SizeMismatch {
        expected: 24,
        actual: 10
      }
    );
  }

  #[test]
  fn image_conversion_resizes() {
    let image = RgbImage::from_pixel(8, 4, image::Rgb([10, 20, 30]));
    let frame = RgbNhwcFrame::<4, 2>::from_rgb_image(&image);
    assert_eq!(frame.pixel(3, 1), Some([10, 20, 30]));
    let back = frame.to_rgb_image();
    assert_eq!(back.dimensions(), (4, 2));
    assert_eq!(back.get_pixel(0, 0).0, [10, 20, 30]);
  }

  #[test]
  fn pixel_reads_row_major() {
    let mut data = vec![0u8; 4 * 2 * 3];
    // (x=1, y=1)
    let idx = (4 + 1) * 3;
    data[idx..idx + 3].copy_from_slice(&[7, 8, 9]);
    let frame = RgbNhwcFrame::<4, 2>::try_from(data).unwrap();
    assert_eq!(frame.pixel(1, 1), Some([7, 8, 9]));
    assert_eq!(frame.pixel(4, 0), None);
  }
}
