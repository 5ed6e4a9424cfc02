// 该文件是 Shouyu （手语） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use crate::frame::RgbNhwcFrame;
use crate::model::Prediction;
use crate::{FromUrl, FromUrlWithScheme};
use thiserror::Error;
use url::Url;

pub trait Render<Frame, Output> {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

pub mod draw;

mod canvas;
pub use self::canvas::CanvasOutput;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_display;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_display::{GStreamerDisplayError, GStreamerDisplayOutput};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 显示输出错误: {0}")]
  GStreamerDisplayError(#[from] GStreamerDisplayError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper<const W: u32, const H: u32> {
  Canvas(CanvasOutput),
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput<W, H>),
  #[cfg(feature = "gstreamer_output")]
  GStreamerDisplayOutput(GStreamerDisplayOutput<W, H>),
}

impl<const W: u32, const H: u32> FromUrl for OutputWrapper<W, H> {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      CanvasOutput::SCHEME => Ok(OutputWrapper::Canvas(CanvasOutput::new())),
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::<W, H>::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "gstreamer_output")]
      GStreamerDisplayOutput::<W, H>::SCHEME => {
        let output = GStreamerDisplayOutput::from_url(url)?;
        Ok(OutputWrapper::GStreamerDisplayOutput(output))
      }
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl<const W: u32, const H: u32> Render<RgbNhwcFrame<W, H>, Prediction> for OutputWrapper<W, H> {
  type Error = OutputError;

  fn render_result(
    &self,
    frame: &RgbNhwcFrame<W, H>,
    result: &Prediction,
  ) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Canvas(output) => {
        Render::<RgbNhwcFrame<W, H>, Prediction>::render_result(output, frame, result)
          .map_err(|never| match never {})
      }
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerDisplayOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn canvas_scheme_is_always_available() {
    let url = Url::parse("canvas://").unwrap();
    let output = OutputWrapper::<32, 24>::from_url(&url).unwrap();
    let frame = RgbNhwcFrame::<32, 24>::default();
    output
      .render_result(&frame, &Prediction::none("_null"))
      .unwrap();
    match output {
      OutputWrapper::Canvas(canvas) => assert_eq!(canvas.frames_drawn(), 1),
      #[allow(unreachable_patterns)]
      _ => panic!("expected canvas output"),
    }
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("rtsp://camera.local/stream").unwrap();
    assert!(matches!(
      OutputWrapper::<32, 24>::from_url(&url),
      Err(OutputError::SchemeMismatch(s)) if s == "rtsp"
    ));
  }
}
