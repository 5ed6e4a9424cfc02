// 该文件是 Shouyu （手语） 项目的一部分。
// src/output/gstreamer_display.rs - GStreamer 窗口显示输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 显示输出
//!
//! 把镜像后的画面和手部关键点推送到本地窗口。
//!
//! ## URL Scheme
//!
//! `display://?container=800&window_w=1280&window_h=720`
//!
//! - `container`: 容器宽度，默认等于 `window_w`
//! - `window_w` / `window_h`: 窗口尺寸，默认 1280x720
//!
//! 实际窗口尺寸由 [`fit_canvas`] 计算，始终保持 4:3。

use std::sync::Mutex;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNhwcFrame,
  model::Prediction,
  output::{
    Render,
    draw::{Draw, fit_canvas},
  },
};

const DEFAULT_WINDOW_WIDTH: u32 = 1280;
const DEFAULT_WINDOW_HEIGHT: u32 = 720;
const DISPLAY_FPS: u64 = 30;

#[derive(Error, Debug)]
pub enum GStreamerDisplayError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Buffer creation error")]
  BufferCreationError,
}

pub struct GStreamerDisplayOutput<const W: u32, const H: u32> {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  draw: Draw,
  canvas: (u32, u32),
  frame_count: Mutex<u64>,
}

impl<const W: u32, const H: u32> FromUrlWithScheme for GStreamerDisplayOutput<W, H> {
  const SCHEME: &'static str = "display";
}

impl<const W: u32, const H: u32> FromUrl for GStreamerDisplayOutput<W, H> {
  type Error = GStreamerDisplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerDisplayError::SchemeMismatch);
    }

    let canvas = canvas_from_query(url);
    gst::init()?;

    let description = pipeline_description::<W, H>(canvas);
    info!("创建显示管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerDisplayError::PipelineError("无法创建管道".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .and_then(|e| e.downcast::<gst_app::AppSrc>().ok())
      .ok_or(GStreamerDisplayError::AppSrcNotFound)?;
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;
    info!("显示窗口 {}x{}（输入 {}x{}）", canvas.0, canvas.1, W, H);

    Ok(Self {
      pipeline,
      appsrc,
      draw: Draw::default(),
      canvas,
      frame_count: Mutex::new(0),
    })
  }
}

fn canvas_from_query(url: &Url) -> (u32, u32) {
  let param = |name: &str| {
    url
      .query_pairs()
      .find(|(k, _)| k == name)
      .and_then(|(_, v)| v.parse::<u32>().ok())
  };
  let window_w = param("window_w").unwrap_or(DEFAULT_WINDOW_WIDTH);
  let window_h = param("window_h").unwrap_or(DEFAULT_WINDOW_HEIGHT);
  let container = param("container").unwrap_or(window_w);
  fit_canvas(container, window_w, window_h)
}

fn pipeline_description<const W: u32, const H: u32>(canvas: (u32, u32)) -> String {
  format!(
    "appsrc name=src is-live=true caps=video/x-raw,format=RGB,width={},height={},framerate={}/1 \
     ! videoconvert ! videoscale ! video/x-raw,width={},height={} ! autovideosink sync=false",
    W, H, DISPLAY_FPS, canvas.0, canvas.1
  )
}

impl<const W: u32, const H: u32> GStreamerDisplayOutput<W, H> {
  pub fn canvas_size(&self) -> (u32, u32) {
    self.canvas
  }

  fn push_frame(&self, data: &[u8]) -> Result<(), GStreamerDisplayError> {
    let mut buffer =
      gst::Buffer::with_size(data.len()).map_err(|_| GStreamerDisplayError::BufferCreationError)?;

    let mut frame_count = self.frame_count.lock().unwrap_or_else(|e| e.into_inner());
    let timestamp = (*frame_count * 1_000_000_000) / DISPLAY_FPS;
    *frame_count += 1;

    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerDisplayError::BufferCreationError)?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(timestamp));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(1_000_000_000 / DISPLAY_FPS));
      let mut map = buffer_ref
        .map_writable()
        .map_err(|_| GStreamerDisplayError::PipelineError("无法映射缓冲区".to_string()))?;
      map.copy_from_slice(data);
    }

    self
      .appsrc
      .push_buffer(buffer)
      .map_err(|e| GStreamerDisplayError::PipelineError(format!("推送缓冲区失败: {:?}", e)))?;
    Ok(())
  }
}

impl<const W: u32, const H: u32> Drop for GStreamerDisplayOutput<W, H> {
  fn drop(&mut self) {
    let _ = self.appsrc.end_of_stream();
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止显示管道失败: {}", e);
    }
    let frames = self.frame_count.lock().unwrap_or_else(|e| e.into_inner());
    info!("显示输出关闭，共显示 {} 帧", *frames);
  }
}

impl<const W: u32, const H: u32> Render<RgbNhwcFrame<W, H>, Prediction>
  for GStreamerDisplayOutput<W, H>
{
  type Error = GStreamerDisplayError;

  fn render_result(
    &self,
    frame: &RgbNhwcFrame<W, H>,
    result: &Prediction,
  ) -> Result<(), Self::Error> {
    let image = self.draw.overlay(frame, result);
    self.push_frame(image.as_raw())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn canvas_follows_query() {
    let url = Url::parse("display://?container=500&window_w=1024&window_h=768").unwrap();
    assert_eq!(canvas_from_query(&url), (500, 375));
    let url = Url::parse("display://").unwrap();
    assert_eq!(canvas_from_query(&url), (640, 480));
  }

  #[test]
  fn description_scales_to_canvas() {
    let desc = pipeline_description::<640, 480>((320, 240));
    assert!(desc.contains("width=640,height=480,framerate=30/1"));
    assert!(desc.contains("video/x-raw,width=320,height=240 ! autovideosink"));
  }
}
