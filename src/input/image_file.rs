// 该文件是 Shouyu （手语） 项目的一部分。
// src/input/image_file.rs - 静态图像摄像头
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::sync::Arc;

use image::ImageReader;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNhwcFrame,
  input::{CameraSource, MediaTrack, SimpleTrack, TrackRegistry, TrackState},
};

#[derive(Error, Debug)]
pub enum ImageFileCameraError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 把一张静态图片当作摄像头：启动后每次 `get_frame` 都返回同一帧
pub struct ImageFileCamera<const W: u32, const H: u32> {
  path: String,
  frame: RgbNhwcFrame<W, H>,
  registry: Arc<TrackRegistry>,
  track: Option<Arc<SimpleTrack>>,
}

impl<const W: u32, const H: u32> FromUrlWithScheme for ImageFileCamera<W, H> {
  const SCHEME: &'static str = "image";
}

impl<const W: u32, const H: u32> FromUrl for ImageFileCamera<W, H> {
  type Error = ImageFileCameraError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileCameraError::SchemaMismatch);
    }

    let path = url.path();
    let image = ImageReader::open(path)?.decode()?.into_rgb8();
    info!("读取图像 {} ({}x{})", path, image.width(), image.height());

    Ok(Self {
      path: path.to_string(),
      frame: RgbNhwcFrame::from_rgb_image(&image),
      registry: TrackRegistry::global(),
      track: None,
    })
  }
}

impl<const W: u32, const H: u32> ImageFileCamera<W, H> {
  pub fn with_registry(mut self, registry: Arc<TrackRegistry>) -> Self {
    self.registry = registry;
    self
  }
}

impl<const W: u32, const H: u32> CameraSource<W, H> for ImageFileCamera<W, H> {
  fn start(&mut self) -> bool {
    if self.is_active() {
      return true;
    }
    let track = Arc::new(SimpleTrack::new(self.path.clone()));
    self.registry.register(&track);
    self.track = Some(track);
    true
  }

  fn stop(&mut self) {
    if let Some(track) = self.track.take() {
      track.stop();
    }
  }

  fn get_frame(&mut self) -> Option<RgbNhwcFrame<W, H>> {
    self.is_active().then(|| self.frame.clone())
  }

  fn is_active(&self) -> bool {
    self
      .track
      .as_ref()
      .is_some_and(|t| t.ready_state() == TrackState::Live)
  }
}
