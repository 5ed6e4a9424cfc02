// 该文件是 Shouyu （手语） 项目的一部分。
// src/input.rs - 摄像头输入
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

use std::sync::Arc;

use thiserror::Error;

use crate::{FromUrl, frame::RgbNhwcFrame};

pub trait AsNhwcFrame<const W: u32, const H: u32> {
  fn as_nhwc(&self) -> &[u8];
}

/// 摄像头
///
/// - `start` 获取设备并开始出帧；已经在运行时直接返回 `true`，不重新获取。
///   权限不足或设备不存在时返回 `false`，内部不做自动重试。
/// - `stop` 释放所有已获取的轨道并清空最近帧，可重复调用。
/// - `get_frame` 返回最近的一帧；未启动或尚无画面时返回 `None`。
pub trait CameraSource<const W: u32, const H: u32> {
  fn start(&mut self) -> bool;
  fn stop(&mut self);
  fn get_frame(&mut self) -> Option<RgbNhwcFrame<W, H>>;
  fn is_active(&self) -> bool;
}

impl<const W: u32, const H: u32, C: CameraSource<W, H> + ?Sized> CameraSource<W, H> for Box<C> {
  fn start(&mut self) -> bool {
    (**self).start()
  }

  fn stop(&mut self) {
    (**self).stop()
  }

  fn get_frame(&mut self) -> Option<RgbNhwcFrame<W, H>> {
    (**self).get_frame()
  }

  fn is_active(&self) -> bool {
    (**self).is_active()
  }
}

mod track;
pub use self::track::{MediaTrack, SimpleTrack, TrackRegistry, TrackState, next_track_id};

#[cfg(feature = "read_image_file")]
mod image_file;
#[cfg(feature = "read_image_file")]
pub use self::image_file::{ImageFileCamera, ImageFileCameraError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_camera;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_camera::{GStreamerCamera, GStreamerCameraBuilder, GStreamerCameraError};

#[derive(Error, Debug)]
pub enum CameraError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件摄像头错误: {0}")]
  ImageFile(#[from] ImageFileCameraError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 摄像头错误: {0}")]
  GStreamer(#[from] GStreamerCameraError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum CameraWrapper<const W: u32, const H: u32> {
  #[cfg(feature = "gstreamer_input")]
  GStreamer(GStreamerCamera<W, H>),
  #[cfg(feature = "read_image_file")]
  ImageFile(ImageFileCamera<W, H>),
}

impl<const W: u32, const H: u32> FromUrl for CameraWrapper<W, H> {
  type Error = CameraError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "gstreamer_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == GStreamerCameraBuilder::<W, H>::SCHEME {
        let camera = GStreamerCameraBuilder::from_url(url)?.build();
        return Ok(CameraWrapper::GStreamer(camera));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileCamera::<W, H>::SCHEME {
        let camera = ImageFileCamera::from_url(url)?;
        return Ok(CameraWrapper::ImageFile(camera));
      }
    }
    Err(CameraError::SchemeMismatch)
  }
}

impl<const W: u32, const H: u32> CameraWrapper<W, H> {
  /// 指定轨道登记表，默认使用进程级的 [`TrackRegistry::global`]
  pub fn with_registry(self, registry: Arc<TrackRegistry>) -> Self {
    match self {
      #[cfg(feature = "gstreamer_input")]
      CameraWrapper::GStreamer(camera) => CameraWrapper::GStreamer(camera.with_registry(registry)),
      #[cfg(feature = "read_image_file")]
      CameraWrapper::ImageFile(camera) => CameraWrapper::ImageFile(camera.with_registry(registry)),
    }
  }
}

impl<const W: u32, const H: u32> CameraSource<W, H> for CameraWrapper<W, H> {
  fn start(&mut self) -> bool {
    match self {
      #[cfg(feature = "gstreamer_input")]
      CameraWrapper::GStreamer(camera) => camera.start(),
      #[cfg(feature = "read_image_file")]
      CameraWrapper::ImageFile(camera) => camera.start(),
    }
  }

  fn stop(&mut self) {
    match self {
      #[cfg(feature = "gstreamer_input")]
      CameraWrapper::GStreamer(camera) => camera.stop(),
      #[cfg(feature = "read_image_file")]
      CameraWrapper::ImageFile(camera) => camera.stop(),
    }
  }

  fn get_frame(&mut self) -> Option<RgbNhwcFrame<W, H>> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      CameraWrapper::GStreamer(camera) => camera.get_frame(),
      #[cfg(feature = "read_image_file")]
      CameraWrapper::ImageFile(camera) => camera.get_frame(),
    }
  }

  fn is_active(&self) -> bool {
    match self {
      #[cfg(feature = "gstreamer_input")]
      CameraWrapper::GStreamer(camera) => camera.is_active(),
      #[cfg(feature = "read_image_file")]
      CameraWrapper::ImageFile(camera) => camera.is_active(),
    }
  }
}
