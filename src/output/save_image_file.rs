// 该文件是 Shouyu （手语） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::{marker::PhantomData, path::Path};

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNhwcFrame,
  model::Prediction,
  output::{Render, draw::Draw},
};

/// 把叠加后的画面写入图像文件，每一轮覆盖上一轮
///
/// `image:///tmp/out.png?mirror=false`
pub struct SaveImageFileOutput<const W: u32, const H: u32> {
  path: String,
  draw: Draw,
  _frame: PhantomData<RgbNhwcFrame<W, H>>,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl<const W: u32, const H: u32> FromUrlWithScheme for SaveImageFileOutput<W, H> {
  const SCHEME: &'static str = "image";
}

impl<const W: u32, const H: u32> FromUrl for SaveImageFileOutput<W, H> {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let mirror = uri
      .query_pairs()
      .find(|(k, _)| k == "mirror")
      .map(|(_, v)| v != "false" && v != "0")
      .unwrap_or(true);

    Ok(SaveImageFileOutput {
      path: uri.path().to_string(),
      draw: Draw::default().with_mirror(mirror),
      _frame: PhantomData,
    })
  }
}

impl<const W: u32, const H: u32> SaveImageFileOutput<W, H> {
  pub fn path(&self) -> &str {
    &self.path
  }

  fn save_image(&self, image: image::RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = Path::new(&self.path).parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(SaveImageFileError::IoError)?;
    }

    image
      .save(&self.path)
      .map_err(SaveImageFileError::ImageError)?;

    info!("保存图像到文件: {}", self.path);

    Ok(())
  }
}

impl<const W: u32, const H: u32> Render<RgbNhwcFrame<W, H>, Prediction>
  for SaveImageFileOutput<W, H>
{
  type Error = SaveImageFileError;

  fn render_result(
    &self,
    frame: &RgbNhwcFrame<W, H>,
    result: &Prediction,
  ) -> Result<(), Self::Error> {
    let image = self.draw.overlay(frame, result);
    self.save_image(image)
  }
}
