// 该文件是 Shouyu （手语） 项目的一部分。
// src/input/gstreamer_camera.rs - GStreamer 摄像头
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 摄像头模块
//!
//! 本模块基于 GStreamer 的 `appsink` 提供实时画面，支持：
//! - V4L2 摄像头（启动前用 `v4l` 探测设备，权限不足或设备不存在时启动失败）
//! - 测试视频源 `videotestsrc`
//! - 视频文件（离线调试用）
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## URL 格式
//!
//! - `gst://camera/dev/video0?width=640&height=480&fps=30&format=YUY2&rotate=0`
//! - `gst://test?pattern=ball`
//! - `gst://file/path/to/video.mp4`
//!
//! ## 基本用法
//!
//! ```no_run
//! use shouyu::{FromUrl, input::{CameraSource, GStreamerCameraBuilder}};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let url = Url::parse("gst://camera/dev/video0?fps=30")?;
//! let mut camera = GStreamerCameraBuilder::<640, 480>::from_url(&url)?.build();
//! if camera.start() {
//!     if let Some(frame) = camera.get_frame() {
//!         println!("画面: {}x{}", frame.width(), frame.height());
//!     }
//! }
//! camera.stop();
//! # Ok(())
//! # }
//! ```
//!
//! 画面每次只保留最新的一帧：`appsink` 最多缓存两帧并丢弃旧帧，
//! `get_frame` 以零超时取空队列。

use std::{
  collections::HashMap,
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNhwcFrame,
  input::{CameraSource, MediaTrack, TrackRegistry, TrackState, next_track_id},
};

/// GStreamer 摄像头错误类型
#[derive(Error, Debug)]
pub enum GStreamerCameraError {
  /// URI scheme 不匹配（期望 "gst://"）
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// 设备无法打开（权限不足或不存在）
  #[error("无法打开摄像头设备 {path}: {source}")]
  Device {
    path: String,
    source: std::io::Error,
  },
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

const GSTREAMER_CAMERA_SCHEME: &str = "gst";

// 等待管道进入 Playing 的时间
const START_TIMEOUT_SECS: u64 = 5;

enum PipelineItem {
  CameraSource {
    device: String,
    io_mode: Option<u32>,
    format: Option<String>,
    fps: u32,
  },
  TestSource {
    pattern: String,
  },
  FileSource(String),
  VideoFlip {
    method: u32,
  },
  AspectRatio {
    ratio: (u32, u32),
  },
  TargetFormat {
    width: u32,
    height: u32,
  },
}

impl PipelineItem {
  fn to_pipeline(&self) -> String {
    match self {
      PipelineItem::CameraSource {
        device,
        io_mode,
        format,
        fps,
      } => {
        let io_mode_str = io_mode
          .map(|mode| format!(" io-mode={}", mode))
          .unwrap_or_default();
        let format_str = format
          .as_ref()
          .map(|f| format!("format={},", f))
          .unwrap_or_default();
        format!(
          "v4l2src device={}{} ! video/x-raw,{}framerate={}/1",
          device, io_mode_str, format_str, fps
        )
      }
      PipelineItem::TestSource { pattern } => {
        format!("videotestsrc is-live=true pattern={}", pattern)
      }
      PipelineItem::FileSource(path) => format!("filesrc location={} ! decodebin", path),
      PipelineItem::VideoFlip { method } => format!("videoflip method={}", method),
      PipelineItem::AspectRatio { ratio } => {
        format!("aspectratiocrop aspect-ratio={}/{}", ratio.0, ratio.1)
      }
      PipelineItem::TargetFormat { width, height } => format!(
        "videoconvert ! videoscale ! video/x-raw,format=RGB,width={},height={}",
        width, height
      ),
    }
  }
}

/// GStreamer 摄像头构建器
pub struct GStreamerCameraBuilder<const W: u32, const H: u32> {
  items: Vec<PipelineItem>,
  device: Option<PathBuf>,
}

impl<const W: u32, const H: u32> FromUrlWithScheme for GStreamerCameraBuilder<W, H> {
  const SCHEME: &'static str = GSTREAMER_CAMERA_SCHEME;
}

impl<const W: u32, const H: u32> GStreamerCameraBuilder<W, H> {
  /// 直接指定摄像头设备
  pub fn camera(device: &str, fps: u32) -> Self {
    Self::from_items(
      vec![PipelineItem::CameraSource {
        device: device.to_string(),
        io_mode: None,
        format: None,
        fps,
      }],
      Some(PathBuf::from(device)),
      None,
    )
  }

  fn from_items(
    mut items: Vec<PipelineItem>,
    device: Option<PathBuf>,
    rotate: Option<&str>,
  ) -> Self {
    items.push(PipelineItem::AspectRatio { ratio: (W, H) });
    if let Some(flip) = Self::video_flip(rotate) {
      items.push(flip);
    }
    items.push(PipelineItem::TargetFormat {
      width: W,
      height: H,
    });
    Self { items, device }
  }

  fn video_flip(rotate: Option<&str>) -> Option<PipelineItem> {
    let method = match rotate? {
      "90" => 1,
      "180" => 2,
      "270" => 3,
      _ => return None,
    };
    Some(PipelineItem::VideoFlip { method })
  }

  pub fn description(&self) -> String {
    let basic = self
      .items
      .iter()
      .map(PipelineItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!(
      "{} ! appsink max-buffers=2 drop=true sync=false name=sink",
      basic
    )
  }

  /// 构建摄像头，不会立即打开设备
  pub fn build(self) -> GStreamerCamera<W, H> {
    GStreamerCamera {
      description: self.description(),
      device: self.device,
      registry: TrackRegistry::global(),
      stream: None,
      latest: None,
    }
  }
}

impl<const W: u32, const H: u32> FromUrl for GStreamerCameraBuilder<W, H> {
  type Error = GStreamerCameraError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != GSTREAMER_CAMERA_SCHEME {
      return Err(GStreamerCameraError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let rotate = query.get("rotate").map(String::as_str);

    let builder = match url.host_str() {
      Some("camera") => {
        let device = url.path().to_string();
        let fps = query
          .get("fps")
          .and_then(|v| v.parse::<u32>().ok())
          .unwrap_or(30);
        let item = PipelineItem::CameraSource {
          device: device.clone(),
          io_mode: query.get("io-mode").and_then(|v| v.parse::<u32>().ok()),
          format: query.get("format").cloned(),
          fps,
        };
        Self::from_items(vec![item], Some(PathBuf::from(device)), rotate)
      }
      Some("test") => {
        let pattern = query
          .get("pattern")
          .cloned()
          .unwrap_or_else(|| "smpte".to_string());
        Self::from_items(vec![PipelineItem::TestSource { pattern }], None, rotate)
      }
      Some("file") => Self::from_items(
        vec![PipelineItem::FileSource(url.path().to_string())],
        None,
        rotate,
      ),
      _ => return Err(GStreamerCameraError::SchemeMismatch),
    };

    Ok(builder)
  }
}

/// 一条运行中的 GStreamer 管道即一个媒体轨道
struct PipelineTrack {
  id: u64,
  label: String,
  pipeline: gst::Pipeline,
  live: AtomicBool,
}

impl MediaTrack for PipelineTrack {
  fn id(&self) -> u64 {
    self.id
  }

  fn label(&self) -> &str {
    &self.label
  }

  fn ready_state(&self) -> TrackState {
    if self.live.load(Ordering::Acquire) {
      TrackState::Live
    } else {
      TrackState::Ended
    }
  }

  fn stop(&self) {
    if self.live.swap(false, Ordering::AcqRel) {
      if let Err(e) = self.pipeline.set_state(gst::State::Null) {
        warn!("Failed to stop GStreamer pipeline: {}", e);
      }
      info!("摄像头轨道已停止: {}", self.label);
    }
  }
}

impl PipelineTrack {
  /// 取出总线上的错误与流结束消息；出现任意一个即视为轨道结束（设备拔出等）
  fn poll_bus(&self) {
    let Some(bus) = self.pipeline.bus() else {
      return;
    };
    while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Eos]) {
      match msg.view() {
        gst::MessageView::Error(err) => {
          error!(
            "摄像头管道错误: {} ({:?})",
            err.error(),
            err.debug()
          );
          self.stop();
        }
        gst::MessageView::Eos(..) => {
          warn!("摄像头管道已结束: {}", self.label);
          self.stop();
        }
        _ => {}
      }
    }
  }
}

impl Drop for PipelineTrack {
  fn drop(&mut self) {
    self.stop();
  }
}

struct ActiveStream {
  track: Arc<PipelineTrack>,
  appsink: gst_app::AppSink,
}

/// GStreamer 摄像头
pub struct GStreamerCamera<const W: u32, const H: u32> {
  description: String,
  device: Option<PathBuf>,
  registry: Arc<TrackRegistry>,
  stream: Option<ActiveStream>,
  latest: Option<RgbNhwcFrame<W, H>>,
}

impl<const W: u32, const H: u32> GStreamerCamera<W, H> {
  pub fn with_registry(mut self, registry: Arc<TrackRegistry>) -> Self {
    self.registry = registry;
    self
  }

  pub fn description(&self) -> &str {
    &self.description
  }

  fn probe_device(&self) -> Result<(), GStreamerCameraError> {
    let Some(path) = &self.device else {
      return Ok(());
    };
    let device_err = |source| GStreamerCameraError::Device {
      path: path.display().to_string(),
      source,
    };
    let device = v4l::Device::with_path(path).map_err(device_err)?;
    let caps = device.query_caps().map_err(device_err)?;
    info!("摄像头设备: {} ({})", caps.card, caps.driver);
    Ok(())
  }

  fn launch(&self) -> Result<ActiveStream, GStreamerCameraError> {
    self.probe_device()?;
    gst::init()?;

    info!("GStreamer pipeline description: {}", self.description);

    let pipeline = gst::parse::launch(&self.description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerCameraError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerCameraError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerCameraError::AppSinkConversionFailed)?;

    let track = Arc::new(PipelineTrack {
      id: next_track_id(),
      label: self
        .device
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "gstreamer".to_string()),
      pipeline,
      live: AtomicBool::new(true),
    });

    // 失败时 track 被丢弃，Drop 会把管道置为 Null
    track.pipeline.set_state(gst::State::Playing)?;
    let (result, _, _) = track
      .pipeline
      .state(gst::ClockTime::from_seconds(START_TIMEOUT_SECS));
    result?;

    Ok(ActiveStream { track, appsink })
  }
}

impl<const W: u32, const H: u32> CameraSource<W, H> for GStreamerCamera<W, H> {
  fn start(&mut self) -> bool {
    if self.is_active() {
      return true;
    }

    match self.launch() {
      Ok(stream) => {
        self.registry.register(&stream.track);
        info!("摄像头已启动: {}", stream.track.label());
        self.stream = Some(stream);
        true
      }
      Err(e) => {
        error!("摄像头启动失败: {}", e);
        false
      }
    }
  }

  fn stop(&mut self) {
    if let Some(stream) = self.stream.take() {
      stream.track.stop();
    }
    self.latest = None;
  }

  fn get_frame(&mut self) -> Option<RgbNhwcFrame<W, H>> {
    if let Some(stream) = &self.stream {
      stream.track.poll_bus();
    }
    if !self.is_active() {
      // 轨道可能已被外部清扫，或总线报告了错误
      self.stream = None;
      self.latest = None;
      return None;
    }

    if let Some(stream) = &self.stream {
      while let Some(sample) = stream.appsink.try_pull_sample(gst::ClockTime::ZERO) {
        match convert_sample_to_nhwc(sample) {
          Ok(frame) => self.latest = Some(frame),
          Err(e) => warn!("Failed to fetch sample: {}", e),
        }
      }
    }
    self.latest.clone()
  }

  fn is_active(&self) -> bool {
    self
      .stream
      .as_ref()
      .is_some_and(|s| s.track.ready_state() == TrackState::Live)
  }
}

impl<const W: u32, const H: u32> Drop for GStreamerCamera<W, H> {
  fn drop(&mut self) {
    self.stop();
  }
}

fn convert_sample_to_nhwc<const W: u32, const H: u32>(
  sample: gst::Sample,
) -> Result<RgbNhwcFrame<W, H>, GStreamerCameraError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerCameraError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerCameraError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerCameraError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  if width != W as usize || height != H as usize {
    return Err(GStreamerCameraError::BufferSizeMismatch {
      expected: W as usize * H as usize * 3,
      actual: width * height * 3,
    });
  }
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerCameraError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let row_bytes = width * 3;
  let expected_size = stride * (height - 1) + row_bytes;
  if data.len() < expected_size {
    return Err(GStreamerCameraError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let mut frame = RgbNhwcFrame::<W, H>::default();
  let frame_slice = frame.as_mut();

  match video_info.format() {
    gst_video::VideoFormat::Rgb => {
      for h in 0..height {
        let src = &data[h * stride..h * stride + row_bytes];
        frame_slice[h * row_bytes..(h + 1) * row_bytes].copy_from_slice(src);
      }
    }
    gst_video::VideoFormat::Bgr => {
      for h in 0..height {
        for w in 0..width {
          for c in 0..3 {
            let src_idx = h * stride + w * 3 + (2 - c);
            let dst_idx = (h * width + w) * 3 + c;
            frame_slice[dst_idx] = data[src_idx];
          }
        }
      }
    }
    _ => return Err(GStreamerCameraError::UnsupportedFormat),
  }

  Ok(frame)
}
