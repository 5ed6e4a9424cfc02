// 该文件是 Shouyu （手语） 项目的一部分。
// src/bin/recognize.rs - 摄像头实时手语识别
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{process::ExitCode, rc::Rc, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use url::Url;

use shouyu::{
  config::RecognizerOptions,
  host::StdoutHost,
  lifecycle::LifecycleController,
  matcher::RearmPolicy,
  task::{FrameScheduler, StopSignal},
};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

/// 手语识别参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 摄像头，如 gst://camera/dev/video0?fps=30 或 image:///tmp/a.png
  #[arg(long, value_name = "CAMERA", default_value = "gst://camera/dev/video0")]
  pub camera: Url,
  /// 分类模型包地址，缺省时按 --model-id 拼接下载地址
  #[arg(long, value_name = "MODEL")]
  pub model: Option<Url>,
  #[arg(long, value_name = "MODEL_ID")]
  pub model_id: Option<String>,
  /// 关键点模型，如 handpose:///models/hand_landmark.onnx
  #[arg(long, value_name = "LANDMARK")]
  pub landmark: Url,
  /// 叠加层输出
  #[arg(long, value_name = "OUTPUT", default_value = "display://")]
  pub output: Url,
  /// 目标手势标签
  #[arg(long, value_name = "TARGET")]
  pub target: String,
  #[arg(long, value_name = "CONFIDENCE")]
  pub confidence: Option<f32>,
  /// 匹配后经过若干毫秒允许再次匹配
  #[arg(long, value_name = "MILLIS")]
  pub rearm_ms: Option<u64>,
  /// 匹配成功时向标准输出写 "Pass!"
  #[arg(long)]
  pub host: bool,
  #[arg(long, default_value_t = 30)]
  pub fps: u32,
  #[arg(long, value_name = "FRAME_NUMBER", default_value_t = 0)]
  pub frame_number: usize,
}

fn run(args: Args) -> Result<ExitCode> {
  info!("摄像头: {}", args.camera);
  info!("关键点模型: {}", args.landmark);
  info!("输出: {}", args.output);

  let mut options = RecognizerOptions::new(args.target.clone());
  if let Some(id) = &args.model_id {
    options = options.with_model_id(id.clone());
  }
  if let Some(floor) = args.confidence {
    options = options.with_confidence_floor(floor);
  }
  if let Some(ms) = args.rearm_ms {
    options = options.with_rearm(RearmPolicy::After(Duration::from_millis(ms)));
  }

  let stop = StopSignal::new();
  stop.install_ctrlc()?;

  let scheduler = Rc::new(FrameScheduler::new(args.fps));
  let mut controller = LifecycleController::<WIDTH, HEIGHT>::from_urls(
    &args.camera,
    args.model.as_ref(),
    &args.landmark,
    &args.output,
    scheduler.clone(),
    options,
  )?
  .on_match(|| info!("✔ 手势正确"))
  .on_mismatch(|| info!("✘ 手势不匹配"));
  if args.host {
    controller = controller.with_host(Box::new(StdoutHost));
  }

  if let Err(e) = controller.mount() {
    error!("识别器无法启动: {}", e);
    return Ok(ExitCode::from(2));
  }

  let limit = (args.frame_number > 0).then_some(args.frame_number);
  let frames = scheduler.run_until(&stop, limit);
  if stop.is_raised() {
    warn!("中断信号接收，退出识别循环");
  }
  controller.stop();
  info!("共运行 {} 帧，退出", frames);
  if let Some(e) = controller.error() {
    error!("识别器运行中出错: {}", e);
    return Ok(ExitCode::from(2));
  }
  Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
  tracing_subscriber::fmt::init();

  match run(Args::parse()) {
    Ok(code) => code,
    Err(e) => {
      error!("{:#}", e);
      ExitCode::from(2)
    }
  }
}
