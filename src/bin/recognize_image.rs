// 该文件是 Shouyu （手语） 项目的一部分。
// src/bin/recognize_image.rs - 单张图片手语识别
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{cell::RefCell, rc::Rc, sync::Arc};

use anyhow::{Result, bail};
use clap::Parser;
use tracing::info;
use url::Url;

use shouyu::{
  FromUrl,
  config::default_model_url,
  input::{CameraSource, ImageFileCamera},
  landmark::LandmarkExtractor,
  model::{HandposeExtractor, SignClassifier},
  output::OutputWrapper,
  task::{RecognitionLoop, SharedCamera, TickOutcome},
};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

/// 单张图片识别参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图片，如 image:///tmp/hand.jpg
  #[arg(long, value_name = "IMAGE")]
  pub input: Url,
  #[arg(long, value_name = "MODEL")]
  pub model: Option<Url>,
  #[arg(long, value_name = "MODEL_ID")]
  pub model_id: Option<String>,
  #[arg(long, value_name = "LANDMARK")]
  pub landmark: Url,
  /// 叠加层输出，如 image:///tmp/overlay.png
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let model = match args.model {
    Some(url) => url,
    None => default_model_url(args.model_id.as_deref())?,
  };
  info!("模型: {}", model);
  info!("输入: {}", args.input);
  info!("输出: {}", args.output);

  let mut camera = ImageFileCamera::<WIDTH, HEIGHT>::from_url(&args.input)?;
  let mut extractor = HandposeExtractor::<WIDTH, HEIGHT>::from_url(&args.landmark)?;
  let classifier = SignClassifier::new(model);
  let output = OutputWrapper::<WIDTH, HEIGHT>::from_url(&args.output)?;

  let now = std::time::Instant::now();
  classifier.load()?;
  extractor.load_model()?;
  info!("模型加载完成，耗时: {:.2?}", now.elapsed());

  if !camera.start() {
    bail!("无法打开输入图片");
  }
  let camera: SharedCamera<WIDTH, HEIGHT> = Rc::new(RefCell::new(Box::new(camera)));
  let mut recognition = RecognitionLoop::new(
    camera.clone(),
    Box::new(extractor),
    Arc::new(classifier),
    Box::new(output),
  );

  let now = std::time::Instant::now();
  let outcome = recognition.tick();
  camera.borrow_mut().stop();
  if outcome != TickOutcome::Predicted {
    bail!("没有输入帧");
  }

  let state = recognition.prediction_state();
  if let Some(prediction) = state.borrow().as_ref() {
    info!(
      "识别结果: {} (置信度 {:.3})，耗时: {:.2?}",
      prediction.sign_label,
      prediction.confidence,
      now.elapsed()
    );
    println!("{}", prediction.sign_label);
  }
  Ok(())
}
