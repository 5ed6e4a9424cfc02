// 该文件是 Shouyu （手语） 项目的一部分。
// src/lifecycle.rs - 识别器生命周期
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

//! # 生命周期
//!
//! ```text
//! Idle ──mount──> Loading ──> Active ──stop──> Stopped
//!                    │           │
//!                    └───────────┴──> Error
//! ```
//!
//! `mount` 在后台线程加载分类器和关键点模型，同时在当前线程打开摄像头；
//! 三者都成功才进入 `Active` 并启动识别循环。
//! `stop` 依次取消循环句柄、关闭摄像头、清扫登记表中剩余的轨道。
//! 运行中摄像头丢失（设备拔出、轨道被清扫）时循环自行停止，控制器转入 `Error`。
//! `Stopped` 与 `Error` 都是终态，重新挂载需要新的控制器。

use std::{
  cell::{Cell, RefCell},
  rc::Rc,
  sync::Arc,
  thread,
  time::Instant,
};

use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl,
  config::{NULL_LABEL, RecognizerOptions},
  host::{HostChannel, PASS_MESSAGE},
  input::{CameraError, CameraSource, CameraWrapper, TrackRegistry},
  landmark::ExtractorError,
  matcher::{MatchEvaluator, MatchEvent},
  model::{HandposeExtractor, Prediction, SignClassifier},
  output::{OutputError, OutputWrapper},
  task::{
    BoxedExtractor, BoxedRender, CameraLostHandler, LoopHandle, PredictionListener, RecognitionLoop, Scheduler,
    SharedCamera,
  },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Idle,
  Loading,
  Active,
  Stopped,
  Error,
}

/// 导致流水线进入 `Error` 的原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
  #[error("摄像头不可用")]
  CameraUnavailable,
  #[error("分类模型加载失败: {0}")]
  ModelLoad(String),
  #[error("关键点模型加载失败: {0}")]
  ExtractorLoad(String),
}

#[derive(Error, Debug)]
pub enum LifecycleError {
  #[error("当前状态 {0:?} 不能挂载")]
  InvalidState(LifecycleState),
  #[error(transparent)]
  Pipeline(#[from] PipelineError),
  #[error("摄像头错误: {0}")]
  Camera(#[from] CameraError),
  #[error("关键点提取器错误: {0}")]
  Extractor(#[from] ExtractorError),
  #[error("输出错误: {0}")]
  Output(#[from] OutputError),
}

pub type Callback = Box<dyn FnMut()>;

pub struct LifecycleController<const W: u32, const H: u32> {
  state: Rc<Cell<LifecycleState>>,
  error: Rc<RefCell<Option<PipelineError>>>,
  camera: SharedCamera<W, H>,
  extractor: Option<BoxedExtractor<W, H>>,
  classifier: Arc<SignClassifier>,
  output: Option<BoxedRender<W, H>>,
  scheduler: Rc<dyn Scheduler>,
  registry: Arc<TrackRegistry>,
  options: RecognizerOptions,
  on_match: Option<Callback>,
  on_mismatch: Option<Callback>,
  host: Option<Box<dyn HostChannel>>,
  evaluator: Rc<RefCell<MatchEvaluator>>,
  prediction: Rc<RefCell<Option<Prediction>>>,
  handle: Option<LoopHandle>,
}

impl<const W: u32, const H: u32> LifecycleController<W, H> {
  pub fn new(
    camera: Box<dyn CameraSource<W, H>>,
    extractor: BoxedExtractor<W, H>,
    classifier: Arc<SignClassifier>,
    output: BoxedRender<W, H>,
    scheduler: Rc<dyn Scheduler>,
    registry: Arc<TrackRegistry>,
    options: RecognizerOptions,
  ) -> Self {
    let evaluator =
      MatchEvaluator::new(options.target_label.clone(), NULL_LABEL).with_rearm(options.rearm);
    Self {
      state: Rc::new(Cell::new(LifecycleState::Idle)),
      error: Rc::new(RefCell::new(None)),
      camera: Rc::new(RefCell::new(camera)),
      extractor: Some(extractor),
      classifier,
      output: Some(output),
      scheduler,
      registry,
      options,
      on_match: None,
      on_mismatch: None,
      host: None,
      evaluator: Rc::new(RefCell::new(evaluator)),
      prediction: Rc::new(RefCell::new(None)),
      handle: None,
    }
  }

  /// 按 URL 组装默认组件，摄像头轨道登记到进程级登记表
  ///
  /// `model` 为空时按 `options.model_id` 拼出下载地址。
  pub fn from_urls(
    camera: &Url,
    model: Option<&Url>,
    landmark: &Url,
    output: &Url,
    scheduler: Rc<dyn Scheduler>,
    options: RecognizerOptions,
  ) -> Result<Self, LifecycleError> {
    let registry = TrackRegistry::global();
    let camera = CameraWrapper::<W, H>::from_url(camera)?.with_registry(registry.clone());
    let extractor = HandposeExtractor::<W, H>::from_url(landmark)?;
    let model = match model {
      Some(url) => url.clone(),
      None => options
        .model_url()
        .map_err(|e| PipelineError::ModelLoad(e.to_string()))?,
    };
    let classifier =
      SignClassifier::new(model).with_confidence_floor(options.confidence_floor);
    let output = OutputWrapper::<W, H>::from_url(output)?;

    Ok(Self::new(
      Box::new(camera),
      Box::new(extractor),
      Arc::new(classifier),
      Box::new(output),
      scheduler,
      registry,
      options,
    ))
  }

  pub fn on_match(mut self, callback: impl FnMut() + 'static) -> Self {
    self.on_match = Some(Box::new(callback));
    self
  }

  pub fn on_mismatch(mut self, callback: impl FnMut() + 'static) -> Self {
    self.on_mismatch = Some(Box::new(callback));
    self
  }

  pub fn with_host(mut self, host: Box<dyn HostChannel>) -> Self {
    self.host = Some(host);
    self
  }

  pub fn state(&self) -> LifecycleState {
    self.state.get()
  }

  pub fn error(&self) -> Option<PipelineError> {
    self.error.borrow().clone()
  }

  pub fn current_prediction(&self) -> Option<Prediction> {
    self.prediction.borrow().clone()
  }

  pub fn target_label(&self) -> String {
    self.evaluator.borrow().target_label().to_string()
  }

  /// 换下一个练习目标，匹配状态随之重置
  pub fn set_target_label(&self, label: impl Into<String>) {
    self.evaluator.borrow_mut().set_target(label);
  }

  pub fn mount(&mut self) -> Result<(), LifecycleError> {
    if self.state.get() != LifecycleState::Idle {
      return Err(LifecycleError::InvalidState(self.state.get()));
    }
    self.state.set(LifecycleState::Loading);
    info!("识别器开始加载，目标: {}", self.options.target_label);
    let now = Instant::now();

    let (Some(mut extractor), Some(output)) = (self.extractor.take(), self.output.take()) else {
      return Err(self.fail(PipelineError::ExtractorLoad("组件已被取走".to_string())).into());
    };

    let classifier = self.classifier.clone();
    let camera = self.camera.clone();
    let (camera_ok, model_result, extractor_result) = thread::scope(|s| {
      let model_task = s.spawn(|| classifier.load().map_err(|e| e.to_string()));
      let extractor_task = s.spawn(|| {
        if extractor.is_loaded() {
          Ok(())
        } else {
          extractor.load_model().map_err(|e| e.to_string())
        }
      });

      let camera_ok = camera.borrow_mut().start();
      let model_result = model_task
        .join()
        .unwrap_or_else(|_| Err("加载线程异常退出".to_string()));
      let extractor_result = extractor_task
        .join()
        .unwrap_or_else(|_| Err("加载线程异常退出".to_string()));
      (camera_ok, model_result, extractor_result)
    });

    let failure = if !camera_ok {
      Some(PipelineError::CameraUnavailable)
    } else if let Err(e) = model_result {
      Some(PipelineError::ModelLoad(e))
    } else if let Err(e) = extractor_result {
      Some(PipelineError::ExtractorLoad(e))
    } else {
      None
    };
    if let Some(err) = failure {
      return Err(self.fail(err).into());
    }

    let null_label = self
      .classifier
      .config()
      .map(|c| c.null_label.clone())
      .unwrap_or_else(|| NULL_LABEL.to_string());
    {
      let mut evaluator = self.evaluator.borrow_mut();
      let target = evaluator.target_label().to_string();
      *evaluator = MatchEvaluator::new(target, null_label.clone()).with_rearm(self.options.rearm);
    }

    let listener = self.match_listener(null_label);
    let recognition =
      RecognitionLoop::new(self.camera.clone(), extractor, self.classifier.clone(), output)
        .with_listener(listener)
        .on_camera_lost(self.camera_lost_handler());
    self.prediction = recognition.prediction_state();
    self.handle = Some(recognition.start(self.scheduler.clone()));
    self.state.set(LifecycleState::Active);
    info!("识别器就绪，加载耗时: {:.2?}", now.elapsed());
    Ok(())
  }

  fn match_listener(&mut self, null_label: String) -> PredictionListener {
    let evaluator = self.evaluator.clone();
    let floor = self.options.confidence_floor;
    let mut on_match = self.on_match.take();
    let mut on_mismatch = self.on_mismatch.take();
    let host = self.host.take();

    Box::new(move |prediction: &Prediction| {
      let label = if floor.is_some_and(|f| prediction.confidence < f) {
        null_label.as_str()
      } else {
        prediction.sign_label.as_str()
      };
      let event = {
        let mut evaluator = evaluator.borrow_mut();
        let target = evaluator.target_label().to_string();
        evaluator.observe(label, &target)
      };
      match event {
        Some(MatchEvent::Matched { label }) => {
          info!("识别成功: {}", label);
          if let Some(callback) = on_match.as_mut() {
            callback();
          }
          if let Some(host) = host.as_ref()
            && let Err(e) = host.post_message(PASS_MESSAGE)
          {
            warn!("通知宿主失败: {}", e);
          }
        }
        Some(MatchEvent::Mismatched { label, expected }) => {
          info!("识别到 {}，期望 {}", label, expected);
          if let Some(callback) = on_mismatch.as_mut() {
            callback();
          }
        }
        None => {}
      }
    })
  }

  /// 循环已经停止调度，这里只需释放摄像头并记录错误
  fn camera_lost_handler(&self) -> CameraLostHandler {
    let state = self.state.clone();
    let error = self.error.clone();
    let camera = self.camera.clone();
    let registry = self.registry.clone();
    Box::new(move || {
      if state.get() != LifecycleState::Active {
        return;
      }
      error!("识别器进入错误状态: {}", PipelineError::CameraUnavailable);
      state.set(LifecycleState::Error);
      *error.borrow_mut() = Some(PipelineError::CameraUnavailable);
      release_tracks(&camera, &registry);
    })
  }

  fn fail(&mut self, err: PipelineError) -> PipelineError {
    error!("识别器进入错误状态: {}", err);
    self.state.set(LifecycleState::Error);
    *self.error.borrow_mut() = Some(err.clone());
    self.release();
    err
  }

  /// 取消循环，关闭摄像头，清扫剩余轨道
  fn release(&mut self) {
    if let Some(handle) = self.handle.take() {
      handle.cancel();
    }
    release_tracks(&self.camera, &self.registry);
  }

  /// 可以重复调用
  pub fn stop(&mut self) {
    match self.state.get() {
      LifecycleState::Stopped => {}
      LifecycleState::Error => self.release(),
      _ => {
        self.release();
        self.state.set(LifecycleState::Stopped);
        info!("识别器已停止");
      }
    }
  }
}

fn release_tracks<const W: u32, const H: u32>(camera: &SharedCamera<W, H>, registry: &TrackRegistry) {
  camera.borrow_mut().stop();
  let swept = registry.sweep();
  if swept > 0 {
    warn!("清扫时停止了 {} 个遗留轨道", swept);
  }
}

impl<const W: u32, const H: u32> Drop for LifecycleController<W, H> {
  fn drop(&mut self) {
    self.stop();
  }
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;

  use super::*;
  use crate::{
    feature::FeatureVector,
    frame::RgbNhwcFrame,
    input::{MediaTrack, SimpleTrack, TrackState},
    landmark::{LandmarkExtractor, LandmarkSet},
    model::{ClassifierError, Model, ModelConfig},
    output::CanvasOutput,
    task::FrameScheduler,
  };

  struct Camera {
    grant: bool,
    registry: Arc<TrackRegistry>,
    track: Option<Arc<SimpleTrack>>,
  }

  impl CameraSource<4, 4> for Camera {
    fn start(&mut self) -> bool {
      if !self.grant {
        return false;
      }
      let track = Arc::new(SimpleTrack::new("fake"));
      self.registry.register(&track);
      self.track = Some(track);
      true
    }
    fn stop(&mut self) {
      if let Some(t) = self.track.take() {
        t.stop();
      }
    }
    fn get_frame(&mut self) -> Option<RgbNhwcFrame<4, 4>> {
      self.is_active().then(RgbNhwcFrame::default)
    }
    fn is_active(&self) -> bool {
      self
        .track
        .as_ref()
        .is_some_and(|t| t.ready_state() == TrackState::Live)
    }
  }

  struct Extractor(bool);

  impl LandmarkExtractor<4, 4> for Extractor {
    fn load_model(&mut self) -> Result<(), ExtractorError> {
      self.0 = true;
      Ok(())
    }
    fn is_loaded(&self) -> bool {
      self.0
    }
    fn detect(&self, _frame: &RgbNhwcFrame<4, 4>) -> Result<LandmarkSet, ExtractorError> {
      Ok(LandmarkSet::default())
    }
  }

  struct Fixed(Vec<f32>);

  impl Model for Fixed {
    type Input = FeatureVector;
    type Output = Vec<f32>;
    type Error = ClassifierError;
    fn infer(&self, _input: &FeatureVector) -> Result<Vec<f32>, ClassifierError> {
      Ok(self.0.clone())
    }
  }

  fn controller(
    grant: bool,
    registry: Arc<TrackRegistry>,
    scheduler: Rc<FrameScheduler>,
  ) -> LifecycleController<4, 4> {
    let config = ModelConfig {
      input_shape: vec![126],
      labels: vec!["A".into(), "B".into(), "_null".into()],
      ..ModelConfig::default()
    };
    let classifier =
      SignClassifier::from_parts(config, Box::new(Fixed(vec![5.0, 0.0, 0.0]))).unwrap();
    LifecycleController::new(
      Box::new(Camera {
        grant,
        registry: registry.clone(),
        track: None,
      }),
      Box::new(Extractor(false)),
      Arc::new(classifier),
      Box::new(OutputWrapper::<4, 4>::Canvas(CanvasOutput::new())),
      scheduler,
      registry,
      RecognizerOptions::new("A"),
    )
  }

  #[test]
  fn mount_then_stop() {
    let registry = Arc::new(TrackRegistry::new());
    let scheduler = Rc::new(FrameScheduler::new(60));
    let matched = Rc::new(Cell::new(0));
    let m = matched.clone();
    let mut c = controller(true, registry.clone(), scheduler.clone())
      .on_match(move || m.set(m.get() + 1));

    c.mount().unwrap();
    assert_eq!(c.state(), LifecycleState::Active);
    assert!(matches!(c.mount(), Err(LifecycleError::InvalidState(LifecycleState::Active))));

    for _ in 0..5 {
      scheduler.run_frame();
    }
    assert_eq!(matched.get(), 1);
    assert_eq!(c.current_prediction().unwrap().sign_label, "A");

    c.stop();
    c.stop();
    assert_eq!(c.state(), LifecycleState::Stopped);
    assert_eq!(registry.live_count(), 0);
    assert_eq!(scheduler.run_frame(), 0);
  }

  #[test]
  fn camera_denied_is_fatal() {
    let registry = Arc::new(TrackRegistry::new());
    let scheduler = Rc::new(FrameScheduler::new(60));
    let mut c = controller(false, registry, scheduler.clone());

    assert!(matches!(
      c.mount(),
      Err(LifecycleError::Pipeline(PipelineError::CameraUnavailable))
    ));
    assert_eq!(c.state(), LifecycleState::Error);
    assert_eq!(c.error(), Some(PipelineError::CameraUnavailable));
    assert_eq!(scheduler.pending(), 0);

    c.stop();
    assert_eq!(c.state(), LifecycleState::Error);
  }

  #[test]
  fn camera_lost_while_active_is_fatal() {
    let registry = Arc::new(TrackRegistry::new());
    let scheduler = Rc::new(FrameScheduler::new(60));
    let mut c = controller(true, registry.clone(), scheduler.clone());
    c.mount().unwrap();
    scheduler.run_frame();

    registry.sweep();
    scheduler.run_frame();
    assert_eq!(c.state(), LifecycleState::Error);
    assert_eq!(c.error(), Some(PipelineError::CameraUnavailable));
    assert_eq!(scheduler.pending(), 0);
    assert_eq!(scheduler.run_frame(), 0);

    c.stop();
    assert_eq!(c.state(), LifecycleState::Error);
  }

  #[test]
  fn target_change_allows_new_match() {
    let registry = Arc::new(TrackRegistry::new());
    let scheduler = Rc::new(FrameScheduler::new(60));
    let matched = Rc::new(Cell::new(0));
    let m = matched.clone();
    let mut c = controller(true, registry, scheduler.clone()).on_match(move || m.set(m.get() + 1));
    c.mount().unwrap();

    scheduler.run_frame();
    scheduler.run_frame();
    assert_eq!(matched.get(), 1);

    c.set_target_label("B");
    scheduler.run_frame();
    assert_eq!(matched.get(), 1);
    c.set_target_label("A");
    scheduler.run_frame();
    assert_eq!(matched.get(), 2);
    assert_eq!(c.target_label(), "A");
  }
}
