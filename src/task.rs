// 该文件是 Shouyu （手语） 项目的一部分。
// src/task.rs - 识别循环
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

use std::{
  cell::{Cell, RefCell},
  rc::Rc,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
  feature::encode,
  frame::RgbNhwcFrame,
  input::CameraSource,
  landmark::LandmarkExtractor,
  model::{Classification, Prediction, SignClassifier},
  output::{OutputError, Render},
};

mod scheduler;
pub use self::scheduler::{FrameCallback, FrameScheduler, Scheduler, TickHandle};

pub type SharedCamera<const W: u32, const H: u32> = Rc<RefCell<Box<dyn CameraSource<W, H>>>>;
pub type BoxedExtractor<const W: u32, const H: u32> = Box<dyn LandmarkExtractor<W, H>>;
pub type BoxedRender<const W: u32, const H: u32> =
  Box<dyn Render<RgbNhwcFrame<W, H>, Prediction, Error = OutputError>>;
pub type PredictionListener = Box<dyn FnMut(&Prediction)>;
pub type CameraLostHandler = Box<dyn FnOnce()>;

/// 外部停止信号（Ctrl-C 等）
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
  pub fn new() -> Self {
    Self::default()
  }

  /// 收到 Ctrl-C 后置位；30 秒后仍未退出则强制结束进程
  pub fn install_ctrlc(&self) -> Result<(), ctrlc::Error> {
    let flag = self.0.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      flag.store(true, Ordering::Release);
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
  }

  pub fn raise(&self) {
    self.0.store(true, Ordering::Release);
  }

  pub fn is_raised(&self) -> bool {
    self.0.load(Ordering::Acquire)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
  /// 摄像头还没有帧
  Skipped,
  Predicted,
  /// 摄像头已不再活动，循环不会继续
  CameraLost,
}

/// 单帧流程：取帧、关键点、特征、分类、叠加层
///
/// 推理失败只影响当前帧，按无手势处理。
pub struct RecognitionLoop<const W: u32, const H: u32> {
  camera: SharedCamera<W, H>,
  extractor: BoxedExtractor<W, H>,
  classifier: Arc<SignClassifier>,
  output: BoxedRender<W, H>,
  listener: Option<PredictionListener>,
  on_camera_lost: Option<CameraLostHandler>,
  last_prediction: Rc<RefCell<Option<Prediction>>>,
  null_label: String,
  ticks: u64,
}

impl<const W: u32, const H: u32> RecognitionLoop<W, H> {
  pub fn new(
    camera: SharedCamera<W, H>,
    extractor: BoxedExtractor<W, H>,
    classifier: Arc<SignClassifier>,
    output: BoxedRender<W, H>,
  ) -> Self {
    let null_label = classifier
      .config()
      .map(|c| c.null_label.clone())
      .unwrap_or_else(|| crate::config::NULL_LABEL.to_string());
    Self {
      camera,
      extractor,
      classifier,
      output,
      listener: None,
      on_camera_lost: None,
      last_prediction: Rc::new(RefCell::new(None)),
      null_label,
      ticks: 0,
    }
  }

  pub fn with_listener(mut self, listener: PredictionListener) -> Self {
    self.listener = Some(listener);
    self
  }

  /// 摄像头丢失时调用一次，此后不再调度
  pub fn on_camera_lost(mut self, handler: CameraLostHandler) -> Self {
    self.on_camera_lost = Some(handler);
    self
  }

  /// 最近一次预测，供外部读取
  pub fn prediction_state(&self) -> Rc<RefCell<Option<Prediction>>> {
    self.last_prediction.clone()
  }

  pub fn ticks(&self) -> u64 {
    self.ticks
  }

  pub fn tick(&mut self) -> TickOutcome {
    let (frame, active) = {
      let mut camera = self.camera.borrow_mut();
      let frame = camera.get_frame();
      (frame, camera.is_active())
    };
    let Some(frame) = frame else {
      if !active {
        warn!("摄像头已不再活动");
        return TickOutcome::CameraLost;
      }
      debug!("摄像头尚无可用帧，跳过本帧");
      return TickOutcome::Skipped;
    };
    self.ticks += 1;
    let now = Instant::now();

    let prediction = match self.extractor.detect(&frame) {
      Ok(landmarks) => {
        let classification = match self.classifier.config() {
          Some(config) => {
            let features = encode(&landmarks, config);
            self.classifier.predict(&features).unwrap_or_else(|e| {
              warn!("第 {} 帧分类失败，按无手势处理: {}", self.ticks, e);
              Classification::none(&self.null_label)
            })
          }
          None => {
            warn!("分类器尚未加载，按无手势处理");
            Classification::none(&self.null_label)
          }
        };
        Prediction::new(classification, landmarks)
      }
      Err(e) => {
        warn!("第 {} 帧关键点检测失败，按无手势处理: {}", self.ticks, e);
        Prediction::none(&self.null_label)
      }
    };
    let infer_elapsed = now.elapsed();

    if let Err(e) = self.output.render_result(&frame, &prediction) {
      warn!("第 {} 帧渲染失败: {}", self.ticks, e);
    }
    debug!(
      "第 {} 帧: {} ({:.3})，耗时 {:.2?} / {:.2?}",
      self.ticks,
      prediction.sign_label,
      prediction.confidence,
      infer_elapsed,
      now.elapsed()
    );

    if let Some(listener) = self.listener.as_mut() {
      listener(&prediction);
    }
    *self.last_prediction.borrow_mut() = Some(prediction);
    TickOutcome::Predicted
  }

  /// 交给调度器，每一帧执行一次 `tick` 并重新登记，直到句柄被取消
  pub fn start(self, scheduler: Rc<dyn Scheduler>) -> LoopHandle {
    let handle = LoopHandle {
      scheduler: scheduler.clone(),
      cancelled: Rc::new(Cell::new(false)),
      current: Rc::new(Cell::new(None)),
    };
    schedule(
      Rc::new(RefCell::new(self)),
      scheduler,
      handle.cancelled.clone(),
      handle.current.clone(),
    );
    info!("识别循环已启动");
    handle
  }
}

fn schedule<const W: u32, const H: u32>(
  state: Rc<RefCell<RecognitionLoop<W, H>>>,
  scheduler: Rc<dyn Scheduler>,
  cancelled: Rc<Cell<bool>>,
  current: Rc<Cell<Option<TickHandle>>>,
) {
  let next = scheduler.clone();
  let slot = current.clone();
  let handle = scheduler.schedule_next(Box::new(move |_| {
    if cancelled.get() {
      return;
    }
    let outcome = state.borrow_mut().tick();
    if outcome == TickOutcome::CameraLost {
      cancelled.set(true);
      slot.set(None);
      info!("摄像头丢失，识别循环停止");
      let handler = state.borrow_mut().on_camera_lost.take();
      if let Some(handler) = handler {
        handler();
      }
      return;
    }
    if !cancelled.get() {
      schedule(state, next, cancelled, slot);
    }
  }));
  current.set(Some(handle));
}

/// 识别循环唯一的停止手段；摄像头丢失时句柄自动转为已取消
pub struct LoopHandle {
  scheduler: Rc<dyn Scheduler>,
  cancelled: Rc<Cell<bool>>,
  current: Rc<Cell<Option<TickHandle>>>,
}

impl LoopHandle {
  /// 可以重复调用
  pub fn cancel(&self) {
    if self.cancelled.replace(true) {
      return;
    }
    if let Some(handle) = self.current.take() {
      self.scheduler.cancel(handle);
    }
    info!("识别循环已取消");
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.get()
  }
}

#[cfg(test)]
mod tests {
  use std::collections::VecDeque;

  use super::*;
  use crate::{
    landmark::{ExtractorError, LandmarkSet},
    model::{ClassifierError, Model, ModelConfig},
    output::{CanvasOutput, OutputWrapper},
  };

  struct QueueCamera {
    frames: VecDeque<Option<RgbNhwcFrame<8, 8>>>,
  }

  impl CameraSource<8, 8> for QueueCamera {
    fn start(&mut self) -> bool {
      true
    }
    fn stop(&mut self) {}
    fn get_frame(&mut self) -> Option<RgbNhwcFrame<8, 8>> {
      self.frames.pop_front().flatten()
    }
    fn is_active(&self) -> bool {
      true
    }
  }

  struct FailingExtractor {
    fail_every: u64,
    calls: Cell<u64>,
  }

  impl LandmarkExtractor<8, 8> for FailingExtractor {
    fn load_model(&mut self) -> Result<(), ExtractorError> {
      Ok(())
    }
    fn is_loaded(&self) -> bool {
      true
    }
    fn detect(&self, _frame: &RgbNhwcFrame<8, 8>) -> Result<LandmarkSet, ExtractorError> {
      let n = self.calls.get() + 1;
      self.calls.set(n);
      if n % self.fail_every == 0 {
        Err(ExtractorError::Inference("boom".into()))
      } else {
        Ok(LandmarkSet::default())
      }
    }
  }

  // 总是给第一个标签打高分
  struct FirstLabel;

  impl Model for FirstLabel {
    type Input = crate::feature::FeatureVector;
    type Output = Vec<f32>;
    type Error = ClassifierError;

    fn infer(&self, _input: &Self::Input) -> Result<Vec<f32>, ClassifierError> {
      Ok(vec![10.0, 0.0])
    }
  }

  fn classifier() -> Arc<SignClassifier> {
    let config = ModelConfig {
      input_shape: vec![126],
      labels: vec!["A".into(), "_null".into()],
      ..ModelConfig::default()
    };
    Arc::new(SignClassifier::from_parts(config, Box::new(FirstLabel)).unwrap())
  }

  fn build(frames: Vec<Option<RgbNhwcFrame<8, 8>>>) -> (RecognitionLoop<8, 8>, CanvasOutput) {
    let camera: SharedCamera<8, 8> = Rc::new(RefCell::new(Box::new(QueueCamera {
      frames: frames.into(),
    })));
    let canvas = CanvasOutput::new();
    let output: BoxedRender<8, 8> = Box::new(OutputWrapper::<8, 8>::Canvas(canvas.clone()));
    let extractor = Box::new(FailingExtractor {
      fail_every: 3,
      calls: Cell::new(0),
    });
    (
      RecognitionLoop::new(camera, extractor, classifier(), output),
      canvas,
    )
  }

  #[test]
  fn missing_frame_skips_tick() {
    let (mut lp, canvas) = build(vec![None, Some(RgbNhwcFrame::default())]);
    assert_eq!(lp.tick(), TickOutcome::Skipped);
    assert_eq!(canvas.frames_drawn(), 0);
    assert_eq!(lp.tick(), TickOutcome::Predicted);
    assert_eq!(canvas.frames_drawn(), 1);
    let state = lp.prediction_state();
    assert_eq!(state.borrow().as_ref().unwrap().sign_label, "A");
  }

  #[test]
  fn extractor_failure_is_transient() {
    let frames = (0..6).map(|_| Some(RgbNhwcFrame::default())).collect();
    let (mut lp, canvas) = build(frames);
    let labels = Rc::new(RefCell::new(Vec::new()));
    let sink = labels.clone();
    lp = lp.with_listener(Box::new(move |p| sink.borrow_mut().push(p.sign_label.clone())));

    for _ in 0..6 {
      assert_eq!(lp.tick(), TickOutcome::Predicted);
    }
    assert_eq!(canvas.frames_drawn(), 6);
    assert_eq!(
      *labels.borrow(),
      vec!["A", "A", "_null", "A", "A", "_null"]
    );
  }

  #[test]
  fn cancelled_loop_stops_rescheduling() {
    let frames = (0..10).map(|_| Some(RgbNhwcFrame::default())).collect();
    let (lp, canvas) = build(frames);
    let scheduler = Rc::new(FrameScheduler::new(60));
    let handle = lp.start(scheduler.clone());

    scheduler.run_frame();
    scheduler.run_frame();
    assert_eq!(canvas.frames_drawn(), 2);

    handle.cancel();
    handle.cancel();
    assert!(handle.is_cancelled());
    assert_eq!(scheduler.pending(), 0);
    assert_eq!(scheduler.run_frame(), 0);
    assert_eq!(canvas.frames_drawn(), 2);
  }

  // 给出若干帧后设备消失
  struct UnpluggedCamera {
    frames_left: usize,
  }

  impl CameraSource<8, 8> for UnpluggedCamera {
    fn start(&mut self) -> bool {
      true
    }
    fn stop(&mut self) {
      self.frames_left = 0;
    }
    fn get_frame(&mut self) -> Option<RgbNhwcFrame<8, 8>> {
      if self.frames_left == 0 {
        return None;
      }
      self.frames_left -= 1;
      Some(RgbNhwcFrame::default())
    }
    fn is_active(&self) -> bool {
      self.frames_left > 0
    }
  }

  #[test]
  fn lost_camera_ends_loop_once() {
    let camera: SharedCamera<8, 8> = Rc::new(RefCell::new(Box::new(UnpluggedCamera {
      frames_left: 3,
    })));
    let canvas = CanvasOutput::new();
    let output: BoxedRender<8, 8> = Box::new(OutputWrapper::<8, 8>::Canvas(canvas.clone()));
    let extractor = Box::new(FailingExtractor {
      fail_every: 100,
      calls: Cell::new(0),
    });
    let lost = Rc::new(Cell::new(0));
    let counter = lost.clone();
    let lp = RecognitionLoop::new(camera, extractor, classifier(), output)
      .on_camera_lost(Box::new(move || counter.set(counter.get() + 1)));

    let scheduler = Rc::new(FrameScheduler::new(60));
    let handle = lp.start(scheduler.clone());
    for _ in 0..10 {
      scheduler.run_frame();
    }

    assert_eq!(canvas.frames_drawn(), 3);
    assert_eq!(lost.get(), 1);
    assert!(handle.is_cancelled());
    assert_eq!(scheduler.pending(), 0);
    handle.cancel();
    assert_eq!(lost.get(), 1);
  }

  #[test]
  fn stop_signal_is_shared() {
    let stop = StopSignal::new();
    let other = stop.clone();
    assert!(!other.is_raised());
    stop.raise();
    assert!(other.is_raised());
  }
}
