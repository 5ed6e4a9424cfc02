// 该文件是 Shouyu （手语） 项目的一部分。
// src/task/scheduler.rs - 逐帧调度器
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

//! # 逐帧调度
//!
//! 回调只执行一次；需要持续运行的任务在回调里重新登记自己。
//! 同一帧内登记的新回调排到下一帧执行。

use std::{
  cell::{Cell, RefCell},
  collections::HashSet,
  time::{Duration, Instant},
};

use tracing::debug;

use super::StopSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickHandle(u64);

/// 参数为调度器启动以来的时间
pub type FrameCallback = Box<dyn FnOnce(Duration)>;

pub trait Scheduler {
  fn schedule_next(&self, callback: FrameCallback) -> TickHandle;
  /// 取消尚未执行的回调；已执行或已取消的句柄不做任何事
  fn cancel(&self, handle: TickHandle);
}

pub struct FrameScheduler {
  interval: Duration,
  started: Instant,
  next_id: Cell<u64>,
  pending: RefCell<Vec<(TickHandle, FrameCallback)>>,
  // 当前帧中被取消的回调
  cancelled: RefCell<HashSet<TickHandle>>,
}

impl FrameScheduler {
  pub fn new(fps: u32) -> Self {
    let fps = fps.max(1);
    Self {
      interval: Duration::from_secs(1) / fps,
      started: Instant::now(),
      next_id: Cell::new(1),
      pending: RefCell::new(Vec::new()),
      cancelled: RefCell::new(HashSet::new()),
    }
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }

  pub fn pending(&self) -> usize {
    self.pending.borrow().len()
  }

  /// 执行一帧：运行帧开始前登记的全部回调，返回实际执行的个数
  pub fn run_frame(&self) -> usize {
    let batch = std::mem::take(&mut *self.pending.borrow_mut());
    let now = self.started.elapsed();
    let mut ran = 0;
    for (handle, callback) in batch {
      if self.cancelled.borrow_mut().remove(&handle) {
        continue;
      }
      callback(now);
      ran += 1;
    }
    self.cancelled.borrow_mut().clear();
    ran
  }

  /// 按帧率循环，直到收到停止信号、没有待执行回调或达到帧数上限
  pub fn run_until(&self, stop: &StopSignal, max_frames: Option<usize>) -> usize {
    let mut frames = 0;
    while !stop.is_raised() && self.pending() > 0 {
      if max_frames.is_some_and(|n| frames >= n) {
        debug!("达到帧数上限 {}", frames);
        break;
      }
      let begin = Instant::now();
      self.run_frame();
      frames += 1;
      if let Some(rest) = self.interval.checked_sub(begin.elapsed()) {
        std::thread::sleep(rest);
      }
    }
    frames
  }
}

impl Scheduler for FrameScheduler {
  fn schedule_next(&self, callback: FrameCallback) -> TickHandle {
    let id = self.next_id.get();
    self.next_id.set(id + 1);
    let handle = TickHandle(id);
    self.pending.borrow_mut().push((handle, callback));
    handle
  }

  fn cancel(&self, handle: TickHandle) {
    let mut pending = self.pending.borrow_mut();
    let before = pending.len();
    pending.retain(|(h, _)| *h != handle);
    if pending.len() == before {
      self.cancelled.borrow_mut().insert(handle);
    }
  }
}

#[cfg(test)]
mod tests {
  use std::rc::Rc;

  use super::*;

  #[test]
  fn callbacks_run_once_in_order() {
    let scheduler = FrameScheduler::new(60);
    let log = Rc::new(RefCell::new(Vec::new()));
    for i in 0..3 {
      let log = log.clone();
      scheduler.schedule_next(Box::new(move |_| log.borrow_mut().push(i)));
    }
    assert_eq!(scheduler.run_frame(), 3);
    assert_eq!(scheduler.run_frame(), 0);
    assert_eq!(*log.borrow(), vec![0, 1, 2]);
  }

  #[test]
  fn cancel_is_idempotent() {
    let scheduler = FrameScheduler::new(60);
    let hit = Rc::new(Cell::new(false));
    let flag = hit.clone();
    let handle = scheduler.schedule_next(Box::new(move |_| flag.set(true)));
    scheduler.cancel(handle);
    scheduler.cancel(handle);
    scheduler.cancel(TickHandle(9999));
    assert_eq!(scheduler.run_frame(), 0);
    assert!(!hit.get());
  }

  #[test]
  fn cancel_within_same_frame() {
    let scheduler = Rc::new(FrameScheduler::new(60));
    let hit = Rc::new(Cell::new(false));
    let victim = Rc::new(Cell::new(None));

    let s = scheduler.clone();
    let v = victim.clone();
    scheduler.schedule_next(Box::new(move |_| {
      if let Some(h) = v.get() {
        s.cancel(h);
      }
    }));
    let flag = hit.clone();
    victim.set(Some(
      scheduler.schedule_next(Box::new(move |_| flag.set(true))),
    ));

    assert_eq!(scheduler.run_frame(), 1);
    assert!(!hit.get());
  }

  #[test]
  fn rescheduled_callback_runs_next_frame() {
    let scheduler = Rc::new(FrameScheduler::new(60));
    let count = Rc::new(Cell::new(0));

    fn tick(scheduler: Rc<FrameScheduler>, count: Rc<Cell<u32>>) {
      let s = scheduler.clone();
      scheduler.schedule_next(Box::new(move |_| {
        count.set(count.get() + 1);
        tick(s, count);
      }));
    }
    tick(scheduler.clone(), count.clone());

    assert_eq!(scheduler.run_frame(), 1);
    assert_eq!(scheduler.run_frame(), 1);
    assert_eq!(count.get(), 2);
    assert_eq!(scheduler.pending(), 1);
  }

  #[test]
  fn run_until_respects_limits() {
    let scheduler = Rc::new(FrameScheduler::new(1000));
    let stop = StopSignal::new();
    assert_eq!(scheduler.run_until(&stop, None), 0);

    fn tick(scheduler: Rc<FrameScheduler>) {
      let s = scheduler.clone();
      scheduler.schedule_next(Box::new(move |_| tick(s)));
    }
    tick(scheduler.clone());
    assert_eq!(scheduler.run_until(&stop, Some(3)), 3);

    stop.raise();
    assert_eq!(scheduler.run_until(&stop, None), 0);
  }
}
