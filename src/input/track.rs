// 该文件是 Shouyu （手语） 项目的一部分。
// src/input/track.rs - 媒体轨道与登记表
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

//! # 媒体轨道
//!
//! 每个摄像头在 `start` 时把自己持有的轨道登记到 [`TrackRegistry`]。
//! 登记表只保存弱引用；流水线停止时对登记表做一次全面清扫，
//! 即使某个轨道的句柄在多次挂载之间丢失，也能被停止。

use std::sync::{
  Arc, Mutex, OnceLock, Weak,
  atomic::{AtomicBool, AtomicU64, Ordering},
};

use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
  Live,
  Ended,
}

pub trait MediaTrack: Send + Sync {
  fn id(&self) -> u64;
  fn label(&self) -> &str;
  fn ready_state(&self) -> TrackState;
  /// 停止轨道，可重复调用
  fn stop(&self);
}

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_track_id() -> u64 {
  NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed)
}

/// 只带一个存活标志的轨道
#[derive(Debug)]
pub struct SimpleTrack {
  id: u64,
  label: String,
  live: AtomicBool,
}

impl SimpleTrack {
  pub fn new(label: impl Into<String>) -> Self {
    Self {
      id: next_track_id(),
      label: label.into(),
      live: AtomicBool::new(true),
    }
  }
}

impl MediaTrack for SimpleTrack {
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
    self.live.store(false, Ordering::Release);
  }
}

#[derive(Default)]
pub struct TrackRegistry {
  tracks: Mutex<Vec<Weak<dyn MediaTrack>>>,
}

impl TrackRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// 进程级登记表
  pub fn global() -> Arc<TrackRegistry> {
    static GLOBAL: OnceLock<Arc<TrackRegistry>> = OnceLock::new();
    GLOBAL.get_or_init(|| Arc::new(TrackRegistry::new())).clone()
  }

  pub fn register<T: MediaTrack + 'static>(&self, track: &Arc<T>) {
    let weak: Weak<dyn MediaTrack> = Arc::downgrade(track) as Weak<dyn MediaTrack>;
    let mut tracks = self.tracks.lock().unwrap_or_else(|e| e.into_inner());
    tracks.retain(|t| t.strong_count() > 0);
    tracks.push(weak);
    debug!("登记媒体轨道: {} ({})", track.label(), track.id());
  }

  pub fn live_count(&self) -> usize {
    let tracks = self.tracks.lock().unwrap_or_else(|e| e.into_inner());
    tracks
      .iter()
      .filter_map(Weak::upgrade)
      .filter(|t| t.ready_state() == TrackState::Live)
      .count()
  }

  /// 停止所有仍然存活的轨道，返回本次停止的个数
  pub fn sweep(&self) -> usize {
    let live: Vec<Arc<dyn MediaTrack>> = {
      let mut tracks = self.tracks.lock().unwrap_or_else(|e| e.into_inner());
      tracks.retain(|t| t.strong_count() > 0);
      tracks.iter().filter_map(Weak::upgrade).collect()
    };

    let mut stopped = 0;
    for track in live {
      if track.ready_state() == TrackState::Live {
        track.stop();
        stopped += 1;
        info!("清扫时停止媒体轨道: {} ({})", track.label(), track.id());
      }
    }
    stopped
  }
}
