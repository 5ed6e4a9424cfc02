// 该文件是 Shouyu （手语） 项目的一部分。
// src/matcher.rs - 匹配判定
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

//! # 匹配判定
//!
//! 逐帧分类结果噪声很大。[`MatchEvaluator`] 对每个目标标签只触发一次匹配事件，
//! 直到目标改变（或按 [`RearmPolicy::After`] 配置的时间窗口过去）才会再次触发。

use std::{
  collections::HashSet,
  time::{Duration, Instant},
};

use tracing::{debug, info};

/// 匹配之后何时允许再次匹配同一个目标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RearmPolicy {
  /// 只有目标标签改变时才重置
  #[default]
  OnTargetChange,
  /// 匹配后经过给定时长自动重置
  After(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEvent {
  Matched { label: String },
  Mismatched { label: String, expected: String },
}

#[derive(Debug, Clone)]
pub struct MatchEvaluator {
  target: String,
  null_label: String,
  rearm: RearmPolicy,
  matched_at: Option<Instant>,
  // 本轮已经报告过的错误标签
  reported: HashSet<String>,
}

impl MatchEvaluator {
  pub fn new(target: impl Into<String>, null_label: impl Into<String>) -> Self {
    Self {
      target: target.into(),
      null_label: null_label.into(),
      rearm: RearmPolicy::default(),
      matched_at: None,
      reported: HashSet::new(),
    }
  }

  pub fn with_rearm(mut self, rearm: RearmPolicy) -> Self {
    self.rearm = rearm;
    self
  }

  pub fn target_label(&self) -> &str {
    &self.target
  }

  pub fn has_matched(&self) -> bool {
    self.matched_at.is_some()
  }

  /// 换到下一个目标，清除本轮状态
  pub fn set_target(&mut self, target: impl Into<String>) {
    let target = target.into();
    if target != self.target {
      debug!("目标标签 {} -> {}", self.target, target);
    }
    self.target = target;
    self.matched_at = None;
    self.reported.clear();
  }

  pub fn observe(&mut self, current: &str, target: &str) -> Option<MatchEvent> {
    self.observe_at(current, target, Instant::now())
  }

  pub fn observe_at(&mut self, current: &str, target: &str, now: Instant) -> Option<MatchEvent> {
    if target != self.target {
      self.set_target(target);
    }

    if let (RearmPolicy::After(window), Some(at)) = (self.rearm, self.matched_at)
      && now.saturating_duration_since(at) >= window
    {
      debug!("匹配状态在 {:?} 后重置", window);
      self.matched_at = None;
      self.reported.clear();
    }

    if current.is_empty() || current == self.null_label {
      return None;
    }

    if self.matched_at.is_some() {
      return None;
    }

    if current == self.target {
      info!("匹配目标标签: {}", current);
      self.matched_at = Some(now);
      return Some(MatchEvent::Matched {
        label: current.to_string(),
      });
    }

    if !self.reported.insert(current.to_string()) {
      return None;
    }
    debug!("识别到 {}，目标 {}", current, self.target);
    Some(MatchEvent::Mismatched {
      label: current.to_string(),
      expected: self.target.clone(),
    })
  }
}
