// 该文件是 Shouyu （手语） 项目的一部分。
// src/host.rs - 宿主消息通道
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

//! 嵌入到外壳程序时的单向消息通道。识别器只发送字符串，不关心外壳是什么。

use std::io::{ErrorKind, Write};

use thiserror::Error;

/// 匹配成功时发送给宿主的消息
pub const PASS_MESSAGE: &str = "Pass!";

#[derive(Error, Debug)]
pub enum HostError {
  #[error("宿主通道写入失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("宿主通道已关闭")]
  Closed,
}

pub trait HostChannel {
  fn post_message(&self, payload: &str) -> Result<(), HostError>;
}

/// 每条消息写一行到标准输出，供父进程读取
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutHost;

impl HostChannel for StdoutHost {
  fn post_message(&self, payload: &str) -> Result<(), HostError> {
    write_line(&mut std::io::stdout().lock(), payload)
  }
}

/// 父进程已经关闭读端时返回 [`HostError::Closed`]
fn write_line(writer: &mut impl Write, payload: &str) -> Result<(), HostError> {
  let closed = |e: std::io::Error| match e.kind() {
    ErrorKind::BrokenPipe => HostError::Closed,
    _ => HostError::Io(e),
  };
  writeln!(writer, "{}", payload).map_err(closed)?;
  writer.flush().map_err(closed)
}

/// 丢弃所有消息
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl HostChannel for NullHost {
  fn post_message(&self, _payload: &str) -> Result<(), HostError> {
    Ok(())
  }
}

impl<T: HostChannel + ?Sized> HostChannel for Box<T> {
  fn post_message(&self, payload: &str) -> Result<(), HostError> {
    (**self).post_message(payload)
  }
}
