// 该文件是 Lingshi （零食识别） 项目的一部分。
// src/model/replay.rs - 回放模型
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
  sync::atomic::{AtomicUsize, Ordering},
  thread,
  time::Duration,
};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Model, RawOutput},
  query_value,
};

const REPLAY_DEFAULT_INPUT_SIZE: u32 = 299;

/// 回放文件中的一行 (JSON Lines)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayEntry {
  Detection {
    probabilities: Vec<f32>,
    bbox: [f32; 4],
  },
  Empty,
  Error {
    message: String,
  },
}

#[derive(Error, Debug)]
pub enum ReplayModelError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("回放文件第 {line} 行解析失败: {source}")]
  ParseError {
    line: usize,
    source: serde_json::Error,
  },
  #[error("回放文件没有任何记录")]
  NoEntries,
  #[error("模型输入尺寸无效: {0}x{1}")]
  ZeroInputSize(u32, u32),
  #[error("{0}")]
  Scripted(String),
}

/// 按顺序循环返回预先录制的模型输出
///
/// 不依赖任何推理后端，可用于离线演示与基准测试。
pub struct ReplayModel {
  entries: Box<[ReplayEntry]>,
  cursor: AtomicUsize,
  input_size: (u32, u32),
  latency: Duration,
}

impl FromUrlWithScheme for ReplayModel {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModel {
  type Error = ReplayModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayModelError::SchemeMismatch);
    }

    info!("加载回放文件: {}", url.path());
    let data = std::fs::read_to_string(url.path())?;
    let entries = data
      .lines()
      .enumerate()
      .filter(|(_, line)| !line.trim().is_empty())
      .map(|(index, line)| {
        serde_json::from_str(line).map_err(|source| ReplayModelError::ParseError {
          line: index + 1,
          source,
        })
      })
      .collect::<Result<Vec<ReplayEntry>, _>>()?;
    debug!("回放记录数: {}", entries.len());

    let width = query_value(url, "width").unwrap_or(REPLAY_DEFAULT_INPUT_SIZE);
    let height = query_value(url, "height").unwrap_or(REPLAY_DEFAULT_INPUT_SIZE);
    let latency = Duration::from_millis(query_value(url, "latency_ms").unwrap_or(0));

    Ok(Self::new(entries, (width, height))?.with_latency(latency))
  }
}

impl ReplayModel {
  pub fn new(entries: Vec<ReplayEntry>, input_size: (u32, u32)) -> Result<Self, ReplayModelError> {
    if entries.is_empty() {
      return Err(ReplayModelError::NoEntries);
    }
    if input_size.0 == 0 || input_size.1 == 0 {
      return Err(ReplayModelError::ZeroInputSize(input_size.0, input_size.1));
    }
    Ok(Self {
      entries: entries.into_boxed_slice(),
      cursor: AtomicUsize::new(0),
      input_size,
      latency: Duration::ZERO,
    })
  }

  /// 每次推理额外等待的时长，用于模拟慢速推理
  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }
}

impl Model for ReplayModel {
  type Error = ReplayModelError;

  fn input_size(&self) -> (u32, u32) {
    self.input_size
  }

  fn infer(&self, input: &RgbImage) -> Result<RawOutput, Self::Error> {
    debug_assert_eq!(input.dimensions(), self.input_size);
    if !self.latency.is_zero() {
      thread::sleep(self.latency);
    }

    let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.entries.len();
    match &self.entries[index] {
      ReplayEntry::Detection {
        probabilities,
        bbox,
      } => Ok(RawOutput::new(probabilities.clone(), *bbox)),
      ReplayEntry::Empty => Ok(RawOutput::empty()),
      ReplayEntry::Error { message } => Err(ReplayModelError::Scripted(message.clone())),
    }
  }
}
