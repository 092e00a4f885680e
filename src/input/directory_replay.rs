// 该文件是 Lingshi （零食识别） 项目的一部分。
// src/input/directory_replay.rs - 目录回放输入
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
  path::{Path, PathBuf},
  thread,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Sample, input::now_ms, query_value};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum DirectoryReplayInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 按文件名顺序把目录中的图像当作连续帧交付
///
/// 无法解码的文件交付为缺失缓冲的采样。`interval_ms` 控制帧间隔。
pub struct DirectoryReplayInput {
  files: std::vec::IntoIter<PathBuf>,
  interval: Duration,
  last: Option<Instant>,
}

impl FromUrlWithScheme for DirectoryReplayInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryReplayInput {
  type Error = DirectoryReplayInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DirectoryReplayInputError::SchemeMismatch);
    }
    let interval = Duration::from_millis(query_value(url, "interval_ms").unwrap_or(0));
    Ok(Self::open(url.path())?.with_interval(interval))
  }
}

impl DirectoryReplayInput {
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, DirectoryReplayInputError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory.as_ref())? {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
      if is_image {
        files.push(path);
      }
    }
    files.sort();
    info!(
      "目录 {} 中共有 {} 帧",
      directory.as_ref().display(),
      files.len()
    );

    Ok(Self {
      files: files.into_iter(),
      interval: Duration::ZERO,
      last: None,
    })
  }

  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }

  fn pace(&mut self) {
    if let Some(last) = self.last {
      let elapsed = last.elapsed();
      if elapsed < self.interval {
        thread::sleep(self.interval - elapsed);
      }
    }
    self.last = Some(Instant::now());
  }
}

impl Iterator for DirectoryReplayInput {
  type Item = Sample;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.files.next()?;
    self.pace();

    match image::open(&path) {
      Ok(image) => {
        debug!("读取帧: {}", path.display());
        Some(Sample::new(now_ms(), image.into_rgb8()))
      }
      Err(e) => {
        warn!("无法解码 {}: {}", path.display(), e);
        Some(Sample::unavailable(now_ms()))
      }
    }
  }
}
