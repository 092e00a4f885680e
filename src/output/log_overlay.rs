// 该文件是 Lingshi （零食识别） 项目的一部分。
// src/output/log_overlay.rs - 日志叠加层
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

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  interpret::{Decision, Rect, ViewSize},
  output::{DEFAULT_VIEW_SIZE, Overlay, OverlayState, Region},
  query_value,
};

#[derive(Error, Debug)]
pub enum LogOverlayError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 只把叠加层变化写入日志的输出
pub struct LogOverlay {
  state: OverlayState,
  dirty: bool,
}

impl FromUrlWithScheme for LogOverlay {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOverlay {
  type Error = LogOverlayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(LogOverlayError::SchemeMismatch);
    }
    let width = query_value(url, "width").unwrap_or(DEFAULT_VIEW_SIZE.width);
    let height = query_value(url, "height").unwrap_or(DEFAULT_VIEW_SIZE.height);
    Ok(Self::new(ViewSize::new(width, height)))
  }
}

impl LogOverlay {
  pub fn new(view: ViewSize) -> Self {
    Self {
      state: OverlayState::new(view),
      dirty: false,
    }
  }

  pub fn state(&self) -> &OverlayState {
    &self.state
  }
}

impl Overlay for LogOverlay {
  type Error = LogOverlayError;

  fn view_size(&self) -> ViewSize {
    self.state.view_size()
  }

  fn set_frame(&mut self, region: Region, rect: Rect) {
    self.state.set_frame(region, rect);
  }

  fn show(&mut self, decision: &Decision) {
    let before = self.state.clone();
    self.state.show(decision);
    self.dirty = before != self.state;
  }

  fn clear(&mut self) {
    let was_hidden = self.state.is_hidden();
    self.state.clear();
    self.dirty = !was_hidden;
  }

  fn commit(&mut self, frame: Option<&Frame>) -> Result<(), Self::Error> {
    if !std::mem::take(&mut self.dirty) {
      return Ok(());
    }

    let seq = frame.map(Frame::seq);
    if self.state.is_hidden() {
      info!("帧 {:?}: 清除叠加层", seq);
      return Ok(());
    }

    let label = self.state.region(Region::Label);
    if !self.state.region(Region::Detection).visible {
      warn!("帧 {:?}: {}", seq, label.text);
      return Ok(());
    }

    let rect = self.state.region(Region::Detection).rect;
    info!(
      "帧 {:?}: {} {} at ({:.0}, {:.0}, {:.0}x{:.0})",
      seq,
      label.text,
      self.state.region(Region::Confidence).text,
      rect.x,
      rect.y,
      rect.width,
      rect.height
    );
    Ok(())
  }
}
