// 该文件是 Lingshi （零食识别） 项目的一部分。
// src/output.rs - 叠加层输出定义
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

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  interpret::{Decision, Rect, ViewSize},
};

pub const DEFAULT_VIEW_SIZE: ViewSize = ViewSize::new(640.0, 480.0);

/// 叠加层上的三个区域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
  Detection,
  Label,
  Confidence,
}

impl Region {
  pub const ALL: [Region; 3] = [Region::Detection, Region::Label, Region::Confidence];
}

/// 预览画面上的叠加层
///
/// `show` 与 `clear` 只修改几何与文字状态，必须幂等且廉价。
pub trait Overlay {
  type Error;

  /// 当前预览尺寸
  fn view_size(&self) -> ViewSize;
  fn set_frame(&mut self, region: Region, rect: Rect);
  fn show(&mut self, decision: &Decision);
  /// 隐藏全部三个区域
  fn clear(&mut self);

  /// 每次更新之后调用，附带产生该结果的帧
  fn commit(&mut self, _frame: Option<&Frame>) -> Result<(), Self::Error> {
    Ok(())
  }
}

mod overlay_state;
pub use self::overlay_state::{OverlayState, RegionState};

mod log_overlay;
pub use self::log_overlay::{LogOverlay, LogOverlayError};

#[cfg(feature = "save_image_file")]
pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SnapshotOverlay};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("日志输出错误: {0}")]
  LogOverlayError(#[from] LogOverlayError),
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  Log(LogOverlay),
  #[cfg(feature = "save_image_file")]
  Snapshot(SnapshotOverlay),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      LogOverlay::SCHEME => Ok(OutputWrapper::Log(LogOverlay::from_url(url)?)),
      #[cfg(feature = "save_image_file")]
      SnapshotOverlay::SCHEME => Ok(OutputWrapper::Snapshot(SnapshotOverlay::from_url(url)?)),
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Overlay for OutputWrapper {
  type Error = OutputError;

  fn view_size(&self) -> ViewSize {
    match self {
      OutputWrapper::Log(output) => output.view_size(),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::Snapshot(output) => output.view_size(),
    }
  }

  fn set_frame(&mut self, region: Region, rect: Rect) {
    match self {
      OutputWrapper::Log(output) => output.set_frame(region, rect),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::Snapshot(output) => output.set_frame(region, rect),
    }
  }

  fn show(&mut self, decision: &Decision) {
    match self {
      OutputWrapper::Log(output) => output.show(decision),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::Snapshot(output) => output.show(decision),
    }
  }

  fn clear(&mut self) {
    match self {
      OutputWrapper::Log(output) => output.clear(),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::Snapshot(output) => output.clear(),
    }
  }

  fn commit(&mut self, frame: Option<&Frame>) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Log(output) => output.commit(frame).map_err(OutputError::from),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::Snapshot(output) => output.commit(frame).map_err(OutputError::from),
    }
  }
}
