// 该文件是 Lingshi （零食识别） 项目的一部分。
// src/output/overlay_state.rs - 叠加层状态
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

use std::convert::Infallible;

use serde::Serialize;

use crate::{
  interpret::{Decision, OVERLAY_BOX_HEIGHT, OVERLAY_BOX_WIDTH, Rect, ViewSize},
  output::{Overlay, Region},
};

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RegionState {
  pub rect: Rect,
  pub text: String,
  pub visible: bool,
}

/// 三个叠加区域的内存模型，其他输出在其基础上渲染
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayState {
  view: ViewSize,
  detection: RegionState,
  label: RegionState,
  confidence: RegionState,
}

impl OverlayState {
  pub fn new(view: ViewSize) -> Self {
    Self {
      view,
      detection: RegionState::default(),
      label: RegionState::default(),
      confidence: RegionState::default(),
    }
  }

  pub fn set_view_size(&mut self, view: ViewSize) {
    self.view = view;
  }

  pub fn region(&self, region: Region) -> &RegionState {
    match region {
      Region::Detection => &self.detection,
      Region::Label => &self.label,
      Region::Confidence => &self.confidence,
    }
  }

  fn region_mut(&mut self, region: Region) -> &mut RegionState {
    match region {
      Region::Detection => &mut self.detection,
      Region::Label => &mut self.label,
      Region::Confidence => &mut self.confidence,
    }
  }

  pub fn is_hidden(&self) -> bool {
    Region::ALL.iter().all(|&r| !self.region(r).visible)
  }
}

impl Overlay for OverlayState {
  type Error = Infallible;

  fn view_size(&self) -> ViewSize {
    self.view
  }

  fn set_frame(&mut self, region: Region, rect: Rect) {
    self.region_mut(region).rect = rect;
  }

  fn show(&mut self, decision: &Decision) {
    match decision {
      Decision::Detected(detection) => {
        self.set_frame(Region::Detection, detection.view_rect);
        self.set_frame(Region::Label, detection.label_rect);
        self.set_frame(Region::Confidence, detection.confidence_rect);

        self.detection.text.clear();
        self.label.text = detection.label.clone();
        self.confidence.text = detection.confidence.to_string();
        for region in Region::ALL {
          self.region_mut(region).visible = true;
        }
      }
      Decision::Failed { message } => {
        // 错误文字替代标签，其余区域不保留旧结果
        if self.label.rect.width <= 0.0 || self.label.rect.height <= 0.0 {
          self.label.rect = Rect::new(0.0, 0.0, OVERLAY_BOX_WIDTH, OVERLAY_BOX_HEIGHT);
        }
        self.label.text = format!("Error: {message}");
        self.label.visible = true;
        self.detection.visible = false;
        self.confidence.visible = false;
      }
      Decision::NoDetection => self.clear(),
    }
  }

  fn clear(&mut self) {
    for region in Region::ALL {
      self.region_mut(region).visible = false;
    }
  }
}
