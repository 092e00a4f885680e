// 该文件是 Lingshi （零食识别） 项目的一部分。
// src/output/draw.rs - 叠加层绘制
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use thiserror::Error;
use tracing::debug;

use crate::{
  interpret::Rect,
  output::{Overlay, OverlayState, Region},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_PADDING: i32 = 2;
const BORDER_THICKNESS: i32 = 4;
const BORDER_COLOR: [u8; 3] = [255, 255, 255]; // 白色
const LABEL_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  border_thickness: i32,
  border_color: [u8; 3],
  label_color: [u8; 3],
  text_color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      border_thickness: BORDER_THICKNESS,
      border_color: BORDER_COLOR,
      label_color: LABEL_COLOR,
      text_color: TEXT_COLOR,
    }
  }
}

impl Draw {
  /// 加载字体文件；未设置字体时只绘制色块，不绘制文字
  pub fn with_font_file(mut self, path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    self.font = Some(FontArc::try_from_vec(data)?);
    Ok(self)
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 按叠加层状态在图像上绘制可见区域
  pub fn draw_overlay(&self, image: &mut RgbImage, state: &OverlayState) {
    let view = state.view_size();
    let scale_x = if view.width > 0.0 {
      image.width() as f64 / view.width
    } else {
      1.0
    };
    let scale_y = if view.height > 0.0 {
      image.height() as f64 / view.height
    } else {
      1.0
    };

    for region in Region::ALL {
      let region_state = state.region(region);
      if !region_state.visible {
        continue;
      }
      let rect = Rect::new(
        region_state.rect.x * scale_x,
        region_state.rect.y * scale_y,
        region_state.rect.width * scale_x,
        region_state.rect.height * scale_y,
      );
      match region {
        Region::Detection => self.draw_border(image, &rect),
        Region::Label | Region::Confidence => self.draw_text_box(image, &rect, &region_state.text),
      }
    }
  }

  fn draw_border(&self, image: &mut RgbImage, rect: &Rect) {
    let Some(outer) = clip_rect(rect, image) else {
      debug!("检测框在画面之外: {:?}", rect);
      return;
    };

    for inset in 0..self.border_thickness {
      let width = outer.width() as i32 - 2 * inset;
      let height = outer.height() as i32 - 2 * inset;
      if width <= 0 || height <= 0 {
        break;
      }
      let ring = imageproc::rect::Rect::at(outer.left() + inset, outer.top() + inset)
        .of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, ring, Rgb(self.border_color));
    }
  }

  fn draw_text_box(&self, image: &mut RgbImage, rect: &Rect, text: &str) {
    let Some(area) = clip_rect(rect, image) else {
      return;
    };
    draw_filled_rect_mut(image, area, Rgb(self.label_color));

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb(self.text_color),
        area.left() + LABEL_TEXT_PADDING,
        area.top(),
        PxScale::from(self.font_size),
        font,
        text,
      );
    }
  }
}

/// 裁剪到图像范围内，完全落在图像外时返回 `None`
fn clip_rect(rect: &Rect, image: &RgbImage) -> Option<imageproc::rect::Rect> {
  let (w, h) = (image.width() as f64, image.height() as f64);
  let x_min = rect.x.max(0.0).floor();
  let y_min = rect.y.max(0.0).floor();
  let x_max = rect.max_x().min(w).ceil();
  let y_max = rect.max_y().min(h).ceil();

  if !(x_max > x_min && y_max > y_min) {
    return None;
  }

  Some(
    imageproc::rect::Rect::at(x_min as i32, y_min as i32)
      .of_size((x_max - x_min) as u32, (y_max - y_min) as u32),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::interpret::{Decision, Detection, ViewSize};

  fn shown_state(view: ViewSize) -> OverlayState {
    let mut state = OverlayState::new(view);
    state.show(&Decision::Detected(Detection {
      class_id: 0,
      label: "apple".into(),
      confidence: 0.5,
      view_rect: Rect::new(20.0, 40.0, 40.0, 40.0),
      label_rect: Rect::new(20.0, 20.0, 200.0, 20.0),
      confidence_rect: Rect::new(20.0, 0.0, 200.0, 20.0),
    }));
    state
  }

  #[test]
  fn border_and_label_are_drawn() {
    let mut image = RgbImage::new(100, 100);
    Draw::default().draw_overlay(&mut image, &shown_state(ViewSize::new(100.0, 100.0)));

    assert_eq!(image.get_pixel(20, 60), &Rgb(BORDER_COLOR));
    assert_eq!(image.get_pixel(40, 60), &Rgb([0, 0, 0]));
    // 标签框超出右边界的部分被裁掉
    assert_eq!(image.get_pixel(99, 30), &Rgb(LABEL_COLOR));
  }

  #[test]
  fn hidden_overlay_draws_nothing() {
    let mut state = shown_state(ViewSize::new(100.0, 100.0));
    state.clear();
    let mut image = RgbImage::new(100, 100);
    Draw::default().draw_overlay(&mut image, &state);
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn regions_scale_to_the_image() {
    let mut image = RgbImage::new(50, 50);
    Draw::default().draw_overlay(&mut image, &shown_state(ViewSize::new(100.0, 100.0)));
    assert_eq!(image.get_pixel(10, 30), &Rgb(BORDER_COLOR));
  }

  #[test]
  fn failure_without_earlier_detection_is_painted() {
    let mut state = OverlayState::new(ViewSize::new(100.0, 100.0));
    state.show(&Decision::Failed {
      message: "boom".into(),
    });
    let mut image = RgbImage::new(100, 100);
    Draw::default().draw_overlay(&mut image, &state);

    let painted = image.pixels().filter(|p| **p == Rgb(LABEL_COLOR)).count();
    assert_eq!(painted, 100 * 20);
  }

  #[test]
  fn rect_outside_the_image_is_skipped() {
    let image = RgbImage::new(10, 10);
    assert!(clip_rect(&Rect::new(20.0, 20.0, 5.0, 5.0), &image).is_none());
    assert!(clip_rect(&Rect::new(0.0, -40.0, 200.0, 20.0), &image).is_none());
    let clipped = clip_rect(&Rect::new(-5.0, -5.0, 10.0, 10.0), &image).expect("clipped");
    assert_eq!((clipped.width(), clipped.height()), (5, 5));
  }
}
