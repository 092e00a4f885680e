// 该文件是 Lingshi （零食识别） 项目的一部分。
// src/output/save_image_file.rs - 保存叠加后的预览快照
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

use std::path::{Path, PathBuf};

use image::RgbImage;

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{CropStrategy, Frame},
  interpret::{Decision, Rect, ViewSize},
  output::{
    DEFAULT_VIEW_SIZE, Overlay, OverlayState, Region,
    draw::{Draw, DrawError},
  },
  query_value,
};

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("绘制初始化错误: {0}")]
  DrawError(#[from] DrawError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 把叠加层绘制到完成推理的帧上，并覆盖保存为同一个图像文件
///
/// 帧先按 `crop` 缩放到预览尺寸，模拟实时预览画面。
/// 推理失败时没有帧归还，叠加层绘制在上一帧或黑色画布上。
pub struct SnapshotOverlay {
  path: PathBuf,
  state: OverlayState,
  crop: CropStrategy,
  draw: Draw,
  background: Option<RgbImage>,
}

impl FromUrlWithScheme for SnapshotOverlay {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SnapshotOverlay {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let width = query_value(uri, "width").unwrap_or(DEFAULT_VIEW_SIZE.width);
    let height = query_value(uri, "height").unwrap_or(DEFAULT_VIEW_SIZE.height);
    let crop = query_value(uri, "crop").unwrap_or(CropStrategy::ScaleFill);
    let draw = match query_value::<String>(uri, "font") {
      Some(font) => Draw::default().with_font_file(font)?,
      None => Draw::default(),
    };

    Ok(Self {
      path: PathBuf::from(uri.path()),
      state: OverlayState::new(ViewSize::new(width, height)),
      crop,
      draw,
      background: None,
    })
  }
}

impl SnapshotOverlay {
  pub fn new(path: impl Into<PathBuf>, view: ViewSize) -> Self {
    Self {
      path: path.into(),
      state: OverlayState::new(view),
      crop: CropStrategy::ScaleFill,
      draw: Draw::default(),
      background: None,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn state(&self) -> &OverlayState {
    &self.state
  }

  fn save_image(&self, image: RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    debug!("保存预览快照到文件: {}", self.path.display());
    Ok(())
  }
}

impl Overlay for SnapshotOverlay {
  type Error = SaveImageFileError;

  fn view_size(&self) -> ViewSize {
    self.state.view_size()
  }

  fn set_frame(&mut self, region: Region, rect: Rect) {
    self.state.set_frame(region, rect);
  }

  fn show(&mut self, decision: &Decision) {
    self.state.show(decision);
  }

  fn clear(&mut self) {
    self.state.clear();
  }

  fn commit(&mut self, frame: Option<&Frame>) -> Result<(), Self::Error> {
    let view = self.state.view_size();
    let size = (view.width.round().max(1.0) as u32, view.height.round().max(1.0) as u32);

    let mut image = match frame {
      Some(frame) => {
        let prepared = frame.prepare(self.crop, size);
        self.background = Some(prepared.clone());
        prepared
      }
      None => match &self.background {
        Some(background) if background.dimensions() == size => background.clone(),
        _ => {
          debug!("没有可用的帧, 使用空白画布");
          RgbImage::new(size.0, size.1)
        }
      },
    };
    self.draw.draw_overlay(&mut image, &self.state);
    self.save_image(image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  #[test]
  fn snapshot_is_written_at_view_size() {
    let dir = std::env::temp_dir().join(format!("lingshi-snapshot-{}", std::process::id()));
    let path = dir.join("preview.png");
    let url = Url::parse(&format!("image://{}?width=64&height=32", path.display())).expect("url");
    let mut overlay = SnapshotOverlay::from_url(&url).expect("overlay");

    overlay.clear();
    let frame = Frame::new(1, 0, RgbImage::from_pixel(128, 128, Rgb([10, 20, 30])));
    overlay.commit(Some(&frame)).expect("commit");

    let saved = image::open(&path).expect("saved image").to_rgb8();
    let _ = std::fs::remove_dir_all(&dir);
    assert_eq!(saved.dimensions(), (64, 32));
    assert_eq!(saved.get_pixel(5, 5), &Rgb([10, 20, 30]));
  }

  #[test]
  fn failure_without_frame_is_drawn_on_a_blank_canvas() {
    let dir = std::env::temp_dir().join(format!("lingshi-snapshot-fail-{}", std::process::id()));
    let path = dir.join("preview.png");
    let mut overlay = SnapshotOverlay::new(&path, ViewSize::new(100.0, 50.0));

    overlay.show(&Decision::Failed {
      message: "boom".into(),
    });
    overlay.commit(None).expect("commit");

    let saved = image::open(&path).expect("saved image").to_rgb8();
    let _ = std::fs::remove_dir_all(&dir);
    assert_eq!(saved.dimensions(), (100, 50));
    // 错误文字的标签框画在左上角
    assert_ne!(saved.get_pixel(5, 5), &Rgb([0, 0, 0]));
    assert_eq!(saved.get_pixel(5, 40), &Rgb([0, 0, 0]));
  }

  #[test]
  fn failure_after_a_frame_reuses_that_frame() {
    let dir = std::env::temp_dir().join(format!("lingshi-snapshot-reuse-{}", std::process::id()));
    let path = dir.join("preview.png");
    let mut overlay = SnapshotOverlay::new(&path, ViewSize::new(100.0, 50.0));

    overlay.clear();
    let frame = Frame::new(1, 0, RgbImage::from_pixel(100, 50, Rgb([10, 20, 30])));
    overlay.commit(Some(&frame)).expect("first commit");
    overlay.show(&Decision::Failed {
      message: "boom".into(),
    });
    overlay.commit(None).expect("second commit");

    let saved = image::open(&path).expect("saved image").to_rgb8();
    let _ = std::fs::remove_dir_all(&dir);
    assert_eq!(saved.get_pixel(5, 40), &Rgb([10, 20, 30]));
    assert_ne!(saved.get_pixel(5, 5), &Rgb([10, 20, 30]));
  }
}
