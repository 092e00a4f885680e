// 该文件是 Lingshi （零食识别） 项目的一部分。
// src/frame.rs - 帧定义与预处理
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

use std::{str::FromStr, time::Instant};

use image::{
  Rgb, RgbImage,
  imageops::{self, FilterType},
};
use thiserror::Error;

/// 输入源交付的一次采样，像素缓冲可能无法获取
#[derive(Debug, Clone)]
pub struct Sample {
  timestamp_ms: u64,
  buffer: Option<RgbImage>,
}

impl Sample {
  pub fn new(timestamp_ms: u64, image: RgbImage) -> Self {
    Self {
      timestamp_ms,
      buffer: Some(image),
    }
  }

  /// 像素缓冲缺失的采样
  pub fn unavailable(timestamp_ms: u64) -> Self {
    Self {
      timestamp_ms,
      buffer: None,
    }
  }

  pub fn timestamp_ms(&self) -> u64 {
    self.timestamp_ms
  }

  pub fn has_buffer(&self) -> bool {
    self.buffer.is_some()
  }

  pub(crate) fn into_parts(self) -> (u64, Option<RgbImage>) {
    (self.timestamp_ms, self.buffer)
  }
}

/// 已准入的帧，在推理完成前由推理槽位独占
#[derive(Debug)]
pub struct Frame {
  seq: u64,
  timestamp_ms: u64,
  image: RgbImage,
  admitted_at: Instant,
}

impl Frame {
  pub(crate) fn new(seq: u64, timestamp_ms: u64, image: RgbImage) -> Self {
    Self {
      seq,
      timestamp_ms,
      image,
      admitted_at: Instant::now(),
    }
  }

  /// 准入顺序号，单调递增
  pub fn seq(&self) -> u64 {
    self.seq
  }

  pub fn timestamp_ms(&self) -> u64 {
    self.timestamp_ms
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn admitted_at(&self) -> Instant {
    self.admitted_at
  }

  /// 按裁剪策略缩放到模型输入尺寸
  pub fn prepare(&self, strategy: CropStrategy, size: (u32, u32)) -> RgbImage {
    strategy.apply(&self.image, size)
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("未知的裁剪策略: {0}")]
pub struct UnknownCropStrategy(pub String);

/// 推理前的缩放方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CropStrategy {
  /// 保持宽高比，裁掉超出目标比例的部分
  #[default]
  CenterCrop,
  /// 保持宽高比完整缩放，空白处以黑色填充
  ScaleFit,
  /// 直接拉伸到目标尺寸
  ScaleFill,
}

impl FromStr for CropStrategy {
  type Err = UnknownCropStrategy;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().replace('_', "-").as_str() {
      "center-crop" | "centercrop" => Ok(CropStrategy::CenterCrop),
      "scale-fit" | "scalefit" => Ok(CropStrategy::ScaleFit),
      "scale-fill" | "scalefill" => Ok(CropStrategy::ScaleFill),
      _ => Err(UnknownCropStrategy(s.to_string())),
    }
  }
}

const RESIZE_FILTER: FilterType = FilterType::Triangle;

impl CropStrategy {
  pub fn apply(self, image: &RgbImage, (width, height): (u32, u32)) -> RgbImage {
    let (src_w, src_h) = image.dimensions();
    if src_w == 0 || src_h == 0 || width == 0 || height == 0 {
      return RgbImage::new(width, height);
    }
    if (src_w, src_h) == (width, height) {
      return image.clone();
    }

    let scale_x = width as f64 / src_w as f64;
    let scale_y = height as f64 / src_h as f64;

    match self {
      CropStrategy::ScaleFill => imageops::resize(image, width, height, RESIZE_FILTER),
      CropStrategy::CenterCrop => {
        let scale = scale_x.max(scale_y);
        let crop_w = ((width as f64 / scale).round() as u32).clamp(1, src_w);
        let crop_h = ((height as f64 / scale).round() as u32).clamp(1, src_h);
        let x = (src_w - crop_w) / 2;
        let y = (src_h - crop_h) / 2;
        let cropped = imageops::crop_imm(image, x, y, crop_w, crop_h).to_image();
        imageops::resize(&cropped, width, height, RESIZE_FILTER)
      }
      CropStrategy::ScaleFit => {
        let scale = scale_x.min(scale_y);
        let fit_w = ((src_w as f64 * scale).round() as u32).clamp(1, width);
        let fit_h = ((src_h as f64 * scale).round() as u32).clamp(1, height);
        let resized = imageops::resize(image, fit_w, fit_h, RESIZE_FILTER);
        let mut canvas = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
        let x = ((width - fit_w) / 2) as i64;
        let y = ((height - fit_h) / 2) as i64;
        imageops::overlay(&mut canvas, &resized, x, y);
        canvas
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn split_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, _| {
      if x < width / 4 || x >= width * 3 / 4 {
        Rgb([255, 0, 0])
      } else {
        Rgb([0, 0, 255])
      }
    })
  }

  #[test]
  fn center_crop_drops_the_outer_columns() {
    // 左右各四分之一为红色，中间为蓝色；裁剪为正方形后只剩蓝色
    let image = split_image(200, 100);
    let out = CropStrategy::CenterCrop.apply(&image, (50, 50));
    assert_eq!(out.dimensions(), (50, 50));
    assert_eq!(out.get_pixel(0, 25), &Rgb([0, 0, 255]));
    assert_eq!(out.get_pixel(49, 25), &Rgb([0, 0, 255]));
  }

  #[test]
  fn scale_fit_letterboxes_with_black() {
    let image = RgbImage::from_pixel(200, 100, Rgb([255, 255, 255]));
    let out = CropStrategy::ScaleFit.apply(&image, (50, 50));
    assert_eq!(out.dimensions(), (50, 50));
    assert_eq!(out.get_pixel(25, 0), &Rgb([0, 0, 0]));
    assert_eq!(out.get_pixel(25, 49), &Rgb([0, 0, 0]));
    assert_eq!(out.get_pixel(25, 25), &Rgb([255, 255, 255]));
  }

  #[test]
  fn scale_fill_keeps_outer_columns() {
    let image = split_image(200, 100);
    let out = CropStrategy::ScaleFill.apply(&image, (50, 50));
    assert_eq!(out.dimensions(), (50, 50));
    assert_eq!(out.get_pixel(0, 25), &Rgb([255, 0, 0]));
  }

  #[test]
  fn zero_target_size_yields_an_empty_image() {
    let image = split_image(20, 10);
    for strategy in [
      CropStrategy::CenterCrop,
      CropStrategy::ScaleFit,
      CropStrategy::ScaleFill,
    ] {
      assert_eq!(strategy.apply(&image, (0, 8)).dimensions(), (0, 8));
    }
  }

  #[test]
  fn crop_strategy_parses_common_spellings() {
    assert_eq!("center-crop".parse(), Ok(CropStrategy::CenterCrop));
    assert_eq!("scale_fit".parse(), Ok(CropStrategy::ScaleFit));
    assert_eq!("ScaleFill".parse(), Ok(CropStrategy::ScaleFill));
    assert!("stretch".parse::<CropStrategy>().is_err());
  }

  #[test]
  fn unavailable_sample_has_no_buffer() {
    let sample = Sample::unavailable(42);
    assert!(!sample.has_buffer());
    assert_eq!(sample.timestamp_ms(), 42);
  }
}
