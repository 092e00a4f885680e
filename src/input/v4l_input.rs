// 该文件是 Lingshi （零食识别） 项目的一部分。
// src/input/v4l_input.rs - V4L 摄像头输入
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

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;
use v4l::{
  FourCC,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  video::Capture,
};

use crate::{FromUrl, FromUrlWithScheme, frame::Sample, input::now_ms, query_value};

const DEFAULT_DEVICE: &str = "/dev/video0";
const BUFFER_COUNT: u32 = 4;
/// 连续采集失败达到该次数后认为设备已断开
const MAX_CONSECUTIVE_FAILURES: usize = 30;

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(String),
}

/// 以 RGB24 格式从摄像头持续采集帧
pub struct V4lInput {
  stream: Stream<'static>,
  width: u32,
  height: u32,
  failures: usize,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemaMismatch);
    }

    // v4l:///dev/video0?width=640&height=480
    let device_path = if url.path().is_empty() || url.path() == "/" {
      DEFAULT_DEVICE
    } else {
      url.path()
    };
    let device = v4l::Device::with_path(device_path)?;

    let mut format = device.format()?;
    if let Some(width) = query_value(url, "width") {
      format.width = width;
    }
    if let Some(height) = query_value(url, "height") {
      format.height = height;
    }
    format.fourcc = FourCC::new(b"RGB3");
    let format = device.set_format(&format)?;
    if format.fourcc != FourCC::new(b"RGB3") {
      return Err(V4lInputError::UnsupportedPixelFormat(format.fourcc.to_string()));
    }
    info!(
      "打开摄像头 {}: {}x{} {}",
      device_path, format.width, format.height, format.fourcc
    );

    let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)?;

    Ok(Self {
      stream,
      width: format.width,
      height: format.height,
      failures: 0,
    })
  }
}

impl V4lInput {
  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  fn capture(&mut self) -> Option<RgbImage> {
    match self.stream.next() {
      Ok((buf, _meta)) => {
        let expected = (self.width * self.height * 3) as usize;
        if buf.len() < expected {
          warn!("采集的缓冲区大小不匹配: {} < {}", buf.len(), expected);
          return None;
        }
        RgbImage::from_raw(self.width, self.height, buf[..expected].to_vec())
      }
      Err(e) => {
        warn!("采集帧失败: {}", e);
        None
      }
    }
  }
}

impl Iterator for V4lInput {
  type Item = Sample;

  fn next(&mut self) -> Option<Self::Item> {
    let timestamp = now_ms();
    match self.capture() {
      Some(image) => {
        self.failures = 0;
        Some(Sample::new(timestamp, image))
      }
      None => {
        self.failures += 1;
        if self.failures >= MAX_CONSECUTIVE_FAILURES {
          error!("摄像头连续 {} 次采集失败, 停止输入", self.failures);
          return None;
        }
        Some(Sample::unavailable(timestamp))
      }
    }
  }
}
