// 该文件是 Lingshi （零食识别） 项目的一部分。
// src/model.rs - 模型
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

use std::{path::Path, sync::Arc};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 一个长期存活的模型对象，可被多个推理并发调用
pub trait Model {
  type Error;

  /// 模型输入尺寸 (宽, 高)
  fn input_size(&self) -> (u32, u32);
  fn infer(&self, input: &RgbImage) -> Result<RawOutput, Self::Error>;
}

/// 模型的原始输出特征
///
/// 非空时第 0 个特征为各类别概率，第 1 个特征为归一化边框
/// `[x_min, x_max, y_min, y_max]`。空集合表示没有识别结果。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOutput {
  pub features: Vec<Vec<f32>>,
}

#[derive(Error, Debug, PartialEq)]
pub enum MalformedOutput {
  #[error("模型输出特征数量不足: 期望 {expected}, 实际 {found}")]
  MissingFeature { expected: usize, found: usize },
  #[error("类别概率数量不足: 期望 {expected}, 实际 {found}")]
  TooFewClasses { expected: usize, found: usize },
  #[error("边框坐标数量不足: 期望 4, 实际 {0}")]
  TooFewBoxValues(usize),
}

impl RawOutput {
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn new(probabilities: Vec<f32>, bbox: [f32; 4]) -> Self {
    Self {
      features: vec![probabilities, bbox.to_vec()],
    }
  }

  pub fn is_empty(&self) -> bool {
    self.features.is_empty()
  }

  /// 取出前 `classes` 个概率与边框，空输出返回 `None`
  pub fn detection(&self, classes: usize) -> Result<Option<RawDetection>, MalformedOutput> {
    let (probabilities, bbox) = match self.features.as_slice() {
      [] => return Ok(None),
      [probabilities, bbox, ..] => (probabilities, bbox),
      _ => {
        return Err(MalformedOutput::MissingFeature {
          expected: 2,
          found: self.features.len(),
        });
      }
    };

    if probabilities.len() < classes {
      return Err(MalformedOutput::TooFewClasses {
        expected: classes,
        found: probabilities.len(),
      });
    }
    let [x_min, x_max, y_min, y_max, ..] = bbox.as_slice() else {
      return Err(MalformedOutput::TooFewBoxValues(bbox.len()));
    };

    Ok(Some(RawDetection {
      probabilities: probabilities[..classes].into(),
      bbox: [*x_min, *x_max, *y_min, *y_max],
    }))
  }
}

/// 一次推理的原始识别结果
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
  pub probabilities: Box<[f32]>,
  pub bbox: [f32; 4], // [x_min, x_max, y_min, y_max]
}

pub const SNACK_LABELS: [&str; 20] = [
  "apple",
  "banana",
  "cake",
  "candy",
  "carrot",
  "cookie",
  "doughnut",
  "grape",
  "hot dog",
  "ice cream",
  "juice",
  "muffin",
  "orange",
  "pineapple",
  "popcorn",
  "pretzel",
  "salad",
  "strawberry",
  "waffle",
  "watermelon",
];

#[derive(Error, Debug)]
pub enum LabelTableError {
  #[error("标签表为空")]
  Empty,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签文件格式错误: {0}")]
  ParseError(#[from] serde_json::Error),
}

/// 类别序号到名称的只读映射，与模型输出按序号对齐
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTable {
  names: Arc<[String]>,
}

impl Default for LabelTable {
  fn default() -> Self {
    Self::snacks()
  }
}

impl LabelTable {
  pub fn snacks() -> Self {
    Self {
      names: SNACK_LABELS.iter().map(|s| s.to_string()).collect(),
    }
  }

  pub fn new<I, S>(names: I) -> Result<Self, LabelTableError>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let names: Arc<[String]> = names.into_iter().map(Into::into).collect();
    if names.is_empty() {
      return Err(LabelTableError::Empty);
    }
    Ok(Self { names })
  }

  /// 从 JSON 字符串数组文件读取标签
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LabelTableError> {
    let data = std::fs::read_to_string(path)?;
    let names: Vec<String> = serde_json::from_str(&data)?;
    Self::new(names)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&str> {
    self.names.get(index).map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }
}

mod replay;
pub use self::replay::{ReplayEntry, ReplayModel, ReplayModelError};
