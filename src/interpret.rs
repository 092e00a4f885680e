// 该文件是 Lingshi （零食识别） 项目的一部分。
// src/interpret.rs - 推理结果解析
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
use tracing::debug;

use crate::{
  engine::EngineError,
  model::{LabelTable, RawDetection, RawOutput},
};

// 标签框与置信度框固定尺寸，依次叠放在检测框上方
pub(crate) const OVERLAY_BOX_WIDTH: f64 = 200.0;
pub(crate) const OVERLAY_BOX_HEIGHT: f64 = 20.0;
const LABEL_BOX_OFFSET: f64 = 20.0;
const CONFIDENCE_BOX_OFFSET: f64 = 40.0;

/// 预览画面尺寸（像素）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ViewSize {
  pub width: f64,
  pub height: f64,
}

impl ViewSize {
  pub const fn new(width: f64, height: f64) -> Self {
    Self { width, height }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Rect {
  pub x: f64,
  pub y: f64,
  pub width: f64,
  pub height: f64,
}

impl Rect {
  pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  pub fn max_x(&self) -> f64 {
    self.x + self.width
  }

  pub fn max_y(&self) -> f64 {
    self.y + self.height
  }
}

/// 单个识别结果及其在预览画面中的三个区域
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub class_id: usize,
  pub label: String,
  pub confidence: f32,
  pub view_rect: Rect,
  pub label_rect: Rect,
  pub confidence_rect: Rect,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
  Detected(Detection),
  /// 没有识别结果，叠加层应被清除
  NoDetection,
  /// 推理失败，只用于显示文字
  Failed { message: String },
}

impl Decision {
  pub fn is_detected(&self) -> bool {
    matches!(self, Decision::Detected(_))
  }
}

/// 取最大值的下标，相同值取最小下标，NaN 不参与比较
pub fn argmax(values: &[f32]) -> Option<(usize, f32)> {
  let mut best: Option<(usize, f32)> = None;
  for (index, &value) in values.iter().enumerate() {
    if value.is_nan() {
      continue;
    }
    match best {
      Some((_, current)) if value <= current => {}
      _ => best = Some((index, value)),
    }
  }
  best
}

/// 把归一化边框 `[x_min, x_max, y_min, y_max]` 换算为
/// (检测框, 标签框, 置信度框)
pub fn denormalize(bbox: [f32; 4], view: ViewSize) -> (Rect, Rect, Rect) {
  let [x_min, x_max, y_min, y_max] = bbox.map(f64::from);
  let x_min = x_min * view.width;
  let x_max = x_max * view.width;
  let y_min = y_min * view.height;
  let y_max = y_max * view.height;

  let view_rect = Rect::new(x_min, y_min, x_max - x_min, y_max - y_min);
  let label_rect = Rect::new(
    x_min,
    y_min - LABEL_BOX_OFFSET,
    OVERLAY_BOX_WIDTH,
    OVERLAY_BOX_HEIGHT,
  );
  let confidence_rect = Rect::new(
    x_min,
    y_min - CONFIDENCE_BOX_OFFSET,
    OVERLAY_BOX_WIDTH,
    OVERLAY_BOX_HEIGHT,
  );
  (view_rect, label_rect, confidence_rect)
}

/// 把模型原始输出转换为唯一的展示决定
#[derive(Debug, Clone, Default)]
pub struct Interpreter {
  labels: LabelTable,
}

impl Interpreter {
  pub fn new(labels: LabelTable) -> Self {
    Self { labels }
  }

  pub fn labels(&self) -> &LabelTable {
    &self.labels
  }

  pub fn interpret(&self, outcome: &Result<RawOutput, EngineError>, view: ViewSize) -> Decision {
    let output = match outcome {
      Ok(output) => output,
      Err(EngineError::InferenceFailed(message)) => {
        return Decision::Failed {
          message: message.clone(),
        };
      }
    };

    match output.detection(self.labels.len()) {
      Ok(Some(raw)) => self.decide(&raw, view),
      Ok(None) => Decision::NoDetection,
      Err(e) => Decision::Failed {
        message: e.to_string(),
      },
    }
  }

  pub fn decide(&self, raw: &RawDetection, view: ViewSize) -> Decision {
    let Some((class_id, confidence)) = argmax(&raw.probabilities) else {
      return Decision::Failed {
        message: "类别概率全部无效".to_string(),
      };
    };
    let (view_rect, label_rect, confidence_rect) = denormalize(raw.bbox, view);
    let label = self.labels.get(class_id).unwrap_or("???").to_string();
    debug!("识别结果: {} ({:.3}) at {:?}", label, confidence, view_rect);

    Decision::Detected(Detection {
      class_id,
      label,
      confidence,
      view_rect,
      label_rect,
      confidence_rect,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn assert_rect(actual: Rect, expected: (f64, f64, f64, f64)) {
    let actual_tuple = (actual.x, actual.y, actual.width, actual.height);
    let close = |a: f64, b: f64| (a - b).abs() < 1e-6;
    assert!(
      close(actual.x, expected.0)
        && close(actual.y, expected.1)
        && close(actual.width, expected.2)
        && close(actual.height, expected.3),
      "{actual_tuple:?} != {expected:?}"
    );
  }

  fn probabilities(pairs: &[(usize, f32)]) -> Vec<f32> {
    let mut values = vec![0.01; 20];
    for &(index, value) in pairs {
      values[index] = value;
    }
    values
  }

  #[test]
  fn argmax_picks_the_largest_value() {
    let mut values = probabilities(&[(0, 0.1), (1, 0.05), (2, 0.7)]);
    values[19] = 0.3;
    assert_eq!(argmax(&values), Some((2, 0.7)));
  }

  #[test]
  fn argmax_ties_resolve_to_lowest_index() {
    let values = probabilities(&[(4, 0.6), (9, 0.6), (15, 0.6)]);
    assert_eq!(argmax(&values), Some((4, 0.6)));
  }

  #[test]
  fn argmax_accepts_unnormalized_and_negative_values() {
    assert_eq!(argmax(&[-3.0, -1.5, -2.0]), Some((1, -1.5)));
    assert_eq!(argmax(&[4.0, 12.5, 3.0]), Some((1, 12.5)));
  }

  #[test]
  fn argmax_skips_nan() {
    assert_eq!(argmax(&[f32::NAN, 0.2, f32::NAN]), Some((1, 0.2)));
    assert_eq!(argmax(&[f32::NAN, f32::NAN]), None);
    assert_eq!(argmax(&[]), None);
  }

  #[test]
  fn box_is_denormalized_to_the_preview() {
    let (view, label, confidence) =
      denormalize([0.2, 0.6, 0.3, 0.5], ViewSize::new(400.0, 800.0));
    assert_rect(view, (80.0, 240.0, 160.0, 160.0));
    assert_rect(label, (80.0, 220.0, 200.0, 20.0));
    assert_rect(confidence, (80.0, 200.0, 200.0, 20.0));
  }

  #[test]
  fn interpret_builds_a_detection() {
    let interpreter = Interpreter::default();
    let output = RawOutput::new(probabilities(&[(7, 0.9)]), [0.2, 0.6, 0.3, 0.5]);
    let decision = interpreter.interpret(&Ok(output), ViewSize::new(400.0, 800.0));

    let Decision::Detected(detection) = decision else {
      panic!("expected a detection, got {decision:?}");
    };
    assert_eq!(detection.class_id, 7);
    assert_eq!(detection.label, "grape");
    assert_eq!(detection.confidence, 0.9);
    assert_rect(detection.view_rect, (80.0, 240.0, 160.0, 160.0));
  }

  #[test]
  fn empty_output_means_no_detection() {
    let interpreter = Interpreter::default();
    assert_eq!(
      interpreter.interpret(&Ok(RawOutput::empty()), ViewSize::new(1.0, 1.0)),
      Decision::NoDetection
    );
  }

  #[test]
  fn engine_failure_becomes_a_text_decision() {
    let interpreter = Interpreter::default();
    let decision = interpreter.interpret(
      &Err(EngineError::InferenceFailed("out of memory".into())),
      ViewSize::new(1.0, 1.0),
    );
    assert_eq!(
      decision,
      Decision::Failed {
        message: "out of memory".into()
      }
    );
  }

  #[test]
  fn malformed_output_becomes_a_text_decision() {
    let interpreter = Interpreter::default();
    let output = RawOutput::new(vec![0.5; 3], [0.0, 1.0, 0.0, 1.0]);
    let decision = interpreter.interpret(&Ok(output), ViewSize::new(1.0, 1.0));
    assert!(matches!(decision, Decision::Failed { .. }));
  }

  #[test]
  fn all_nan_probabilities_fail() {
    let interpreter = Interpreter::default();
    let output = RawOutput::new(vec![f32::NAN; 20], [0.0, 1.0, 0.0, 1.0]);
    let decision = interpreter.interpret(&Ok(output), ViewSize::new(1.0, 1.0));
    assert!(matches!(decision, Decision::Failed { .. }));
  }
}
