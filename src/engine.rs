// 该文件是 Lingshi （零食识别） 项目的一部分。
// src/engine.rs - 推理引擎适配
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
  sync::Arc,
  thread,
  time::{Duration, Instant},
};

use crossbeam_channel::Sender;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{
  admission::Permit,
  frame::{CropStrategy, Frame},
  model::{Model, RawOutput},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
  #[error("推理失败: {0}")]
  InferenceFailed(String),
}

/// 推理结束后送回展示端的消息
#[derive(Debug)]
pub struct Completed {
  pub seq: u64,
  /// 引擎未归还帧时为空
  pub frame: Option<Frame>,
  pub outcome: Result<RawOutput, EngineError>,
  /// 从准入到完成的耗时
  pub elapsed: Duration,
}

/// 单次推理的回调句柄
///
/// 持有该帧的推理槽位。调用 [`Completion::complete`] 或被析构时，结果
/// 恰好送出一次，随后槽位归还。引擎线程 panic 或忘记回调时，析构会
/// 送出一个失败结果。
pub struct Completion {
  seq: u64,
  admitted_at: Instant,
  inner: Option<(Permit, Sender<Completed>)>,
}

impl std::fmt::Debug for Completion {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Completion")
      .field("seq", &self.seq)
      .field("pending", &self.inner.is_some())
      .finish()
  }
}

impl Completion {
  pub(crate) fn new(
    seq: u64,
    admitted_at: Instant,
    permit: Permit,
    completions: Sender<Completed>,
  ) -> Self {
    Self {
      seq,
      admitted_at,
      inner: Some((permit, completions)),
    }
  }

  pub fn seq(&self) -> u64 {
    self.seq
  }

  /// 回报推理结果并归还帧
  pub fn complete(mut self, frame: Frame, outcome: Result<RawOutput, EngineError>) {
    self.finish(Some(frame), outcome);
  }

  /// 回报失败，帧已不可用
  pub fn fail(mut self, message: impl Into<String>) {
    self.finish(None, Err(EngineError::InferenceFailed(message.into())));
  }

  fn finish(&mut self, frame: Option<Frame>, outcome: Result<RawOutput, EngineError>) {
    let Some((permit, completions)) = self.inner.take() else {
      return;
    };

    let completed = Completed {
      seq: self.seq,
      frame,
      outcome,
      elapsed: self.admitted_at.elapsed(),
    };
    if completions.send(completed).is_err() {
      debug!("展示端已关闭, 丢弃第 {} 帧的结果", self.seq);
    }
    permit.release();
  }
}

impl Drop for Completion {
  fn drop(&mut self) {
    if self.inner.is_some() {
      warn!("第 {} 帧的推理请求未回调即被丢弃", self.seq);
      self.finish(
        None,
        Err(EngineError::InferenceFailed("推理请求未完成".to_string())),
      );
    }
  }
}

/// 异步推理引擎
pub trait Engine {
  /// 提交一帧；推理结束后必须通过 `completion` 回报恰好一次
  fn submit(&self, frame: Frame, completion: Completion);
}

impl<E: Engine + ?Sized> Engine for Arc<E> {
  fn submit(&self, frame: Frame, completion: Completion) {
    (**self).submit(frame, completion)
  }
}

/// 为每个请求启动一个推理线程的引擎
///
/// 并发数只受准入槽位限制，模型对象在所有请求之间共享。
pub struct ThreadedEngine<M> {
  model: Arc<M>,
  crop: CropStrategy,
}

impl<M> ThreadedEngine<M> {
  pub fn new(model: M) -> Self {
    Self {
      model: Arc::new(model),
      crop: CropStrategy::default(),
    }
  }

  pub fn with_crop_strategy(mut self, crop: CropStrategy) -> Self {
    self.crop = crop;
    self
  }

  pub fn model(&self) -> &M {
    &self.model
  }
}

impl<M, ME> Engine for ThreadedEngine<M>
where
  M: Model<Error = ME> + Send + Sync + 'static,
  ME: std::fmt::Display,
{
  fn submit(&self, frame: Frame, completion: Completion) {
    let model = Arc::clone(&self.model);
    let crop = self.crop;
    let seq = frame.seq();

    let job = move || {
      let input = frame.prepare(crop, model.input_size());
      let now = Instant::now();
      let outcome = model
        .infer(&input)
        .map_err(|e| EngineError::InferenceFailed(e.to_string()));
      debug!("第 {} 帧推理完成，耗时: {:.2?}", seq, now.elapsed());
      completion.complete(frame, outcome);
    };

    // 启动失败时任务被丢弃，回调句柄会自行回报失败
    if let Err(e) = thread::Builder::new()
      .name(format!("lingshi-infer-{seq}"))
      .spawn(job)
    {
      error!("无法启动推理线程: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    admission::Admission,
    model::{ReplayEntry, ReplayModel},
  };
  use crossbeam_channel::unbounded;
  use image::RgbImage;

  fn frame(seq: u64) -> Frame {
    Frame::new(seq, 0, RgbImage::new(16, 8))
  }

  #[test]
  fn complete_sends_once_and_releases_the_slot() {
    let admission = Admission::new(1);
    let (tx, rx) = unbounded();
    let completion = Completion::new(7, Instant::now(), admission.admit(), tx);
    assert_eq!(admission.outstanding(), 1);

    completion.complete(frame(7), Ok(RawOutput::empty()));
    assert_eq!(admission.outstanding(), 0);

    let completed = rx.try_recv().expect("one message");
    assert_eq!(completed.seq, 7);
    assert!(completed.frame.is_some());
    assert_eq!(completed.outcome, Ok(RawOutput::empty()));
    assert!(rx.try_recv().is_err());
  }

  #[test]
  fn dropped_completion_reports_failure() {
    let admission = Admission::new(1);
    let (tx, rx) = unbounded();
    drop(Completion::new(3, Instant::now(), admission.admit(), tx));

    assert_eq!(admission.outstanding(), 0);
    let completed = rx.try_recv().expect("failure message");
    assert!(completed.frame.is_none());
    assert!(matches!(completed.outcome, Err(EngineError::InferenceFailed(_))));
  }

  #[test]
  fn closed_presenter_still_releases_the_slot() {
    let admission = Admission::new(1);
    let (tx, rx) = unbounded();
    drop(rx);
    Completion::new(1, Instant::now(), admission.admit(), tx).fail("gone");
    assert_eq!(admission.outstanding(), 0);
  }

  #[test]
  fn threaded_engine_runs_the_model() {
    let model = ReplayModel::new(
      vec![ReplayEntry::Detection {
        probabilities: vec![0.2, 0.8],
        bbox: [0.0, 0.5, 0.0, 0.5],
      }],
      (4, 4),
    )
    .expect("model");
    let engine = ThreadedEngine::new(model).with_crop_strategy(CropStrategy::ScaleFit);
    let admission = Admission::new(1);
    let (tx, rx) = unbounded();

    engine.submit(frame(1), Completion::new(1, Instant::now(), admission.admit(), tx));

    let completed = rx
      .recv_timeout(Duration::from_secs(5))
      .expect("completion");
    assert_eq!(completed.seq, 1);
    assert_eq!(
      completed.outcome,
      Ok(RawOutput::new(vec![0.2, 0.8], [0.0, 0.5, 0.0, 0.5]))
    );
    // 原始帧随结果归还，尺寸不受预处理影响
    assert_eq!(completed.frame.map(|f| f.width()), Some(16));
  }

  struct PanickingModel;

  impl Model for PanickingModel {
    type Error = EngineError;

    fn input_size(&self) -> (u32, u32) {
      (2, 2)
    }

    fn infer(&self, _input: &RgbImage) -> Result<RawOutput, Self::Error> {
      panic!("model crashed");
    }
  }

  #[test]
  fn panicking_model_still_completes() {
    let engine = ThreadedEngine::new(PanickingModel);
    let admission = Admission::new(1);
    let (tx, rx) = unbounded();

    engine.submit(frame(9), Completion::new(9, Instant::now(), admission.admit(), tx));

    let completed = rx
      .recv_timeout(Duration::from_secs(5))
      .expect("completion");
    assert!(completed.outcome.is_err());
    // 槽位在发送结果之后归还
    let permit = admission.admit();
    drop(permit);
  }
}
