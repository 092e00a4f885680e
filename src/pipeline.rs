// 该文件是 Lingshi （零食识别） 项目的一部分。
// src/pipeline.rs - 帧准入、推理提交与结果展示的连接
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

//! 生产端 [`Pipeline`] 在采集线程上准入帧并提交推理，
//! 消费端 [`Presenter`] 在单一线程上解释结果并更新叠加层。

use std::{
  sync::atomic::{AtomicU64, Ordering},
  time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  admission::{Admission, DEFAULT_MAX_INFLIGHT},
  engine::{Completed, Completion, Engine, ThreadedEngine},
  frame::{CropStrategy, Frame, Sample},
  interpret::{Decision, Interpreter},
  model::LabelTable,
  output::Overlay,
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
  #[error("最大在途推理数必须大于 0")]
  ZeroInflight,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PipelineError {
  #[error("第 {timestamp_ms} 毫秒的帧缓冲不可用")]
  FrameUnavailable { timestamp_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub max_inflight: usize,
  pub labels: LabelTable,
  pub crop_strategy: CropStrategy,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      max_inflight: DEFAULT_MAX_INFLIGHT,
      labels: LabelTable::snacks(),
      crop_strategy: CropStrategy::default(),
    }
  }
}

impl PipelineConfig {
  pub fn with_max_inflight(mut self, max_inflight: usize) -> Self {
    self.max_inflight = max_inflight;
    self
  }

  pub fn with_labels(mut self, labels: LabelTable) -> Self {
    self.labels = labels;
    self
  }

  pub fn with_crop_strategy(mut self, crop_strategy: CropStrategy) -> Self {
    self.crop_strategy = crop_strategy;
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.max_inflight == 0 {
      return Err(ConfigError::ZeroInflight);
    }
    Ok(())
  }

  /// 按配置的裁剪策略为模型构建线程引擎
  pub fn threaded_engine<M>(&self, model: M) -> ThreadedEngine<M> {
    ThreadedEngine::new(model).with_crop_strategy(self.crop_strategy)
  }
}

/// 构建一对相连的生产端与消费端
pub fn channel<E, O>(
  config: PipelineConfig,
  engine: E,
  overlay: O,
) -> Result<(Pipeline<E>, Presenter<O>), ConfigError>
where
  E: Engine,
  O: Overlay,
  O::Error: std::fmt::Display,
{
  config.validate()?;
  info!(
    "推理流水线: 最大在途 {}, {} 个类别, 裁剪策略 {:?}",
    config.max_inflight,
    config.labels.len(),
    config.crop_strategy
  );

  let (tx, rx) = unbounded();
  let pipeline = Pipeline {
    admission: Admission::new(config.max_inflight),
    engine,
    next_seq: AtomicU64::new(1),
    completions: tx,
  };
  let presenter = Presenter::new(Interpreter::new(config.labels), overlay, rx);
  Ok((pipeline, presenter))
}

pub struct Pipeline<E> {
  admission: Admission,
  engine: E,
  next_seq: AtomicU64,
  completions: Sender<Completed>,
}

impl<E: Engine> Pipeline<E> {
  pub fn admission(&self) -> &Admission {
    &self.admission
  }

  pub fn engine(&self) -> &E {
    &self.engine
  }

  /// 处理一帧采样，返回分配的帧序号
  ///
  /// 先检查缓冲，缺失的帧不占用槽位也不分配序号。
  /// 槽位已满时阻塞调用线程，直到有推理完成。
  pub fn on_frame(&self, sample: Sample) -> Result<u64, PipelineError> {
    let (timestamp_ms, buffer) = sample.into_parts();
    let Some(image) = buffer else {
      warn!("帧缓冲不可用 ({} ms), 跳过该帧", timestamp_ms);
      return Err(PipelineError::FrameUnavailable { timestamp_ms });
    };

    let permit = self.admission.admit();
    let seq = self.next_seq.fetch_add(1, Ordering::AcqRel);
    let frame = Frame::new(seq, timestamp_ms, image);
    let completion = Completion::new(seq, frame.admitted_at(), permit, self.completions.clone());

    debug!("提交第 {} 帧 ({}x{})", seq, frame.width(), frame.height());
    self.engine.submit(frame, completion);
    Ok(seq)
  }
}

/// 只放行序号大于已应用序号的结果
#[derive(Debug, Default, Clone, Copy)]
pub struct SequenceGate {
  last_applied: Option<u64>,
}

impl SequenceGate {
  pub fn last_applied(&self) -> Option<u64> {
    self.last_applied
  }

  pub fn try_pass(&mut self, seq: u64) -> bool {
    match self.last_applied {
      Some(last) if seq <= last => false,
      _ => {
        self.last_applied = Some(seq);
        true
      }
    }
  }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PresenterStats {
  pub shown: usize,
  pub cleared: usize,
  pub failed: usize,
  /// 晚于更新帧到达而被丢弃的结果
  pub stale: usize,
  pub commit_errors: usize,
  /// 已应用结果从准入到完成的总耗时
  pub total_latency: Duration,
}

impl PresenterStats {
  pub fn applied(&self) -> usize {
    self.shown + self.cleared + self.failed
  }

  pub fn received(&self) -> usize {
    self.applied() + self.stale
  }

  pub fn mean_latency(&self) -> Option<Duration> {
    let applied = self.applied();
    (applied > 0).then(|| {
      let nanos = self.total_latency.as_nanos() / applied as u128;
      Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    })
  }
}

pub struct Presenter<O> {
  interpreter: Interpreter,
  overlay: O,
  completions: Receiver<Completed>,
  gate: SequenceGate,
  stats: PresenterStats,
}

impl<O> Presenter<O>
where
  O: Overlay,
  O::Error: std::fmt::Display,
{
  fn new(interpreter: Interpreter, overlay: O, completions: Receiver<Completed>) -> Self {
    Self {
      interpreter,
      overlay,
      completions,
      gate: SequenceGate::default(),
      stats: PresenterStats::default(),
    }
  }

  pub fn overlay(&self) -> &O {
    &self.overlay
  }

  pub fn stats(&self) -> PresenterStats {
    self.stats
  }

  /// 应用一个完成的推理结果，被序号闸门拦下时返回 `None`
  pub fn step(&mut self, completed: Completed) -> Option<Decision> {
    let Completed {
      seq,
      frame,
      outcome,
      elapsed,
    } = completed;

    if !self.gate.try_pass(seq) {
      debug!(
        "第 {} 帧结果晚于第 {:?} 帧, 丢弃",
        seq,
        self.gate.last_applied()
      );
      self.stats.stale += 1;
      return None;
    }

    let decision = self.interpreter.interpret(&outcome, self.overlay.view_size());
    match &decision {
      Decision::NoDetection => {
        self.overlay.clear();
        self.stats.cleared += 1;
      }
      Decision::Detected(detection) => {
        debug!(
          "第 {} 帧: {} ({:.3}), 耗时 {:.2?}",
          seq, detection.label, detection.confidence, elapsed
        );
        self.overlay.show(&decision);
        self.stats.shown += 1;
      }
      Decision::Failed { message } => {
        warn!("第 {} 帧推理失败: {}", seq, message);
        self.overlay.show(&decision);
        self.stats.failed += 1;
      }
    }
    self.stats.total_latency += elapsed;

    if let Err(e) = self.overlay.commit(frame.as_ref()) {
      warn!("提交叠加层失败: {}", e);
      self.stats.commit_errors += 1;
    }
    Some(decision)
  }

  /// 在超时内等待并应用下一个结果
  ///
  /// 超时返回 `Ok(false)`，生产端与所有在途请求都已结束时返回 `Err`。
  pub fn recv_timeout(&mut self, timeout: Duration) -> Result<bool, RecvTimeoutError> {
    let completed = self.completions.recv_timeout(timeout);
    match completed {
      Ok(completed) => {
        self.step(completed);
        Ok(true)
      }
      Err(RecvTimeoutError::Timeout) => Ok(false),
      Err(e) => Err(e),
    }
  }

  /// 应用所有已到达的结果，不阻塞
  pub fn drain(&mut self) -> usize {
    let mut count = 0;
    while let Ok(completed) = self.completions.try_recv() {
      self.step(completed);
      count += 1;
    }
    count
  }

  /// 持续应用结果，直到生产端被丢弃且在途推理全部完成
  pub fn run(mut self) -> (O, PresenterStats) {
    while let Ok(completed) = self.completions.recv() {
      self.step(completed);
    }
    info!(
      "展示结束: 显示 {}, 清除 {}, 失败 {}, 过期 {}",
      self.stats.shown, self.stats.cleared, self.stats.failed, self.stats.stale
    );
    (self.overlay, self.stats)
  }
}
