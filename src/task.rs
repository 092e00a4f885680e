// 该文件是 Lingshi （零食识别） 项目的一部分。
// src/task.rs - 单帧、重复与连续识别任务
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use anyhow::anyhow;
use tracing::{info, warn};

use crate::{
  engine::Engine,
  frame::Sample,
  output::Overlay,
  pipeline::{self, Pipeline, PipelineConfig, PresenterStats},
};

pub trait Task<I, E, O>: Sized {
  type Error;
  fn run_task(self, input: I, engine: E, output: O) -> Result<TaskReport, Self::Error>;
}

/// 一次任务的计数汇总
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct TaskReport {
  /// 从输入读取的采样数
  pub frames: usize,
  /// 缺失缓冲而跳过的采样数
  pub skipped: usize,
  pub submitted: usize,
  pub shown: usize,
  pub cleared: usize,
  pub failed: usize,
  pub stale: usize,
  pub mean_latency: Option<Duration>,
  pub elapsed: Duration,
}

impl TaskReport {
  fn merge(mut self, stats: PresenterStats) -> Self {
    self.shown = stats.shown;
    self.cleared = stats.cleared;
    self.failed = stats.failed;
    self.stale = stats.stale;
    self.mean_latency = stats.mean_latency();
    self
  }

  /// 每秒展示的结果数
  pub fn throughput(&self) -> f64 {
    let secs = self.elapsed.as_secs_f64();
    if secs > 0.0 {
      (self.shown + self.cleared + self.failed) as f64 / secs
    } else {
      0.0
    }
  }

  fn log(&self) {
    info!(
      "读取 {} 帧, 跳过 {}, 提交 {}; 显示 {}, 清除 {}, 失败 {}, 过期 {}; 总耗时 {:.2?}",
      self.frames,
      self.skipped,
      self.submitted,
      self.shown,
      self.cleared,
      self.failed,
      self.stale,
      self.elapsed
    );
    if let Some(latency) = self.mean_latency {
      info!("平均推理耗时: {:.2?}, 吞吐 {:.2} 帧/秒", latency, self.throughput());
    }
  }
}

/// 在当前线程上把采样送入流水线，展示端运行在独立线程上
fn drive<I, E, O>(
  config: PipelineConfig,
  input: I,
  engine: E,
  output: O,
  frame_limit: Option<usize>,
  stop: Option<&AtomicBool>,
) -> anyhow::Result<TaskReport>
where
  I: Iterator<Item = Sample>,
  E: Engine,
  O: Overlay + Send + 'static,
  O::Error: std::fmt::Display,
{
  let start = Instant::now();
  let (pipeline, presenter) = pipeline::channel(config, engine, output)?;

  let presenter = thread::Builder::new()
    .name("lingshi-presenter".to_string())
    .spawn(move || presenter.run().1);
  let presenter = presenter?;

  let mut report = feed(&pipeline, input, frame_limit, stop);
  // 丢弃生产端后，展示端在在途推理全部完成时退出
  drop(pipeline);

  let stats = presenter
    .join()
    .map_err(|_| anyhow!("展示线程异常退出"))?;
  report.elapsed = start.elapsed();
  Ok(report.merge(stats))
}

fn feed<I, E>(
  pipeline: &Pipeline<E>,
  input: I,
  frame_limit: Option<usize>,
  stop: Option<&AtomicBool>,
) -> TaskReport
where
  I: Iterator<Item = Sample>,
  E: Engine,
{
  let mut report = TaskReport::default();
  for sample in input {
    report.frames += 1;
    match pipeline.on_frame(sample) {
      Ok(seq) => {
        report.submitted += 1;
        info!("提交第 {} 帧图像", seq);
      }
      Err(_) => report.skipped += 1,
    }

    if frame_limit.map(|n| report.frames >= n).unwrap_or(false) {
      info!("达到指定帧数 {}, 退出任务循环", report.frames);
      break;
    }
    if stop.map(|s| s.load(Ordering::Acquire)).unwrap_or(false) {
      warn!("中断信号接收，退出任务循环");
      break;
    }
  }
  report
}

/// 只识别输入的第一帧
#[derive(Debug, Default, Clone)]
pub struct OneShotTask {
  config: PipelineConfig,
}

impl OneShotTask {
  pub fn new(config: PipelineConfig) -> Self {
    Self { config }
  }
}

impl<I, E, O> Task<I, E, O> for OneShotTask
where
  I: Iterator<Item = Sample>,
  E: Engine,
  O: Overlay + Send + 'static,
  O::Error: std::fmt::Display,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, engine: E, output: O) -> Result<TaskReport, Self::Error> {
    info!("开始任务...");
    let sample = input.next().ok_or_else(|| anyhow!("没有输入帧"))?;
    if !sample.has_buffer() {
      return Err(anyhow!("输入帧缓冲不可用"));
    }

    let report = drive(self.config, std::iter::once(sample), engine, output, None, None)?;
    report.log();
    Ok(report)
  }
}

/// 反复提交同一帧，用于测量延迟与吞吐
#[derive(Debug, Clone)]
pub struct RepeatShotTask {
  config: PipelineConfig,
  repeat: usize,
}

impl RepeatShotTask {
  pub const DEFAULT_REPEAT: usize = 100;

  pub fn new(config: PipelineConfig) -> Self {
    Self {
      config,
      repeat: Self::DEFAULT_REPEAT,
    }
  }

  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat;
    self
  }
}

impl<I, E, O> Task<I, E, O> for RepeatShotTask
where
  I: Iterator<Item = Sample>,
  E: Engine,
  O: Overlay + Send + 'static,
  O::Error: std::fmt::Display,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, engine: E, output: O) -> Result<TaskReport, Self::Error> {
    info!("开始任务...");
    let sample = input.next().ok_or_else(|| anyhow!("没有输入帧"))?;
    let (timestamp_ms, buffer) = sample.into_parts();
    let image = buffer.ok_or_else(|| anyhow!("输入帧缓冲不可用"))?;
    info!("输入帧获取成功，重复推理 {} 次...", self.repeat);

    let samples = (0..self.repeat).map(|_| Sample::new(timestamp_ms, image.clone()));
    let report = drive(self.config, samples, engine, output, None, None)?;
    report.log();
    Ok(report)
  }
}

/// 持续处理输入，直到输入结束、达到帧数或收到中断
#[derive(Debug, Default)]
pub struct ContinuousTask {
  config: PipelineConfig,
  frame_number: Option<usize>,
  stop: Option<Arc<AtomicBool>>,
}

impl ContinuousTask {
  pub fn new(config: PipelineConfig) -> Self {
    Self {
      config,
      ..Default::default()
    }
  }

  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 使用外部停止标志
  pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
    self.stop = Some(stop);
    self
  }

  /// 注册 Ctrl-C 处理，收到信号后停止读取新帧
  ///
  /// 每个进程只能注册一次。
  pub fn with_interrupt_handler(self) -> anyhow::Result<Self> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      flag.store(true, Ordering::Release);
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
    Ok(self.with_stop_flag(stop))
  }
}

impl<I, E, O> Task<I, E, O> for ContinuousTask
where
  I: Iterator<Item = Sample>,
  E: Engine,
  O: Overlay + Send + 'static,
  O::Error: std::fmt::Display,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, engine: E, output: O) -> Result<TaskReport, Self::Error> {
    info!("开始任务...");
    let report = drive(
      self.config,
      input,
      engine,
      output,
      self.frame_number,
      self.stop.as_deref(),
    )?;
    report.log();
    info!("任务完成，退出");
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    model::{ReplayEntry, ReplayModel},
    output::{DEFAULT_VIEW_SIZE, LogOverlay},
  };
  use image::RgbImage;

  fn engine() -> crate::engine::ThreadedEngine<ReplayModel> {
    let model = ReplayModel::new(
      vec![
        ReplayEntry::Empty,
        ReplayEntry::Error {
          message: "boom".into(),
        },
      ],
      (8, 8),
    )
    .expect("model");
    PipelineConfig::default().threaded_engine(model)
  }

  #[test]
  fn one_shot_applies_a_single_result() {
    let input = std::iter::once(Sample::new(0, RgbImage::new(8, 8)));
    let report = OneShotTask::default()
      .run_task(input, engine(), LogOverlay::new(DEFAULT_VIEW_SIZE))
      .expect("task");
    assert_eq!(report.submitted, 1);
    assert_eq!(report.cleared, 1);
    assert_eq!(report.stale, 0);
  }

  #[test]
  fn one_shot_rejects_a_missing_buffer() {
    let input = std::iter::once(Sample::unavailable(0));
    let result =
      OneShotTask::default().run_task(input, engine(), LogOverlay::new(DEFAULT_VIEW_SIZE));
    assert!(result.is_err());
  }

  #[test]
  fn continuous_task_counts_skipped_frames_and_honours_the_limit() {
    let input = vec![
      Sample::new(0, RgbImage::new(8, 8)),
      Sample::unavailable(1),
      Sample::new(2, RgbImage::new(8, 8)),
      Sample::new(3, RgbImage::new(8, 8)),
    ];
    let report = ContinuousTask::default()
      .with_frame_number(Some(3))
      .run_task(input.into_iter(), engine(), LogOverlay::new(DEFAULT_VIEW_SIZE))
      .expect("task");

    assert_eq!(report.frames, 3);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.submitted, 2);
    assert_eq!(report.shown + report.cleared + report.failed + report.stale, 2);
  }

  #[test]
  fn stop_flag_ends_the_loop() {
    let stop = Arc::new(AtomicBool::new(true));
    let input = std::iter::repeat_with(|| Sample::new(0, RgbImage::new(8, 8)));
    let report = ContinuousTask::default()
      .with_stop_flag(stop)
      .run_task(input, engine(), LogOverlay::new(DEFAULT_VIEW_SIZE))
      .expect("task");
    assert_eq!(report.frames, 1);
  }

  #[test]
  fn repeat_shot_submits_the_same_frame() {
    let input = std::iter::once(Sample::new(0, RgbImage::new(8, 8)));
    let report = RepeatShotTask::new(PipelineConfig::default().with_max_inflight(3))
      .with_repeat(10)
      .run_task(input, engine(), LogOverlay::new(DEFAULT_VIEW_SIZE))
      .expect("task");
    assert_eq!(report.submitted, 10);
    assert_eq!(report.shown + report.cleared + report.failed + report.stale, 10);
  }
}
