// 该文件是 Lingshi （零食识别） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复识别同一帧以测量延迟与吞吐
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

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use lingshi::{
  FromUrl,
  admission::DEFAULT_MAX_INFLIGHT,
  frame::CropStrategy,
  input::InputWrapper,
  model::ReplayModel,
  output::OutputWrapper,
  pipeline::PipelineConfig,
  task::{RepeatShotTask, Task},
};

/// Lingshi 基准测试参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型来源，例如 replay:///path/to/outputs.jsonl?latency_ms=30
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 叠加层输出
  #[arg(long, value_name = "OUTPUT", default_value = "log://")]
  pub output: Url,
  /// 同时在途的最大推理数
  #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_INFLIGHT)]
  pub max_inflight: usize,
  /// 推理前的缩放方式
  #[arg(long, value_enum, default_value_t = CropStrategy::CenterCrop)]
  pub crop: CropStrategy,
  /// 重复次数
  #[arg(long, value_name = "REPEAT", default_value_t = RepeatShotTask::DEFAULT_REPEAT)]
  pub repeat: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型来源: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("最大在途推理数: {}", args.max_inflight);

  let config = PipelineConfig::default()
    .with_max_inflight(args.max_inflight)
    .with_crop_strategy(args.crop);
  config.validate()?;

  let input = InputWrapper::from_url(&args.input)?;
  let model = ReplayModel::from_url(&args.model)?;
  let output = OutputWrapper::from_url(&args.output)?;
  let engine = config.threaded_engine(model);

  let report = RepeatShotTask::new(config)
    .with_repeat(args.repeat)
    .run_task(input, engine, output)?;

  if let Some(latency) = report.mean_latency {
    warn!(
      "平均推理时间: {:.2?}, 吞吐: {:.2} 帧/秒",
      latency,
      report.throughput()
    );
  }

  Ok(())
}
