// 该文件是 Lingshi （零食识别） 项目的一部分。
// src/bin/simple_oneshot.rs - 识别单帧图像
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use lingshi::{
  FromUrl,
  admission::DEFAULT_MAX_INFLIGHT,
  frame::CropStrategy,
  input::InputWrapper,
  model::{LabelTable, ReplayModel},
  output::OutputWrapper,
  pipeline::PipelineConfig,
  task::{OneShotTask, Task},
};

/// Lingshi 单帧识别参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型来源，例如 replay:///path/to/outputs.jsonl
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 叠加层输出
  #[arg(long, value_name = "OUTPUT", default_value = "log://")]
  pub output: Url,
  /// 推理前的缩放方式
  #[arg(long, value_enum, default_value_t = CropStrategy::CenterCrop)]
  pub crop: CropStrategy,
  /// JSON 格式的标签表，缺省为内置的 20 类零食
  #[arg(long, value_name = "LABELS")]
  pub labels: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型来源: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let labels = match &args.labels {
    Some(path) => LabelTable::from_json_file(path)?,
    None => LabelTable::snacks(),
  };
  let config = PipelineConfig::default()
    .with_max_inflight(DEFAULT_MAX_INFLIGHT)
    .with_labels(labels)
    .with_crop_strategy(args.crop);

  let input = InputWrapper::from_url(&args.input)?;
  let model = ReplayModel::from_url(&args.model)?;
  let output = OutputWrapper::from_url(&args.output)?;
  let engine = config.threaded_engine(model);

  OneShotTask::new(config).run_task(input, engine, output)?;

  Ok(())
}
