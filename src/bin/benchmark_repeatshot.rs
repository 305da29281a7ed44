// 该文件是 Shanan Remote （山南远程推理） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 远程推理延迟测试
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
  collections::HashMap,
  sync::{Arc, Mutex},
  time::Duration,
};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use shanan_remote::{
  FromUrl,
  input::ImageFileInput,
  model::{RemoteDetectorBuilder, Stage},
  output::OutputWrapper,
  task::{RepeatShotTask, Task},
};

/// Shanan Remote 延迟测试参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 推理服务与模型，例如 triton://localhost:8000/yolo
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，保存最后一次推理结果
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 重复推理次数
  #[arg(long, default_value = "100", value_name = "COUNT")]
  pub repeat: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let totals: Arc<Mutex<HashMap<Stage, (Duration, u32)>>> = Arc::default();
  let recorder = totals.clone();

  let input_image = ImageFileInput::from_url(&args.input)?;
  let builder = RemoteDetectorBuilder::from_url(&args.model)?;
  match builder.server_ready() {
    Ok(true) => info!("推理服务已就绪: {}", builder.config().server_url),
    Ok(false) => warn!("推理服务尚未就绪: {}", builder.config().server_url),
    Err(e) => warn!("推理服务就绪探测失败: {}", e),
  }
  let model = builder
    .on_stage(move |stage, elapsed| {
      if let Ok(mut totals) = recorder.lock() {
        let entry = totals.entry(stage).or_default();
        entry.0 += elapsed;
        entry.1 += 1;
      }
    })
    .build()?;
  let output = OutputWrapper::from_url(&args.output)?;

  RepeatShotTask::new(args.repeat).run_task(input_image, model, output)?;

  if let Ok(totals) = totals.lock() {
    for stage in [Stage::Preprocess, Stage::Inference, Stage::Postprocess] {
      if let Some((total, count)) = totals.get(&stage)
        && *count > 0
      {
        warn!("{}平均耗时: {:.2?}", stage, *total / *count);
      }
    }
  }

  Ok(())
}
