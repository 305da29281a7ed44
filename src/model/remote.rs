// 该文件是 Shanan Remote （山南远程推理） 项目的一部分。
// src/model/remote.rs - 远程推理检测器
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

use std::time::{Duration, Instant};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  letterbox::{LetterboxError, letterbox},
  model::{
    ConfigError, DetectItem, DetectResult, DetectorConfig, Model, Stage, StageHook,
    config::TRITON_SCHEME,
  },
  tensor::{ChannelOrder, PackError, pack},
  triton::{
    DATATYPE_FP32, DecodeError, InferInput, InferOutputs, InferenceBackend, ModelMetadata,
    TritonError, TritonHttpClient,
  },
  unmap::{RawBox, unmap},
};

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("几何变换错误: {0}")]
  Letterbox(#[from] LetterboxError),
  #[error("张量打包错误: {0}")]
  Pack(#[from] PackError),
  #[error("推理请求错误: {0}")]
  Inference(#[from] TritonError),
  #[error("输出解析错误: {0}")]
  Decode(#[from] DecodeError),
}

/// 根据模型元数据确定的输入张量参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
  pub name: String,
  pub datatype: String,
  /// 请求中使用的形状，动态维度已替换
  pub shape: Vec<i64>,
  pub height: u32,
  pub width: u32,
}

fn resolve_dim(dim: i64, fallback: u32) -> Option<u32> {
  if dim < 0 {
    Some(fallback)
  } else {
    u32::try_from(dim).ok().filter(|v| *v > 0)
  }
}

/// 从模型元数据中解析第一个输入
///
/// 支持 `[N, 3, H, W]` 与 `[3, H, W]`；`-1` 维度分别以 1、3 和配置尺寸替换。
pub fn resolve_input(
  metadata: &ModelMetadata,
  config: &DetectorConfig,
) -> Result<ResolvedInput, ConfigError> {
  let input = metadata.inputs.first().ok_or(ConfigError::MissingInput)?;
  if metadata.inputs.len() > 1 {
    warn!("模型有 {} 个输入, 仅使用第一个", metadata.inputs.len());
  }

  if input.datatype != DATATYPE_FP32 {
    error!("输入 {} 的数据类型为 {}", input.name, input.datatype);
    return Err(ConfigError::UnsupportedDatatype(input.datatype.clone()));
  }

  let unsupported = || ConfigError::UnsupportedShape(input.shape.clone());
  let (batch, channels, height, width) = match input.shape.as_slice() {
    &[n, c, h, w] => (Some(n), c, h, w),
    &[c, h, w] => (None, c, h, w),
    _ => return Err(unsupported()),
  };

  if channels >= 0 && channels != 3 {
    return Err(unsupported());
  }
  if batch.is_some_and(|n| n > 1) {
    return Err(unsupported());
  }

  let height = resolve_dim(height, config.input_height).ok_or_else(unsupported)?;
  let width = resolve_dim(width, config.input_width).ok_or_else(unsupported)?;
  if (height, width) != (config.input_height, config.input_width) {
    info!(
      "使用模型声明的输入尺寸 {}x{} (配置为 {}x{})",
      width, height, config.input_width, config.input_height
    );
  }

  let mut shape = Vec::with_capacity(4);
  if batch.is_some() {
    shape.push(1);
  }
  shape.extend([3, height as i64, width as i64]);

  Ok(ResolvedInput {
    name: input.name.clone(),
    datatype: input.datatype.clone(),
    shape,
    height,
    width,
  })
}

/// 从推理输出中取出检测框与置信度
///
/// 检测框数组每 4 个浮点数为一个框，置信度数量必须与框数量一致。
pub fn parse_detections(
  outputs: &InferOutputs,
  boxes_output: &str,
  scores_output: &str,
) -> Result<(Vec<RawBox>, Vec<f32>), DecodeError> {
  let flat = outputs.as_f32(boxes_output)?;
  if flat.len() % 4 != 0 {
    return Err(DecodeError::BoxCount(flat.len()));
  }
  let boxes: Vec<RawBox> = flat
    .chunks_exact(4)
    .map(|c| [c[0], c[1], c[2], c[3]])
    .collect();

  let scores = outputs.as_f32(scores_output)?;
  if scores.len() != boxes.len() {
    return Err(DecodeError::ScoreCount {
      boxes: boxes.len(),
      scores: scores.len(),
    });
  }

  Ok((boxes, scores))
}

/// 通过远程推理服务执行检测
///
/// 检测器本身不保存可变状态，每次调用都分配独立的缓冲区与 letterbox 参数。
pub struct RemoteDetector<B = TritonHttpClient> {
  backend: B,
  config: DetectorConfig,
  input: ResolvedInput,
  requested_outputs: Vec<String>,
  hook: Option<StageHook>,
}

impl<B: InferenceBackend> RemoteDetector<B> {
  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn input(&self) -> &ResolvedInput {
    &self.input
  }

  pub fn requested_outputs(&self) -> &[String] {
    &self.requested_outputs
  }

  pub fn backend(&self) -> &B {
    &self.backend
  }

  fn observe(&self, stage: Stage, elapsed: Duration) {
    debug!("{}耗时: {:.2?}", stage, elapsed);
    if let Some(hook) = &self.hook {
      hook(stage, elapsed);
    }
  }

  pub fn detect(&self, image: &RgbImage) -> Result<DetectResult, DetectError> {
    let (height, width) = (self.input.height, self.input.width);

    let now = Instant::now();
    let (letterboxed, params) = letterbox(image, height, width, self.config.keep_ratio)?;
    let tensor = pack(&letterboxed, height, width, self.config.channel_order)?;
    self.observe(Stage::Preprocess, now.elapsed());

    let now = Instant::now();
    let input = InferInput {
      name: self.input.name.clone(),
      datatype: self.input.datatype.clone(),
      shape: self.input.shape.clone(),
      data: tensor.to_le_bytes(),
    };
    let outputs = self.backend.infer(
      &self.config.model,
      self.config.version.as_deref(),
      input,
      &self.requested_outputs,
    )?;
    self.observe(Stage::Inference, now.elapsed());

    let now = Instant::now();
    let (boxes, scores) = parse_detections(
      &outputs,
      &self.config.boxes_output,
      &self.config.scores_output,
    )?;
    let items: Vec<DetectItem> = unmap(&boxes, &params)
      .into_iter()
      .zip(scores)
      .map(|(rect, score)| DetectItem { score, rect })
      .collect();
    self.observe(Stage::Postprocess, now.elapsed());

    debug!("检测到 {} 个物体", items.len());
    Ok(DetectResult::from(items))
  }
}

impl<B: InferenceBackend> Model for RemoteDetector<B> {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = DetectError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.detect(input)
  }
}

pub struct RemoteDetectorBuilder {
  config: DetectorConfig,
  hook: Option<StageHook>,
}

impl FromUrlWithScheme for RemoteDetectorBuilder {
  const SCHEME: &'static str = TRITON_SCHEME;
}

impl FromUrl for RemoteDetectorBuilder {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Ok(RemoteDetectorBuilder::new(DetectorConfig::from_url(url)?))
  }
}

impl RemoteDetectorBuilder {
  pub fn new(config: DetectorConfig) -> Self {
    RemoteDetectorBuilder { config, hook: None }
  }

  pub fn keep_ratio(mut self, keep_ratio: bool) -> Self {
    self.config.keep_ratio = keep_ratio;
    self
  }

  pub fn channel_order(mut self, order: ChannelOrder) -> Self {
    self.config.channel_order = order;
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.config.timeout = timeout;
    self
  }

  pub fn input_size(mut self, height: u32, width: u32) -> Self {
    self.config.input_height = height;
    self.config.input_width = width;
    self
  }

  pub fn outputs(mut self, boxes: impl Into<String>, scores: impl Into<String>) -> Self {
    self.config.boxes_output = boxes.into();
    self.config.scores_output = scores.into();
    self
  }

  /// 注册阶段耗时回调
  pub fn on_stage<F>(mut self, hook: F) -> Self
  where
    F: Fn(Stage, Duration) + Send + Sync + 'static,
  {
    self.hook = Some(Box::new(hook));
    self
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  /// 在查询元数据之前探测服务是否就绪
  pub fn server_ready(&self) -> Result<bool, TritonError> {
    TritonHttpClient::new(self.config.server_url.clone(), self.config.timeout).server_ready()
  }

  pub fn build(self) -> Result<RemoteDetector<TritonHttpClient>, ConfigError> {
    let backend = TritonHttpClient::new(self.config.server_url.clone(), self.config.timeout);
    self.build_with_backend(backend)
  }

  /// 使用给定的推理后端构建检测器，查询一次模型元数据
  pub fn build_with_backend<B: InferenceBackend>(
    self,
    backend: B,
  ) -> Result<RemoteDetector<B>, ConfigError> {
    let RemoteDetectorBuilder { config, hook } = self;

    info!("查询模型 {} 的元数据", config.model);
    let metadata = backend.model_metadata(&config.model, config.version.as_deref())?;
    let input = resolve_input(&metadata, &config)?;

    let requested_outputs = metadata.output_names();
    for name in [&config.boxes_output, &config.scores_output] {
      if !requested_outputs.contains(name) {
        error!("模型输出 {:?} 中没有 {}", requested_outputs, name);
        return Err(ConfigError::MissingOutput(name.clone()));
      }
    }

    info!(
      "模型加载完成: 输入 {} {:?}, 输出 {:?}",
      input.name, input.shape, requested_outputs
    );

    Ok(RemoteDetector {
      backend,
      config,
      input,
      requested_outputs,
      hook,
    })
  }
}
