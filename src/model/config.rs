// 该文件是 Shanan Remote （山南远程推理） 项目的一部分。
// src/model/config.rs - 远程检测器配置
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

use std::{borrow::Cow, collections::HashMap, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::error;
use url::Url;

use crate::{FromUrl, tensor::ChannelOrder, triton::TritonError};

pub const TRITON_SCHEME: &str = "triton";
pub const DEFAULT_BOXES_OUTPUT: &str = "detection_bboxes";
pub const DEFAULT_SCORES_OUTPUT: &str = "detection_scores";

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{0}'", expected = TRITON_SCHEME)]
  SchemeMismatch(String),
  #[error("URI 缺少服务地址")]
  MissingHost,
  #[error("URI 缺少模型名称")]
  MissingModel,
  #[error("参数 {key} 的值无效: {value}")]
  InvalidParameter { key: String, value: String },
  #[error("获取模型元数据失败: {0}")]
  Metadata(#[from] TritonError),
  #[error("模型没有输入")]
  MissingInput,
  #[error("输入数据类型 {0} 不受支持，仅支持 FP32")]
  UnsupportedDatatype(String),
  #[error("输入形状 {0:?} 不受支持")]
  UnsupportedShape(Vec<i64>),
  #[error("模型输出中没有 {0}")]
  MissingOutput(String),
}

/// 远程检测器配置
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  /// 推理服务地址，如 `http://127.0.0.1:8000`
  pub server_url: String,
  pub model: String,
  pub version: Option<String>,
  pub timeout: Duration,
  pub keep_ratio: bool,
  pub channel_order: ChannelOrder,
  /// 模型输入形状为动态时使用的尺寸
  pub input_height: u32,
  pub input_width: u32,
  pub boxes_output: String,
  pub scores_output: String,
}

impl DetectorConfig {
  pub fn new(server_url: impl Into<String>, model: impl Into<String>) -> Self {
    DetectorConfig {
      server_url: server_url.into(),
      model: model.into(),
      version: None,
      timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
      keep_ratio: true,
      channel_order: ChannelOrder::default(),
      input_height: DEFAULT_INPUT_SIZE,
      input_width: DEFAULT_INPUT_SIZE,
      boxes_output: DEFAULT_BOXES_OUTPUT.to_string(),
      scores_output: DEFAULT_SCORES_OUTPUT.to_string(),
    }
  }
}

type Query<'a> = HashMap<Cow<'a, str>, Cow<'a, str>>;

fn param<T: FromStr>(query: &Query, key: &str) -> Result<Option<T>, ConfigError> {
  query
    .get(key)
    .map(|value| {
      value.parse().map_err(|_| {
        error!("参数 {} 的值无效: {}", key, value);
        ConfigError::InvalidParameter {
          key: key.to_string(),
          value: value.to_string(),
        }
      })
    })
    .transpose()
}

/// 解析 `triton://HOST[:PORT]/MODEL?...`
impl FromUrl for DetectorConfig {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != TRITON_SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        TRITON_SCHEME,
        url.scheme()
      );
      return Err(ConfigError::SchemeMismatch(url.scheme().to_string()));
    }

    let host = url
      .host_str()
      .filter(|h| !h.is_empty())
      .ok_or(ConfigError::MissingHost)?;
    let port = url.port().unwrap_or(DEFAULT_PORT);
    let model = url
      .path_segments()
      .and_then(|mut segments| segments.next())
      .filter(|s| !s.is_empty())
      .ok_or(ConfigError::MissingModel)?;

    let query: Query = url.query_pairs().collect();

    let secure = param(&query, "secure")?.unwrap_or(false);
    let scheme = if secure { "https" } else { "http" };
    let mut config = DetectorConfig::new(format!("{}://{}:{}", scheme, host, port), model);

    config.version = query.get("version").map(|v| v.to_string());
    if let Some(secs) = param::<f64>(&query, "timeout")? {
      config.timeout = Duration::try_from_secs_f64(secs).map_err(|_| {
        ConfigError::InvalidParameter {
          key: "timeout".to_string(),
          value: secs.to_string(),
        }
      })?;
    }
    if let Some(keep_ratio) = param(&query, "keep_ratio")? {
      config.keep_ratio = keep_ratio;
    }
    if let Some(order) = param(&query, "order")? {
      config.channel_order = order;
    }
    if let Some(size) = param(&query, "input_size")? {
      config.input_height = size;
      config.input_width = size;
    }
    if let Some(height) = param(&query, "input_height")? {
      config.input_height = height;
    }
    if let Some(width) = param(&query, "input_width")? {
      config.input_width = width;
    }
    if let Some(boxes) = query.get("boxes") {
      config.boxes_output = boxes.to_string();
    }
    if let Some(scores) = query.get("scores") {
      config.scores_output = scores.to_string();
    }

    Ok(config)
  }
}
