// 该文件是 Shanan Remote （山南远程推理） 项目的一部分。
// src/triton.rs - 推理服务接口定义
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

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 本客户端唯一支持的输入数据类型
pub const DATATYPE_FP32: &str = "FP32";

#[derive(Error, Debug)]
pub enum TritonError {
  #[error("连接推理服务失败: {0}")]
  Transport(String),
  #[error("推理服务请求超时 ({0:?})")]
  Timeout(Duration),
  #[error("推理服务返回错误状态 {code}: {message}")]
  Status { code: u16, message: String },
  #[error("推理服务响应格式错误: {0}")]
  Protocol(String),
  #[error("JSON 错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
  #[error("缺少输出: {0}")]
  MissingOutput(String),
  #[error("输出 {name} 的数据类型 {datatype} 不受支持")]
  UnsupportedDatatype { name: String, datatype: String },
  #[error("输出 {name} 的字节数 {bytes} 不是 4 的整数倍")]
  Misaligned { name: String, bytes: usize },
  #[error("检测框数组长度 {0} 不是 4 的整数倍")]
  BoxCount(usize),
  #[error("检测框数量 {boxes} 与置信度数量 {scores} 不一致")]
  ScoreCount { boxes: usize, scores: usize },
}

/// 模型输入或输出张量的描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorMetadata {
  pub name: String,
  pub datatype: String,
  #[serde(default)]
  pub shape: Vec<i64>,
}

/// `GET /v2/models/{model}` 返回的模型元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
  pub name: String,
  #[serde(default)]
  pub versions: Vec<String>,
  #[serde(default)]
  pub platform: String,
  #[serde(default)]
  pub inputs: Vec<TensorMetadata>,
  #[serde(default)]
  pub outputs: Vec<TensorMetadata>,
}

impl ModelMetadata {
  pub fn output_names(&self) -> Vec<String> {
    self.outputs.iter().map(|o| o.name.clone()).collect()
  }
}

/// 一个具名输入及其原始字节
#[derive(Debug, Clone)]
pub struct InferInput {
  pub name: String,
  pub datatype: String,
  pub shape: Vec<i64>,
  pub data: Vec<u8>,
}

/// 一个具名输出及其原始字节（小端序）
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutput {
  pub name: String,
  pub datatype: String,
  pub shape: Vec<i64>,
  pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferOutputs {
  outputs: Vec<RawOutput>,
}

impl From<Vec<RawOutput>> for InferOutputs {
  fn from(outputs: Vec<RawOutput>) -> Self {
    InferOutputs { outputs }
  }
}

impl InferOutputs {
  pub fn get(&self, name: &str) -> Option<&RawOutput> {
    self.outputs.iter().find(|o| o.name == name)
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.outputs.iter().map(|o| o.name.as_str())
  }

  pub fn len(&self) -> usize {
    self.outputs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.outputs.is_empty()
  }

  /// 将输出重新解释为 f32 数组，元素个数为 `字节数 / 4`
  pub fn as_f32(&self, name: &str) -> Result<Vec<f32>, DecodeError> {
    let output = self
      .get(name)
      .ok_or_else(|| DecodeError::MissingOutput(name.to_string()))?;

    if output.datatype != DATATYPE_FP32 {
      return Err(DecodeError::UnsupportedDatatype {
        name: name.to_string(),
        datatype: output.datatype.clone(),
      });
    }

    let chunks = output.data.chunks_exact(size_of::<f32>());
    if !chunks.remainder().is_empty() {
      return Err(DecodeError::Misaligned {
        name: name.to_string(),
        bytes: output.data.len(),
      });
    }

    Ok(
      chunks
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect(),
    )
  }
}

/// 推理服务协作方
///
/// 元数据在构建检测器时查询一次；推理失败对当前请求是致命的，不重试。
pub trait InferenceBackend {
  fn model_metadata(&self, model: &str, version: Option<&str>)
  -> Result<ModelMetadata, TritonError>;

  fn infer(
    &self,
    model: &str,
    version: Option<&str>,
    input: InferInput,
    outputs: &[String],
  ) -> Result<InferOutputs, TritonError>;
}

mod http;
mod protocol;

pub use self::http::TritonHttpClient;
pub use self::protocol::{INFERENCE_HEADER_CONTENT_LENGTH, decode_response, encode_request};

#[cfg(test)]
mod tests {
  use super::*;

  fn output(name: &str, datatype: &str, data: Vec<u8>) -> RawOutput {
    RawOutput {
      name: name.to_string(),
      datatype: datatype.to_string(),
      shape: vec![data.len() as i64 / 4],
      data,
    }
  }

  #[test]
  fn as_f32_reads_little_endian() {
    let data: Vec<u8> = [1.5f32, -2.0, 640.0]
      .iter()
      .flat_map(|v| v.to_le_bytes())
      .collect();
    let outputs = InferOutputs::from(vec![output("detection_scores", "FP32", data)]);

    assert_eq!(
      outputs.as_f32("detection_scores").unwrap(),
      vec![1.5, -2.0, 640.0]
    );
  }

  #[test]
  fn as_f32_rejects_partial_floats() {
    let outputs = InferOutputs::from(vec![output("detection_bboxes", "FP32", vec![0; 6])]);
    assert_eq!(
      outputs.as_f32("detection_bboxes").unwrap_err(),
      DecodeError::Misaligned {
        name: "detection_bboxes".to_string(),
        bytes: 6,
      }
    );
  }

  #[test]
  fn as_f32_reports_missing_and_foreign_types() {
    let outputs = InferOutputs::from(vec![output("labels", "INT64", vec![0; 8])]);
    assert_eq!(
      outputs.as_f32("detection_bboxes").unwrap_err(),
      DecodeError::MissingOutput("detection_bboxes".to_string())
    );
    assert!(matches!(
      outputs.as_f32("labels"),
      Err(DecodeError::UnsupportedDatatype { .. })
    ));
  }

  #[test]
  fn metadata_parses_server_json() {
    let json = r#"{
      "name": "ensemble",
      "versions": ["1"],
      "platform": "ensemble",
      "inputs": [{"name": "images", "datatype": "FP32", "shape": [1, 3, 640, 640]}],
      "outputs": [
        {"name": "detection_bboxes", "datatype": "FP32", "shape": [-1, 4]},
        {"name": "detection_scores", "datatype": "FP32", "shape": [-1]}
      ]
    }"#;
    let metadata: ModelMetadata = serde_json::from_str(json).unwrap();

    assert_eq!(metadata.inputs[0].name, "images");
    assert_eq!(metadata.inputs[0].shape, vec![1, 3, 640, 640]);
    assert_eq!(
      metadata.output_names(),
      vec!["detection_bboxes".to_string(), "detection_scores".to_string()]
    );
  }
}
