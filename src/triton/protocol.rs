// 该文件是 Shanan Remote （山南远程推理） 项目的一部分。
// src/triton/protocol.rs - KServe v2 二进制张量扩展编解码
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

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{InferInput, InferOutputs, RawOutput, TritonError};

/// 请求/响应中 JSON 头部长度所在的 HTTP 头
pub const INFERENCE_HEADER_CONTENT_LENGTH: &str = "Inference-Header-Content-Length";

#[derive(Serialize)]
struct RequestHeader<'a> {
  inputs: [RequestInput<'a>; 1],
  outputs: Vec<RequestOutput<'a>>,
}

#[derive(Serialize)]
struct RequestInput<'a> {
  name: &'a str,
  shape: &'a [i64],
  datatype: &'a str,
  parameters: BinaryDataSize,
}

#[derive(Serialize)]
struct RequestOutput<'a> {
  name: &'a str,
  parameters: BinaryData,
}

#[derive(Serialize, Deserialize, Default)]
struct BinaryDataSize {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  binary_data_size: Option<usize>,
}

#[derive(Serialize)]
struct BinaryData {
  binary_data: bool,
}

#[derive(Deserialize)]
struct ResponseHeader {
  #[serde(default)]
  model_name: String,
  #[serde(default)]
  outputs: Vec<ResponseOutput>,
}

#[derive(Deserialize)]
struct ResponseOutput {
  name: String,
  datatype: String,
  #[serde(default)]
  shape: Vec<i64>,
  #[serde(default)]
  parameters: Option<BinaryDataSize>,
  #[serde(default)]
  data: Option<Value>,
}

/// 编码推理请求，返回 (请求体, JSON 头部长度)
///
/// 输入以二进制形式附在 JSON 头部之后，所有输出都请求二进制返回。
pub fn encode_request(
  input: &InferInput,
  outputs: &[String],
) -> Result<(Vec<u8>, usize), TritonError> {
  let header = RequestHeader {
    inputs: [RequestInput {
      name: &input.name,
      shape: &input.shape,
      datatype: &input.datatype,
      parameters: BinaryDataSize {
        binary_data_size: Some(input.data.len()),
      },
    }],
    outputs: outputs
      .iter()
      .map(|name| RequestOutput {
        name: name.as_str(),
        parameters: BinaryData { binary_data: true },
      })
      .collect(),
  };

  let mut body = serde_json::to_vec(&header)?;
  let header_len = body.len();
  body.extend_from_slice(&input.data);
  Ok((body, header_len))
}

/// 解码推理响应
///
/// `header_len` 为 `Inference-Header-Content-Length` 的值；缺省时整个响应体都是 JSON，
/// 输出数据以 `data` 数组内联。
pub fn decode_response(body: &[u8], header_len: Option<usize>) -> Result<InferOutputs, TritonError> {
  let header_len = header_len.unwrap_or(body.len());
  if header_len > body.len() {
    return Err(TritonError::Protocol(format!(
      "JSON 头部长度 {} 超出响应体长度 {}",
      header_len,
      body.len()
    )));
  }

  let (json, mut binary) = body.split_at(header_len);
  let header: ResponseHeader = serde_json::from_slice(json)?;
  debug!(
    "模型 {} 返回 {} 个输出",
    header.model_name,
    header.outputs.len()
  );

  let mut outputs = Vec::with_capacity(header.outputs.len());
  for output in header.outputs {
    let binary_size = output.parameters.and_then(|p| p.binary_data_size);
    let data = match (binary_size, output.data) {
      (Some(size), _) => {
        if size > binary.len() {
          return Err(TritonError::Protocol(format!(
            "输出 {} 声明 {} 字节, 剩余 {} 字节",
            output.name,
            size,
            binary.len()
          )));
        }
        let (blob, rest) = binary.split_at(size);
        binary = rest;
        blob.to_vec()
      }
      (None, Some(values)) => encode_inline(&output.name, &output.datatype, &values)?,
      (None, None) => {
        return Err(TritonError::Protocol(format!(
          "输出 {} 没有数据",
          output.name
        )));
      }
    };

    outputs.push(RawOutput {
      name: output.name,
      datatype: output.datatype,
      shape: output.shape,
      data,
    });
  }

  if !binary.is_empty() {
    warn!("响应末尾有 {} 字节未被任何输出声明", binary.len());
  }

  Ok(InferOutputs::from(outputs))
}

/// 将 JSON 内联数据按数据类型编码为小端字节
fn encode_inline(name: &str, datatype: &str, values: &Value) -> Result<Vec<u8>, TritonError> {
  let mut numbers = Vec::new();
  flatten_numbers(values, &mut numbers).ok_or_else(|| {
    TritonError::Protocol(format!("输出 {} 的内联数据不是数值数组", name))
  })?;

  let mut bytes = Vec::new();
  for n in numbers {
    match datatype {
      "FP32" => bytes.extend_from_slice(&(n as f32).to_le_bytes()),
      "FP64" => bytes.extend_from_slice(&n.to_le_bytes()),
      "INT32" => bytes.extend_from_slice(&(n as i32).to_le_bytes()),
      "INT64" => bytes.extend_from_slice(&(n as i64).to_le_bytes()),
      "UINT8" => bytes.push(n as u8),
      other => {
        return Err(TritonError::Protocol(format!(
          "输出 {} 的内联数据类型 {} 不受支持",
          name, other
        )));
      }
    }
  }
  Ok(bytes)
}

fn flatten_numbers(value: &Value, out: &mut Vec<f64>) -> Option<()> {
  match value {
    Value::Array(items) => items.iter().try_for_each(|v| flatten_numbers(v, out)),
    Value::Number(n) => {
      out.push(n.as_f64()?);
      Some(())
    }
    _ => None,
  }
}
