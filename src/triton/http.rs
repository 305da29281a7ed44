// 该文件是 Shanan Remote （山南远程推理） 项目的一部分。
// src/triton/http.rs - Triton HTTP 客户端
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

use std::{io::Read, time::Duration};

use serde::Deserialize;
use tracing::{debug, error, info};

use super::{
  InferInput, InferOutputs, InferenceBackend, ModelMetadata, TritonError,
  protocol::{INFERENCE_HEADER_CONTENT_LENGTH, decode_response, encode_request},
};

/// 基于 KServe v2 REST 协议的阻塞式客户端
///
/// 每个请求都受 `timeout` 限制；HTTP 连接池随客户端一起释放。
pub struct TritonHttpClient {
  agent: ureq::Agent,
  base_url: String,
  timeout: Duration,
}

#[derive(Deserialize)]
struct ServerError {
  error: String,
}

impl TritonHttpClient {
  pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
    let base_url: String = base_url.into();
    let base_url = base_url.trim_end_matches('/').to_string();
    info!("创建 Triton 客户端: {} (超时 {:?})", base_url, timeout);
    let agent = ureq::AgentBuilder::new().timeout(timeout).build();
    TritonHttpClient {
      agent,
      base_url,
      timeout,
    }
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  fn model_url(&self, model: &str, version: Option<&str>) -> String {
    match version {
      Some(version) => format!("{}/v2/models/{}/versions/{}", self.base_url, model, version),
      None => format!("{}/v2/models/{}", self.base_url, model),
    }
  }

  /// 服务是否就绪 (`GET /v2/health/ready`)
  pub fn server_ready(&self) -> Result<bool, TritonError> {
    let url = format!("{}/v2/health/ready", self.base_url);
    match self.agent.get(&url).call() {
      Ok(_) => Ok(true),
      Err(ureq::Error::Status(code, _)) => {
        debug!("服务未就绪, 状态码 {}", code);
        Ok(false)
      }
      Err(e) => Err(self.map_error(e)),
    }
  }

  fn map_error(&self, err: ureq::Error) -> TritonError {
    match err {
      ureq::Error::Status(code, response) => {
        let body = response.into_string().unwrap_or_default();
        let message = serde_json::from_str::<ServerError>(&body)
          .map(|e| e.error)
          .unwrap_or(body);
        error!("推理服务返回错误状态 {}: {}", code, message);
        TritonError::Status { code, message }
      }
      ureq::Error::Transport(transport) => {
        let timed_out = std::error::Error::source(&transport)
          .and_then(|source| source.downcast_ref::<std::io::Error>())
          .is_some_and(is_timeout);
        if timed_out {
          error!("推理服务请求超时 ({:?})", self.timeout);
          TritonError::Timeout(self.timeout)
        } else {
          error!("连接推理服务失败: {}", transport);
          TritonError::Transport(transport.to_string())
        }
      }
    }
  }

  fn map_io(&self, err: std::io::Error) -> TritonError {
    if is_timeout(&err) {
      TritonError::Timeout(self.timeout)
    } else {
      TritonError::Io(err)
    }
  }
}

fn is_timeout(err: &std::io::Error) -> bool {
  matches!(
    err.kind(),
    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
  )
}

impl InferenceBackend for TritonHttpClient {
  fn model_metadata(
    &self,
    model: &str,
    version: Option<&str>,
  ) -> Result<ModelMetadata, TritonError> {
    let url = self.model_url(model, version);
    debug!("查询模型元数据: {}", url);

    let response = self
      .agent
      .get(&url)
      .call()
      .map_err(|e| self.map_error(e))?;
    let body = response.into_string().map_err(|e| self.map_io(e))?;
    let metadata: ModelMetadata = serde_json::from_str(&body)?;

    info!(
      "模型 {} 元数据: {} 个输入, {} 个输出",
      metadata.name,
      metadata.inputs.len(),
      metadata.outputs.len()
    );
    Ok(metadata)
  }

  fn infer(
    &self,
    model: &str,
    version: Option<&str>,
    input: InferInput,
    outputs: &[String],
  ) -> Result<InferOutputs, TritonError> {
    let url = format!("{}/infer", self.model_url(model, version));
    let (body, header_len) = encode_request(&input, outputs)?;
    debug!(
      "发送推理请求: {}, JSON 头部 {} 字节, 总计 {} 字节",
      url,
      header_len,
      body.len()
    );

    let response = self
      .agent
      .post(&url)
      .set("Content-Type", "application/octet-stream")
      .set(INFERENCE_HEADER_CONTENT_LENGTH, &header_len.to_string())
      .send_bytes(&body)
      .map_err(|e| self.map_error(e))?;

    let header_len = response
      .header(INFERENCE_HEADER_CONTENT_LENGTH)
      .map(|v| {
        v.trim().parse::<usize>().map_err(|_| {
          TritonError::Protocol(format!("无效的 {}: {}", INFERENCE_HEADER_CONTENT_LENGTH, v))
        })
      })
      .transpose()?;

    let mut body = Vec::new();
    response
      .into_reader()
      .read_to_end(&mut body)
      .map_err(|e| self.map_io(e))?;
    debug!("收到推理响应 {} 字节", body.len());

    decode_response(&body, header_len)
  }
}
