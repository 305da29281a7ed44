// 该文件是 Shanan Remote （山南远程推理） 项目的一部分。
// tests/triton_http.rs - Triton HTTP 客户端测试
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
  io::{Read, Write},
  net::{TcpListener, TcpStream},
  thread::{self, JoinHandle},
  time::Duration,
};

use image::RgbImage;
use serde_json::{Value, json};

use shanan_remote::{
  model::{DetectorConfig, RemoteDetectorBuilder},
  triton::{
    INFERENCE_HEADER_CONTENT_LENGTH, InferInput, InferenceBackend, TritonError,
    TritonHttpClient,
  },
  unmap::Rectangle,
};

/// 服务端收到的请求
struct Request {
  line: String,
  headers: Vec<(String, String)>,
  body: Vec<u8>,
}

impl Request {
  fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

struct Reply {
  status: &'static str,
  headers: Vec<(String, String)>,
  body: Vec<u8>,
}

impl Reply {
  fn json(status: &'static str, value: Value) -> Self {
    Reply {
      status,
      headers: vec![("Content-Type".to_string(), "application/json".to_string())],
      body: serde_json::to_vec(&value).unwrap(),
    }
  }

  fn binary(header: Value, blobs: &[&[f32]]) -> Self {
    let mut body = serde_json::to_vec(&header).unwrap();
    let header_len = body.len();
    for blob in blobs {
      body.extend(blob.iter().flat_map(|v| v.to_le_bytes()));
    }
    Reply {
      status: "200 OK",
      headers: vec![
        (
          "Content-Type".to_string(),
          "application/octet-stream".to_string(),
        ),
        (
          INFERENCE_HEADER_CONTENT_LENGTH.to_string(),
          header_len.to_string(),
        ),
      ],
      body,
    }
  }
}

fn read_request(stream: &mut TcpStream) -> Request {
  let mut buf = Vec::new();
  let mut chunk = [0u8; 4096];
  let head_end = loop {
    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
      break pos;
    }
    let n = stream.read(&mut chunk).unwrap();
    assert!(n > 0, "connection closed before headers");
    buf.extend_from_slice(&chunk[..n]);
  };

  let head = String::from_utf8(buf[..head_end].to_vec()).unwrap();
  let mut lines = head.split("\r\n");
  let line = lines.next().unwrap().to_string();
  let headers: Vec<(String, String)> = lines
    .filter_map(|l| l.split_once(':'))
    .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
    .collect();

  let mut request = Request {
    line,
    headers,
    body: buf[head_end + 4..].to_vec(),
  };
  let length: usize = request
    .header("Content-Length")
    .map(|v| v.parse().unwrap())
    .unwrap_or(0);
  while request.body.len() < length {
    let n = stream.read(&mut chunk).unwrap();
    assert!(n > 0, "connection closed before body");
    request.body.extend_from_slice(&chunk[..n]);
  }
  request
}

/// 依次处理每个连接上的一个请求，返回收到的请求
fn serve(replies: Vec<Reply>) -> (String, JoinHandle<Vec<Request>>) {
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  let url = format!("http://{}", listener.local_addr().unwrap());
  let handle = thread::spawn(move || {
    let mut requests = Vec::new();
    for reply in replies {
      let (mut stream, _) = listener.accept().unwrap();
      requests.push(read_request(&mut stream));

      let mut head = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        reply.status,
        reply.body.len()
      );
      for (k, v) in &reply.headers {
        head.push_str(&format!("{}: {}\r\n", k, v));
      }
      head.push_str("\r\n");
      stream.write_all(head.as_bytes()).unwrap();
      stream.write_all(&reply.body).unwrap();
      stream.flush().unwrap();
    }
    requests
  });
  (url, handle)
}

fn metadata() -> Value {
  json!({
    "name": "yolo",
    "versions": ["1"],
    "platform": "ensemble",
    "inputs": [{"name": "images", "datatype": "FP32", "shape": [1, 3, 64, 64]}],
    "outputs": [
      {"name": "detection_bboxes", "datatype": "FP32", "shape": [-1, 4]},
      {"name": "detection_scores", "datatype": "FP32", "shape": [-1]}
    ]
  })
}

#[test]
fn fetches_model_metadata() {
  let (url, server) = serve(vec![Reply::json("200 OK", metadata())]);
  let client = TritonHttpClient::new(url, Duration::from_secs(5));

  let meta = client.model_metadata("yolo", Some("1")).unwrap();
  assert_eq!(meta.name, "yolo");
  assert_eq!(meta.inputs[0].shape, vec![1, 3, 64, 64]);
  assert_eq!(
    meta.output_names(),
    vec!["detection_bboxes".to_string(), "detection_scores".to_string()]
  );

  let requests = server.join().unwrap();
  assert_eq!(requests[0].line, "GET /v2/models/yolo/versions/1 HTTP/1.1");
}

#[test]
fn infer_sends_binary_tensor_and_reads_binary_outputs() {
  let reply = Reply::binary(
    json!({
      "model_name": "yolo",
      "outputs": [
        {"name": "detection_bboxes", "datatype": "FP32", "shape": [1, 4],
         "parameters": {"binary_data_size": 16}},
        {"name": "detection_scores", "datatype": "FP32", "shape": [1],
         "parameters": {"binary_data_size": 4}}
      ]
    }),
    &[&[1.0, 2.0, 3.0, 4.0], &[0.75]],
  );
  let (url, server) = serve(vec![reply]);
  let client = TritonHttpClient::new(url, Duration::from_secs(5));

  let data: Vec<u8> = [0.5f32; 12].iter().flat_map(|v| v.to_le_bytes()).collect();
  let input = InferInput {
    name: "images".to_string(),
    datatype: "FP32".to_string(),
    shape: vec![1, 3, 2, 2],
    data: data.clone(),
  };
  let outputs = client
    .infer(
      "yolo",
      None,
      input,
      &["detection_bboxes".to_string(), "detection_scores".to_string()],
    )
    .unwrap();
  assert_eq!(
    outputs.as_f32("detection_bboxes").unwrap(),
    vec![1.0, 2.0, 3.0, 4.0]
  );
  assert_eq!(outputs.as_f32("detection_scores").unwrap(), vec![0.75]);

  let requests = server.join().unwrap();
  let request = &requests[0];
  assert_eq!(request.line, "POST /v2/models/yolo/infer HTTP/1.1");
  let header_len: usize = request
    .header(INFERENCE_HEADER_CONTENT_LENGTH)
    .unwrap()
    .parse()
    .unwrap();
  assert_eq!(request.body.len(), header_len + data.len());
  assert_eq!(&request.body[header_len..], data.as_slice());

  let header: Value = serde_json::from_slice(&request.body[..header_len]).unwrap();
  assert_eq!(header["inputs"][0]["name"], "images");
  assert_eq!(header["inputs"][0]["shape"], json!([1, 3, 2, 2]));
  assert_eq!(
    header["inputs"][0]["parameters"]["binary_data_size"],
    json!(48)
  );
  assert_eq!(header["outputs"][1]["name"], "detection_scores");
  assert_eq!(header["outputs"][1]["parameters"]["binary_data"], json!(true));
}

#[test]
fn server_error_becomes_status() {
  let (url, server) = serve(vec![Reply::json(
    "400 Bad Request",
    json!({"error": "unexpected shape for input 'images'"}),
  )]);
  let client = TritonHttpClient::new(url, Duration::from_secs(5));

  let err = client.model_metadata("yolo", None).unwrap_err();
  match err {
    TritonError::Status { code, message } => {
      assert_eq!(code, 400);
      assert_eq!(message, "unexpected shape for input 'images'");
    }
    other => panic!("unexpected error: {other:?}"),
  }
  server.join().unwrap();
}

#[test]
fn health_check_reports_readiness() {
  let (url, server) = serve(vec![
    Reply::json("200 OK", json!({})),
    Reply::json("503 Service Unavailable", json!({})),
  ]);
  let client = TritonHttpClient::new(url, Duration::from_secs(5));

  assert!(client.server_ready().unwrap());
  assert!(!client.server_ready().unwrap());

  let requests = server.join().unwrap();
  assert!(requests.iter().all(|r| r.line == "GET /v2/health/ready HTTP/1.1"));
}

#[test]
fn silent_server_times_out() {
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  let url = format!("http://{}", listener.local_addr().unwrap());
  let server = thread::spawn(move || {
    let (stream, _) = listener.accept().unwrap();
    thread::sleep(Duration::from_secs(2));
    drop(stream);
  });

  let client = TritonHttpClient::new(url, Duration::from_millis(200));
  let err = client.model_metadata("yolo", None).unwrap_err();
  assert!(
    matches!(err, TritonError::Timeout(_) | TritonError::Transport(_)),
    "unexpected error: {err:?}"
  );
  server.join().unwrap();
}

#[test]
fn detector_runs_over_http() {
  // 128x64 -> 64x32，上下各填充 16 行，比例 2
  let infer_reply = Reply::binary(
    json!({
      "model_name": "yolo",
      "outputs": [
        {"name": "detection_scores", "datatype": "FP32", "shape": [1],
         "parameters": {"binary_data_size": 4}},
        {"name": "detection_bboxes", "datatype": "FP32", "shape": [1, 4],
         "parameters": {"binary_data_size": 16}}
      ]
    }),
    &[&[0.6], &[8.0, 20.0, 24.0, 40.0]],
  );
  let (url, server) = serve(vec![Reply::json("200 OK", metadata()), infer_reply]);

  let detector = RemoteDetectorBuilder::new(DetectorConfig::new(url, "yolo"))
    .build()
    .unwrap();
  let result = detector.detect(&RgbImage::new(128, 64)).unwrap();
  assert_eq!(
    result.rectangles(),
    vec![Rectangle {
      x: 16,
      y: 8,
      width: 32,
      height: 40,
    }]
  );
  assert_eq!(result.items[0].score, 0.6);

  let requests = server.join().unwrap();
  let infer = &requests[1];
  let header_len: usize = infer
    .header(INFERENCE_HEADER_CONTENT_LENGTH)
    .unwrap()
    .parse()
    .unwrap();
  assert_eq!(infer.body.len() - header_len, 3 * 64 * 64 * 4);
}

#[test]
fn builder_checks_readiness_before_metadata() {
  let (url, server) = serve(vec![
    Reply::json("503 Service Unavailable", json!({})),
    Reply::json("200 OK", metadata()),
  ]);

  let builder = RemoteDetectorBuilder::new(DetectorConfig::new(url, "yolo"));
  assert!(!builder.server_ready().unwrap());
  let detector = builder.build().unwrap();
  assert_eq!(detector.input().shape, vec![1, 3, 64, 64]);

  let requests = server.join().unwrap();
  assert_eq!(requests[0].line, "GET /v2/health/ready HTTP/1.1");
  assert_eq!(requests[1].line, "GET /v2/models/yolo HTTP/1.1");
}

#[test]
fn builder_readiness_reports_unreachable_server() {
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  let url = format!("http://{}", listener.local_addr().unwrap());
  drop(listener);

  let builder = RemoteDetectorBuilder::new(DetectorConfig::new(url, "yolo"))
    .timeout(Duration::from_secs(2));
  assert!(builder.server_ready().is_err());
}
