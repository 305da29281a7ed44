// 该文件是 Shanan Remote （山南远程推理） 项目的一部分。
// src/model.rs - 模型
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

use std::{fmt, time::Duration};

use crate::unmap::Rectangle;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectItem {
  pub score: f32,
  pub rect: Rectangle, // 原图像素坐标 (x, y, width, height)
}

/// 检测结果，顺序与服务端返回一致
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &DetectItem> {
    self.items.iter()
  }

  pub fn rectangles(&self) -> Vec<Rectangle> {
    self.items.iter().map(|item| item.rect).collect()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    DetectResult {
      items: items.into_boxed_slice(),
    }
  }
}

/// 一次检测中的流水线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
  Preprocess,
  Inference,
  Postprocess,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Stage::Preprocess => "预处理",
      Stage::Inference => "推理",
      Stage::Postprocess => "后处理",
    };
    f.write_str(name)
  }
}

/// 阶段耗时回调
pub type StageHook = Box<dyn Fn(Stage, Duration) + Send + Sync>;

mod config;
mod remote;

pub use self::config::{
  ConfigError, DEFAULT_BOXES_OUTPUT, DEFAULT_SCORES_OUTPUT, DetectorConfig, TRITON_SCHEME,
};
pub use self::remote::{
  DetectError, RemoteDetector, RemoteDetectorBuilder, ResolvedInput, parse_detections,
  resolve_input,
};
