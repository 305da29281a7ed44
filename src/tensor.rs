// 该文件是 Shanan Remote （山南远程推理） 项目的一部分。
// src/tensor.rs - NCHW 浮点输入张量打包
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

use std::str::FromStr;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error};

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PackError {
  #[error("输入尺寸不匹配: 期望 {expected_w}x{expected_h}, 实际 {actual_w}x{actual_h}")]
  ShapeMismatch {
    expected_w: u32,
    expected_h: u32,
    actual_w: u32,
    actual_h: u32,
  },
  #[error("通道总字节数异常: 写入 {written}, 期望 {expected}")]
  SizeMismatch { written: usize, expected: usize },
  #[error("张量尺寸退化: {0}x{1}")]
  Degenerate(u32, u32),
}

/// 模型期望的通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

impl ChannelOrder {
  /// 每个平面对应的 RGB 像素分量索引
  fn planes(self) -> [usize; RGB_CHANNELS] {
    match self {
      ChannelOrder::Rgb => [0, 1, 2],
      ChannelOrder::Bgr => [2, 1, 0],
    }
  }
}

impl FromStr for ChannelOrder {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "rgb" => Ok(ChannelOrder::Rgb),
      "bgr" => Ok(ChannelOrder::Bgr),
      other => Err(format!("未知通道顺序: {}", other)),
    }
  }
}

/// 通道平面排列的归一化输入张量
#[derive(Debug, Clone)]
pub struct InputTensor {
  data: Box<[f32]>,
  height: u32,
  width: u32,
  order: ChannelOrder,
}

impl InputTensor {
  pub fn height(&self) -> usize {
    self.height as usize
  }

  pub fn width(&self) -> usize {
    self.width as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn order(&self) -> ChannelOrder {
    self.order
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn plane(&self, channel: usize) -> &[f32] {
    let size = self.height() * self.width();
    &self.data[channel * size..(channel + 1) * size]
  }

  pub fn byte_len(&self) -> usize {
    self.data.len() * size_of::<f32>()
  }

  /// 推理服务使用的小端字节序缓冲区
  pub fn to_le_bytes(&self) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(self.byte_len());
    for value in self.data.iter() {
      bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
  }
}

/// 将 letterbox 后的图像打包为 NCHW 浮点张量，每个值除以 255
pub fn pack(
  image: &RgbImage,
  target_h: u32,
  target_w: u32,
  order: ChannelOrder,
) -> Result<InputTensor, PackError> {
  if target_h == 0 || target_w == 0 {
    return Err(PackError::Degenerate(target_w, target_h));
  }

  let (actual_w, actual_h) = image.dimensions();
  if (actual_w, actual_h) != (target_w, target_h) {
    error!(
      "打包输入尺寸不匹配: 期望 {}x{}, 实际 {}x{}",
      target_w, target_h, actual_w, actual_h
    );
    return Err(PackError::ShapeMismatch {
      expected_w: target_w,
      expected_h: target_h,
      actual_w,
      actual_h,
    });
  }

  let plane_size = target_h as usize * target_w as usize;
  let expected = RGB_CHANNELS * plane_size * size_of::<f32>();
  let mut data = vec![0.0f32; RGB_CHANNELS * plane_size];

  let mut written = 0usize;
  for (plane, component) in data.chunks_exact_mut(plane_size).zip(order.planes()) {
    for (dst, pixel) in plane.iter_mut().zip(image.pixels()) {
      *dst = pixel[component] as f32 / 255.0;
    }
    written += plane.len() * size_of::<f32>();
  }

  if written != expected {
    error!("通道总字节数异常: 写入 {}, 期望 {}", written, expected);
    return Err(PackError::SizeMismatch { written, expected });
  }

  debug!(
    "打包输入张量 {}x{}x{} ({:?}), {} 字节",
    RGB_CHANNELS, target_h, target_w, order, written
  );

  Ok(InputTensor {
    data: data.into_boxed_slice(),
    height: target_h,
    width: target_w,
    order,
  })
}
