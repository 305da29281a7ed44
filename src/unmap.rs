// 该文件是 Shanan Remote （山南远程推理） 项目的一部分。
// src/unmap.rs - 模型坐标到原图坐标的逆变换
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

use crate::letterbox::LetterboxParams;

/// 模型输入空间中的框 [x1, y1, x2, y2]
pub type RawBox = [f32; 4];

/// 原图像素空间中的矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rectangle {
  pub x: i32,
  pub y: i32,
  pub width: i32,
  pub height: i32,
}

impl Rectangle {
  pub fn right(&self) -> i32 {
    self.x.saturating_add(self.width)
  }

  pub fn bottom(&self) -> i32 {
    self.y.saturating_add(self.height)
  }
}

/// 去除填充并按缩放系数还原，保持输入顺序
///
/// 各坐标先向零截断再求宽高，不做裁剪或过滤；超出 i32 范围的值饱和到边界。
pub fn unmap(raw_boxes: &[RawBox], params: &LetterboxParams) -> Vec<Rectangle> {
  let padding = [
    params.pad_left as f32,
    params.pad_top as f32,
    params.pad_left as f32,
    params.pad_top as f32,
  ];
  let scaling = [params.scale_w, params.scale_h, params.scale_w, params.scale_h];

  raw_boxes
    .iter()
    .map(|raw| {
      let mut coords = [0i32; 4];
      for (i, coord) in coords.iter_mut().enumerate() {
        *coord = ((raw[i] - padding[i]) * scaling[i]) as i32;
      }
      let [x1, y1, x2, y2] = coords;
      Rectangle {
        x: x1,
        y: y1,
        width: x2.saturating_sub(x1),
        height: y2.saturating_sub(y1),
      }
    })
    .collect()
}
