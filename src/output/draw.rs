// 该文件是 Shanan Remote （山南远程推理） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::{
  model::{DetectItem, DetectResult},
  unmap::Rectangle,
};

const BOX_THICKNESS: u32 = 3;
const BOX_COLOR: [u8; 3] = [255, 0, 0]; // 红色

/// 检测框绘制
///
/// 只绘制矩形边框，不在框上方写置信度文字：渲染文字需要随程序分发字体文件。
/// 置信度可通过 `record://` 输出获得。
pub struct Draw {
  thickness: u32,
  color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      thickness: BOX_THICKNESS,
      color: BOX_COLOR,
    }
  }
}

impl Draw {
  pub fn with_thickness(mut self, thickness: u32) -> Self {
    self.thickness = thickness;
    self
  }

  pub fn with_color(mut self, color: [u8; 3]) -> Self {
    self.color = color;
    self
  }

  // 在图像上绘制矩形边框，向内加粗；完全落在图像外的框被跳过
  fn draw_rectangle(&self, image: &mut RgbImage, rect: &Rectangle) {
    let (w, h) = (image.width() as i32, image.height() as i32);

    for t in 0..self.thickness as i32 {
      let width = rect.width - 2 * t;
      let height = rect.height - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let (x, y) = (rect.x + t, rect.y + t);
      if x >= w || y >= h || x + width <= 0 || y + height <= 0 {
        return;
      }
      let outline = Rect::at(x, y).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, outline, Rgb(self.color));
    }
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectResult) {
    for DetectItem { rect, .. } in result.iter() {
      self.draw_rectangle(image, rect);
    }
  }

  /// 在源图像的副本上绘制检测结果
  pub fn draw_detection(&self, frame: &RgbImage, result: &DetectResult) -> RgbImage {
    let mut image = frame.clone();
    self.draw_detections_on_image(&mut image, result);
    image
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn result(rects: &[Rectangle]) -> DetectResult {
    DetectResult::from(
      rects
        .iter()
        .map(|&rect| DetectItem { score: 0.9, rect })
        .collect::<Vec<_>>(),
    )
  }

  #[test]
  fn draws_thick_outline_without_touching_source() {
    let frame = RgbImage::new(20, 20);
    let rect = Rectangle {
      x: 2,
      y: 2,
      width: 10,
      height: 10,
    };
    let image = Draw::default().draw_detection(&frame, &result(&[rect]));

    assert_eq!(image.get_pixel(2, 2).0, BOX_COLOR);
    assert_eq!(image.get_pixel(4, 6).0, BOX_COLOR);
    assert_eq!(image.get_pixel(11, 11).0, BOX_COLOR);
    assert_eq!(image.get_pixel(6, 6).0, [0, 0, 0]);
    assert!(frame.pixels().all(|p| p.0 == [0, 0, 0]));
  }

  #[test]
  fn skips_boxes_outside_image() {
    let frame = RgbImage::new(10, 10);
    let rects = [
      Rectangle {
        x: 50,
        y: 50,
        width: 5,
        height: 5,
      },
      Rectangle {
        x: -20,
        y: 0,
        width: 5,
        height: 5,
      },
      Rectangle {
        x: 1,
        y: 1,
        width: 0,
        height: 4,
      },
    ];
    let image = Draw::default()
      .with_thickness(1)
      .with_color([0, 255, 0])
      .draw_detection(&frame, &result(&rects));
    assert!(image.pixels().all(|p| p.0 == [0, 0, 0]));
  }

  #[test]
  fn no_label_is_drawn_above_box() {
    let frame = RgbImage::new(40, 40);
    let rect = Rectangle {
      x: 10,
      y: 20,
      width: 15,
      height: 10,
    };
    let image = Draw::default().draw_detection(&frame, &result(&[rect]));

    assert!((0..40).all(|x| (0..20).all(|y| image.get_pixel(x, y).0 == [0, 0, 0])));
    assert_eq!(image.get_pixel(10, 20).0, BOX_COLOR);
  }
}
