// 该文件是 Shanan Remote （山南远程推理） 项目的一部分。
// src/letterbox.rs - 保持长宽比的缩放与填充
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

use fast_image_resize::{
  FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer, images::Image,
};
use image::{RgbImage, imageops};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LetterboxError {
  #[error(
    "几何尺寸退化: 源图像 {src_w}x{src_h}, 目标 {target_w}x{target_h}, 缩放后 {new_w}x{new_h}"
  )]
  Degenerate {
    src_w: u32,
    src_h: u32,
    target_w: u32,
    target_h: u32,
    new_w: u32,
    new_h: u32,
  },
  #[error("缩放失败: {0}")]
  Resize(String),
}

/// 逆变换所需的填充与缩放参数
///
/// `scale_h`/`scale_w` 为原图尺寸除以缩放后（填充前）的尺寸，
/// 而不是除以目标尺寸；填充是在缩放之后叠加的。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxParams {
  pub pad_top: u32,
  pub pad_left: u32,
  pub scale_h: f32,
  pub scale_w: f32,
}

/// 将图像缩放到 `target_w x target_h`
///
/// `keep_aspect` 为真且图像不是正方形时，按长边缩放并以 0 填充短边两侧；
/// 否则直接拉伸到目标尺寸。输入图像只读，返回新分配的图像。
pub fn letterbox(
  image: &RgbImage,
  target_h: u32,
  target_w: u32,
  keep_aspect: bool,
) -> Result<(RgbImage, LetterboxParams), LetterboxError> {
  let (src_w, src_h) = image.dimensions();
  let degenerate = |new_w, new_h| LetterboxError::Degenerate {
    src_w,
    src_h,
    target_w,
    target_h,
    new_w,
    new_h,
  };

  if src_w == 0 || src_h == 0 || target_w == 0 || target_h == 0 {
    return Err(degenerate(0, 0));
  }

  if !keep_aspect || src_w == src_h {
    let resized = resize_area(image, target_w, target_h)?;
    let params = LetterboxParams {
      pad_top: 0,
      pad_left: 0,
      scale_h: (src_h as f64 / target_h as f64) as f32,
      scale_w: (src_w as f64 / target_w as f64) as f32,
    };
    debug!("直接缩放 {}x{} -> {}x{}", src_w, src_h, target_w, target_h);
    return Ok((resized, params));
  }

  let hw_scale = src_h as f64 / src_w as f64;
  let (new_w, new_h) = if hw_scale > 1.0 {
    ((target_w as f64 / hw_scale).round() as u32, target_h)
  } else {
    (target_w, (target_h as f64 * hw_scale).round() as u32)
  };

  if new_w == 0 || new_h == 0 {
    return Err(degenerate(new_w, new_h));
  }

  // 只会有一个方向需要填充
  let pad_left = (target_w - new_w) / 2;
  let pad_top = (target_h - new_h) / 2;

  let resized = resize_area(image, new_w, new_h)?;
  let mut canvas = RgbImage::new(target_w, target_h);
  imageops::replace(&mut canvas, &resized, pad_left as i64, pad_top as i64);

  let params = LetterboxParams {
    pad_top,
    pad_left,
    scale_h: (src_h as f64 / new_h as f64) as f32,
    scale_w: (src_w as f64 / new_w as f64) as f32,
  };
  debug!(
    "Letterbox {}x{} -> {}x{}, 填充 (上 {}, 左 {}), 缩放 ({:.4}, {:.4})",
    src_w, src_h, new_w, new_h, pad_top, pad_left, params.scale_h, params.scale_w
  );

  Ok((canvas, params))
}

/// 区域平均插值
///
/// 缩小时盒式卷积核即为每个目标像素覆盖区域内源像素的面积加权平均。
fn resize_area(src: &RgbImage, dst_w: u32, dst_h: u32) -> Result<RgbImage, LetterboxError> {
  if src.dimensions() == (dst_w, dst_h) {
    return Ok(src.clone());
  }

  let (src_w, src_h) = src.dimensions();
  let src_image = Image::from_vec_u8(src_w, src_h, src.as_raw().clone(), PixelType::U8x3)
    .map_err(|e| LetterboxError::Resize(e.to_string()))?;
  let mut dst_image = Image::new(dst_w, dst_h, PixelType::U8x3);

  let options = ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Box));
  Resizer::new()
    .resize(&src_image, &mut dst_image, Some(&options))
    .map_err(|e| LetterboxError::Resize(e.to_string()))?;

  RgbImage::from_raw(dst_w, dst_h, dst_image.into_vec())
    .ok_or_else(|| LetterboxError::Resize(format!("缓冲区大小与 {}x{} 不符", dst_w, dst_h)))
}
