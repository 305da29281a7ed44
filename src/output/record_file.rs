// 该文件是 Shanan Remote （山南远程推理） 项目的一部分。
// src/output/record_file.rs - 检测结果文本记录
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, model::DetectResult, output::Render};

#[derive(Error, Debug)]
pub enum RecordFileError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 每个检测框一行: `x y width height score`
pub struct RecordFileOutput {
  path: PathBuf,
}

impl FromUrlWithScheme for RecordFileOutput {
  const SCHEME: &'static str = "record";
}

impl FromUrl for RecordFileOutput {
  type Error = RecordFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(RecordFileError::SchemeMismatch);
    }

    Ok(RecordFileOutput {
      path: PathBuf::from(uri.path()),
    })
  }
}

impl RecordFileOutput {
  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn format(result: &DetectResult) -> String {
    let mut records = Vec::with_capacity(result.len());
    for item in result.iter() {
      let rect = &item.rect;
      records.push(format!(
        "{} {} {} {} {:.4}",
        rect.x, rect.y, rect.width, rect.height, item.score
      ));
    }
    let mut text = records.join("\n");
    if !text.is_empty() {
      text.push('\n');
    }
    text
  }
}

impl Render<RgbImage, DetectResult> for RecordFileOutput {
  type Error = RecordFileError;

  fn render_result(&self, _frame: &RgbImage, result: &DetectResult) -> Result<(), Self::Error> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&self.path, Self::format(result))?;
    info!("记录 {} 个检测框到 {}", result.len(), self.path.display());
    Ok(())
  }
}
