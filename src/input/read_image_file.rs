// 该文件是 Beifeng （北风） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use image::ImageReader;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, frame::InterleavedFrame, input::list_images, model::DetectInput,
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像读取错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

const READ_IMAGE_FILE_SCHEME: &str = "image";

/// 在 Rust 侧解码图像，以字节帧交给检测器
///
/// 单个文件在构造时即解码，错误立刻返回；目录中的文件逐个解码，
/// 解码失败的文件记录日志后跳过。
pub struct ImageFileInput {
  first: Option<InterleavedFrame>,
  rest: VecDeque<PathBuf>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = READ_IMAGE_FILE_SCHEME;
}

fn decode(path: &Path) -> Result<InterleavedFrame, ImageFileInputError> {
  let image = ImageReader::open(path)?.decode()?;
  Ok(image.to_rgb8().into())
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = PathBuf::from(url.path());
    if path.is_dir() {
      let rest = list_images(&path)?;
      info!("目录 {} 中共 {} 个图像文件", path.display(), rest.len());
      Ok(ImageFileInput {
        first: None,
        rest: rest.into(),
      })
    } else {
      Ok(ImageFileInput {
        first: Some(decode(&path)?),
        rest: VecDeque::new(),
      })
    }
  }
}

impl Iterator for ImageFileInput {
  type Item = DetectInput;

  fn next(&mut self) -> Option<Self::Item> {
    if let Some(frame) = self.first.take() {
      return Some(DetectInput::Buffer(frame));
    }
    while let Some(path) = self.rest.pop_front() {
      match decode(&path) {
        Ok(frame) => return Some(DetectInput::Buffer(frame)),
        Err(err) => warn!("跳过无法读取的图像 {}: {}", path.display(), err),
      }
    }
    None
  }
}
