// 该文件是 Beifeng （北风） 项目的一部分。
// src/input.rs - 图像输入
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

use thiserror::Error;

use crate::{FromUrl, FromUrlWithScheme, model::DetectInput};

mod native_path;
pub use self::native_path::{NativePathInput, NativePathInputError};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// 单个文件原样返回；目录则按文件名排序列出其中的图像文件
pub(crate) fn list_images(path: &Path) -> std::io::Result<Vec<PathBuf>> {
  if !path.is_dir() {
    return Ok(vec![path.to_path_buf()]);
  }

  let mut files = Vec::new();
  for entry in std::fs::read_dir(path)? {
    let file = entry?.path();
    let is_image = file
      .extension()
      .and_then(|ext| ext.to_str())
      .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
      .unwrap_or(false);
    if file.is_file() && is_image {
      files.push(file);
    }
  }
  files.sort();
  Ok(files)
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("原生路径输入错误: {0}")]
  NativePathInputError(#[from] NativePathInputError),
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  NativePath(NativePathInput),
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() == NativePathInput::SCHEME {
      let input = NativePathInput::from_url(url)?;
      return Ok(InputWrapper::NativePath(input));
    }
    #[cfg(feature = "read_image_file")]
    {
      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Iterator for InputWrapper {
  type Item = DetectInput;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::NativePath(input) => input.next(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.next(),
    }
  }
}
