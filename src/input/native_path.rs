// 该文件是 Beifeng （北风） 项目的一部分。
// src/input/native_path.rs - 交给原生库读取的图像路径
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
use std::path::PathBuf;

use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, input::list_images, model::DetectInput};

#[derive(Error, Debug)]
pub enum NativePathInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("路径不存在: {0}")]
  NotFound(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 不在 Rust 侧解码，只把路径交给原生库
pub struct NativePathInput {
  paths: VecDeque<PathBuf>,
}

impl FromUrlWithScheme for NativePathInput {
  const SCHEME: &'static str = "file";
}

impl FromUrl for NativePathInput {
  type Error = NativePathInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(NativePathInputError::SchemeMismatch);
    }

    let path = PathBuf::from(url.path());
    if !path.exists() {
      return Err(NativePathInputError::NotFound(url.path().to_string()));
    }
    let paths = list_images(&path)?;
    info!("共 {} 个图像路径", paths.len());
    Ok(Self {
      paths: paths.into(),
    })
  }
}

impl Iterator for NativePathInput {
  type Item = DetectInput;

  fn next(&mut self) -> Option<Self::Item> {
    self.paths.pop_front().map(DetectInput::Path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;

  #[test]
  fn directory_yields_paths_in_order() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("2.jpg"), b"x").unwrap();
    fs::write(dir.path().join("1.jpg"), b"x").unwrap();
    let url = Url::from_directory_path(dir.path()).unwrap();

    let inputs: Vec<_> = NativePathInput::from_url(&url).unwrap().collect();
    assert_eq!(
      inputs,
      vec![
        DetectInput::Path(dir.path().join("1.jpg")),
        DetectInput::Path(dir.path().join("2.jpg")),
      ]
    );
  }

  #[test]
  fn missing_path_is_reported() {
    let url = Url::parse("file:///definitely/not/here.jpg").unwrap();
    assert!(matches!(
      NativePathInput::from_url(&url),
      Err(NativePathInputError::NotFound(_))
    ));
  }
}
