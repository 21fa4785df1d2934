// 该文件是 Beifeng （北风） 项目的一部分。
// src/metadata.rs - 类别元数据
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

use std::ffi::{CString, NulError};
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::sys;

#[derive(Error, Debug)]
pub enum MetadataError {
  #[error("类别文件读取错误 {path}: {source}")]
  Io {
    path: String,
    source: std::io::Error,
  },
  #[error("类别列表为空")]
  Empty,
  #[error("类别名包含 NUL 字符: {0}")]
  Nul(#[from] NulError),
  #[error("类别数量过多: {0}")]
  TooMany(usize),
}

/// 有序的类别名列表，构造后不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
  names: Box<[String]>,
}

impl Metadata {
  /// 空白行会被丢弃，其余名称去除首尾空白
  pub fn from_names<I, S>(names: I) -> Result<Self, MetadataError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let names: Vec<String> = names
      .into_iter()
      .map(|name| name.as_ref().trim().to_string())
      .filter(|name| !name.is_empty())
      .collect();
    if names.is_empty() {
      return Err(MetadataError::Empty);
    }
    Ok(Self {
      names: names.into_boxed_slice(),
    })
  }

  /// 读取每行一个类别名的文件
  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, MetadataError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| MetadataError::Io {
      path: path.display().to_string(),
      source,
    })?;
    let metadata = Self::from_names(content.lines())?;
    debug!("从 {} 读取 {} 个类别", path.display(), metadata.classes());
    Ok(metadata)
  }

  pub fn classes(&self) -> usize {
    self.names.len()
  }

  pub fn name(&self, class_id: usize) -> Option<&str> {
    self.names.get(class_id).map(String::as_str)
  }

  pub fn names(&self) -> &[String] {
    &self.names
  }

  /// 生成原生 `metadata` 记录，返回值持有名称字符串的所有权
  pub fn to_record(&self) -> Result<MetadataRecord, MetadataError> {
    let classes =
      i32::try_from(self.names.len()).map_err(|_| MetadataError::TooMany(self.names.len()))?;
    let joined = CString::new(self.names.join("\n"))?;
    let raw = sys::Metadata {
      classes,
      names: joined.as_ptr(),
    };
    Ok(MetadataRecord {
      raw,
      _names: joined,
    })
  }
}

/// 原生 `metadata` 记录及其名称缓冲区
#[derive(Debug)]
pub struct MetadataRecord {
  raw: sys::Metadata,
  _names: CString,
}

impl MetadataRecord {
  pub fn raw(&self) -> &sys::Metadata {
    &self.raw
  }
}
