// 该文件是 Beifeng （北风） 项目的一部分。
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

use std::path::PathBuf;

use serde::Serialize;

use crate::frame::InterleavedFrame;
use crate::sys;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 边界框，中心点坐标与宽高，位于输入图像坐标系
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BoundingBox {
  pub x: f32,
  pub y: f32,
  pub w: f32,
  pub h: f32,
}

impl From<sys::BBox> for BoundingBox {
  fn from(bbox: sys::BBox) -> Self {
    Self {
      x: bbox.x,
      y: bbox.y,
      w: bbox.w,
      h: bbox.h,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectItem {
  pub name: String,
  pub prob: f32,
  pub bbox: BoundingBox,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
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
}

/// 检测输入：交给原生库读取的文件路径，或调用方持有的字节帧
#[derive(Debug, Clone, PartialEq)]
pub enum DetectInput {
  Path(PathBuf),
  Buffer(InterleavedFrame),
}

impl From<PathBuf> for DetectInput {
  fn from(path: PathBuf) -> Self {
    DetectInput::Path(path)
  }
}

impl From<InterleavedFrame> for DetectInput {
  fn from(frame: InterleavedFrame) -> Self {
    DetectInput::Buffer(frame)
  }
}

pub const DEFAULT_THRESH: f32 = 0.5;
pub const DEFAULT_HIER_THRESH: f32 = 0.5;
pub const DEFAULT_NMS: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectOptions {
  /// 置信度阈值
  pub thresh: f32,
  /// 层级分类阈值，原样传给原生库
  pub hier_thresh: f32,
  /// NMS IOU 阈值，不大于 0 时跳过 NMS
  pub nms: f32,
}

impl Default for DetectOptions {
  fn default() -> Self {
    Self {
      thresh: DEFAULT_THRESH,
      hier_thresh: DEFAULT_HIER_THRESH,
      nms: DEFAULT_NMS,
    }
  }
}

mod darknet;
pub use self::darknet::{
  Detector, DetectorBuilder, DetectorConfig, DetectorError, NamesSource, RawDetections,
};
