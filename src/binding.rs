// 该文件是 Beifeng （北风） 项目的一部分。
// src/binding.rs - darknet 原生库调用接口
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

use std::ffi::CStr;

use thiserror::Error;

use crate::handle::{
  BorrowedImage, DetectionsPtr, ImageRef, MemoryPtr, NativeImage, NetworkPtr,
};

mod native;
pub use self::native::NativeLibrary;

#[cfg(test)]
pub(crate) mod mock;

#[derive(Error, Debug)]
pub enum BindingError {
  #[error("无法加载原生库 {path}: {source}")]
  Library {
    path: String,
    source: libloading::Error,
  },
  #[error("无法定位原生库: {0}")]
  Locate(std::io::Error),
  #[error("原生库缺少符号 {symbol}: {source}")]
  Symbol {
    symbol: &'static str,
    source: libloading::Error,
  },
  #[error("原生调用 {0} 返回空指针")]
  NullReturn(&'static str),
  #[error("结构体 {record} 布局不匹配: Rust 为 {rust} 字节, 原生库为 {native} 字节")]
  LayoutMismatch {
    record: &'static str,
    rust: usize,
    native: usize,
  },
  #[error("参数超出原生整数范围: {0}")]
  OutOfRange(&'static str),
}

/// 原生调用的执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
  /// 在调用方上下文中直接执行
  Blocking,
  /// 推理路径上的调用，可交给 [`crate::worker::DetectorWorker`] 在工作线程中执行
  Offloaded,
}

#[derive(Debug, Clone, Copy)]
pub struct EntryPoint {
  pub symbol: &'static str,
  pub mode: CallMode,
}

const fn entry(symbol: &'static str, mode: CallMode) -> EntryPoint {
  EntryPoint { symbol, mode }
}

pub const LOAD_NETWORK: EntryPoint = entry("load_network", CallMode::Blocking);
pub const SET_BATCH_NETWORK: EntryPoint = entry("set_batch_network", CallMode::Blocking);
pub const NETWORK_OUTPUT_SIZE: EntryPoint = entry("network_output_size", CallMode::Blocking);
pub const LOAD_IMAGE_COLOR: EntryPoint = entry("load_image_color", CallMode::Offloaded);
pub const FLOAT_TO_IMAGE: EntryPoint = entry("float_to_image", CallMode::Blocking);
pub const COPY_IMAGE: EntryPoint = entry("copy_image", CallMode::Blocking);
pub const LETTERBOX_IMAGE: EntryPoint = entry("letterbox_image", CallMode::Offloaded);
pub const NETWORK_PREDICT_IMAGE: EntryPoint = entry("network_predict_image", CallMode::Offloaded);
pub const MAKE_MEMORY: EntryPoint = entry("make_memory", CallMode::Blocking);
pub const FREE_MEMORY: EntryPoint = entry("free_memory", CallMode::Blocking);
pub const REMEMBER_NETWORK: EntryPoint = entry("remember_network", CallMode::Offloaded);
pub const AVG_PREDICTIONS: EntryPoint = entry("avg_predictions", CallMode::Offloaded);
pub const DO_NMS_OBJ: EntryPoint = entry("do_nms_obj", CallMode::Offloaded);
pub const FREE_DETECTIONS: EntryPoint = entry("free_detections", CallMode::Blocking);
pub const FREE_IMAGE: EntryPoint = entry("free_image", CallMode::Blocking);
pub const FREE_NETWORK: EntryPoint = entry("free_network", CallMode::Blocking);

/// 绑定层依赖的全部原生入口
pub const ENTRY_POINTS: [EntryPoint; 16] = [
  LOAD_NETWORK,
  SET_BATCH_NETWORK,
  NETWORK_OUTPUT_SIZE,
  LOAD_IMAGE_COLOR,
  FLOAT_TO_IMAGE,
  COPY_IMAGE,
  LETTERBOX_IMAGE,
  NETWORK_PREDICT_IMAGE,
  MAKE_MEMORY,
  FREE_MEMORY,
  REMEMBER_NETWORK,
  AVG_PREDICTIONS,
  DO_NMS_OBJ,
  FREE_DETECTIONS,
  FREE_IMAGE,
  FREE_NETWORK,
];

/// 需要卸载到工作线程的入口
pub fn offloaded_entry_points() -> impl Iterator<Item = &'static EntryPoint> {
  ENTRY_POINTS
    .iter()
    .filter(|entry| entry.mode == CallMode::Offloaded)
}

/// darknet 原生库的调用面
///
/// 每个分配资源的方法都有对应的释放方法，释放方法按值接收句柄。
/// 句柄只能由实现者创建，调用方无法伪造或复制。
pub trait Backend {
  fn load_network(&self, cfg: &CStr, weights: &CStr) -> Result<NetworkPtr, BindingError>;
  fn set_batch_network(&self, network: &NetworkPtr, batch: i32);
  fn network_output_size(&self, network: &NetworkPtr) -> usize;

  fn load_image_color(&self, path: &CStr) -> Result<NativeImage, BindingError>;
  /// 将调用方的平面浮点缓冲区包装为原生图像，不复制也不分配
  fn float_to_image<'a>(
    &self,
    width: i32,
    height: i32,
    channels: i32,
    data: &'a mut [f32],
  ) -> Result<BorrowedImage<'a>, BindingError>;
  fn copy_image(&self, image: ImageRef<'_>) -> Result<NativeImage, BindingError>;
  fn letterbox_image(
    &self,
    image: ImageRef<'_>,
    width: i32,
    height: i32,
  ) -> Result<NativeImage, BindingError>;

  /// 前向推理，返回网络内部持有的输出向量
  fn network_predict_image(
    &self,
    network: &NetworkPtr,
    image: ImageRef<'_>,
  ) -> Result<*const f32, BindingError>;

  fn make_memory(&self, slots: usize, slot_size: usize) -> Result<MemoryPtr, BindingError>;
  fn free_memory(&self, memory: MemoryPtr);
  fn remember_network(
    &self,
    network: &NetworkPtr,
    memory: &MemoryPtr,
    index: usize,
  ) -> Result<(), BindingError>;

  /// 对前 `populated` 个槽位取平均并生成检测框；结果为空时返回 `None`
  #[allow(clippy::too_many_arguments)]
  fn avg_predictions(
    &self,
    network: &NetworkPtr,
    memory: &MemoryPtr,
    populated: usize,
    width: i32,
    height: i32,
    thresh: f32,
    hier_thresh: f32,
  ) -> Result<Option<DetectionsPtr>, BindingError>;
  fn do_nms_obj(
    &self,
    detections: &DetectionsPtr,
    classes: usize,
    thresh: f32,
  ) -> Result<(), BindingError>;

  fn free_detections(&self, detections: DetectionsPtr);
  fn free_image(&self, image: NativeImage);
  fn free_network(&self, network: NetworkPtr);
}

pub(crate) fn to_c_int(value: usize, what: &'static str) -> Result<i32, BindingError> {
  i32::try_from(value).map_err(|_| BindingError::OutOfRange(what))
}
