// 该文件是 Beifeng （北风） 项目的一部分。
// src/sys.rs - darknet 原生结构体镜像
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

//! 与 `darknet.h`（CPU 构建）逐字节对应的结构体定义。
//!
//! 字段顺序、大小与对齐必须与原生库编译产物一致，任何偏差都会导致
//! 无声的内存破坏而不是可检测的错误。64 位目标上的大小在编译期断言，
//! 原生库若导出 `darknet_sizeof_*` 探针，加载时还会再比对一次。

#![allow(non_snake_case)]

use std::os::raw::{c_char, c_float, c_int};

/// 边界框：中心点坐标与宽高
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BBox {
  pub x: c_float,
  pub y: c_float,
  pub w: c_float,
  pub h: c_float,
}

/// 单条检测记录，`prob` 指向长度为 `classes` 的概率数组
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Detection {
  pub bbox: BBox,
  pub classes: c_int,
  pub prob: *mut c_float,
  pub mask: *mut c_float,
  pub objectness: c_float,
  pub sort_class: c_int,
}

/// 平面排列（CHW）的浮点图像
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Image {
  pub w: c_int,
  pub h: c_int,
  pub c: c_int,
  pub data: *mut c_float,
}

/// 类别元数据，`names` 为换行拼接的类别名
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Metadata {
  pub classes: c_int,
  pub names: *const c_char,
}

#[repr(C)]
pub struct Layer {
  _private: [u8; 0],
}

#[repr(C)]
pub struct Tree {
  _private: [u8; 0],
}

pub type LearningRatePolicy = c_int;

/// 网络参数块
///
/// 本 crate 只读取 `batch`、`w`、`h`、`c` 等少数字段，但整个结构体必须完整镜像，
/// 否则之后字段的偏移都会错位。
#[repr(C)]
pub struct Network {
  pub n: c_int,
  pub batch: c_int,
  pub seen: *mut usize,
  pub t: *mut c_int,
  pub epoch: c_float,
  pub subdivisions: c_int,
  pub layers: *mut Layer,
  pub output: *mut c_float,
  pub policy: LearningRatePolicy,

  pub learning_rate: c_float,
  pub momentum: c_float,
  pub decay: c_float,
  pub gamma: c_float,
  pub scale: c_float,
  pub power: c_float,
  pub time_steps: c_int,
  pub step: c_int,
  pub max_batches: c_int,
  pub scales: *mut c_float,
  pub steps: *mut c_int,
  pub num_steps: c_int,
  pub burn_in: c_int,

  pub adam: c_int,
  pub B1: c_float,
  pub B2: c_float,
  pub eps: c_float,

  pub inputs: c_int,
  pub outputs: c_int,
  pub truths: c_int,
  pub notruth: c_int,
  pub h: c_int,
  pub w: c_int,
  pub c: c_int,
  pub max_crop: c_int,
  pub min_crop: c_int,
  pub max_ratio: c_float,
  pub min_ratio: c_float,
  pub center: c_int,
  pub angle: c_float,
  pub aspect: c_float,
  pub exposure: c_float,
  pub saturation: c_float,
  pub hue: c_float,
  pub random: c_int,

  pub gpu_index: c_int,
  pub hierarchy: *mut Tree,

  pub input: *mut c_float,
  pub truth: *mut c_float,
  pub delta: *mut c_float,
  pub workspace: *mut c_float,
  pub train: c_int,
  pub index: c_int,
  pub cost: *mut c_float,
  pub clip: c_float,
}

#[cfg(target_pointer_width = "64")]
pub const SIZEOF_BBOX: usize = 16;
#[cfg(target_pointer_width = "64")]
pub const SIZEOF_DETECTION: usize = 48;
#[cfg(target_pointer_width = "64")]
pub const SIZEOF_IMAGE: usize = 24;
#[cfg(target_pointer_width = "64")]
pub const SIZEOF_METADATA: usize = 16;
#[cfg(target_pointer_width = "64")]
pub const SIZEOF_NETWORK: usize = 272;

#[cfg(target_pointer_width = "64")]
const _: () = {
  assert!(std::mem::size_of::<BBox>() == SIZEOF_BBOX);
  assert!(std::mem::size_of::<Detection>() == SIZEOF_DETECTION);
  assert!(std::mem::size_of::<Image>() == SIZEOF_IMAGE);
  assert!(std::mem::size_of::<Metadata>() == SIZEOF_METADATA);
  assert!(std::mem::size_of::<Network>() == SIZEOF_NETWORK);
};

#[cfg(test)]
mod tests {
  use super::*;
  use std::mem::{align_of, offset_of, size_of};

  #[test]
  fn bbox_is_four_packed_floats() {
    assert_eq!(size_of::<BBox>(), 4 * size_of::<c_float>());
    assert_eq!(offset_of!(BBox, x), 0);
    assert_eq!(offset_of!(BBox, h), 12);
  }

  #[cfg(target_pointer_width = "64")]
  #[test]
  fn detection_layout() {
    assert_eq!(offset_of!(Detection, bbox), 0);
    assert_eq!(offset_of!(Detection, classes), 16);
    assert_eq!(offset_of!(Detection, prob), 24);
    assert_eq!(offset_of!(Detection, mask), 32);
    assert_eq!(offset_of!(Detection, objectness), 40);
    assert_eq!(offset_of!(Detection, sort_class), 44);
    assert_eq!(align_of::<Detection>(), 8);
  }

  #[cfg(target_pointer_width = "64")]
  #[test]
  fn image_and_metadata_layout() {
    assert_eq!(offset_of!(Image, c), 8);
    assert_eq!(offset_of!(Image, data), 16);
    assert_eq!(offset_of!(Metadata, names), 8);
  }

  #[cfg(target_pointer_width = "64")]
  #[test]
  fn network_fields_read_by_the_detector() {
    assert_eq!(offset_of!(Network, batch), 4);
    assert_eq!(offset_of!(Network, policy), 48);
    assert_eq!(offset_of!(Network, scales), 88);
    assert_eq!(offset_of!(Network, inputs), 128);
    assert_eq!(offset_of!(Network, h), 144);
    assert_eq!(offset_of!(Network, w), 148);
    assert_eq!(offset_of!(Network, c), 152);
    assert_eq!(offset_of!(Network, hierarchy), 208);
    assert_eq!(offset_of!(Network, workspace), 240);
    assert_eq!(offset_of!(Network, clip), 264);
  }
}
