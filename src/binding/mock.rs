// 该文件是 Beifeng （北风） 项目的一部分。
// src/binding/mock.rs - 测试用的内存后端
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

//! 用 Rust 堆内存模拟 darknet 的分配与释放，并记录每一次调用，
//! 重复释放或释放未知指针会直接 panic。

use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::CStr;
use std::ptr::slice_from_raw_parts_mut;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
  AVG_PREDICTIONS, Backend, BindingError, DO_NMS_OBJ, LOAD_IMAGE_COLOR, LOAD_NETWORK,
  NETWORK_PREDICT_IMAGE, REMEMBER_NETWORK,
};
use crate::handle::{
  BorrowedImage, DetectionsPtr, ImageRef, MemoryPtr, NativeImage, NetworkPtr,
};
use crate::sys;

/// 一条预设的检测记录
#[derive(Debug, Clone)]
pub struct MockDetection {
  pub bbox: sys::BBox,
  pub prob: Vec<f32>,
}

impl MockDetection {
  pub fn new(x: f32, y: f32, w: f32, h: f32, prob: &[f32]) -> Self {
    Self {
      bbox: sys::BBox { x, y, w, h },
      prob: prob.to_vec(),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
  pub networks_loaded: usize,
  pub networks_freed: usize,
  pub batch: Option<i32>,
  pub images_loaded: usize,
  pub images_freed: usize,
  pub wrapped: usize,
  pub copied: usize,
  pub letterboxed: Vec<(i32, i32)>,
  pub predicted: usize,
  pub memory_allocated: usize,
  pub memory_freed: usize,
  pub remembered: Vec<usize>,
  pub averaged: Vec<usize>,
  pub averaged_shape: Vec<(i32, i32)>,
  /// 每次求平均时，已写入槽位首个元素的均值
  pub averaged_values: Vec<f32>,
  pub thresholds: Vec<(f32, f32)>,
  pub nms: Vec<(usize, usize, f32)>,
  pub detections_allocated: usize,
  pub detections_freed: usize,
}

impl Ledger {
  pub fn balanced(&self) -> bool {
    self.networks_loaded == self.networks_freed
      && self.images_loaded == self.images_freed
      && self.memory_allocated == self.memory_freed
      && self.detections_allocated == self.detections_freed
  }
}

struct MockState {
  ledger: Ledger,
  network_shape: (i32, i32),
  image_shape: (i32, i32),
  output: Box<[f32]>,
  script: VecDeque<Vec<MockDetection>>,
  fail: Option<&'static str>,
  live_networks: HashSet<usize>,
  live_images: HashMap<usize, usize>,
  live_memory: HashMap<usize, usize>,
  live_detections: HashSet<usize>,
}

#[derive(Clone)]
pub struct MockBackend {
  state: Arc<Mutex<MockState>>,
}

fn alloc_image(w: i32, h: i32, c: i32, fill: &[f32]) -> sys::Image {
  let len = (w * h * c) as usize;
  let mut data = vec![0.5f32; len];
  for (dst, src) in data.iter_mut().zip(fill) {
    *dst = *src;
  }
  let data = Box::into_raw(data.into_boxed_slice()) as *mut f32;
  sys::Image { w, h, c, data }
}

impl MockBackend {
  /// 网络输入为 `width`x`height`，输出向量长度为 `output_size`
  pub fn new(width: i32, height: i32, output_size: usize) -> Self {
    let output: Vec<f32> = (0..output_size).map(|i| i as f32).collect();
    Self {
      state: Arc::new(Mutex::new(MockState {
        ledger: Ledger::default(),
        network_shape: (width, height),
        image_shape: (width, height),
        output: output.into_boxed_slice(),
        script: VecDeque::new(),
        fail: None,
        live_networks: HashSet::new(),
        live_images: HashMap::new(),
        live_memory: HashMap::new(),
        live_detections: HashSet::new(),
      })),
    }
  }

  fn state(&self) -> MutexGuard<'_, MockState> {
    self.state.lock().unwrap()
  }

  /// `load_image_color` 返回的图像尺寸
  pub fn with_image_shape(self, width: i32, height: i32) -> Self {
    self.state().image_shape = (width, height);
    self
  }

  /// 依次作为 `avg_predictions` 的返回结果，用尽后返回空结果
  pub fn push_detections(&self, detections: Vec<MockDetection>) {
    self.state().script.push_back(detections);
  }

  /// 让指定符号的调用返回空指针
  pub fn fail_on(&self, symbol: &'static str) {
    self.state().fail = Some(symbol);
  }

  pub fn ledger(&self) -> Ledger {
    self.state().ledger.clone()
  }

  fn check_fail(state: &MockState, symbol: &'static str) -> Result<(), BindingError> {
    if state.fail == Some(symbol) {
      Err(BindingError::NullReturn(symbol))
    } else {
      Ok(())
    }
  }

  fn track_image(state: &mut MockState, raw: sys::Image) -> NativeImage {
    state
      .live_images
      .insert(raw.data as usize, (raw.w * raw.h * raw.c) as usize);
    state.ledger.images_loaded += 1;
    NativeImage::from_raw(raw).unwrap()
  }
}

impl Backend for MockBackend {
  fn load_network(&self, _cfg: &CStr, _weights: &CStr) -> Result<NetworkPtr, BindingError> {
    let mut state = self.state();
    Self::check_fail(&state, LOAD_NETWORK.symbol)?;
    let mut network: sys::Network = unsafe { std::mem::zeroed() };
    network.w = state.network_shape.0;
    network.h = state.network_shape.1;
    network.c = 3;
    network.batch = 64;
    let raw = Box::into_raw(Box::new(network));
    state.live_networks.insert(raw as usize);
    state.ledger.networks_loaded += 1;
    Ok(NetworkPtr::from_raw(raw).unwrap())
  }

  fn set_batch_network(&self, network: &NetworkPtr, batch: i32) {
    unsafe { (*network.as_ptr()).batch = batch };
    self.state().ledger.batch = Some(batch);
  }

  fn network_output_size(&self, _network: &NetworkPtr) -> usize {
    self.state().output.len()
  }

  fn load_image_color(&self, path: &CStr) -> Result<NativeImage, BindingError> {
    let mut state = self.state();
    Self::check_fail(&state, LOAD_IMAGE_COLOR.symbol)?;
    if path.to_string_lossy().contains("missing") {
      return Err(BindingError::NullReturn(LOAD_IMAGE_COLOR.symbol));
    }
    let (w, h) = state.image_shape;
    let raw = alloc_image(w, h, 3, &[]);
    Ok(Self::track_image(&mut state, raw))
  }

  fn float_to_image<'a>(
    &self,
    width: i32,
    height: i32,
    channels: i32,
    data: &'a mut [f32],
  ) -> Result<BorrowedImage<'a>, BindingError> {
    self.state().ledger.wrapped += 1;
    let raw = sys::Image {
      w: width,
      h: height,
      c: channels,
      data: data.as_mut_ptr(),
    };
    Ok(BorrowedImage::from_raw(raw, data).unwrap())
  }

  fn copy_image(&self, image: ImageRef<'_>) -> Result<NativeImage, BindingError> {
    let mut state = self.state();
    state.ledger.copied += 1;
    let raw = alloc_image(image.width(), image.height(), image.channels(), image.data());
    Ok(Self::track_image(&mut state, raw))
  }

  fn letterbox_image(
    &self,
    image: ImageRef<'_>,
    width: i32,
    height: i32,
  ) -> Result<NativeImage, BindingError> {
    let mut state = self.state();
    state.ledger.letterboxed.push((width, height));
    let raw = alloc_image(width, height, image.channels(), &[]);
    Ok(Self::track_image(&mut state, raw))
  }

  fn network_predict_image(
    &self,
    _network: &NetworkPtr,
    _image: ImageRef<'_>,
  ) -> Result<*const f32, BindingError> {
    let mut state = self.state();
    Self::check_fail(&state, NETWORK_PREDICT_IMAGE.symbol)?;
    state.ledger.predicted += 1;
    // 每次推理的输出都不同，首个元素记录推理序号
    let predicted = state.ledger.predicted as f32;
    if let Some(first) = state.output.first_mut() {
      *first = predicted;
    }
    Ok(state.output.as_ptr())
  }

  fn make_memory(&self, slots: usize, slot_size: usize) -> Result<MemoryPtr, BindingError> {
    let mut state = self.state();
    let rows: Vec<*mut f32> = (0..slots)
      .map(|_| Box::into_raw(vec![0f32; slot_size].into_boxed_slice()) as *mut f32)
      .collect();
    let raw = Box::into_raw(rows.into_boxed_slice()) as *mut *mut f32;
    state.live_memory.insert(raw as usize, slot_size);
    state.ledger.memory_allocated += 1;
    Ok(MemoryPtr::from_raw(raw, slots).unwrap())
  }

  fn free_memory(&self, memory: MemoryPtr) {
    let mut state = self.state();
    let slot_size = state
      .live_memory
      .remove(&(memory.as_ptr() as usize))
      .expect("free_memory: 重复释放或未知指针");
    unsafe {
      let rows = Box::from_raw(slice_from_raw_parts_mut(memory.as_ptr(), memory.slots()));
      for row in rows.iter() {
        drop(Box::from_raw(slice_from_raw_parts_mut(*row, slot_size)));
      }
    }
    state.ledger.memory_freed += 1;
  }

  fn remember_network(
    &self,
    _network: &NetworkPtr,
    memory: &MemoryPtr,
    index: usize,
  ) -> Result<(), BindingError> {
    let mut state = self.state();
    Self::check_fail(&state, REMEMBER_NETWORK.symbol)?;
    assert!(index < memory.slots(), "写指针越界: {index}");
    let slot_size = state.live_memory[&(memory.as_ptr() as usize)];
    let len = slot_size.min(state.output.len());
    unsafe {
      let row = *memory.as_ptr().add(index);
      std::ptr::copy_nonoverlapping(state.output.as_ptr(), row, len);
    }
    state.ledger.remembered.push(index);
    Ok(())
  }

  fn avg_predictions(
    &self,
    _network: &NetworkPtr,
    memory: &MemoryPtr,
    populated: usize,
    width: i32,
    height: i32,
    thresh: f32,
    hier_thresh: f32,
  ) -> Result<Option<DetectionsPtr>, BindingError> {
    let mut state = self.state();
    Self::check_fail(&state, AVG_PREDICTIONS.symbol)?;
    assert!(populated <= memory.slots(), "读取了未写入的槽位");
    state.ledger.averaged.push(populated);
    state.ledger.averaged_shape.push((width, height));
    let slot_size = state.live_memory[&(memory.as_ptr() as usize)];
    if populated > 0 && slot_size > 0 {
      let sum: f32 = (0..populated)
        .map(|row| unsafe { **memory.as_ptr().add(row) })
        .sum();
      state.ledger.averaged_values.push(sum / populated as f32);
    }
    state.ledger.thresholds.push((thresh, hier_thresh));

    let scripted = state.script.pop_front().unwrap_or_default();
    if scripted.is_empty() {
      return Ok(None);
    }
    let records: Vec<sys::Detection> = scripted
      .into_iter()
      .map(|det| {
        let classes = det.prob.len() as i32;
        let prob = Box::into_raw(det.prob.into_boxed_slice()) as *mut f32;
        sys::Detection {
          bbox: det.bbox,
          classes,
          prob,
          mask: std::ptr::null_mut(),
          objectness: 1.0,
          sort_class: 0,
        }
      })
      .collect();
    let len = records.len();
    let raw = Box::into_raw(records.into_boxed_slice()) as *mut sys::Detection;
    state.live_detections.insert(raw as usize);
    state.ledger.detections_allocated += 1;
    Ok(DetectionsPtr::from_raw(raw, len))
  }

  fn do_nms_obj(
    &self,
    detections: &DetectionsPtr,
    classes: usize,
    thresh: f32,
  ) -> Result<(), BindingError> {
    let mut state = self.state();
    Self::check_fail(&state, DO_NMS_OBJ.symbol)?;
    state.ledger.nms.push((detections.len(), classes, thresh));
    Ok(())
  }

  fn free_detections(&self, detections: DetectionsPtr) {
    let mut state = self.state();
    assert!(
      state.live_detections.remove(&(detections.as_ptr() as usize)),
      "free_detections: 重复释放或未知指针"
    );
    unsafe {
      let records = Box::from_raw(slice_from_raw_parts_mut(
        detections.as_ptr(),
        detections.len(),
      ));
      for det in records.iter() {
        drop(Box::from_raw(slice_from_raw_parts_mut(
          det.prob,
          det.classes as usize,
        )));
      }
    }
    state.ledger.detections_freed += 1;
  }

  fn free_image(&self, image: NativeImage) {
    let mut state = self.state();
    let raw = image.raw();
    let len = state
      .live_images
      .remove(&(raw.data as usize))
      .expect("free_image: 重复释放或未知指针");
    unsafe { drop(Box::from_raw(slice_from_raw_parts_mut(raw.data, len))) };
    state.ledger.images_freed += 1;
  }

  fn free_network(&self, network: NetworkPtr) {
    let mut state = self.state();
    assert!(
      state.live_networks.remove(&(network.as_ptr() as usize)),
      "free_network: 重复释放或未知指针"
    );
    unsafe { drop(Box::from_raw(network.as_ptr())) };
    state.ledger.networks_freed += 1;
  }
}
