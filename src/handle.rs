// 该文件是 Beifeng （北风） 项目的一部分。
// src/handle.rs - 原生资源句柄
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

//! 每种原生资源各有一个句柄类型，句柄不可克隆，释放函数按值消费句柄，
//! 因此同一份原生内存至多释放一次。

use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::binding::Backend;
use crate::sys;

/// 已加载的网络
#[derive(Debug)]
pub struct NetworkPtr(NonNull<sys::Network>);

impl NetworkPtr {
  pub(crate) fn from_raw(ptr: *mut sys::Network) -> Option<Self> {
    NonNull::new(ptr).map(Self)
  }

  pub fn as_ptr(&self) -> *mut sys::Network {
    self.0.as_ptr()
  }

  fn params(&self) -> &sys::Network {
    // 句柄存活期间网络未被释放
    unsafe { self.0.as_ref() }
  }

  pub fn width(&self) -> i32 {
    self.params().w
  }

  pub fn height(&self) -> i32 {
    self.params().h
  }

  pub fn channels(&self) -> i32 {
    self.params().c
  }

  pub fn batch(&self) -> i32 {
    self.params().batch
  }
}

/// 对某张图像的只读视图，生命周期绑定到其所有者
#[derive(Debug, Clone, Copy)]
pub struct ImageRef<'a> {
  raw: sys::Image,
  _owner: PhantomData<&'a ()>,
}

impl ImageRef<'_> {
  pub fn raw(&self) -> sys::Image {
    self.raw
  }

  pub fn width(&self) -> i32 {
    self.raw.w
  }

  pub fn height(&self) -> i32 {
    self.raw.h
  }

  pub fn channels(&self) -> i32 {
    self.raw.c
  }

  pub fn len(&self) -> usize {
    (self.raw.w.max(0) as usize) * (self.raw.h.max(0) as usize) * (self.raw.c.max(0) as usize)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 平面浮点数据
  pub fn data(&self) -> &[f32] {
    if self.raw.data.is_null() || self.is_empty() {
      return &[];
    }
    unsafe { std::slice::from_raw_parts(self.raw.data, self.len()) }
  }
}

/// 由原生库分配的图像，必须经 `free_image` 释放
#[derive(Debug)]
pub struct NativeImage(sys::Image);

impl NativeImage {
  pub(crate) fn from_raw(raw: sys::Image) -> Option<Self> {
    if raw.data.is_null() { None } else { Some(Self(raw)) }
  }

  pub fn raw(&self) -> sys::Image {
    self.0
  }

  pub fn image_ref(&self) -> ImageRef<'_> {
    ImageRef {
      raw: self.0,
      _owner: PhantomData,
    }
  }
}

/// 包装调用方缓冲区的图像，数据归调用方所有，不可交给 `free_image`
#[derive(Debug)]
pub struct BorrowedImage<'a> {
  raw: sys::Image,
  _data: PhantomData<&'a mut [f32]>,
}

impl<'a> BorrowedImage<'a> {
  pub(crate) fn from_raw(raw: sys::Image, _data: &'a mut [f32]) -> Option<Self> {
    if raw.data.is_null() {
      None
    } else {
      Some(Self {
        raw,
        _data: PhantomData,
      })
    }
  }

  pub fn image_ref(&self) -> ImageRef<'_> {
    ImageRef {
      raw: self.raw,
      _owner: PhantomData,
    }
  }
}

/// 原生检测结果数组
#[derive(Debug)]
pub struct DetectionsPtr {
  ptr: NonNull<sys::Detection>,
  len: usize,
}

impl DetectionsPtr {
  pub(crate) fn from_raw(ptr: *mut sys::Detection, len: usize) -> Option<Self> {
    NonNull::new(ptr).map(|ptr| Self { ptr, len })
  }

  pub fn as_ptr(&self) -> *mut sys::Detection {
    self.ptr.as_ptr()
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn as_slice(&self) -> &[sys::Detection] {
    unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
  }
}

/// 记忆环的原生槽位数组
#[derive(Debug)]
pub struct MemoryPtr {
  ptr: NonNull<*mut f32>,
  slots: usize,
}

impl MemoryPtr {
  pub(crate) fn from_raw(ptr: *mut *mut f32, slots: usize) -> Option<Self> {
    NonNull::new(ptr).map(|ptr| Self { ptr, slots })
  }

  pub fn as_ptr(&self) -> *mut *mut f32 {
    self.ptr.as_ptr()
  }

  pub fn slots(&self) -> usize {
    self.slots
  }
}

/// 可交还给原生库的资源
pub trait Release<B: Backend + ?Sized> {
  fn release(self, backend: &B);
}

impl<B: Backend + ?Sized> Release<B> for NetworkPtr {
  fn release(self, backend: &B) {
    backend.free_network(self);
  }
}

impl<B: Backend + ?Sized> Release<B> for NativeImage {
  fn release(self, backend: &B) {
    backend.free_image(self);
  }
}

impl<B: Backend + ?Sized> Release<B> for DetectionsPtr {
  fn release(self, backend: &B) {
    backend.free_detections(self);
  }
}

impl<B: Backend + ?Sized> Release<B> for MemoryPtr {
  fn release(self, backend: &B) {
    backend.free_memory(self);
  }
}

/// 作用域守卫：离开作用域时（包括提前返回的错误路径）释放资源
pub struct Scoped<'b, B: Backend + ?Sized, T: Release<B>> {
  backend: &'b B,
  value: Option<T>,
}

impl<'b, B: Backend + ?Sized, T: Release<B>> Scoped<'b, B, T> {
  pub fn new(backend: &'b B, value: T) -> Self {
    Self {
      backend,
      value: Some(value),
    }
  }

  /// 解除守卫，由调用方接管释放责任
  pub fn into_inner(mut self) -> T {
    match self.value.take() {
      Some(value) => value,
      None => unreachable!("守卫中的资源只能被取出一次"),
    }
  }
}

impl<B: Backend + ?Sized, T: Release<B>> Deref for Scoped<'_, B, T> {
  type Target = T;

  fn deref(&self) -> &T {
    match self.value.as_ref() {
      Some(value) => value,
      None => unreachable!("守卫中的资源已被取出"),
    }
  }
}

impl<B: Backend + ?Sized, T: Release<B>> Drop for Scoped<'_, B, T> {
  fn drop(&mut self) {
    if let Some(value) = self.value.take() {
      value.release(self.backend);
    }
  }
}
