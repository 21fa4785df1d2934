// 该文件是 Beifeng （北风） 项目的一部分。
// src/memory.rs - 预测记忆环
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

use thiserror::Error;
use tracing::debug;

use crate::binding::{Backend, BindingError};
use crate::handle::{MemoryPtr, NetworkPtr, Release};

pub const DEFAULT_MEMORY_CAPACITY: usize = 3;

#[derive(Error, Debug)]
pub enum MemoryError {
  #[error("记忆环容量必须大于 0")]
  ZeroCapacity,
  #[error("记忆环已释放")]
  Destroyed,
  #[error("原生调用错误: {0}")]
  Binding(#[from] BindingError),
}

/// 固定容量的原生预测槽位环
///
/// 不变量：`index < capacity`，`populated <= capacity`。求平均时只读取前
/// `populated` 个槽位，未写入过的槽位永远不会被读取。
#[derive(Debug)]
pub struct MemoryRing {
  slots: Option<MemoryPtr>,
  capacity: usize,
  slot_size: usize,
  index: usize,
  populated: usize,
}

impl MemoryRing {
  pub fn create<B: Backend + ?Sized>(
    backend: &B,
    capacity: usize,
    slot_size: usize,
  ) -> Result<Self, MemoryError> {
    if capacity == 0 {
      return Err(MemoryError::ZeroCapacity);
    }
    let slots = backend.make_memory(capacity, slot_size)?;
    debug!("创建记忆环: {} 个槽位, 每槽 {} 个浮点数", capacity, slot_size);
    Ok(Self {
      slots: Some(slots),
      capacity,
      slot_size,
      index: 0,
      populated: 0,
    })
  }

  /// 将网络当前状态写入写指针处的槽位，然后推进写指针
  pub fn remember<B: Backend + ?Sized>(
    &mut self,
    backend: &B,
    network: &NetworkPtr,
  ) -> Result<(), MemoryError> {
    let slots = self.slots.as_ref().ok_or(MemoryError::Destroyed)?;
    backend.remember_network(network, slots, self.index)?;
    self.advance();
    Ok(())
  }

  fn advance(&mut self) {
    self.index = (self.index + 1) % self.capacity;
    self.populated = (self.populated + 1).min(self.capacity);
  }

  /// 释放全部槽位，可重复调用
  pub fn destroy<B: Backend + ?Sized>(&mut self, backend: &B) {
    if let Some(slots) = self.slots.take() {
      debug!("释放记忆环: {} 个槽位", slots.slots());
      slots.release(backend);
    }
    self.index = 0;
    self.populated = 0;
  }

  /// 先释放再按新容量（缺省沿用旧容量）重建
  pub fn reset<B: Backend + ?Sized>(
    &mut self,
    backend: &B,
    capacity: Option<usize>,
  ) -> Result<(), MemoryError> {
    let capacity = capacity.unwrap_or(self.capacity);
    if capacity == 0 {
      return Err(MemoryError::ZeroCapacity);
    }
    self.destroy(backend);
    *self = Self::create(backend, capacity, self.slot_size)?;
    Ok(())
  }

  pub fn slots(&self) -> Result<&MemoryPtr, MemoryError> {
    self.slots.as_ref().ok_or(MemoryError::Destroyed)
  }

  pub fn is_destroyed(&self) -> bool {
    self.slots.is_none()
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn slot_size(&self) -> usize {
    self.slot_size
  }

  pub fn index(&self) -> usize {
    self.index
  }

  pub fn populated(&self) -> usize {
    self.populated
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::binding::{REMEMBER_NETWORK, mock::MockBackend};
  use std::ffi::CString;

  fn network(backend: &MockBackend) -> NetworkPtr {
    let cfg = CString::new("yolo.cfg").unwrap();
    backend.load_network(&cfg, &cfg).unwrap()
  }

  #[test]
  fn index_cycles_and_populated_saturates() {
    let backend = MockBackend::new(4, 4, 3);
    let net = network(&backend);
    let mut ring = MemoryRing::create(&backend, 3, 8).unwrap();

    let mut seen = Vec::new();
    for _ in 0..7 {
      seen.push((ring.index(), ring.populated()));
      ring.remember(&backend, &net).unwrap();
    }
    assert_eq!(
      seen,
      vec![(0, 0), (1, 1), (2, 2), (0, 3), (1, 3), (2, 3), (0, 3)]
    );
    assert_eq!(backend.ledger().remembered, vec![0, 1, 2, 0, 1, 2, 0]);

    ring.destroy(&backend);
    backend.free_network(net);
  }

  #[test]
  fn failed_remember_keeps_write_pointer() {
    let backend = MockBackend::new(4, 4, 3);
    let net = network(&backend);
    let mut ring = MemoryRing::create(&backend, 2, 8).unwrap();
    ring.remember(&backend, &net).unwrap();
    backend.fail_on(REMEMBER_NETWORK.symbol);

    assert!(matches!(
      ring.remember(&backend, &net),
      Err(MemoryError::Binding(BindingError::NullReturn("remember_network")))
    ));
    assert_eq!((ring.index(), ring.populated()), (1, 1));

    ring.destroy(&backend);
    backend.free_network(net);
  }

  #[test]
  fn zero_capacity_is_rejected() {
    let backend = MockBackend::new(4, 4, 3);
    assert!(matches!(
      MemoryRing::create(&backend, 0, 8),
      Err(MemoryError::ZeroCapacity)
    ));
    assert_eq!(backend.ledger().memory_allocated, 0);
  }

  #[test]
  fn reset_keeps_capacity_unless_given() {
    let backend = MockBackend::new(4, 4, 3);
    let net = network(&backend);
    let mut ring = MemoryRing::create(&backend, 2, 8).unwrap();
    ring.remember(&backend, &net).unwrap();

    ring.reset(&backend, None).unwrap();
    assert_eq!((ring.capacity(), ring.index(), ring.populated()), (2, 0, 0));

    ring.reset(&backend, Some(5)).unwrap();
    assert_eq!(ring.capacity(), 5);
    assert_eq!(ring.slot_size(), 8);

    ring.destroy(&backend);
    let ledger = backend.ledger();
    assert_eq!(ledger.memory_allocated, 3);
    assert_eq!(ledger.memory_freed, 3);
    backend.free_network(net);
  }

  #[test]
  fn destroy_is_idempotent_and_blocks_remember() {
    let backend = MockBackend::new(4, 4, 3);
    let net = network(&backend);
    let mut ring = MemoryRing::create(&backend, 2, 8).unwrap();
    ring.destroy(&backend);
    ring.destroy(&backend);
    assert!(ring.is_destroyed());
    assert_eq!(backend.ledger().memory_freed, 1);
    assert!(matches!(
      ring.remember(&backend, &net),
      Err(MemoryError::Destroyed)
    ));
    backend.free_network(net);
  }
}
