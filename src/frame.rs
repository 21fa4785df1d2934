// 该文件是 Beifeng （北风） 项目的一部分。
// src/frame.rs - 交错字节帧与平面浮点帧的互相转换
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

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("图像尺寸为空: {width}x{height}x{channels}")]
  EmptyShape {
    width: usize,
    height: usize,
    channels: usize,
  },
  #[error("图像尺寸过大: {width}x{height}x{channels}")]
  TooLarge {
    width: usize,
    height: usize,
    channels: usize,
  },
}

fn check_shape(
  len: usize,
  width: usize,
  height: usize,
  channels: usize,
) -> Result<(), FrameError> {
  if width == 0 || height == 0 || channels == 0 {
    return Err(FrameError::EmptyShape {
      width,
      height,
      channels,
    });
  }
  let expected = width
    .checked_mul(height)
    .and_then(|n| n.checked_mul(channels))
    .ok_or(FrameError::TooLarge {
      width,
      height,
      channels,
    })?;
  if len != expected {
    return Err(FrameError::LengthMismatch {
      expected,
      actual: len,
    });
  }
  Ok(())
}

/// 交错（HWC）字节缓冲区转为平面（CHW）浮点缓冲区，取值归一化到 [0, 1]
pub fn to_planar(
  interleaved: &[u8],
  width: usize,
  height: usize,
  channels: usize,
) -> Result<Vec<f32>, FrameError> {
  check_shape(interleaved.len(), width, height, channels)?;

  let mut planar = vec![0f32; interleaved.len()];
  for c in 0..channels {
    for h in 0..height {
      for w in 0..width {
        let dst = c * width * height + h * width + w;
        let src = h * channels * width + w * channels + c;
        planar[dst] = interleaved[src] as f32 / 255.0;
      }
    }
  }
  Ok(planar)
}

/// `to_planar` 的逆变换，量化到 8 位
///
/// 往返转换只存在量化误差，每个采样至多相差 1。
pub fn to_interleaved(
  planar: &[f32],
  width: usize,
  height: usize,
  channels: usize,
) -> Result<Vec<u8>, FrameError> {
  check_shape(planar.len(), width, height, channels)?;

  let mut interleaved = vec![0u8; planar.len()];
  for c in 0..channels {
    for h in 0..height {
      for w in 0..width {
        let src = c * width * height + h * width + w;
        let dst = h * channels * width + w * channels + c;
        interleaved[dst] = (planar[src] * 255.0).round().clamp(0.0, 255.0) as u8;
      }
    }
  }
  Ok(interleaved)
}

/// 调用方使用的交错字节帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterleavedFrame {
  width: usize,
  height: usize,
  channels: usize,
  data: Box<[u8]>,
}

impl InterleavedFrame {
  pub fn new(
    data: Vec<u8>,
    width: usize,
    height: usize,
    channels: usize,
  ) -> Result<Self, FrameError> {
    check_shape(data.len(), width, height, channels)?;
    Ok(Self {
      width,
      height,
      channels,
      data: data.into_boxed_slice(),
    })
  }

  pub fn rgb(data: Vec<u8>, width: usize, height: usize) -> Result<Self, FrameError> {
    Self::new(data, width, height, RGB_CHANNELS)
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn channels(&self) -> usize {
    self.channels
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  pub fn into_bytes(self) -> Box<[u8]> {
    self.data
  }

  pub fn to_planar(&self) -> PlanarFrame {
    // 构造时已校验过形状
    let data = to_planar(&self.data, self.width, self.height, self.channels)
      .unwrap_or_default()
      .into_boxed_slice();
    PlanarFrame {
      width: self.width,
      height: self.height,
      channels: self.channels,
      data,
    }
  }
}

/// 原生库使用的平面浮点帧
#[derive(Debug, Clone, PartialEq)]
pub struct PlanarFrame {
  width: usize,
  height: usize,
  channels: usize,
  data: Box<[f32]>,
}

impl PlanarFrame {
  pub fn new(
    data: Vec<f32>,
    width: usize,
    height: usize,
    channels: usize,
  ) -> Result<Self, FrameError> {
    check_shape(data.len(), width, height, channels)?;
    Ok(Self {
      width,
      height,
      channels,
      data: data.into_boxed_slice(),
    })
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn channels(&self) -> usize {
    self.channels
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn as_mut_slice(&mut self) -> &mut [f32] {
    &mut self.data
  }

  pub fn to_interleaved(&self) -> InterleavedFrame {
    let data = to_interleaved(&self.data, self.width, self.height, self.channels)
      .unwrap_or_default()
      .into_boxed_slice();
    InterleavedFrame {
      width: self.width,
      height: self.height,
      channels: self.channels,
      data,
    }
  }
}

#[cfg(feature = "read_image_file")]
impl From<image::RgbImage> for InterleavedFrame {
  fn from(image: image::RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width: width as usize,
      height: height as usize,
      channels: RGB_CHANNELS,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn planar_layout_follows_channel_major_order() {
    // 2x1 像素: (1,2,3) (4,5,6)
    let bytes = [1u8, 2, 3, 4, 5, 6];
    let planar = to_planar(&bytes, 2, 1, 3).unwrap();
    let expected: Vec<f32> = [1u8, 4, 2, 5, 3, 6].iter().map(|&v| v as f32 / 255.0).collect();
    assert_eq!(planar, expected);
  }

  #[test]
  fn planar_values_are_normalized() {
    let planar = to_planar(&[0, 255, 51], 1, 1, 3).unwrap();
    assert_eq!(planar, vec![0.0, 1.0, 0.2]);
  }

  #[test]
  fn round_trip_stays_within_quantization() {
    let (w, h, c) = (7, 5, 3);
    let bytes: Vec<u8> = (0..w * h * c).map(|i| (i * 37 % 256) as u8).collect();
    let planar = to_planar(&bytes, w, h, c).unwrap();
    let back = to_interleaved(&planar, w, h, c).unwrap();
    for (a, b) in bytes.iter().zip(back.iter()) {
      assert!((*a as i16 - *b as i16).abs() <= 1, "{a} vs {b}");
    }
  }

  #[test]
  fn round_trip_is_exact_for_every_byte_value() {
    let bytes: Vec<u8> = (0..=255u8).collect();
    let planar = to_planar(&bytes, 256, 1, 1).unwrap();
    assert_eq!(to_interleaved(&planar, 256, 1, 1).unwrap(), bytes);
  }

  #[test]
  fn out_of_range_floats_are_clamped() {
    let bytes = to_interleaved(&[-0.5, 1.5, 0.5], 1, 1, 3).unwrap();
    assert_eq!(bytes, vec![0, 255, 128]);
  }

  #[test]
  fn shape_errors() {
    assert_eq!(
      to_planar(&[0; 5], 2, 1, 3),
      Err(FrameError::LengthMismatch {
        expected: 6,
        actual: 5
      })
    );
    assert!(matches!(
      InterleavedFrame::rgb(vec![], 0, 4),
      Err(FrameError::EmptyShape { .. })
    ));
  }

  #[test]
  fn overflowing_shape_is_rejected() {
    let width = usize::MAX / 2 + 1;
    assert_eq!(
      InterleavedFrame::new(vec![], width, 2, 1),
      Err(FrameError::TooLarge {
        width,
        height: 2,
        channels: 1
      })
    );
    assert!(matches!(
      PlanarFrame::new(vec![], 1, usize::MAX, 3),
      Err(FrameError::TooLarge { .. })
    ));
    assert!(matches!(
      to_planar(&[], usize::MAX, usize::MAX, 1),
      Err(FrameError::TooLarge { .. })
    ));
  }

  #[test]
  fn frames_convert_both_ways() {
    let frame = InterleavedFrame::rgb((0..12).collect(), 2, 2).unwrap();
    let planar = frame.to_planar();
    assert_eq!(planar.width(), 2);
    assert_eq!(planar.channels(), 3);
    assert_eq!(planar.as_slice()[4], 1.0 / 255.0);
    assert_eq!(planar.to_interleaved(), frame);
  }

  #[cfg(feature = "read_image_file")]
  #[test]
  fn rgb_image_keeps_interleaved_order() {
    let image = image::RgbImage::from_fn(2, 1, |x, _| image::Rgb([x as u8, 10, 20]));
    let frame = InterleavedFrame::from(image);
    assert_eq!(frame.as_bytes(), &[0, 10, 20, 1, 10, 20]);
  }
}
