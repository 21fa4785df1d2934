// 该文件是 Beifeng （北风） 项目的一部分。
// src/binding/native.rs - 基于动态加载的 darknet 原生库
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
use std::os::raw::{c_char, c_float, c_int};
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{debug, error, info, warn};

use super::{
  AVG_PREDICTIONS, BindingError, COPY_IMAGE, DO_NMS_OBJ, ENTRY_POINTS, EntryPoint,
  FLOAT_TO_IMAGE, FREE_DETECTIONS, FREE_IMAGE, FREE_MEMORY, FREE_NETWORK, LETTERBOX_IMAGE,
  LOAD_IMAGE_COLOR, LOAD_NETWORK, MAKE_MEMORY, NETWORK_OUTPUT_SIZE, NETWORK_PREDICT_IMAGE,
  REMEMBER_NETWORK, SET_BATCH_NETWORK, to_c_int,
};
use crate::handle::{
  BorrowedImage, DetectionsPtr, ImageRef, MemoryPtr, NativeImage, NetworkPtr,
};
use crate::{binding::Backend, sys};

type LoadNetworkFn = unsafe extern "C" fn(*mut c_char, *mut c_char, c_int) -> *mut sys::Network;
type SetBatchNetworkFn = unsafe extern "C" fn(*mut sys::Network, c_int);
type NetworkOutputSizeFn = unsafe extern "C" fn(*mut sys::Network) -> c_int;
type LoadImageColorFn = unsafe extern "C" fn(*mut c_char, c_int, c_int) -> sys::Image;
type FloatToImageFn = unsafe extern "C" fn(c_int, c_int, c_int, *mut c_float) -> sys::Image;
type CopyImageFn = unsafe extern "C" fn(sys::Image) -> sys::Image;
type LetterboxImageFn = unsafe extern "C" fn(sys::Image, c_int, c_int) -> sys::Image;
type NetworkPredictImageFn = unsafe extern "C" fn(*mut sys::Network, sys::Image) -> *mut c_float;
type MakeMemoryFn = unsafe extern "C" fn(c_int, c_int) -> *mut *mut c_float;
type FreeMemoryFn = unsafe extern "C" fn(*mut *mut c_float, c_int);
type RememberNetworkFn = unsafe extern "C" fn(*mut sys::Network, *mut *mut c_float, c_int);
type AvgPredictionsFn = unsafe extern "C" fn(
  *mut sys::Network,
  *mut *mut c_float,
  c_int,
  c_int,
  c_int,
  c_float,
  c_float,
  *mut c_int,
) -> *mut sys::Detection;
type DoNmsObjFn = unsafe extern "C" fn(*mut sys::Detection, c_int, c_int, c_float);
type FreeDetectionsFn = unsafe extern "C" fn(*mut sys::Detection, c_int);
type FreeImageFn = unsafe extern "C" fn(sys::Image);
type FreeNetworkFn = unsafe extern "C" fn(*mut sys::Network);
type SizeofFn = unsafe extern "C" fn() -> usize;

/// 可选的布局校验符号，由原生库按 `sizeof` 导出
const LAYOUT_SYMBOLS: [(&str, &str, usize); 3] = [
  ("image", "darknet_sizeof_image", std::mem::size_of::<sys::Image>()),
  (
    "detection",
    "darknet_sizeof_detection",
    std::mem::size_of::<sys::Detection>(),
  ),
  (
    "network",
    "darknet_sizeof_network",
    std::mem::size_of::<sys::Network>(),
  ),
];

struct Api {
  load_network: LoadNetworkFn,
  set_batch_network: SetBatchNetworkFn,
  network_output_size: NetworkOutputSizeFn,
  load_image_color: LoadImageColorFn,
  float_to_image: FloatToImageFn,
  copy_image: CopyImageFn,
  letterbox_image: LetterboxImageFn,
  network_predict_image: NetworkPredictImageFn,
  make_memory: MakeMemoryFn,
  free_memory: FreeMemoryFn,
  remember_network: RememberNetworkFn,
  avg_predictions: AvgPredictionsFn,
  do_nms_obj: DoNmsObjFn,
  free_detections: FreeDetectionsFn,
  free_image: FreeImageFn,
  free_network: FreeNetworkFn,
}

/// 通过 `libloading` 打开的 darknet 共享库
///
/// 函数指针只在 `_library` 存活期间有效，两者同生共死。
pub struct NativeLibrary {
  api: Api,
  path: PathBuf,
  _library: Library,
}

fn resolve<T: Copy>(library: &Library, entry: EntryPoint) -> Result<T, BindingError> {
  let symbol = unsafe { library.get::<T>(entry.symbol.as_bytes()) }.map_err(|source| {
    BindingError::Symbol {
      symbol: entry.symbol,
      source,
    }
  })?;
  debug!("解析符号 {} ({:?})", entry.symbol, entry.mode);
  Ok(*symbol)
}

impl NativeLibrary {
  /// 可执行文件旁的默认库路径，例如 `libdarknet.so`
  pub fn default_path() -> Result<PathBuf, BindingError> {
    let exe = std::env::current_exe().map_err(BindingError::Locate)?;
    let dir = exe.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join(libloading::library_filename("darknet")))
  }

  pub fn open_default() -> Result<Self, BindingError> {
    Self::open(Self::default_path()?)
  }

  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BindingError> {
    let path = path.as_ref().to_path_buf();
    info!("加载 darknet 原生库: {}", path.display());

    let library = unsafe { Library::new(&path) }.map_err(|source| BindingError::Library {
      path: path.display().to_string(),
      source,
    })?;

    debug!("原生库共需 {} 个入口", ENTRY_POINTS.len());
    let api = Api {
      load_network: resolve(&library, LOAD_NETWORK)?,
      set_batch_network: resolve(&library, SET_BATCH_NETWORK)?,
      network_output_size: resolve(&library, NETWORK_OUTPUT_SIZE)?,
      load_image_color: resolve(&library, LOAD_IMAGE_COLOR)?,
      float_to_image: resolve(&library, FLOAT_TO_IMAGE)?,
      copy_image: resolve(&library, COPY_IMAGE)?,
      letterbox_image: resolve(&library, LETTERBOX_IMAGE)?,
      network_predict_image: resolve(&library, NETWORK_PREDICT_IMAGE)?,
      make_memory: resolve(&library, MAKE_MEMORY)?,
      free_memory: resolve(&library, FREE_MEMORY)?,
      remember_network: resolve(&library, REMEMBER_NETWORK)?,
      avg_predictions: resolve(&library, AVG_PREDICTIONS)?,
      do_nms_obj: resolve(&library, DO_NMS_OBJ)?,
      free_detections: resolve(&library, FREE_DETECTIONS)?,
      free_image: resolve(&library, FREE_IMAGE)?,
      free_network: resolve(&library, FREE_NETWORK)?,
    };

    verify_layout(&library)?;
    info!("darknet 原生库加载完成");

    Ok(Self {
      api,
      path,
      _library: library,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

fn verify_layout(library: &Library) -> Result<(), BindingError> {
  let mut missing = 0;
  for (record, symbol, rust) in LAYOUT_SYMBOLS {
    let sizeof = match unsafe { library.get::<SizeofFn>(symbol.as_bytes()) } {
      Ok(sizeof) => *sizeof,
      Err(_) => {
        debug!("原生库未导出 {}, 跳过 {} 布局检查", symbol, record);
        missing += 1;
        continue;
      }
    };
    let native = unsafe { sizeof() };
    if native != rust {
      return Err(BindingError::LayoutMismatch {
        record,
        rust,
        native,
      });
    }
    debug!("{} 布局检查通过: {} 字节", record, rust);
  }
  if layout_unchecked(missing) {
    warn!("原生库未导出任何 sizeof 符号, 结构体布局未经校验");
  }
  Ok(())
}

fn layout_unchecked(missing: usize) -> bool {
  missing == LAYOUT_SYMBOLS.len()
}

impl Backend for NativeLibrary {
  fn load_network(&self, cfg: &CStr, weights: &CStr) -> Result<NetworkPtr, BindingError> {
    let raw = unsafe {
      (self.api.load_network)(cfg.as_ptr() as *mut c_char, weights.as_ptr() as *mut c_char, 0)
    };
    NetworkPtr::from_raw(raw).ok_or(BindingError::NullReturn(LOAD_NETWORK.symbol))
  }

  fn set_batch_network(&self, network: &NetworkPtr, batch: i32) {
    unsafe { (self.api.set_batch_network)(network.as_ptr(), batch) }
  }

  fn network_output_size(&self, network: &NetworkPtr) -> usize {
    let size = unsafe { (self.api.network_output_size)(network.as_ptr()) };
    size.max(0) as usize
  }

  fn load_image_color(&self, path: &CStr) -> Result<NativeImage, BindingError> {
    let raw = unsafe { (self.api.load_image_color)(path.as_ptr() as *mut c_char, 0, 0) };
    NativeImage::from_raw(raw).ok_or(BindingError::NullReturn(LOAD_IMAGE_COLOR.symbol))
  }

  fn float_to_image<'a>(
    &self,
    width: i32,
    height: i32,
    channels: i32,
    data: &'a mut [f32],
  ) -> Result<BorrowedImage<'a>, BindingError> {
    let raw = unsafe { (self.api.float_to_image)(width, height, channels, data.as_mut_ptr()) };
    BorrowedImage::from_raw(raw, data).ok_or(BindingError::NullReturn(FLOAT_TO_IMAGE.symbol))
  }

  fn copy_image(&self, image: ImageRef<'_>) -> Result<NativeImage, BindingError> {
    let raw = unsafe { (self.api.copy_image)(image.raw()) };
    NativeImage::from_raw(raw).ok_or(BindingError::NullReturn(COPY_IMAGE.symbol))
  }

  fn letterbox_image(
    &self,
    image: ImageRef<'_>,
    width: i32,
    height: i32,
  ) -> Result<NativeImage, BindingError> {
    let raw = unsafe { (self.api.letterbox_image)(image.raw(), width, height) };
    NativeImage::from_raw(raw).ok_or(BindingError::NullReturn(LETTERBOX_IMAGE.symbol))
  }

  fn network_predict_image(
    &self,
    network: &NetworkPtr,
    image: ImageRef<'_>,
  ) -> Result<*const f32, BindingError> {
    let output = unsafe { (self.api.network_predict_image)(network.as_ptr(), image.raw()) };
    if output.is_null() {
      Err(BindingError::NullReturn(NETWORK_PREDICT_IMAGE.symbol))
    } else {
      Ok(output as *const f32)
    }
  }

  fn make_memory(&self, slots: usize, slot_size: usize) -> Result<MemoryPtr, BindingError> {
    let raw = unsafe {
      (self.api.make_memory)(
        to_c_int(slots, "memory slots")?,
        to_c_int(slot_size, "memory slot size")?,
      )
    };
    MemoryPtr::from_raw(raw, slots).ok_or(BindingError::NullReturn(MAKE_MEMORY.symbol))
  }

  fn free_memory(&self, memory: MemoryPtr) {
    match to_c_int(memory.slots(), "memory slots") {
      Ok(slots) => unsafe { (self.api.free_memory)(memory.as_ptr(), slots) },
      Err(e) => error!("记忆环无法释放: {}", e),
    }
  }

  fn remember_network(
    &self,
    network: &NetworkPtr,
    memory: &MemoryPtr,
    index: usize,
  ) -> Result<(), BindingError> {
    let index = to_c_int(index, "memory index")?;
    unsafe { (self.api.remember_network)(network.as_ptr(), memory.as_ptr(), index) };
    Ok(())
  }

  fn avg_predictions(
    &self,
    network: &NetworkPtr,
    memory: &MemoryPtr,
    populated: usize,
    width: i32,
    height: i32,
    thresh: f32,
    hier_thresh: f32,
  ) -> Result<Option<DetectionsPtr>, BindingError> {
    let mut num: c_int = 0;
    let raw = unsafe {
      (self.api.avg_predictions)(
        network.as_ptr(),
        memory.as_ptr(),
        to_c_int(populated, "populated slots")?,
        width,
        height,
        thresh,
        hier_thresh,
        &mut num,
      )
    };
    let len = num.max(0) as usize;
    match DetectionsPtr::from_raw(raw, len) {
      Some(detections) => Ok(Some(detections)),
      None if len == 0 => Ok(None),
      None => Err(BindingError::NullReturn(AVG_PREDICTIONS.symbol)),
    }
  }

  fn do_nms_obj(
    &self,
    detections: &DetectionsPtr,
    classes: usize,
    thresh: f32,
  ) -> Result<(), BindingError> {
    let len = to_c_int(detections.len(), "detection count")?;
    let classes = to_c_int(classes, "class count")?;
    unsafe { (self.api.do_nms_obj)(detections.as_ptr(), len, classes, thresh) };
    Ok(())
  }

  fn free_detections(&self, detections: DetectionsPtr) {
    match to_c_int(detections.len(), "detection count") {
      Ok(len) => unsafe { (self.api.free_detections)(detections.as_ptr(), len) },
      Err(e) => error!("检测结果无法释放: {}", e),
    }
  }

  fn free_image(&self, image: NativeImage) {
    unsafe { (self.api.free_image)(image.raw()) }
  }

  fn free_network(&self, network: NetworkPtr) {
    unsafe { (self.api.free_network)(network.as_ptr()) }
  }
}
