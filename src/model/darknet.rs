// 该文件是 Beifeng （北风） 项目的一部分。
// src/model/darknet.rs - darknet 检测器
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

use std::ffi::CString;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  binding::{Backend, BindingError, NativeLibrary, to_c_int},
  frame::{FrameError, InterleavedFrame, PlanarFrame, to_planar},
  handle::{BorrowedImage, DetectionsPtr, ImageRef, NativeImage, NetworkPtr, Release, Scoped},
  memory::{DEFAULT_MEMORY_CAPACITY, MemoryError, MemoryRing},
  metadata::{Metadata, MetadataError, MetadataRecord},
  model::{DetectInput, DetectItem, DetectOptions, DetectResult, Model},
  sys,
};

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("配置错误: {0}")]
  Config(String),
  #[error("{kind}文件不存在: {path}")]
  MissingFile { kind: &'static str, path: String },
  #[error("路径无法传给原生库: {0}")]
  InvalidPath(String),
  #[error("类别元数据错误: {0}")]
  Metadata(#[from] MetadataError),
  #[error("原生调用错误: {0}")]
  Binding(#[from] BindingError),
  #[error("记忆环错误: {0}")]
  Memory(#[from] MemoryError),
  #[error("图像错误: {0}")]
  Frame(#[from] FrameError),
  #[error("检测器已释放")]
  Disposed,
}

/// 类别名来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamesSource {
  List(Vec<String>),
  File(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  pub cfg: PathBuf,
  pub weights: PathBuf,
  pub names: NamesSource,
  pub memory: usize,
  pub options: DetectOptions,
  pub library: Option<PathBuf>,
}

fn require_file(path: &Path, kind: &'static str) -> Result<(), DetectorError> {
  if path.is_file() {
    Ok(())
  } else {
    Err(DetectorError::MissingFile {
      kind,
      path: path.display().to_string(),
    })
  }
}

fn path_to_cstring(path: &Path) -> Result<CString, DetectorError> {
  let text = path
    .to_str()
    .ok_or_else(|| DetectorError::InvalidPath(path.display().to_string()))?;
  CString::new(text).map_err(|_| DetectorError::InvalidPath(text.to_string()))
}

impl DetectorConfig {
  pub fn new<C, W>(cfg: C, weights: W, names: NamesSource) -> Self
  where
    C: Into<PathBuf>,
    W: Into<PathBuf>,
  {
    Self {
      cfg: cfg.into(),
      weights: weights.into(),
      names,
      memory: DEFAULT_MEMORY_CAPACITY,
      options: DetectOptions::default(),
      library: None,
    }
  }

  /// 构造前的同步检查，任何一项失败都终止构造
  pub fn validate(&self) -> Result<(), DetectorError> {
    require_file(&self.cfg, "网络配置")?;
    require_file(&self.weights, "权重")?;
    if let NamesSource::File(path) = &self.names {
      require_file(path, "类别")?;
    }
    if self.memory == 0 {
      return Err(DetectorError::Config("记忆环容量必须大于 0".to_string()));
    }
    Ok(())
  }

  fn load_metadata(&self) -> Result<Metadata, DetectorError> {
    let metadata = match &self.names {
      NamesSource::List(names) => Metadata::from_names(names)?,
      NamesSource::File(path) => Metadata::from_file(path)?,
    };
    Ok(metadata)
  }
}

const DARKNET_SCHEME: &str = "darknet";

/// 检测器构建器
///
/// URL 形式：`darknet:///path/yolov3.cfg?weights=/path/yolov3.weights&names=/path/coco.names`，
/// 可选参数 `labels`（逗号分隔的类别名，替代 `names`）、`memory`、`thresh`、`hier`、
/// `nms`、`library`。
#[derive(Debug, Clone)]
pub struct DetectorBuilder {
  config: DetectorConfig,
}

impl FromUrlWithScheme for DetectorBuilder {
  const SCHEME: &'static str = DARKNET_SCHEME;
}

fn parse_query<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, DetectorError> {
  value
    .parse()
    .map_err(|_| DetectorError::Config(format!("参数 {} 无效: {}", key, value)))
}

impl FromUrl for DetectorBuilder {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DetectorError::Config(format!(
        "模型路径必须使用 {} 方案, 实际为 {}",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let mut weights = None;
    let mut names = None;
    let mut memory = DEFAULT_MEMORY_CAPACITY;
    let mut options = DetectOptions::default();
    let mut library = None;

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "weights" => weights = Some(PathBuf::from(value.as_ref())),
        "names" => names = Some(NamesSource::File(PathBuf::from(value.as_ref()))),
        "labels" => {
          names = Some(NamesSource::List(
            value.split(',').map(str::to_string).collect(),
          ))
        }
        "memory" => memory = parse_query(&key, &value)?,
        "thresh" => options.thresh = parse_query(&key, &value)?,
        "hier" => options.hier_thresh = parse_query(&key, &value)?,
        "nms" => options.nms = parse_query(&key, &value)?,
        "library" => library = Some(PathBuf::from(value.as_ref())),
        other => warn!("忽略未知参数: {}", other),
      }
    }

    let weights =
      weights.ok_or_else(|| DetectorError::Config("缺少 weights 参数".to_string()))?;
    let names =
      names.ok_or_else(|| DetectorError::Config("缺少 names 或 labels 参数".to_string()))?;

    let mut config = DetectorConfig::new(url.path(), weights, names);
    config.memory = memory;
    config.options = options;
    config.library = library;
    Ok(Self { config })
  }
}

impl DetectorBuilder {
  pub fn new<C, W>(cfg: C, weights: W) -> Self
  where
    C: Into<PathBuf>,
    W: Into<PathBuf>,
  {
    Self {
      config: DetectorConfig::new(cfg, weights, NamesSource::List(Vec::new())),
    }
  }

  pub fn names<I, S>(mut self, names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.config.names = NamesSource::List(names.into_iter().map(Into::into).collect());
    self
  }

  pub fn names_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
    self.config.names = NamesSource::File(path.into());
    self
  }

  pub fn memory(mut self, capacity: usize) -> Self {
    self.config.memory = capacity;
    self
  }

  pub fn thresh(mut self, thresh: f32) -> Self {
    self.config.options.thresh = thresh;
    self
  }

  pub fn hier_thresh(mut self, hier_thresh: f32) -> Self {
    self.config.options.hier_thresh = hier_thresh;
    self
  }

  pub fn nms(mut self, nms: f32) -> Self {
    self.config.options.nms = nms;
    self
  }

  pub fn options(mut self, options: DetectOptions) -> Self {
    self.config.options = options;
    self
  }

  pub fn library<P: Into<PathBuf>>(mut self, path: P) -> Self {
    self.config.library = Some(path.into());
    self
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  /// 打开原生库并加载网络
  pub fn build(self) -> Result<Detector<NativeLibrary>, DetectorError> {
    self.config.validate()?;
    let backend = match &self.config.library {
      Some(path) => NativeLibrary::open(path)?,
      None => NativeLibrary::open_default()?,
    };
    Detector::new(backend, self.config)
  }

  pub fn build_with<B: Backend>(self, backend: B) -> Result<Detector<B>, DetectorError> {
    Detector::new(backend, self.config)
  }
}

/// darknet 检测器
///
/// 持有网络句柄与记忆环。推理路径上的方法都需要 `&mut self`，同一网络上的
/// 推理、记忆、平均与 NMS 不会交叠。跨线程使用请通过 [`crate::worker::DetectorWorker`]。
pub struct Detector<B: Backend> {
  backend: B,
  network: Option<NetworkPtr>,
  memory: MemoryRing,
  metadata: Metadata,
  // 原生 metadata 记录与检测器同生命周期
  _record: MetadataRecord,
  options: DetectOptions,
  output_size: usize,
}

#[derive(Clone, Copy)]
enum Source<'i> {
  Path(&'i Path),
  Frame(&'i InterleavedFrame),
}

enum SourceImage<'b, 'd, B: Backend> {
  Loaded(Scoped<'b, B, NativeImage>),
  Borrowed(BorrowedImage<'d>),
}

impl<B: Backend> SourceImage<'_, '_, B> {
  fn image_ref(&self) -> ImageRef<'_> {
    match self {
      SourceImage::Loaded(image) => image.image_ref(),
      SourceImage::Borrowed(image) => image.image_ref(),
    }
  }
}

/// 原生检测数组，离开作用域时释放
pub struct RawDetections<'d, B: Backend> {
  detections: Option<Scoped<'d, B, DetectionsPtr>>,
  metadata: &'d Metadata,
  width: i32,
  height: i32,
}

impl<B: Backend> RawDetections<'_, B> {
  pub fn as_slice(&self) -> &[sys::Detection] {
    self
      .detections
      .as_ref()
      .map(|detections| detections.as_slice())
      .unwrap_or(&[])
  }

  pub fn len(&self) -> usize {
    self.as_slice().len()
  }

  pub fn is_empty(&self) -> bool {
    self.as_slice().is_empty()
  }

  /// 求平均时使用的原图尺寸
  pub fn image_size(&self) -> (i32, i32) {
    (self.width, self.height)
  }

  pub fn decode(&self) -> DetectResult {
    decode(self.as_slice(), self.metadata)
  }
}

/// 每条记录的每个概率大于 0 的类别各产生一个结果，同一条记录的结果共用边界框
pub(crate) fn decode(records: &[sys::Detection], metadata: &Metadata) -> DetectResult {
  let mut items = Vec::new();
  for record in records {
    if record.prob.is_null() {
      continue;
    }
    let classes = (record.classes.max(0) as usize).min(metadata.classes());
    let probs = unsafe { std::slice::from_raw_parts(record.prob, classes) };
    for (class_id, &prob) in probs.iter().enumerate() {
      if prob <= 0.0 {
        continue;
      }
      if let Some(name) = metadata.name(class_id) {
        items.push(DetectItem {
          name: name.to_string(),
          prob,
          bbox: record.bbox.into(),
        });
      }
    }
  }
  DetectResult {
    items: items.into_boxed_slice(),
  }
}

impl<B: Backend> Detector<B> {
  pub fn new(backend: B, config: DetectorConfig) -> Result<Self, DetectorError> {
    config.validate()?;
    let metadata = config.load_metadata()?;
    let record = metadata.to_record()?;
    let cfg = path_to_cstring(&config.cfg)?;
    let weights = path_to_cstring(&config.weights)?;

    info!("加载网络: {}", config.cfg.display());
    info!("加载权重: {}", config.weights.display());
    let network = Scoped::new(&backend, backend.load_network(&cfg, &weights)?);
    backend.set_batch_network(&network, 1);

    let output_size = backend.network_output_size(&network);
    debug!(
      "网络输入 {}x{}x{}, 输出长度 {}",
      network.width(),
      network.height(),
      network.channels(),
      output_size
    );

    let memory = MemoryRing::create(&backend, config.memory, output_size)?;
    let network = network.into_inner();
    info!(
      "检测器就绪: {} 个类别, 记忆环容量 {}",
      metadata.classes(),
      config.memory
    );

    Ok(Self {
      backend,
      network: Some(network),
      memory,
      metadata,
      _record: record,
      options: config.options,
      output_size,
    })
  }

  fn network(&self) -> Result<&NetworkPtr, DetectorError> {
    self.network.as_ref().ok_or(DetectorError::Disposed)
  }

  /// 执行一次完整检测并解码为带类别名的结果
  pub fn detect(
    &mut self,
    input: &DetectInput,
    options: Option<DetectOptions>,
  ) -> Result<DetectResult, DetectorError> {
    let source = match input {
      DetectInput::Path(path) => Source::Path(path),
      DetectInput::Buffer(frame) => Source::Frame(frame),
    };
    self.detect_source(source, options)
  }

  pub fn detect_path<P: AsRef<Path>>(
    &mut self,
    path: P,
    options: Option<DetectOptions>,
  ) -> Result<DetectResult, DetectorError> {
    self.detect_source(Source::Path(path.as_ref()), options)
  }

  pub fn detect_buffer(
    &mut self,
    frame: &InterleavedFrame,
    options: Option<DetectOptions>,
  ) -> Result<DetectResult, DetectorError> {
    self.detect_source(Source::Frame(frame), options)
  }

  fn detect_source(
    &mut self,
    source: Source<'_>,
    options: Option<DetectOptions>,
  ) -> Result<DetectResult, DetectorError> {
    let raw = self.run(source, options)?;
    let result = raw.decode();
    debug!(
      "检测到 {} 条原始记录, 解码得到 {} 个结果",
      raw.len(),
      result.len()
    );
    Ok(result)
  }

  /// 执行检测但不解码，返回原生检测数组
  pub fn detect_raw(
    &mut self,
    input: &DetectInput,
    options: Option<DetectOptions>,
  ) -> Result<RawDetections<'_, B>, DetectorError> {
    let source = match input {
      DetectInput::Path(path) => Source::Path(path),
      DetectInput::Buffer(frame) => Source::Frame(frame),
    };
    self.run(source, options)
  }

  fn run(
    &mut self,
    source: Source<'_>,
    options: Option<DetectOptions>,
  ) -> Result<RawDetections<'_, B>, DetectorError> {
    let options = options.unwrap_or(self.options);
    let network = self.network.as_ref().ok_or(DetectorError::Disposed)?;
    let backend = &self.backend;

    // 借出给原生库的平面缓冲区，须比 source 活得久
    let mut planar: Vec<f32>;
    let source: SourceImage<'_, '_, B> = match source {
      Source::Path(path) => {
        debug!("原生库读取图像: {}", path.display());
        let path = path_to_cstring(path)?;
        SourceImage::Loaded(Scoped::new(backend, backend.load_image_color(&path)?))
      }
      Source::Frame(frame) => {
        planar = to_planar(
          frame.as_bytes(),
          frame.width(),
          frame.height(),
          frame.channels(),
        )?;
        SourceImage::Borrowed(backend.float_to_image(
          to_c_int(frame.width(), "image width")?,
          to_c_int(frame.height(), "image height")?,
          to_c_int(frame.channels(), "image channels")?,
          &mut planar,
        )?)
      }
    };
    let image = source.image_ref();

    let letterboxed = if image.width() != network.width() || image.height() != network.height() {
      debug!(
        "letterbox {}x{} -> {}x{}",
        image.width(),
        image.height(),
        network.width(),
        network.height()
      );
      Some(Scoped::new(
        backend,
        backend.letterbox_image(image, network.width(), network.height())?,
      ))
    } else {
      None
    };
    let network_input = letterboxed
      .as_ref()
      .map(|image| image.image_ref())
      .unwrap_or(image);

    backend.network_predict_image(network, network_input)?;

    self.memory.remember(backend, network)?;

    let populated = self.memory.populated();
    let detections = if populated == 0 {
      None
    } else {
      backend.avg_predictions(
        network,
        self.memory.slots()?,
        populated,
        image.width(),
        image.height(),
        options.thresh,
        options.hier_thresh,
      )?
    };
    let detections = detections.map(|detections| Scoped::new(backend, detections));

    if let Some(detections) = detections.as_ref()
      && options.nms > 0.0
    {
      backend.do_nms_obj(detections, self.metadata.classes(), options.nms)?;
    }

    Ok(RawDetections {
      detections,
      metadata: &self.metadata,
      width: image.width(),
      height: image.height(),
    })
  }

  /// 将帧按网络输入尺寸 letterbox 后取回
  pub fn letterbox_frame(
    &self,
    frame: &InterleavedFrame,
  ) -> Result<InterleavedFrame, DetectorError> {
    let network = self.network()?;
    let (w, h) = (network.width(), network.height());
    self.round_trip_native(frame, |backend, image| backend.letterbox_image(image, w, h))
  }

  /// 经原生 `copy_image` 复制后取回
  pub fn copy_frame(
    &self,
    frame: &InterleavedFrame,
  ) -> Result<InterleavedFrame, DetectorError> {
    self.network()?;
    self.round_trip_native(frame, |backend, image| backend.copy_image(image))
  }

  fn round_trip_native<F>(
    &self,
    frame: &InterleavedFrame,
    op: F,
  ) -> Result<InterleavedFrame, DetectorError>
  where
    F: FnOnce(&B, ImageRef<'_>) -> Result<NativeImage, BindingError>,
  {
    let mut planar = frame.to_planar();
    let (w, h, c) = (planar.width(), planar.height(), planar.channels());
    let borrowed = self.backend.float_to_image(
      to_c_int(w, "image width")?,
      to_c_int(h, "image height")?,
      to_c_int(c, "image channels")?,
      planar.as_mut_slice(),
    )?;
    let native = Scoped::new(&self.backend, op(&self.backend, borrowed.image_ref())?);
    let image = native.image_ref();
    let output = PlanarFrame::new(
      image.data().to_vec(),
      image.width().max(0) as usize,
      image.height().max(0) as usize,
      image.channels().max(0) as usize,
    )?;
    Ok(output.to_interleaved())
  }

  /// 重建记忆环，缺省沿用当前容量
  pub fn reset_memory(&mut self, capacity: Option<usize>) -> Result<(), DetectorError> {
    self.network()?;
    self.memory.reset(&self.backend, capacity)?;
    info!("记忆环已重建, 容量 {}", self.memory.capacity());
    Ok(())
  }

  /// 释放网络与记忆环；重复调用不做任何事
  pub fn dispose(&mut self) {
    let Some(network) = self.network.take() else {
      debug!("检测器已释放, 忽略重复释放");
      return;
    };
    self.memory.destroy(&self.backend);
    network.release(&self.backend);
    info!("检测器已释放");
  }

  pub fn is_disposed(&self) -> bool {
    self.network.is_none()
  }

  pub fn network_width(&self) -> Result<i32, DetectorError> {
    Ok(self.network()?.width())
  }

  pub fn network_height(&self) -> Result<i32, DetectorError> {
    Ok(self.network()?.height())
  }

  pub fn output_size(&self) -> usize {
    self.output_size
  }

  pub fn metadata(&self) -> &Metadata {
    &self.metadata
  }

  pub fn memory(&self) -> &MemoryRing {
    &self.memory
  }

  pub fn options(&self) -> DetectOptions {
    self.options
  }

  pub fn set_options(&mut self, options: DetectOptions) {
    self.options = options;
  }

  pub fn backend(&self) -> &B {
    &self.backend
  }
}

impl<B: Backend> Drop for Detector<B> {
  fn drop(&mut self) {
    self.dispose();
  }
}

impl<B: Backend> Model for Detector<B> {
  type Input = DetectInput;
  type Output = DetectResult;
  type Error = DetectorError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.detect(input, None)
  }
}
