// 该文件是 Beifeng （北风） 项目的一部分。
// src/worker.rs - 检测线程
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

//! 在独立线程上构造并持有检测器。
//!
//! 原生句柄不能跨线程，因此检测器在工作线程内构造，调用方只交换请求与结果。
//! 请求按提交顺序逐个执行，每个请求通过自己的应答通道返回结果。

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, error, info};

use crate::binding::Backend;
use crate::model::{DetectInput, DetectOptions, DetectResult, Detector, DetectorError, Model};

#[derive(Error, Debug)]
pub enum WorkerError {
  #[error("无法创建检测线程: {0}")]
  Spawn(#[from] std::io::Error),
  #[error("检测器错误: {0}")]
  Detector(#[from] DetectorError),
  #[error("检测线程已退出")]
  Stopped,
  #[error("检测线程异常终止")]
  Panicked,
}

type Reply<T> = Sender<Result<T, DetectorError>>;

enum Request {
  Detect {
    input: DetectInput,
    options: Option<DetectOptions>,
    reply: Reply<DetectResult>,
  },
  ResetMemory {
    capacity: Option<usize>,
    reply: Reply<()>,
  },
}

/// 尚未完成的请求
#[must_use]
pub struct Pending<T> {
  receiver: Receiver<Result<T, DetectorError>>,
}

impl<T> Pending<T> {
  /// 阻塞直到检测线程给出结果
  pub fn wait(self) -> Result<T, WorkerError> {
    let result = self.receiver.recv().map_err(|_| WorkerError::Stopped)?;
    Ok(result?)
  }
}

pub struct DetectorWorker {
  sender: Option<Sender<Request>>,
  handle: Option<JoinHandle<()>>,
}

fn serve<B: Backend>(mut detector: Detector<B>, requests: Receiver<Request>) {
  let mut served = 0usize;
  for request in requests {
    match request {
      Request::Detect {
        input,
        options,
        reply,
      } => {
        let result = detector.detect(&input, options);
        if let Err(err) = &result {
          error!("检测失败: {}", err);
        }
        served += 1;
        if reply.send(result).is_err() {
          debug!("调用方已放弃第 {} 个请求", served);
        }
      }
      Request::ResetMemory { capacity, reply } => {
        let result = detector.reset_memory(capacity);
        if let Err(err) = &result {
          error!("记忆环重建失败: {}", err);
        }
        if reply.send(result).is_err() {
          debug!("调用方已放弃记忆环重建请求");
        }
      }
    }
  }
  info!("检测线程退出, 共处理 {} 个请求", served);
}

impl DetectorWorker {
  /// 在新线程上调用 `build` 构造检测器，构造失败时直接返回错误
  pub fn spawn<B, F>(build: F) -> Result<Self, WorkerError>
  where
    B: Backend + 'static,
    F: FnOnce() -> Result<Detector<B>, DetectorError> + Send + 'static,
  {
    let (sender, requests) = mpsc::channel::<Request>();
    let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), DetectorError>>(1);

    let handle = thread::Builder::new()
      .name("darknet-detector".to_string())
      .spawn(move || {
        let detector = match build() {
          Ok(detector) => {
            let _ = ready_tx.send(Ok(()));
            detector
          }
          Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
          }
        };
        serve(detector, requests);
      })?;

    match ready_rx.recv() {
      Ok(Ok(())) => {
        info!("检测线程已就绪");
        Ok(Self {
          sender: Some(sender),
          handle: Some(handle),
        })
      }
      Ok(Err(err)) => {
        let _ = handle.join();
        Err(WorkerError::Detector(err))
      }
      Err(_) => {
        let _ = handle.join();
        Err(WorkerError::Panicked)
      }
    }
  }

  fn send(&self, request: Request) -> Result<(), WorkerError> {
    self
      .sender
      .as_ref()
      .ok_or(WorkerError::Stopped)?
      .send(request)
      .map_err(|_| WorkerError::Stopped)
  }

  pub fn submit(
    &self,
    input: DetectInput,
    options: Option<DetectOptions>,
  ) -> Result<Pending<DetectResult>, WorkerError> {
    let (reply, receiver) = mpsc::channel();
    self.send(Request::Detect {
      input,
      options,
      reply,
    })?;
    Ok(Pending { receiver })
  }

  pub fn detect(
    &self,
    input: DetectInput,
    options: Option<DetectOptions>,
  ) -> Result<DetectResult, WorkerError> {
    self.submit(input, options)?.wait()
  }

  pub fn reset_memory(&self, capacity: Option<usize>) -> Result<(), WorkerError> {
    let (reply, receiver) = mpsc::channel();
    self.send(Request::ResetMemory { capacity, reply })?;
    Pending { receiver }.wait()
  }

  /// 关闭请求通道并等待检测线程释放检测器
  pub fn shutdown(mut self) -> Result<(), WorkerError> {
    self.stop()
  }

  fn stop(&mut self) -> Result<(), WorkerError> {
    self.sender.take();
    match self.handle.take() {
      Some(handle) => handle.join().map_err(|_| WorkerError::Panicked),
      None => Ok(()),
    }
  }
}

impl Drop for DetectorWorker {
  fn drop(&mut self) {
    if let Err(err) = self.stop() {
      error!("关闭检测线程失败: {}", err);
    }
  }
}

impl Model for DetectorWorker {
  type Input = DetectInput;
  type Output = DetectResult;
  type Error = WorkerError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.detect(input.clone(), None)
  }
}
