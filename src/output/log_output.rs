// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/log_output.rs - 日志输出
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
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectInput, DetectResult},
  output::{Render, describe},
};

#[derive(Error, Debug)]
pub enum LogOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("参数 min_prob 无效: {0}")]
  InvalidProb(String),
}

/// 把检测结果写进日志，`log://?min_prob=0.6` 只打印概率不低于该值的结果
#[derive(Debug, Default)]
pub struct LogOutput {
  min_prob: f32,
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = LogOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(LogOutputError::SchemeMismatch(uri.scheme().to_string()));
    }
    let mut output = LogOutput::default();
    for (k, v) in uri.query_pairs() {
      if k == "min_prob" {
        output.min_prob = v
          .parse()
          .map_err(|_| LogOutputError::InvalidProb(v.to_string()))?;
      }
    }
    Ok(output)
  }
}

impl LogOutput {
  pub fn min_prob(&self) -> f32 {
    self.min_prob
  }
}

impl Render<DetectInput, DetectResult> for LogOutput {
  type Error = LogOutputError;

  fn render_result(&self, frame: &DetectInput, result: &DetectResult) -> Result<(), Self::Error> {
    info!("{}: 检测到 {} 个目标", describe(frame), result.len());
    for item in result.iter().filter(|item| item.prob >= self.min_prob) {
      info!(
        "  - {}: {:.2}% at ({:.3}, {:.3}, {:.3}x{:.3})",
        item.name,
        item.prob * 100.0,
        item.bbox.x,
        item.bbox.y,
        item.bbox.w,
        item.bbox.h
      );
    }
    Ok(())
  }
}
