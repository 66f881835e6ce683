// 该文件是 Qiuyuan （球员检测） 项目的一部分。
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

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  model::{DetectResult, WithLabel},
  output::Render,
};

#[derive(Error, Debug)]
pub enum LogOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 只把检测结果写到日志
#[derive(Default)]
pub struct LogOutput {
  frame_index: AtomicU64,
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = LogOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(LogOutputError::SchemeMismatch);
    }
    Ok(LogOutput::default())
  }
}

impl<T: WithLabel> Render<RgbFrame, DetectResult<T>> for LogOutput {
  type Error = LogOutputError;

  fn render_result(&self, _frame: &RgbFrame, result: &DetectResult<T>) -> Result<(), Self::Error> {
    let index = self.frame_index.fetch_add(1, Ordering::Relaxed);
    info!(
      "帧 {}: 检测到 {} 个对象 (预处理 {:.2?}, 推理 {:.2?}, 后处理 {:.2?})",
      index,
      result.len(),
      result.speed.preprocess,
      result.speed.inference,
      result.speed.postprocess
    );
    for (item, [x1, y1, x2, y2]) in result.iter().zip(result.xyxy()) {
      info!(
        "  - {}: {:.2}% at ({:.0}, {:.0}, {:.0}x{:.0})",
        item.kind.to_label_str(),
        item.score * 100.0,
        x1,
        y1,
        x2 - x1,
        y2 - y1
      );
    }
    Ok(())
  }
}
