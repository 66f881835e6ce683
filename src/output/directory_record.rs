// 该文件是 Qiuyuan （球员检测） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{RgbFrame, ToRgbImage},
  model::{DetectResult, WithLabel},
  output::{
    Render,
    draw::{Draw, DrawError},
  },
  utils::{InvalidFlag, query_flag, query_value, url_to_path},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("绘制错误: {0}")]
  DrawError(#[from] DrawError),
  #[error(transparent)]
  InvalidFlag(#[from] InvalidFlag),
}

/// 与图像同名的检测结果记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
  /// `label, score, x1, y1, x2, y2`，label 为类别名
  TextWithName,
  /// 同上，label 为类别编号
  TextWithId,
  Json,
}

#[derive(Serialize)]
struct JsonRecord<'a> {
  label: String,
  class_id: u32,
  score: f32,
  bbox: &'a [f32; 4],
}

impl Record {
  pub fn render<T: WithLabel>(&self, result: &DetectResult<T>) -> Result<String, serde_json::Error> {
    match self {
      Record::Json => {
        let records: Vec<_> = result
          .iter()
          .map(|item| JsonRecord {
            label: item.kind.to_label_str(),
            class_id: item.kind.to_label_id(),
            score: item.score,
            bbox: &item.bbox,
          })
          .collect();
        serde_json::to_string_pretty(&records)
      }
      Record::TextWithName | Record::TextWithId => {
        let records: Vec<_> = result
          .iter()
          .map(|item| {
            let name = if *self == Record::TextWithName {
              item.kind.to_label_str()
            } else {
              item.kind.to_label_id().to_string()
            };
            format!(
              "{}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}",
              name, item.score, item.bbox[0], item.bbox[1], item.bbox[2], item.bbox[3]
            )
          })
          .collect();
        Ok(records.join("\n"))
      }
    }
  }

  fn extension(&self) -> &'static str {
    match self {
      Record::Json => "json",
      Record::TextWithName | Record::TextWithId => "txt",
    }
  }

  pub fn record<T: WithLabel>(
    &self,
    result: &DetectResult<T>,
    image_path: &Path,
  ) -> Result<(), DirectoryRecordOutputError> {
    let content = self.render(result)?;
    std::fs::write(image_path.with_extension(self.extension()), content)?;
    Ok(())
  }
}

pub enum DrawWrapper {
  Draw(Box<Draw>),
  Record(Record),
}

impl DrawWrapper {
  pub fn save_result<F, T>(
    &self,
    path: &Path,
    frame: &F,
    result: &DetectResult<T>,
  ) -> Result<(), DirectoryRecordOutputError>
  where
    F: ToRgbImage,
    T: WithLabel,
  {
    match self {
      DrawWrapper::Draw(draw) => {
        draw.draw_detection(frame, result).save(path)?;
      }
      DrawWrapper::Record(record) => {
        frame.to_rgb_image().save(path)?;
        record.record(result, path)?;
      }
    };

    Ok(())
  }
}

/// 按日期分目录保存每一帧：`YYYY/MM/DD/HH-MM-SS-XXXX.png`
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: DrawWrapper,
  frame_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let draw = match query_value(uri, "record").as_deref() {
      Some("id") => DrawWrapper::Record(Record::TextWithId),
      Some("json") => DrawWrapper::Record(Record::Json),
      Some(_) => DrawWrapper::Record(Record::TextWithName),
      None => DrawWrapper::Draw(Box::new(Draw::from_url(uri)?)),
    };

    Ok(DirectoryRecordOutput::new(
      url_to_path(uri),
      draw,
      query_flag(uri, "always")?,
    ))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>, draw: DrawWrapper, always: bool) -> Self {
    Self {
      directory: directory.into(),
      draw,
      frame_counter: AtomicU16::new(0),
      always,
    }
  }

  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn frame_path(&self, now: DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl<T: WithLabel> Render<RgbFrame, DetectResult<T>> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbFrame, result: &DetectResult<T>) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      debug!("没有检测结果，跳过保存");
      return Ok(());
    }

    let path = self.frame_path(Utc::now())?;
    self.draw.save_result(&path, frame, result)
  }
}
