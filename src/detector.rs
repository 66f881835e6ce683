// 该文件是 Qiuyuan （球员检测） 项目的一部分。
// src/detector.rs - 球员检测器
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

use crate::model::Model;

#[derive(Error, Debug, PartialEq)]
pub enum DetectError<E> {
  /// 模型自身的错误，原样透传
  #[error(transparent)]
  Model(E),
  #[error("模型未返回任何结果")]
  EmptyResult,
}

/// 球员检测器。
///
/// 持有一个已加载的检测模型，对单帧调用模型并只返回结果集合中的第一个元素。
/// 不做输入校验、重试或缓存，模型的错误原样返回。
pub struct PlayerDetector<M> {
  model: M,
}

#[cfg(feature = "model_yolo")]
impl PlayerDetector<crate::model::Yolo> {
  /// 从文件路径同步加载默认的 YOLO 模型
  pub fn new(model_path: impl AsRef<std::path::Path>) -> Result<Self, crate::model::YoloError> {
    let model = crate::model::YoloBuilder::new(model_path).build()?;
    Ok(Self { model })
  }
}

#[cfg(feature = "model_yolo")]
impl crate::FromUrl for PlayerDetector<crate::model::Yolo> {
  type Error = crate::model::YoloError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    let model = crate::model::YoloBuilder::from_url(url)?.build()?;
    Ok(Self { model })
  }
}

impl<M: Model> PlayerDetector<M> {
  pub fn with_model(model: M) -> Self {
    Self { model }
  }

  pub fn detect(&self, frame: &M::Input) -> Result<M::Output, DetectError<M::Error>> {
    self
      .model
      .infer(frame)
      .map_err(DetectError::Model)?
      .into_iter()
      .next()
      .ok_or(DetectError::EmptyResult)
  }

  pub fn model(&self) -> &M {
    &self.model
  }

  pub fn into_model(self) -> M {
    self.model
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::Cell;

  struct Batch {
    calls: Cell<usize>,
    results: Vec<&'static str>,
  }

  impl Model for Batch {
    type Input = ();
    type Output = &'static str;
    type Error = String;

    fn infer(&self, _: &()) -> Result<Vec<&'static str>, String> {
      self.calls.set(self.calls.get() + 1);
      Ok(self.results.clone())
    }
  }

  #[test]
  fn detect_calls_model_once_and_takes_first() {
    let detector = PlayerDetector::with_model(Batch {
      calls: Cell::new(0),
      results: vec!["r0", "r1", "r2"],
    });
    assert_eq!(detector.detect(&()), Ok("r0"));
    assert_eq!(detector.model().calls.get(), 1);
  }

  #[test]
  fn empty_collection_is_reported() {
    let detector = PlayerDetector::with_model(Batch {
      calls: Cell::new(0),
      results: Vec::new(),
    });
    assert_eq!(detector.detect(&()), Err(DetectError::EmptyResult));
  }

  #[test]
  fn into_model_returns_handle() {
    let detector = PlayerDetector::with_model(Batch {
      calls: Cell::new(3),
      results: vec!["r0"],
    });
    assert_eq!(detector.into_model().calls.get(), 3);
  }
}
