// 该文件是 Qiuyuan （球员检测） 项目的一部分。
// src/model.rs - 模型
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

use std::time::Duration;

use serde::Serialize;

/// 检测模型。
///
/// `infer` 返回单次调用的结果集合，每个被处理的输入对应一个元素。
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Vec<Self::Output>, Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectItem<T> {
  pub kind: T,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，相对原图归一化
}

/// 各阶段耗时
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Speed {
  pub preprocess: Duration,
  pub inference: Duration,
  pub postprocess: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectResult<T> {
  pub items: Box<[DetectItem<T>]>,
  /// (height, width)
  pub orig_shape: (u32, u32),
  pub speed: Speed,
}

impl<T> DetectResult<T> {
  pub fn new(items: Vec<DetectItem<T>>, orig_shape: (u32, u32)) -> Self {
    Self {
      items: items.into_boxed_slice(),
      orig_shape,
      speed: Speed::default(),
    }
  }

  pub fn with_speed(mut self, speed: Speed) -> Self {
    self.speed = speed;
    self
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectItem<T>> {
    self.items.iter()
  }

  /// 原图像素坐标下的边界框
  pub fn xyxy(&self) -> Vec<[f32; 4]> {
    let (h, w) = (self.orig_shape.0 as f32, self.orig_shape.1 as f32);
    self
      .items
      .iter()
      .map(|item| {
        [
          item.bbox[0] * w,
          item.bbox[1] * h,
          item.bbox[2] * w,
          item.bbox[3] * h,
        ]
      })
      .collect()
  }
}

impl<T: Clone> DetectResult<T> {
  pub fn filter_kind(&self, keep: impl Fn(&T) -> bool) -> Self {
    let items: Vec<_> = self
      .items
      .iter()
      .filter(|item| keep(&item.kind))
      .cloned()
      .collect();
    Self {
      items: items.into_boxed_slice(),
      orig_shape: self.orig_shape,
      speed: self.speed,
    }
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Self;
}

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CocoLabel(u32);

impl CocoLabel {
  pub const PERSON: CocoLabel = CocoLabel(0);
  pub const SPORTS_BALL: CocoLabel = CocoLabel(32);

  /// 球员即 COCO 中的 person
  pub fn is_player(&self) -> bool {
    *self == Self::PERSON
  }
}

impl WithLabel for CocoLabel {
  fn to_label_str(&self) -> String {
    COCO_CLASSES
      .get(self.0 as usize)
      .unwrap_or(&"unknown")
      .to_string()
  }

  fn to_label_id(&self) -> u32 {
    self.0
  }

  fn from_label_id(id: u32) -> Self {
    CocoLabel(id)
  }
}

#[cfg(feature = "model_yolo")]
mod yolo;
#[cfg(feature = "model_yolo")]
pub use self::yolo::{Yolo, YoloBuilder, YoloError};

pub mod postprocess;
pub use self::postprocess::YoloParams;
