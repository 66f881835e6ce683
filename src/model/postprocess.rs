// 该文件是 Qiuyuan （球员检测） 项目的一部分。
// src/model/postprocess.rs - YOLO 前后处理
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

use image::{Rgb, RgbImage, imageops};
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::{RgbFrame, ToRgbImage},
  model::{CocoLabel, DetectItem, WithLabel},
};

pub const YOLO_DEFAULT_CONF: f32 = 0.25;
pub const YOLO_DEFAULT_IOU: f32 = 0.7;
pub const YOLO_DEFAULT_MAX_DET: usize = 300;
pub const YOLO_DEFAULT_INPUT_SIZE: u32 = 640;
const LETTERBOX_PAD_VALUE: u8 = 114;
const END_TO_END_COLUMNS: usize = 6;

/// 推理参数
#[derive(Debug, Clone, PartialEq)]
pub struct YoloParams {
  /// 置信度阈值，分数严格大于该值才保留
  pub conf: f32,
  /// NMS IoU 阈值
  pub iou: f32,
  pub max_det: usize,
  /// 只保留这些类别，`None` 表示全部保留
  pub classes: Option<Vec<u32>>,
  /// 跨类别 NMS
  pub agnostic: bool,
}

impl Default for YoloParams {
  fn default() -> Self {
    Self {
      conf: YOLO_DEFAULT_CONF,
      iou: YOLO_DEFAULT_IOU,
      max_det: YOLO_DEFAULT_MAX_DET,
      classes: None,
      agnostic: false,
    }
  }
}

impl YoloParams {
  fn keep_class(&self, class_id: u32) -> bool {
    self
      .classes
      .as_ref()
      .map(|classes| classes.contains(&class_id))
      .unwrap_or(true)
  }
}

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
  #[error("不支持的模型输出形状: {0:?}")]
  UnsupportedOutput(Vec<usize>),
  #[error("模型输出长度不足: 期望 {expected}, 实际 {actual}")]
  Truncated { expected: usize, actual: usize },
}

/// 原图到模型输入的等比缩放与填充
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
  pub src_w: u32,
  pub src_h: u32,
  pub dst_w: u32,
  pub dst_h: u32,
  pub scale: f32,
  /// 缩放后（填充前）的尺寸
  pub new_w: u32,
  pub new_h: u32,
  pub pad_x: u32,
  pub pad_y: u32,
}

impl Letterbox {
  /// 任一尺寸为 0 时返回 `None`
  pub fn new(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Option<Self> {
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
      return None;
    }

    let scale = f32::min(dst_w as f32 / src_w as f32, dst_h as f32 / src_h as f32);
    let new_w = ((src_w as f32 * scale).round() as u32).clamp(1, dst_w);
    let new_h = ((src_h as f32 * scale).round() as u32).clamp(1, dst_h);

    Some(Self {
      src_w,
      src_h,
      dst_w,
      dst_h,
      scale,
      new_w,
      new_h,
      pad_x: (dst_w - new_w) / 2,
      pad_y: (dst_h - new_h) / 2,
    })
  }

  pub fn resized(&self) -> (u32, u32) {
    (self.new_w, self.new_h)
  }

  /// 模型输入坐标映射回原图像素坐标
  pub fn unletterbox(&self, x: f32, y: f32) -> (f32, f32) {
    (
      (x - self.pad_x as f32) / self.scale,
      (y - self.pad_y as f32) / self.scale,
    )
  }

  /// 模型输入坐标映射到原图归一化坐标，并裁剪到 [0, 1]
  pub fn normalize(&self, x: f32, y: f32) -> (f32, f32) {
    let (x, y) = self.unletterbox(x, y);
    (
      (x / self.src_w as f32).clamp(0.0, 1.0),
      (y / self.src_h as f32).clamp(0.0, 1.0),
    )
  }
}

/// 将帧缩放填充到模型输入尺寸，输出 NCHW 排布、归一化到 [0, 1] 的浮点数据
pub fn letterbox_nchw(frame: &RgbFrame, dst_w: u32, dst_h: u32) -> Option<(Vec<f32>, Letterbox)> {
  let letterbox = Letterbox::new(frame.width(), frame.height(), dst_w, dst_h)?;
  let (new_w, new_h) = letterbox.resized();

  let source = frame.to_rgb_image();
  let resized = imageops::resize(&source, new_w, new_h, imageops::FilterType::Triangle);

  let mut canvas = RgbImage::from_pixel(dst_w, dst_h, Rgb([LETTERBOX_PAD_VALUE; 3]));
  imageops::overlay(
    &mut canvas,
    &resized,
    letterbox.pad_x as i64,
    letterbox.pad_y as i64,
  );

  let plane = (dst_w * dst_h) as usize;
  let mut chw = vec![0f32; 3 * plane];
  for (i, px) in canvas.pixels().enumerate() {
    chw[i] = px[0] as f32 / 255.0;
    chw[plane + i] = px[1] as f32 / 255.0;
    chw[2 * plane + i] = px[2] as f32 / 255.0;
  }

  Some((chw, letterbox))
}

/// 解码模型输出。
///
/// 支持两种形状：
/// - `[1, 4 + nc, N]`：原始检测头，每列为 cx, cy, w, h 与各类别分数，需要 NMS
/// - `[1, N, 6]` / `[N, 6]`：端到端输出，每行为 x1, y1, x2, y2, score, class
pub fn decode(
  shape: &[usize],
  data: &[f32],
  params: &YoloParams,
  letterbox: &Letterbox,
) -> Result<Vec<DetectItem<CocoLabel>>, DecodeError> {
  match *shape {
    [n, END_TO_END_COLUMNS] | [1, n, END_TO_END_COLUMNS] => {
      check_len(data, n * END_TO_END_COLUMNS)?;
      Ok(decode_end_to_end(n, data, params, letterbox))
    }
    [1, rows, n] if rows > 4 => {
      check_len(data, rows * n)?;
      Ok(decode_raw(rows, n, data, params, letterbox))
    }
    _ => Err(DecodeError::UnsupportedOutput(shape.to_vec())),
  }
}

fn check_len(data: &[f32], expected: usize) -> Result<(), DecodeError> {
  if data.len() < expected {
    return Err(DecodeError::Truncated {
      expected,
      actual: data.len(),
    });
  }
  Ok(())
}

fn decode_raw(
  rows: usize,
  n: usize,
  data: &[f32],
  params: &YoloParams,
  letterbox: &Letterbox,
) -> Vec<DetectItem<CocoLabel>> {
  let num_classes = rows - 4;
  let mut candidates = Vec::new();

  for i in 0..n {
    let (class_id, score) = (0..num_classes)
      .map(|c| (c as u32, data[(4 + c) * n + i]))
      .fold((0u32, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

    if !(score > params.conf) || !params.keep_class(class_id) {
      continue;
    }

    let cx = data[i];
    let cy = data[n + i];
    let w = data[2 * n + i];
    let h = data[3 * n + i];

    let (x1, y1) = letterbox.normalize(cx - w / 2.0, cy - h / 2.0);
    let (x2, y2) = letterbox.normalize(cx + w / 2.0, cy + h / 2.0);

    candidates.push(DetectItem {
      kind: CocoLabel::from_label_id(class_id),
      score,
      bbox: [x1, y1, x2, y2],
    });
  }

  debug!("NMS 前候选框数量: {}", candidates.len());
  let mut kept = nms(candidates, params.iou, params.agnostic);
  kept.truncate(params.max_det);
  kept
}

fn decode_end_to_end(
  n: usize,
  data: &[f32],
  params: &YoloParams,
  letterbox: &Letterbox,
) -> Vec<DetectItem<CocoLabel>> {
  let mut items: Vec<_> = data
    .chunks_exact(END_TO_END_COLUMNS)
    .take(n)
    .filter_map(|row| {
      let score = row[4];
      let class_id = row[5].max(0.0) as u32;
      if !(score > params.conf) || !params.keep_class(class_id) {
        return None;
      }

      let (x1, y1) = letterbox.normalize(row[0], row[1]);
      let (x2, y2) = letterbox.normalize(row[2], row[3]);
      Some(DetectItem {
        kind: CocoLabel::from_label_id(class_id),
        score,
        bbox: [x1, y1, x2, y2],
      })
    })
    .collect();

  items.sort_by(|a, b| b.score.total_cmp(&a.score));
  items.truncate(params.max_det);
  items
}

/// 非极大值抑制，结果按分数降序排列
pub fn nms<T: WithLabel>(mut items: Vec<DetectItem<T>>, iou_threshold: f32, agnostic: bool) -> Vec<DetectItem<T>> {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<DetectItem<T>> = Vec::with_capacity(items.len());
  for item in items {
    let suppressed = kept.iter().any(|best| {
      (agnostic || best.kind.to_label_id() == item.kind.to_label_id())
        && iou(&best.bbox, &item.bbox) > iou_threshold
    });
    if !suppressed {
      kept.push(item);
    }
  }
  kept
}

/// 两个 xyxy 边界框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn identity_letterbox(size: u32) -> Letterbox {
    Letterbox::new(size, size, size, size).unwrap()
  }

  fn item(id: u32, score: f32, bbox: [f32; 4]) -> DetectItem<CocoLabel> {
    DetectItem {
      kind: CocoLabel::from_label_id(id),
      score,
      bbox,
    }
  }

  #[test]
  fn iou_of_boxes() {
    let a = [0.0, 0.0, 2.0, 2.0];
    assert_eq!(iou(&a, &a), 1.0);
    assert_eq!(iou(&a, &[1.0, 0.0, 3.0, 2.0]), 2.0 / 6.0);
    assert_eq!(iou(&a, &[5.0, 5.0, 6.0, 6.0]), 0.0);
    assert_eq!(iou(&[0.0; 4], &[0.0; 4]), 0.0);
  }

  #[test]
  fn nms_suppresses_same_class_only() {
    let items = vec![
      item(0, 0.6, [0.0, 0.0, 1.0, 1.0]),
      item(0, 0.9, [0.0, 0.0, 1.0, 0.95]),
      item(32, 0.8, [0.0, 0.0, 1.0, 1.0]),
      item(0, 0.5, [2.0, 2.0, 3.0, 3.0]),
    ];
    let kept = nms(items, 0.7, false);
    let scores: Vec<f32> = kept.iter().map(|d| d.score).collect();
    assert_eq!(scores, vec![0.9, 0.8, 0.5]);
  }

  #[test]
  fn agnostic_nms_suppresses_across_classes() {
    let items = vec![
      item(0, 0.9, [0.0, 0.0, 1.0, 1.0]),
      item(32, 0.8, [0.0, 0.0, 1.0, 1.0]),
    ];
    let kept = nms(items, 0.7, true);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].kind, CocoLabel::PERSON);
  }

  #[test]
  fn letterbox_maps_back_to_source() {
    // 1280x720 -> 640x640: scale 0.5, resized 640x360, pad_y 140
    let lb = Letterbox::new(1280, 720, 640, 640).unwrap();
    assert_eq!(lb.scale, 0.5);
    assert_eq!(lb.resized(), (640, 360));
    assert_eq!((lb.pad_x, lb.pad_y), (0, 140));
    assert_eq!(lb.unletterbox(320.0, 320.0), (640.0, 360.0));
    assert_eq!(lb.normalize(320.0, 320.0), (0.5, 0.5));
    assert_eq!(lb.normalize(-10.0, 700.0), (0.0, 1.0));
  }

  #[test]
  fn letterbox_keeps_odd_remainder() {
    // 1000x999 -> 640x640: 高度缩放为 639，剩余 1 行全部落在底部
    let lb = Letterbox::new(1000, 999, 640, 640).unwrap();
    assert_eq!(lb.scale, 0.64);
    assert_eq!(lb.resized(), (640, 639));
    assert_eq!((lb.pad_x, lb.pad_y), (0, 0));

    let (data, _) = letterbox_nchw(&RgbFrame::with_shape(1000, 999), 640, 640).unwrap();
    let pad = LETTERBOX_PAD_VALUE as f32 / 255.0;
    assert_eq!(data[638 * 640], 0.0);
    assert_eq!(data[639 * 640], pad);
  }

  #[test]
  fn letterbox_rejects_empty_shape() {
    assert!(Letterbox::new(0, 10, 640, 640).is_none());
    assert!(letterbox_nchw(&RgbFrame::with_shape(0, 0), 640, 640).is_none());
  }

  #[test]
  fn letterbox_nchw_pads_with_gray() {
    let (data, lb) = letterbox_nchw(&RgbFrame::with_shape(8, 4), 8, 8).unwrap();
    assert_eq!(data.len(), 3 * 64);
    assert_eq!(lb.pad_y, 2);
    let pad = LETTERBOX_PAD_VALUE as f32 / 255.0;
    // 第一行属于填充区域，中间行属于原图（全黑）
    assert_eq!(data[0], pad);
    assert_eq!(data[4 * 8], 0.0);
    assert_eq!(data[64 + 4 * 8], 0.0);
  }

  #[test]
  fn decode_raw_head() {
    // 2 个类别，3 个锚点，排布为 [1, 6, 3]
    let n = 3;
    #[rustfmt::skip]
    let data = vec![
      // cx
      50.0, 52.0, 10.0,
      // cy
      50.0, 50.0, 10.0,
      // w
      20.0, 20.0, 4.0,
      // h
      20.0, 20.0, 4.0,
      // class 0
      0.9, 0.8, 0.1,
      // class 1
      0.1, 0.2, 0.05,
    ];
    let lb = identity_letterbox(100);
    let items = decode(&[1, 6, n], &data, &YoloParams::default(), &lb).unwrap();

    // 第二个锚点与第一个高度重叠被抑制，第三个低于阈值
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].kind, CocoLabel::PERSON);
    assert_eq!(items[0].score, 0.9);
    assert_eq!(items[0].bbox, [0.4, 0.4, 0.6, 0.6]);
  }

  #[test]
  fn decode_raw_applies_class_filter_and_max_det() {
    #[rustfmt::skip]
    let data = vec![
      10.0, 50.0, 90.0,
      10.0, 50.0, 90.0,
      4.0, 4.0, 4.0,
      4.0, 4.0, 4.0,
      0.9, 0.1, 0.8,
      0.1, 0.7, 0.1,
    ];
    let lb = identity_letterbox(100);

    let params = YoloParams {
      classes: Some(vec![1]),
      ..YoloParams::default()
    };
    let items = decode(&[1, 6, 3], &data, &params, &lb).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].kind.to_label_id(), 1);

    let params = YoloParams {
      max_det: 2,
      ..YoloParams::default()
    };
    let items = decode(&[1, 6, 3], &data, &params, &lb).unwrap();
    let scores: Vec<f32> = items.iter().map(|d| d.score).collect();
    assert_eq!(scores, vec![0.9, 0.8]);
  }

  #[test]
  fn decode_end_to_end_rows() {
    #[rustfmt::skip]
    let data = vec![
      10.0, 10.0, 30.0, 30.0, 0.5, 32.0,
      40.0, 40.0, 80.0, 90.0, 0.95, 0.0,
      0.0, 0.0, 1.0, 1.0, 0.1, 0.0,
    ];
    let lb = identity_letterbox(100);
    let items = decode(&[1, 3, 6], &data, &YoloParams::default(), &lb).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].kind, CocoLabel::PERSON);
    assert_eq!(items[0].bbox, [0.4, 0.4, 0.8, 0.9]);
    assert_eq!(items[1].kind, CocoLabel::SPORTS_BALL);

    let flat = decode(&[3, 6], &data, &YoloParams::default(), &lb).unwrap();
    assert_eq!(flat, items);

    let params = YoloParams {
      classes: Some(vec![32]),
      ..YoloParams::default()
    };
    let balls = decode(&[1, 3, 6], &data, &params, &lb).unwrap();
    assert_eq!(balls.len(), 1);
    assert_eq!(balls[0].kind, CocoLabel::SPORTS_BALL);
    assert_eq!(balls[0].score, 0.5);

    let params = YoloParams {
      max_det: 1,
      ..YoloParams::default()
    };
    let top = decode(&[1, 3, 6], &data, &params, &lb).unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].kind, CocoLabel::PERSON);
    assert_eq!(top[0].score, 0.95);
  }

  #[test]
  fn decode_rejects_unknown_shapes() {
    let lb = identity_letterbox(100);
    let params = YoloParams::default();
    assert_eq!(
      decode(&[1, 2, 3, 4], &[], &params, &lb),
      Err(DecodeError::UnsupportedOutput(vec![1, 2, 3, 4]))
    );
    assert_eq!(
      decode(&[2, 84, 10], &[], &params, &lb),
      Err(DecodeError::UnsupportedOutput(vec![2, 84, 10]))
    );
    assert_eq!(
      decode(&[1, 84, 10], &[0.0; 10], &params, &lb),
      Err(DecodeError::Truncated {
        expected: 840,
        actual: 10
      })
    );
  }
}
