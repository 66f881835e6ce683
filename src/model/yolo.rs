// 该文件是 Qiuyuan （球员检测） 项目的一部分。
// src/model/yolo.rs - YOLO 模型（ONNX Runtime 后端）
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

use std::{
  path::{Path, PathBuf},
  sync::Mutex,
  time::Instant,
};

use ort::{
  session::Session,
  value::{Tensor, ValueType},
};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  model::{
    CocoLabel, DetectResult, Model, Speed,
    postprocess::{self, DecodeError, Letterbox, YOLO_DEFAULT_INPUT_SIZE, YoloParams},
  },
  utils::{query_flag, query_value, url_to_path},
};

const YOLO_NUM_INPUTS: usize = 1;

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型参数 {key} 的取值无效: {value}")]
  InvalidOption { key: String, value: String },
  #[error("输入帧无效: {0}")]
  InvalidFrame(String),
  #[error("模型输出解码错误: {0}")]
  DecodeError(#[from] DecodeError),
  #[error("推理会话锁已损坏")]
  SessionPoisoned,
}

impl YoloError {
  fn invalid_option(key: &str, value: &str) -> Self {
    YoloError::InvalidOption {
      key: key.to_string(),
      value: value.to_string(),
    }
  }
}

pub struct Yolo {
  session: Mutex<Session>,
  input_w: u32,
  input_h: u32,
  params: YoloParams,
}

#[derive(Debug, Clone)]
pub struct YoloBuilder {
  model_path: PathBuf,
  params: YoloParams,
}

impl FromUrlWithScheme for YoloBuilder {
  const SCHEME: &'static str = "yolo";
}

impl FromUrl for YoloBuilder {
  type Error = YoloError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut params = YoloParams::default();
    if let Some(value) = query_value(url, "conf") {
      params.conf = value
        .parse()
        .map_err(|_| YoloError::invalid_option("conf", &value))?;
    }
    if let Some(value) = query_value(url, "iou") {
      params.iou = value
        .parse()
        .map_err(|_| YoloError::invalid_option("iou", &value))?;
    }
    if let Some(value) = query_value(url, "max_det") {
      params.max_det = value
        .parse()
        .map_err(|_| YoloError::invalid_option("max_det", &value))?;
    }
    if let Some(value) = query_value(url, "classes") {
      let classes = value
        .split(',')
        .map(|id| id.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| YoloError::invalid_option("classes", &value))?;
      params.classes = Some(classes);
    }
    params.agnostic = query_flag(url, "agnostic")
      .map_err(|e| YoloError::invalid_option(&e.key, &e.value))?;

    Ok(YoloBuilder {
      model_path: url_to_path(url),
      params,
    })
  }
}

impl YoloBuilder {
  pub fn new(model_path: impl AsRef<Path>) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
      params: YoloParams::default(),
    }
  }

  pub fn model_path(&self) -> &Path {
    &self.model_path
  }

  pub fn params(mut self, params: YoloParams) -> Self {
    self.params = params;
    self
  }

  pub fn conf(mut self, conf: f32) -> Self {
    self.params.conf = conf;
    self
  }

  pub fn iou(mut self, iou: f32) -> Self {
    self.params.iou = iou;
    self
  }

  pub fn max_det(mut self, max_det: usize) -> Self {
    self.params.max_det = max_det;
    self
  }

  pub fn classes(mut self, classes: Option<Vec<u32>>) -> Self {
    self.params.classes = classes;
    self
  }

  pub fn agnostic(mut self, agnostic: bool) -> Self {
    self.params.agnostic = agnostic;
    self
  }

  pub fn build(self) -> Result<Yolo, YoloError> {
    info!("加载模型文件: {}", self.model_path.display());
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 ONNX Runtime 推理会话");
    let session = Session::builder()?.commit_from_memory(&model_data)?;

    let num_inputs = session.inputs.len();
    let num_outputs = session.outputs.len();
    if num_inputs != YOLO_NUM_INPUTS {
      error!(
        "预期模型输入数量为 {}, 实际为 {}",
        YOLO_NUM_INPUTS, num_inputs
      );
      return Err(YoloError::ModelInvalid(format!(
        "预期模型输入数量为 {}, 实际为 {}",
        YOLO_NUM_INPUTS, num_inputs
      )));
    }
    if num_outputs == 0 {
      return Err(YoloError::ModelInvalid("模型没有输出".to_string()));
    }
    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", num_outputs);

    // NCHW => [1, 3, H, W]，动态尺寸时退回默认值
    let (input_w, input_h) = match &session.inputs[0].input_type {
      ValueType::Tensor { shape, .. } if shape.len() == 4 && shape[2] > 0 && shape[3] > 0 => {
        (shape[3] as u32, shape[2] as u32)
      }
      _ => (YOLO_DEFAULT_INPUT_SIZE, YOLO_DEFAULT_INPUT_SIZE),
    };
    info!("模型加载完成，输入尺寸: {}x{}", input_w, input_h);

    Ok(Yolo {
      session: Mutex::new(session),
      input_w,
      input_h,
      params: self.params,
    })
  }
}

/// 缩放填充到模型输入尺寸，空帧返回 `InvalidFrame`
fn preprocess(
  frame: &RgbFrame,
  input_w: u32,
  input_h: u32,
) -> Result<(Vec<f32>, Letterbox), YoloError> {
  postprocess::letterbox_nchw(frame, input_w, input_h).ok_or_else(|| {
    YoloError::InvalidFrame(format!("帧尺寸为 {}x{}", frame.width(), frame.height()))
  })
}

impl Yolo {
  fn run(&self, input: Vec<f32>) -> Result<(Vec<usize>, Vec<f32>), YoloError> {
    let mut session = self
      .session
      .lock()
      .map_err(|_| YoloError::SessionPoisoned)?;

    let input_tensor = Tensor::from_array((
      [1usize, 3, self.input_h as usize, self.input_w as usize],
      input.into_boxed_slice(),
    ))?;
    let outputs = session.run(ort::inputs![input_tensor])?;

    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
    let shape = shape
      .iter()
      .map(|&d| {
        usize::try_from(d).map_err(|_| YoloError::ModelInvalid(format!("模型输出存在动态维度: {d}")))
      })
      .collect::<Result<Vec<_>, _>>()?;

    Ok((shape, data.to_vec()))
  }
}

impl Model for Yolo {
  type Input = RgbFrame;
  type Output = DetectResult<CocoLabel>;
  type Error = YoloError;

  fn infer(&self, input: &Self::Input) -> Result<Vec<Self::Output>, Self::Error> {
    debug!("预处理输入帧 {}x{}", input.width(), input.height());
    let start = Instant::now();
    let (tensor, letterbox) = preprocess(input, self.input_w, self.input_h)?;
    let preprocess = start.elapsed();

    debug!("执行模型推理");
    let start = Instant::now();
    let (shape, data) = self.run(tensor)?;
    let inference = start.elapsed();
    debug!("模型输出形状: {:?}", shape);

    let start = Instant::now();
    let items = postprocess::decode(&shape, &data, &self.params, &letterbox)?;
    let postprocess = start.elapsed();
    debug!("检测到 {} 个物体", items.len());

    let result = DetectResult::new(items, (input.height(), input.width())).with_speed(Speed {
      preprocess,
      inference,
      postprocess,
    });
    Ok(vec![result])
  }
}
