// 该文件是 Shanan Label （山南西风·标注） 项目的一部分。
// src/model/yolo.rs - 基于 ONNX Runtime 的 YOLO 模型
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

//! 端到端导出的 YOLO 模型（YOLOv10、YOLO26，或以 `nms=True` 导出的其它版本）。
//!
//! 模型输出每行为 `x1 y1 x2 y2 score class`，坐标位于模型输入空间；
//! 后处理与 NMS 均在计算图内部完成。若计算图暴露了 `iou_threshold`、
//! `score_threshold`/`conf_threshold` 标量输入，则由 `--iou`/`--conf` 填充。

use std::{
  borrow::Cow,
  fmt::Display,
  path::{Path, PathBuf},
};

use ort::{
  session::{Session, SessionInputValue, builder::SessionBuilder},
  value::{Tensor, ValueType},
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::{DEFAULT_CONF, DEFAULT_IMGSZ, DEFAULT_IOU, Device, PredictConfig},
  frame::{ImageFrame, Letterbox, letterbox_nchw},
  model::{DetectItem, DetectResult, Model},
};

/// 端到端输出每行至少包含的列数
const YOLO_E2E_COLUMNS: usize = 6;
/// 端到端导出保留的检测数上限（max_det 默认 300）；超过即视为原始检测头
const YOLO_E2E_MAX_ROWS: usize = 1000;

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("--weights not found: {0}")]
  WeightsNotFound(PathBuf),
  #[error("ONNX Runtime unavailable: {0} (check that the onnxruntime library is installed and loadable)")]
  RuntimeUnavailable(String),
  #[error("device '{0}' requires a build with the `cuda` feature")]
  DeviceUnsupported(Device),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, String),
  #[error("推理失败: {0}, 错误: {1}")]
  InferenceError(String, String),
  #[error("unsupported model output shape {0:?}: {1}")]
  UnsupportedOutput(Vec<usize>, &'static str),
}

impl YoloError {
  fn invalid(msg: &str, e: impl Display) -> Self {
    YoloError::ModelInvalid(msg.to_string(), e.to_string())
  }

  fn inference(msg: &str, e: impl Display) -> Self {
    YoloError::InferenceError(msg.to_string(), e.to_string())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThresholdKind {
  Iou,
  Score,
}

impl ThresholdKind {
  fn from_input_name(name: &str) -> Option<Self> {
    let name = name.to_lowercase();
    if name.contains("iou") {
      Some(ThresholdKind::Iou)
    } else if name.contains("score") || name.contains("conf") {
      Some(ThresholdKind::Score)
    } else {
      None
    }
  }
}

#[derive(Debug, Clone)]
struct ThresholdInput {
  name: String,
  kind: ThresholdKind,
  rank: usize,
}

pub struct YoloBuilder {
  weights: PathBuf,
  imgsz: u32,
  conf: f32,
  iou: f32,
  device: Device,
}

impl YoloBuilder {
  pub fn new(weights: impl Into<PathBuf>) -> Self {
    YoloBuilder {
      weights: weights.into(),
      imgsz: DEFAULT_IMGSZ,
      conf: DEFAULT_CONF,
      iou: DEFAULT_IOU,
      device: Device::Cpu,
    }
  }

  pub fn from_config(config: &PredictConfig) -> Self {
    Self::new(&config.weights)
      .imgsz(config.imgsz)
      .conf(config.conf)
      .iou(config.iou)
      .device(config.device)
  }

  pub fn imgsz(mut self, imgsz: u32) -> Self {
    self.imgsz = imgsz;
    self
  }

  pub fn conf(mut self, conf: f32) -> Self {
    self.conf = conf;
    self
  }

  pub fn iou(mut self, iou: f32) -> Self {
    self.iou = iou;
    self
  }

  pub fn device(mut self, device: Device) -> Self {
    self.device = device;
    self
  }

  pub fn build(self) -> Result<Yolo, YoloError> {
    if !self.weights.exists() {
      error!("权重文件不存在: {}", self.weights.display());
      return Err(YoloError::WeightsNotFound(self.weights));
    }

    info!("加载模型文件: {}", self.weights.display());
    let builder = Session::builder().map_err(|e| {
      error!("无法创建 ONNX Runtime 会话: {}", e);
      YoloError::RuntimeUnavailable(e.to_string())
    })?;
    let builder = self.with_device(builder)?;
    let session = builder
      .commit_from_file(&self.weights)
      .map_err(|e| YoloError::invalid("无法加载 ONNX 模型", e))?;
    info!("模型加载完成，设备: {}", self.device);

    let mut image_input = None;
    let mut thresholds = Vec::new();
    for input in session.inputs.iter() {
      debug!("模型输入 {}: {:?}", input.name, input.input_type);
      let ValueType::Tensor { shape, .. } = &input.input_type else {
        continue;
      };
      if shape.len() == 4 && image_input.is_none() {
        image_input = Some((input.name.clone(), shape[2], shape[3]));
      } else if let Some(kind) = ThresholdKind::from_input_name(&input.name) {
        thresholds.push(ThresholdInput {
          name: input.name.clone(),
          kind,
          rank: shape.len(),
        });
      }
    }
    for output in session.outputs.iter() {
      debug!("模型输出 {}: {:?}", output.name, output.output_type);
    }

    let (input_name, height, width) = image_input.ok_or_else(|| {
      YoloError::invalid("模型缺少 NCHW 图像输入", format!("{} 个输入", session.inputs.len()))
    })?;

    let (input_w, input_h) = if height > 0 && width > 0 {
      let (w, h) = (width as u32, height as u32);
      if w != self.imgsz || h != self.imgsz {
        warn!(
          "模型输入尺寸固定为 {}x{}，忽略 imgsz={}",
          w, h, self.imgsz
        );
      }
      (w, h)
    } else {
      (self.imgsz, self.imgsz)
    };
    debug!("模型输入尺寸: {}x{}", input_w, input_h);

    for threshold in &thresholds {
      info!("阈值输入 {} 将由 {:?} 填充", threshold.name, threshold.kind);
    }

    Ok(Yolo {
      session,
      input_name,
      input_w,
      input_h,
      conf: self.conf,
      iou: self.iou,
      thresholds,
    })
  }

  fn with_device(&self, builder: SessionBuilder) -> Result<SessionBuilder, YoloError> {
    match self.device {
      Device::Cpu => Ok(builder),
      #[cfg(feature = "cuda")]
      Device::Cuda(id) => {
        use ort::execution_providers::CUDAExecutionProvider;

        builder
          .with_execution_providers([CUDAExecutionProvider::default()
            .with_device_id(id)
            .build()
            .error_on_failure()])
          .map_err(|e| {
            error!("无法启用 CUDA 设备 {}: {}", id, e);
            YoloError::RuntimeUnavailable(e.to_string())
          })
      }
      #[cfg(not(feature = "cuda"))]
      Device::Cuda(_) => {
        error!("当前构建未启用 cuda 特性，无法使用设备 {}", self.device);
        Err(YoloError::DeviceUnsupported(self.device))
      }
    }
  }
}

pub struct Yolo {
  session: Session,
  input_name: String,
  input_w: u32,
  input_h: u32,
  conf: f32,
  iou: f32,
  thresholds: Vec<ThresholdInput>,
}

impl Yolo {
  pub fn builder(weights: impl AsRef<Path>) -> YoloBuilder {
    YoloBuilder::new(weights.as_ref())
  }

  /// 模型输入尺寸 (W, H)
  pub fn input_size(&self) -> (u32, u32) {
    (self.input_w, self.input_h)
  }
}

impl Model for Yolo {
  type Input = ImageFrame;
  type Output = DetectResult;
  type Error = YoloError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let (tensor, letterbox) = letterbox_nchw(input.image(), self.input_w, self.input_h);

    let mut inputs: Vec<(Cow<'static, str>, SessionInputValue<'static>)> =
      Vec::with_capacity(1 + self.thresholds.len());
    let image =
      Tensor::from_array(tensor).map_err(|e| YoloError::inference("无法创建输入张量", e))?;
    inputs.push((Cow::Owned(self.input_name.clone()), image.into()));

    for threshold in &self.thresholds {
      let value = match threshold.kind {
        ThresholdKind::Iou => self.iou,
        ThresholdKind::Score => self.conf,
      };
      let scalar = if threshold.rank == 0 {
        Tensor::from_array(([0usize; 0], vec![value]))
      } else {
        Tensor::from_array(([1usize], vec![value]))
      }
      .map_err(|e| YoloError::inference("无法创建阈值张量", e))?;
      inputs.push((Cow::Owned(threshold.name.clone()), scalar.into()));
    }

    let conf = self.conf;
    debug!("执行模型推理: {}", input.path().display());
    let outputs = self
      .session
      .run(inputs)
      .map_err(|e| YoloError::inference("模型推理失败", e))?;

    if outputs.len() == 0 {
      return Err(YoloError::UnsupportedOutput(Vec::new(), "model returned no outputs"));
    }
    let (shape, data) = outputs[0]
      .try_extract_tensor::<f32>()
      .map_err(|e| YoloError::inference("无法读取 f32 输出张量", e))?;
    let shape = shape
      .iter()
      .map(|d| usize::try_from(*d))
      .collect::<Result<Vec<_>, _>>()
      .map_err(|_| YoloError::UnsupportedOutput(Vec::new(), "dynamic/negative dimension"))?;
    debug!("模型输出形状: {:?}", shape);

    let items = decode_end_to_end(&shape, data, conf, &letterbox)?;
    debug!("检测到 {} 个物体", items.len());

    Ok(DetectResult::new(items, input.orig_shape()))
  }
}

/// 原始检测头输出形如 `[1, 4 + nc, anchors]` 或其转置 `[1, anchors, 4 + nc]`，
/// 需要外部 NMS，不在支持范围内
fn looks_like_raw_head(rows: usize, cols: usize) -> bool {
  let channels_first = rows >= 5 && cols > rows && cols > 64;
  let anchors_first = cols > YOLO_E2E_COLUMNS && rows > YOLO_E2E_MAX_ROWS;
  channels_first || anchors_first
}

/// 解析 `[1, N, >=6]` 或 `[N, >=6]` 的端到端输出，并映射回原图像素坐标
pub fn decode_end_to_end(
  shape: &[usize],
  data: &[f32],
  conf: f32,
  letterbox: &Letterbox,
) -> Result<Vec<DetectItem>, YoloError> {
  let (rows, cols) = match shape {
    [rows, cols] => (*rows, *cols),
    [1, rows, cols] => (*rows, *cols),
    _ => {
      error!("不支持的输出形状: {:?}", shape);
      return Err(YoloError::UnsupportedOutput(
        shape.to_vec(),
        "expected [1, N, 6] or [N, 6]",
      ));
    }
  };

  if looks_like_raw_head(rows, cols) {
    error!("输出形状 {:?} 为原始检测头，请以内置 NMS 的方式导出模型", shape);
    return Err(YoloError::UnsupportedOutput(
      shape.to_vec(),
      "raw detection head; export the model with NMS embedded (end-to-end)",
    ));
  }
  if cols < YOLO_E2E_COLUMNS {
    return Err(YoloError::UnsupportedOutput(
      shape.to_vec(),
      "need at least 6 columns per detection",
    ));
  }
  if data.len() < rows * cols {
    return Err(YoloError::UnsupportedOutput(
      shape.to_vec(),
      "output buffer shorter than its shape",
    ));
  }

  let (max_x, max_y) = (letterbox.src_w as f32, letterbox.src_h as f32);
  let mut items = Vec::new();

  for row in data.chunks_exact(cols).take(rows) {
    let (score, class) = (row[4], row[5]);
    if !score.is_finite() || score <= conf {
      continue;
    }
    if !class.is_finite() || class < 0.0 {
      warn!("忽略类别编号无效的检测: {}", class);
      continue;
    }

    let (x1, y1) = letterbox.to_source(row[0], row[1]);
    let (x2, y2) = letterbox.to_source(row[2], row[3]);

    items.push(DetectItem {
      class_id: class.round() as u32,
      score,
      bbox: [
        x1.clamp(0.0, max_x),
        y1.clamp(0.0, max_y),
        x2.clamp(0.0, max_x),
        y2.clamp(0.0, max_y),
      ],
    });
  }

  Ok(items)
}
