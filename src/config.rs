// 该文件是 Shanan Label （山南西风·标注） 项目的一部分。
// src/config.rs - 推理参数配置
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

//! 推理参数的三层来源：命令行参数 > `--config` JSON 文件 > 内置默认值。
//!
//! JSON 文件与桌面端 `local.user.json` 的公共推理参数兼容，
//! 既接受 `imgsz`/`conf`/`iou`/`device`，也接受 `ImgSz`/`Conf`/`Iou`/`Device`，
//! 其余字段会被忽略。

use std::{
  fmt,
  path::{Path, PathBuf},
  str::FromStr,
};

use clap::Args;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, warn};

pub const DEFAULT_IMGSZ: u32 = 640;
pub const DEFAULT_CONF: f32 = 0.25;
pub const DEFAULT_IOU: f32 = 0.45;
pub const DEFAULT_DEVICE: &str = "cpu";
/// 模型最大下采样步长，输入尺寸需为其整数倍
pub const MODEL_STRIDE: u32 = 32;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("--weights not found: {0}")]
  WeightsNotFound(PathBuf),
  #[error("config file not readable: {path}: {source}")]
  ConfigIo {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("config file is not valid JSON: {path}: {source}")]
  ConfigParse {
    path: PathBuf,
    source: serde_json::Error,
  },
  #[error("invalid device '{0}', expected 'cpu', a CUDA index like '0', or 'cuda:N'")]
  InvalidDevice(String),
  #[error("{name} must be within [0, 1], got {value}")]
  ThresholdOutOfRange { name: &'static str, value: f32 },
  #[error("imgsz must be positive and fit in u32 after rounding up to a multiple of 32")]
  InvalidImageSize,
}

/// 推理设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
  #[default]
  Cpu,
  Cuda(i32),
}

impl FromStr for Device {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let value = s.trim().to_lowercase();
    let index = match value.as_str() {
      "cpu" => return Ok(Device::Cpu),
      "cuda" | "gpu" => "0",
      other => other.strip_prefix("cuda:").unwrap_or(other),
    };

    index
      .parse::<i32>()
      .ok()
      .filter(|id| *id >= 0)
      .map(Device::Cuda)
      .ok_or_else(|| ConfigError::InvalidDevice(s.to_string()))
  }
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cpu => write!(f, "cpu"),
      Device::Cuda(id) => write!(f, "{}", id),
    }
  }
}

/// 模型相关参数（标注与基准测试共用）
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
  /// 模型权重文件路径（ONNX，需内置后处理/NMS）
  #[arg(long, value_name = "FILE")]
  pub weights: PathBuf,

  /// 推理尺寸 [默认: 640]
  #[arg(long, value_name = "PIXELS")]
  pub imgsz: Option<u32>,

  /// 推理设备: "cpu" 或 CUDA 设备编号（如 "0"） [默认: cpu]
  #[arg(long, value_name = "DEVICE")]
  pub device: Option<String>,

  /// JSON 配置文件，提供 imgsz/conf/iou/device 的默认值
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,
}

/// 阈值参数（仅标注程序使用）
#[derive(Args, Debug, Clone, Default)]
pub struct ThresholdArgs {
  /// 置信度阈值 (0.0 - 1.0) [默认: 0.25]
  #[arg(long, value_name = "THRESHOLD")]
  pub conf: Option<f32>,

  /// NMS IoU 阈值 (0.0 - 1.0) [默认: 0.45]
  #[arg(long, value_name = "THRESHOLD")]
  pub iou: Option<f32>,
}

/// `--config` 指向的 JSON 文件内容
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct FileConfig {
  #[serde(default, alias = "ImgSz")]
  pub imgsz: Option<u32>,
  #[serde(default, alias = "Conf")]
  pub conf: Option<f32>,
  #[serde(default, alias = "Iou")]
  pub iou: Option<f32>,
  #[serde(default, alias = "Device")]
  pub device: Option<String>,
}

impl FileConfig {
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ConfigIo {
      path: path.to_path_buf(),
      source,
    })?;
    let config = serde_json::from_str(&text).map_err(|source| ConfigError::ConfigParse {
      path: path.to_path_buf(),
      source,
    })?;
    debug!("读取配置文件 {}: {:?}", path.display(), config);
    Ok(config)
  }
}

/// 合并后的推理配置
#[derive(Debug, Clone, PartialEq)]
pub struct PredictConfig {
  pub weights: PathBuf,
  pub imgsz: u32,
  pub conf: f32,
  pub iou: f32,
  pub device: Device,
  /// 用户给出的设备字符串，原样用于报告
  pub device_name: String,
}

impl PredictConfig {
  /// 合并命令行与配置文件，并检查权重文件是否存在
  pub fn resolve(model: &ModelArgs, thresholds: &ThresholdArgs) -> Result<Self, ConfigError> {
    let file = match &model.config {
      Some(path) => FileConfig::load(path)?,
      None => FileConfig::default(),
    };

    let config = Self::merge(model, thresholds, &file)?;

    if !config.weights.exists() {
      error!("权重文件不存在: {}", config.weights.display());
      return Err(ConfigError::WeightsNotFound(config.weights));
    }

    Ok(config)
  }

  fn merge(
    model: &ModelArgs,
    thresholds: &ThresholdArgs,
    file: &FileConfig,
  ) -> Result<Self, ConfigError> {
    let imgsz = model.imgsz.or(file.imgsz).unwrap_or(DEFAULT_IMGSZ);
    let conf = thresholds.conf.or(file.conf).unwrap_or(DEFAULT_CONF);
    let iou = thresholds.iou.or(file.iou).unwrap_or(DEFAULT_IOU);
    let device_name = model
      .device
      .as_deref()
      .or(file.device.as_deref())
      .unwrap_or(DEFAULT_DEVICE);
    let device = device_name.parse()?;

    Ok(PredictConfig {
      weights: model.weights.clone(),
      imgsz: check_imgsz(imgsz)?,
      conf: check_threshold("conf", conf)?,
      iou: check_threshold("iou", iou)?,
      device,
      device_name: device_name.to_string(),
    })
  }
}

fn check_threshold(name: &'static str, value: f32) -> Result<f32, ConfigError> {
  if (0.0..=1.0).contains(&value) {
    Ok(value)
  } else {
    Err(ConfigError::ThresholdOutOfRange { name, value })
  }
}

/// 非步长整数倍的尺寸向上取整，与常见 YOLO 工具链行为一致
fn check_imgsz(imgsz: u32) -> Result<u32, ConfigError> {
  if imgsz == 0 {
    return Err(ConfigError::InvalidImageSize);
  }
  let rounded = imgsz
    .div_ceil(MODEL_STRIDE)
    .checked_mul(MODEL_STRIDE)
    .ok_or(ConfigError::InvalidImageSize)?;
  if rounded != imgsz {
    warn!(
      "imgsz={} 不是步长 {} 的整数倍，已调整为 {}",
      imgsz, MODEL_STRIDE, rounded
    );
  }
  Ok(rounded)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn model_args(weights: &str) -> ModelArgs {
    ModelArgs {
      weights: PathBuf::from(weights),
      imgsz: None,
      device: None,
      config: None,
    }
  }

  #[test]
  fn device_parsing() {
    assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
    assert_eq!("CPU".parse::<Device>().unwrap(), Device::Cpu);
    assert_eq!("0".parse::<Device>().unwrap(), Device::Cuda(0));
    assert_eq!("cuda:1".parse::<Device>().unwrap(), Device::Cuda(1));
    assert_eq!("cuda".parse::<Device>().unwrap(), Device::Cuda(0));
    assert!("tpu".parse::<Device>().is_err());
    assert!("-1".parse::<Device>().is_err());
  }

  #[test]
  fn defaults_apply_without_flags_or_file() {
    let config = PredictConfig::merge(
      &model_args("m.onnx"),
      &ThresholdArgs::default(),
      &FileConfig::default(),
    )
    .unwrap();
    assert_eq!(config.imgsz, 640);
    assert_eq!(config.conf, 0.25);
    assert_eq!(config.iou, 0.45);
    assert_eq!(config.device, Device::Cpu);
  }

  #[test]
  fn cli_flags_override_file_values() {
    let file: FileConfig =
      serde_json::from_str(r#"{"ImgSz": 320, "Conf": 0.5, "Iou": 0.6, "Device": "0", "Fps": 30}"#)
        .unwrap();
    let mut model = model_args("m.onnx");
    model.imgsz = Some(1280);
    let thresholds = ThresholdArgs {
      conf: None,
      iou: Some(0.7),
    };

    let config = PredictConfig::merge(&model, &thresholds, &file).unwrap();
    assert_eq!(config.imgsz, 1280);
    assert_eq!(config.conf, 0.5);
    assert_eq!(config.iou, 0.7);
    assert_eq!(config.device, Device::Cuda(0));
    assert_eq!(config.device_name, "0");
  }

  #[test]
  fn device_name_is_kept_as_given() {
    let mut model = model_args("m.onnx");
    model.device = Some("cuda:0".to_string());
    let config =
      PredictConfig::merge(&model, &ThresholdArgs::default(), &FileConfig::default()).unwrap();
    assert_eq!(config.device, Device::Cuda(0));
    assert_eq!(config.device_name, "cuda:0");
  }

  #[test]
  fn out_of_range_threshold_is_rejected() {
    let thresholds = ThresholdArgs {
      conf: Some(1.5),
      iou: None,
    };
    let err = PredictConfig::merge(&model_args("m.onnx"), &thresholds, &FileConfig::default())
      .unwrap_err();
    assert!(matches!(
      err,
      ConfigError::ThresholdOutOfRange { name: "conf", .. }
    ));
  }

  #[test]
  fn imgsz_rounds_up_to_stride() {
    assert_eq!(check_imgsz(640).unwrap(), 640);
    assert_eq!(check_imgsz(650).unwrap(), 672);
    assert!(check_imgsz(0).is_err());
    assert_eq!(check_imgsz(u32::MAX - 31).unwrap(), u32::MAX - 31);
    assert!(matches!(
      check_imgsz(u32::MAX),
      Err(ConfigError::InvalidImageSize)
    ));
  }

  #[test]
  fn missing_weights_is_reported() {
    let err = PredictConfig::resolve(
      &model_args("/definitely/not/here.onnx"),
      &ThresholdArgs::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::WeightsNotFound(_)));
    assert!(err.to_string().contains("--weights not found"));
  }
}
