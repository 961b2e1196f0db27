// 该文件是 Shanan Label （山南西风·标注） 项目的一部分。
// src/output/label_record.rs - YOLO 文本标注输出
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

//! 每张图像对应一个 `<stem>.txt`，每行一个检测：
//!
//! ```text
//! class_id center_x center_y width height confidence
//! ```
//!
//! 坐标为相对原图宽高的比例，限制在 [0, 1]，保留六位小数。

use std::{
  fmt,
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  frame::ImageFrame,
  model::{COCO_PERSON, DetectItem, DetectResult},
  output::Render,
};

#[derive(Error, Debug)]
pub enum LabelRecordError {
  #[error("I/O 错误: {path}: {source}")]
  IoError {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("无法从图像路径推导标注文件名: {0}")]
  NoFileStem(PathBuf),
}

/// 归一化的中心点坐标框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedBox {
  pub cx: f64,
  pub cy: f64,
  pub w: f64,
  pub h: f64,
}

impl NormalizedBox {
  /// 像素 `xyxy` 转为归一化 `cx cy w h`，图像宽或高为 0 时返回 `None`
  pub fn from_xyxy(bbox: &[f32; 4], width: u32, height: u32) -> Option<Self> {
    if width == 0 || height == 0 {
      return None;
    }
    let (w, h) = (width as f64, height as f64);
    let [x1, y1, x2, y2] = bbox.map(f64::from);

    Some(NormalizedBox {
      cx: clamp01((x1 + x2) / 2.0 / w),
      cy: clamp01((y1 + y2) / 2.0 / h),
      w: clamp01((x2 - x1) / w),
      h: clamp01((y2 - y1) / h),
    })
  }
}

fn clamp01(x: f64) -> f64 {
  x.clamp(0.0, 1.0)
}

/// 标注文件中的一行
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelLine {
  pub class_id: u32,
  pub bbox: NormalizedBox,
  pub confidence: f64,
}

impl fmt::Display for LabelLine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} {:.6} {:.6} {:.6} {:.6} {:.6}",
      self.class_id, self.bbox.cx, self.bbox.cy, self.bbox.w, self.bbox.h, self.confidence
    )
  }
}

impl LabelLine {
  /// 宽容解析：空行、字段不足或数字非法时返回 `None`；缺少置信度时取 1.0
  pub fn parse(line: &str) -> Option<Self> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
      return None;
    }

    let class_id = fields[0].parse().ok()?;
    let mut numbers = [0f64; 4];
    for (slot, field) in numbers.iter_mut().zip(&fields[1..5]) {
      *slot = parse_finite(field)?;
    }
    let confidence = match fields.get(5) {
      Some(field) => parse_finite(field)?,
      None => 1.0,
    };

    Some(LabelLine {
      class_id,
      bbox: NormalizedBox {
        cx: numbers[0],
        cy: numbers[1],
        w: numbers[2],
        h: numbers[3],
      },
      confidence,
    })
  }

  /// 还原为给定尺寸图像上的像素框，限制在 `[0, W-1] x [0, H-1]`，退化框返回 `None`
  pub fn to_pixel_box(&self, width: u32, height: u32) -> Option<PixelBox> {
    let (w, h) = (width as f64, height as f64);
    let (px, py) = (self.bbox.cx * w, self.bbox.cy * h);
    let (pw, ph) = (self.bbox.w * w, self.bbox.h * h);

    let max_x = (w - 1.0).max(0.0);
    let max_y = (h - 1.0).max(0.0);
    let x1 = (px - pw / 2.0).clamp(0.0, max_x);
    let y1 = (py - ph / 2.0).clamp(0.0, max_y);
    let x2 = (px + pw / 2.0).clamp(0.0, max_x);
    let y2 = (py + ph / 2.0).clamp(0.0, max_y);

    if x2 <= x1 || y2 <= y1 {
      return None;
    }

    Some(PixelBox {
      class_id: self.class_id,
      confidence: self.confidence,
      x1,
      y1,
      x2,
      y2,
    })
  }
}

/// `nan`/`inf` 也能被 `f64` 解析，需要单独排除
fn parse_finite(field: &str) -> Option<f64> {
  field.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// 像素坐标框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelBox {
  pub class_id: u32,
  pub confidence: f64,
  pub x1: f64,
  pub y1: f64,
  pub x2: f64,
  pub y2: f64,
}

/// 读取标注文件并还原为像素框，无法解析的行被跳过
pub fn read_labels(
  path: &Path,
  width: u32,
  height: u32,
) -> Result<Vec<PixelBox>, LabelRecordError> {
  let text = std::fs::read_to_string(path).map_err(|source| LabelRecordError::IoError {
    path: path.to_path_buf(),
    source,
  })?;

  Ok(
    text
      .lines()
      .filter_map(LabelLine::parse)
      .filter_map(|line| line.to_pixel_box(width, height))
      .collect(),
  )
}

/// 类别过滤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassFilter {
  /// 保留全部类别，按预测类别写出
  #[default]
  All,
  /// 仅保留 `class_id`，并统一写为 `write_as`
  Only { class_id: u32, write_as: u32 },
}

impl ClassFilter {
  /// COCO person（0），写出为 0
  pub fn person() -> Self {
    ClassFilter::Only {
      class_id: COCO_PERSON,
      write_as: 0,
    }
  }

  /// 过滤后返回写入文件的类别编号
  pub fn apply(&self, class_id: u32) -> Option<u32> {
    match *self {
      ClassFilter::All => Some(class_id),
      ClassFilter::Only {
        class_id: keep,
        write_as,
      } => (class_id == keep).then_some(write_as),
    }
  }
}

/// 把一张图像的检测结果转为标注行
pub fn label_lines(result: &DetectResult, filter: ClassFilter) -> Vec<LabelLine> {
  let (height, width) = result.orig_shape;

  result
    .items
    .iter()
    .filter_map(|DetectItem { class_id, score, bbox }| {
      let class_id = filter.apply(*class_id)?;
      let bbox = NormalizedBox::from_xyxy(bbox, width, height)?;
      Some(LabelLine {
        class_id,
        bbox,
        confidence: *score as f64,
      })
    })
    .collect()
}

/// 写入目录的标注输出，每张图像一个 `<stem>.txt`
pub struct LabelRecordOutput {
  directory: PathBuf,
  filter: ClassFilter,
}

impl LabelRecordOutput {
  /// 创建输出目录（含父目录）
  pub fn create(directory: impl Into<PathBuf>, filter: ClassFilter) -> Result<Self, LabelRecordError> {
    let directory = directory.into();
    std::fs::create_dir_all(&directory).map_err(|source| {
      error!("无法创建输出目录 {}: {}", directory.display(), source);
      LabelRecordError::IoError {
        path: directory.clone(),
        source,
      }
    })?;
    info!("标注输出目录: {}", directory.display());

    Ok(LabelRecordOutput { directory, filter })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  /// 图像对应的标注文件路径
  pub fn label_path(&self, image_path: &Path) -> Result<PathBuf, LabelRecordError> {
    let stem = image_path
      .file_stem()
      .ok_or_else(|| LabelRecordError::NoFileStem(image_path.to_path_buf()))?;
    let mut name = stem.to_os_string();
    name.push(".txt");
    Ok(self.directory.join(name))
  }
}

impl Render<ImageFrame, DetectResult> for LabelRecordOutput {
  type Error = LabelRecordError;

  fn render_result(&self, frame: &ImageFrame, result: &DetectResult) -> Result<usize, Self::Error> {
    let path = self.label_path(frame.path())?;
    let records: Vec<String> = label_lines(result, self.filter)
      .iter()
      .map(LabelLine::to_string)
      .collect();

    std::fs::write(&path, records.join("\n")).map_err(|source| LabelRecordError::IoError {
      path: path.clone(),
      source,
    })?;
    debug!("写入 {} 条标注到 {}", records.len(), path.display());

    Ok(records.len())
  }
}
