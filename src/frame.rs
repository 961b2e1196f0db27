// 该文件是 Shanan Label （山南西风·标注） 项目的一部分。
// src/frame.rs - 图像帧与 NCHW 张量定义
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

use image::{Rgb, RgbImage, imageops};
use ndarray::Array4;

const RGB_CHANNELS: usize = 3;
/// YOLO 系列常用的填充灰度值
const LETTERBOX_FILL: u8 = 114;

/// 从文件读取的一帧图像，保留原始路径与原始尺寸
#[derive(Debug, Clone)]
pub struct ImageFrame {
  path: PathBuf,
  image: RgbImage,
}

impl ImageFrame {
  pub fn new(path: impl Into<PathBuf>, image: RgbImage) -> Self {
    Self {
      path: path.into(),
      image,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  /// 原始图像形状 (H, W)
  pub fn orig_shape(&self) -> (u32, u32) {
    (self.image.height(), self.image.width())
  }
}

/// 记录图像如何被等比缩放并填充到模型输入尺寸
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub src_w: u32,
  pub src_h: u32,
  pub new_w: u32,
  pub new_h: u32,
  pub scale: f32,
  pub pad_x: u32,
  pub pad_y: u32,
}

impl Letterbox {
  pub fn fit(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Self {
    let scale = f32::min(dst_w as f32 / src_w as f32, dst_h as f32 / src_h as f32);
    let new_w = ((src_w as f32 * scale).round() as u32).clamp(1, dst_w);
    let new_h = ((src_h as f32 * scale).round() as u32).clamp(1, dst_h);

    Self {
      src_w,
      src_h,
      new_w,
      new_h,
      scale,
      pad_x: (dst_w - new_w) / 2,
      pad_y: (dst_h - new_h) / 2,
    }
  }

  /// 把模型输入空间中的点映射回原图像素坐标
  pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
    (
      (x - self.pad_x as f32) / self.scale,
      (y - self.pad_y as f32) / self.scale,
    )
  }
}

/// 将 RGB 图像等比缩放、填充，并转换为归一化到 [0, 1] 的 NCHW f32 张量
pub fn letterbox_nchw(image: &RgbImage, dst_w: u32, dst_h: u32) -> (Array4<f32>, Letterbox) {
  let letterbox = Letterbox::fit(image.width(), image.height(), dst_w, dst_h);
  let resized = imageops::resize(
    image,
    letterbox.new_w,
    letterbox.new_h,
    imageops::FilterType::Triangle,
  );
  let mut canvas = RgbImage::from_pixel(dst_w, dst_h, Rgb([LETTERBOX_FILL; 3]));
  imageops::overlay(
    &mut canvas,
    &resized,
    letterbox.pad_x as i64,
    letterbox.pad_y as i64,
  );

  let mut tensor = Array4::<f32>::zeros((1, RGB_CHANNELS, dst_h as usize, dst_w as usize));
  for (x, y, pixel) in canvas.enumerate_pixels() {
    for c in 0..RGB_CHANNELS {
      tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
    }
  }

  (tensor, letterbox)
}
