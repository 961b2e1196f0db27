// 该文件是 Shanan Label （山南西风·标注） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::ImageReader;
use tracing::{debug, error};

use super::{ImageList, InputError};
use crate::frame::ImageFrame;

/// 按顺序逐张解码的图像文件输入，解码发生在迭代时
pub struct ImageFileInput {
  paths: std::vec::IntoIter<PathBuf>,
}

impl ImageFileInput {
  pub fn new(list: ImageList) -> Self {
    Self {
      paths: list.into_iter(),
    }
  }
}

impl From<ImageList> for ImageFileInput {
  fn from(list: ImageList) -> Self {
    Self::new(list)
  }
}

pub fn read_frame(path: &Path) -> Result<ImageFrame, InputError> {
  let load = |path: &Path| -> Result<_, image::ImageError> {
    Ok(
      ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?
        .to_rgb8(),
    )
  };

  match load(path) {
    Ok(image) => {
      debug!(
        "读取图像 {}: {}x{}",
        path.display(),
        image.width(),
        image.height()
      );
      Ok(ImageFrame::new(path, image))
    }
    Err(source) => {
      error!("无法读取图像 {}: {}", path.display(), source);
      Err(InputError::ImageLoadError {
        path: path.to_path_buf(),
        source,
      })
    }
  }
}

impl Iterator for ImageFileInput {
  type Item = Result<ImageFrame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.paths.next().map(|path| read_frame(&path))
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    self.paths.size_hint()
  }
}

impl ExactSizeIterator for ImageFileInput {}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  #[test]
  fn frames_are_decoded_lazily_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.png");
    let b = dir.path().join("b.png");
    RgbImage::from_pixel(4, 2, Rgb([1, 2, 3])).save(&a).unwrap();
    RgbImage::from_pixel(3, 5, Rgb([9, 9, 9])).save(&b).unwrap();

    let list = ImageList::from_source(dir.path(), false).unwrap();
    let mut input = ImageFileInput::new(list);
    assert_eq!(input.len(), 2);

    let first = input.next().unwrap().unwrap();
    assert_eq!(first.path(), a);
    assert_eq!(first.orig_shape(), (2, 4));
    assert_eq!(input.len(), 1);

    let second = input.next().unwrap().unwrap();
    assert_eq!(second.orig_shape(), (5, 3));
    assert!(input.next().is_none());
  }

  #[test]
  fn undecodable_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("broken.jpg");
    std::fs::write(&bad, b"not an image").unwrap();

    let err = read_frame(&bad).unwrap_err();
    assert!(matches!(err, InputError::ImageLoadError { .. }));
    assert!(err.to_string().contains("broken.jpg"));
  }
}
