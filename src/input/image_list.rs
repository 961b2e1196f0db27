// 该文件是 Shanan Label （山南西风·标注） 项目的一部分。
// src/input/image_list.rs - 输入图像枚举
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

use glob::{MatchOptions, Pattern};
use tracing::{debug, error, info};

use super::InputError;

/// 标注程序接受的图像扩展名（不区分大小写）
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// 基准测试在目录下匹配的模式（区分大小写）
pub const BENCH_PATTERNS: [&str; 3] = ["*.jpg", "*.jpeg", "*.png"];

const GLOB_OPTIONS: MatchOptions = MatchOptions {
  case_sensitive: true,
  require_literal_separator: true,
  require_literal_leading_dot: true,
};

/// 排好序的输入图像路径列表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageList {
  paths: Vec<PathBuf>,
}

impl ImageList {
  /// 文件：仅该文件；目录：目录下扩展名匹配的全部图像（`single` 时只取第一张）
  pub fn from_source(src: &Path, single: bool) -> Result<Self, InputError> {
    if src.is_file() {
      debug!("输入为单个文件: {}", src.display());
      return Ok(Self {
        paths: vec![src.to_path_buf()],
      });
    }

    if src.is_dir() {
      let mut paths = Vec::new();
      for entry in std::fs::read_dir(src)? {
        let path = entry?.path();
        if path.is_file() && has_image_extension(&path) {
          paths.push(path);
        }
      }
      paths.sort();
      if single {
        paths.truncate(1);
      }
      info!("目录 {} 中找到 {} 张图像", src.display(), paths.len());
      return Ok(Self { paths });
    }

    error!("输入路径不存在: {}", src.display());
    Err(InputError::SourceNotFound(src.to_path_buf()))
  }

  /// 目录：匹配 [`BENCH_PATTERNS`]；否则把 `src` 当作 glob 模式展开
  pub fn from_pattern(src: &str) -> Result<Self, InputError> {
    let mut paths = Vec::new();

    if Path::new(src).is_dir() {
      let escaped = Pattern::escape(src);
      for pattern in BENCH_PATTERNS {
        let pattern = Path::new(&escaped).join(pattern);
        paths.extend(expand(&pattern.to_string_lossy())?);
      }
    } else {
      paths.extend(expand(src)?);
    }

    paths.sort();
    info!("{} 匹配到 {} 张图像", src, paths.len());
    Ok(Self { paths })
  }

  /// 最多保留前 `limit` 张
  pub fn limit(mut self, limit: usize) -> Self {
    self.paths.truncate(limit);
    self
  }

  /// 列表为空时返回致命错误
  pub fn require_non_empty(self, src: &str) -> Result<Self, InputError> {
    if self.paths.is_empty() {
      error!("没有找到任何图像: {}", src);
      return Err(InputError::NoImages(src.to_string()));
    }
    Ok(self)
  }

  pub fn len(&self) -> usize {
    self.paths.len()
  }

  pub fn is_empty(&self) -> bool {
    self.paths.is_empty()
  }

  pub fn paths(&self) -> &[PathBuf] {
    &self.paths
  }
}

impl IntoIterator for ImageList {
  type Item = PathBuf;
  type IntoIter = std::vec::IntoIter<PathBuf>;

  fn into_iter(self) -> Self::IntoIter {
    self.paths.into_iter()
  }
}

fn has_image_extension(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      IMAGE_EXTENSIONS
        .iter()
        .any(|known| ext.eq_ignore_ascii_case(known))
    })
    .unwrap_or(false)
}

fn expand(pattern: &str) -> Result<Vec<PathBuf>, InputError> {
  let mut paths = Vec::new();
  for entry in glob::glob_with(pattern, GLOB_OPTIONS)? {
    paths.push(entry?);
  }
  Ok(paths)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;

  fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, b"").unwrap();
    path
  }

  #[test]
  fn directory_source_filters_and_sorts() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "b.png");
    touch(dir.path(), "a.JPG");
    touch(dir.path(), "c.webp");
    touch(dir.path(), "notes.txt");
    touch(dir.path(), "d.gif");
    fs::create_dir(dir.path().join("nested.jpg")).unwrap();

    let list = ImageList::from_source(dir.path(), false).unwrap();
    let names: Vec<_> = list
      .paths()
      .iter()
      .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
      .collect();
    assert_eq!(names, ["a.JPG", "b.png", "c.webp"]);
  }

  #[test]
  fn single_keeps_first_image_only() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "002.jpg");
    let first = touch(dir.path(), "001.jpg");

    let list = ImageList::from_source(dir.path(), true).unwrap();
    assert_eq!(list.paths(), [first]);
  }

  #[test]
  fn file_source_is_taken_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let file = touch(dir.path(), "frame.tiff");

    let list = ImageList::from_source(&file, true).unwrap();
    assert_eq!(list.paths(), [file]);
  }

  #[test]
  fn missing_source_is_an_error() {
    let err = ImageList::from_source(Path::new("/no/such/dir"), false).unwrap_err();
    assert!(matches!(err, InputError::SourceNotFound(_)));
  }

  #[test]
  fn empty_directory_yields_no_images_error() {
    let dir = tempfile::tempdir().unwrap();
    let list = ImageList::from_source(dir.path(), false).unwrap();
    assert!(list.is_empty());
    let err = list.require_non_empty("somewhere").unwrap_err();
    assert_eq!(err.to_string(), "No images found: somewhere");
  }

  #[test]
  fn bench_directory_matches_case_sensitive_patterns() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "x.jpeg");
    touch(dir.path(), "y.png");
    touch(dir.path(), "z.JPG");
    touch(dir.path(), "w.bmp");
    touch(dir.path(), ".hidden.jpg");

    let list = ImageList::from_pattern(&dir.path().to_string_lossy()).unwrap();
    let names: Vec<_> = list
      .paths()
      .iter()
      .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
      .collect();
    assert_eq!(names, ["x.jpeg", "y.png"]);
  }

  #[test]
  fn bench_glob_pattern_and_limit() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..5 {
      touch(dir.path(), &format!("{}.jpg", i));
    }
    touch(dir.path(), "skip.png");

    let pattern = dir.path().join("*.jpg");
    let list = ImageList::from_pattern(&pattern.to_string_lossy())
      .unwrap()
      .limit(3);
    assert_eq!(list.len(), 3);
    assert!(list.paths()[0].ends_with("0.jpg"));
    assert!(list.paths()[2].ends_with("2.jpg"));
  }
}
