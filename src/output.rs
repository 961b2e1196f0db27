// 该文件是 Shanan Label （山南西风·标注） 项目的一部分。
// src/output.rs - 输出定义
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

use std::convert::Infallible;

pub trait Render<Frame, Output>: Sized {
  type Error;
  /// 返回实际写出的记录数
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<usize, Self::Error>;
}

mod label_record;
pub use self::label_record::{
  ClassFilter, LabelLine, LabelRecordError, LabelRecordOutput, NormalizedBox, PixelBox, label_lines,
  read_labels,
};

/// 丢弃所有结果，用于只计时不落盘的基准测试
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardOutput;

impl<Frame, Output> Render<Frame, Output> for DiscardOutput {
  type Error = Infallible;

  fn render_result(&self, _frame: &Frame, _result: &Output) -> Result<usize, Self::Error> {
    Ok(0)
  }
}
