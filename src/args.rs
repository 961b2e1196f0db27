// 该文件是 Shanan Label （山南西风·标注） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::Parser;

use crate::config::{ModelArgs, ThresholdArgs};

/// 对图片或目录推理并写出 YOLO 文本标注
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct LabelArgs {
  /// 输入来源：图片文件或目录
  /// 目录下仅读取 *.jpg, *.jpeg, *.png, *.bmp, *.webp（不区分大小写）
  #[arg(long, value_name = "SOURCE")]
  pub src: PathBuf,

  /// 标注输出目录，不存在时自动创建
  #[arg(long, value_name = "DIR")]
  pub out: PathBuf,

  /// 目录输入时只处理排序后的第一张图片
  #[arg(long)]
  pub single: bool,

  #[command(flatten)]
  pub model: ModelArgs,

  #[command(flatten)]
  pub thresholds: ThresholdArgs,
}

/// 行人检测推理速度基准测试
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct BenchArgs {
  /// 图片目录（读取 *.jpg, *.jpeg, *.png）或 glob 模式
  #[arg(long, value_name = "SOURCE")]
  pub src: String,

  #[command(flatten)]
  pub model: ModelArgs,

  /// 预热次数，不计入计时
  #[arg(long, default_value_t = 5, value_name = "COUNT")]
  pub warmup: usize,

  /// 最多测试的图片数量
  #[arg(long, default_value_t = 100, value_name = "COUNT")]
  pub limit: usize,

  /// 额外输出 JSON 格式的测试报告
  #[arg(long)]
  pub json: bool,
}
