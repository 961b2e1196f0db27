// 该文件是 Shanan Label （山南西风·标注） 项目的一部分。
// src/task.rs - 标注与基准测试任务
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::{Duration, Instant},
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
  args::{BenchArgs, LabelArgs},
  config::{PredictConfig, ThresholdArgs},
  input::{ImageFileInput, ImageList},
  model::{CocoLabel, DetectResult, Model, WithLabel, YoloBuilder},
  output::{ClassFilter, DiscardOutput, LabelRecordOutput, Render},
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 标注任务的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LabelSummary {
  pub images: usize,
  /// 模型给出的全部检测数
  pub detections: usize,
  /// 类别过滤后实际写出的标注行数
  pub labels: usize,
  pub interrupted: bool,
}

/// 逐张推理并写出标注，可被 Ctrl-C 在两张图像之间打断
#[derive(Default, Debug)]
pub struct LabelTask {
  stop: Option<Arc<AtomicBool>>,
}

impl LabelTask {
  /// 安装 Ctrl-C 处理器，收到信号后处理完当前图像即退出
  pub fn with_interrupt(self) -> anyhow::Result<Self> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    ctrlc::set_handler(move || {
      warn!("收到中断信号，当前图像完成后退出...");
      flag.store(true, Ordering::SeqCst);
    })?;

    Ok(self.with_stop_flag(stop))
  }

  pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
    self.stop = Some(stop);
    self
  }

  fn stopped(&self) -> bool {
    self
      .stop
      .as_ref()
      .is_some_and(|stop| stop.load(Ordering::SeqCst))
  }
}

impl<
  F,
  IE: std::error::Error + Sync + Send + 'static,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<F, IE>>,
  M: Model<Input = F, Output = DetectResult, Error = ME>,
  O: Render<F, DetectResult, Error = RE>,
> Task<I, M, O> for LabelTask
{
  type Output = LabelSummary;
  type Error = anyhow::Error;

  fn run_task(self, input: I, mut model: M, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始标注任务...");
    let mut summary = LabelSummary::default();

    for frame in input {
      let frame = frame?;
      let now = Instant::now();
      let result = model.infer(&frame)?;
      let elapsed = now.elapsed();
      let written = output.render_result(&frame, &result)?;

      summary.images += 1;
      summary.detections += result.len();
      summary.labels += written;
      debug!(
        "({}) 推理耗时: {:.2?}，检测到 {} 个目标",
        summary.images,
        elapsed,
        result.len()
      );
      for item in result.items.iter() {
        debug!(
          "  {} {:.3} {:?}",
          CocoLabel::from_label_id(item.class_id).to_label_str(),
          item.score,
          item.bbox
        );
      }

      if self.stopped() {
        warn!("中断信号接收，退出任务循环");
        summary.interrupted = true;
        break;
      }
    }

    info!(
      "标注完成: {} 张图像，{} 个目标，写出 {} 条标注",
      summary.images, summary.detections, summary.labels
    );
    Ok(summary)
  }
}

/// 基准测试结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkReport {
  pub images: usize,
  pub warmup: usize,
  pub timed: usize,
  pub total_ms: f64,
  pub avg_ms: f64,
  pub fps: f64,
  pub timestamp: String,
}

impl BenchmarkReport {
  /// `elapsed` 为预热之后全部图像的耗时；预热数不超过图像数
  pub fn from_elapsed(images: usize, warmup: usize, elapsed: Duration) -> Self {
    let warmup = warmup.min(images);
    let timed = images - warmup;
    let total_s = elapsed.as_secs_f64();
    let avg_s = total_s / timed.max(1) as f64;
    let fps = if avg_s > 0.0 { 1.0 / avg_s } else { 0.0 };

    BenchmarkReport {
      images,
      warmup,
      timed,
      total_ms: total_s * 1000.0,
      avg_ms: avg_s * 1000.0,
      fps,
      timestamp: chrono::Local::now().to_rfc3339(),
    }
  }

  pub fn bench_line(&self, weights: impl std::fmt::Display, device: impl std::fmt::Display) -> String {
    format!(
      "[BENCH] weights={} device={} imgs={} warmup={} avg_ms={:.2} fps={:.2}",
      weights, device, self.images, self.warmup, self.avg_ms, self.fps
    )
  }

  pub fn to_json(&self) -> serde_json::Result<String> {
    serde_json::to_string_pretty(self)
  }
}

/// 先预热 `warmup` 张，再对其余图像计时；计时包含图像解码
#[derive(Debug, Clone, Copy)]
pub struct BenchmarkTask {
  warmup: usize,
}

impl BenchmarkTask {
  pub fn new(warmup: usize) -> Self {
    BenchmarkTask { warmup }
  }
}

impl<
  F,
  D,
  IE: std::error::Error + Sync + Send + 'static,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<F, IE>>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for BenchmarkTask
{
  type Output = BenchmarkReport;
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut model: M, output: O) -> Result<Self::Output, Self::Error> {
    let mut step = |frame: Result<F, IE>| -> anyhow::Result<()> {
      let frame = frame?;
      let result = model.infer(&frame)?;
      output.render_result(&frame, &result)?;
      Ok(())
    };

    info!("开始预热，最多 {} 张...", self.warmup);
    let mut warmed = 0;
    for frame in input.by_ref().take(self.warmup) {
      step(frame)?;
      warmed += 1;
    }

    info!("预热完成 ({} 张)，开始计时...", warmed);
    let mut timed = 0;
    let now = Instant::now();
    for frame in input {
      step(frame)?;
      timed += 1;
    }
    let elapsed = now.elapsed();

    let report = BenchmarkReport::from_elapsed(warmed + timed, warmed, elapsed);
    warn!("平均推理时间: {:.2} ms", report.avg_ms);
    Ok(report)
  }
}

/// 标注流程：创建输出目录，解析配置，列出图像，加载模型，逐张写出标注
pub fn run_label(args: &LabelArgs, filter: ClassFilter) -> anyhow::Result<LabelSummary> {
  let output = LabelRecordOutput::create(&args.out, filter)?;
  let config = PredictConfig::resolve(&args.model, &args.thresholds)?;
  let images = ImageList::from_source(&args.src, args.single)?
    .require_non_empty(&args.src.display().to_string())?;
  info!("待处理图像: {} 张", images.len());

  let model = YoloBuilder::from_config(&config).build()?;

  LabelTask::default()
    .with_interrupt()?
    .run_task(ImageFileInput::new(images), model, output)
}

/// 基准测试的图像列表：先检查匹配结果非空，再截取前 `limit` 张
pub fn bench_images(src: &str, limit: usize) -> anyhow::Result<ImageList> {
  let images = ImageList::from_pattern(src)?.require_non_empty(src)?;
  Ok(images.limit(limit))
}

/// 基准测试流程，返回报告与所用配置
pub fn run_bench(args: &BenchArgs) -> anyhow::Result<(BenchmarkReport, PredictConfig)> {
  let images = bench_images(&args.src, args.limit)?;
  let config = PredictConfig::resolve(&args.model, &ThresholdArgs::default())?;
  info!("基准测试图像: {} 张，预热: {}", images.len(), args.warmup);

  let model = YoloBuilder::from_config(&config).build()?;

  let report =
    BenchmarkTask::new(args.warmup).run_task(ImageFileInput::new(images), model, DiscardOutput)?;
  Ok((report, config))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{frame::ImageFrame, model::DetectItem, output::DiscardOutput};
  use image::RgbImage;
  use std::{cell::RefCell, convert::Infallible, rc::Rc};
  use thiserror::Error;

  #[derive(Error, Debug)]
  #[error("bad frame {0}")]
  struct FrameError(u32);

  /// 每帧返回 `frame` 个目标
  #[derive(Default)]
  struct CountingModel;

  impl Model for CountingModel {
    type Input = u32;
    type Output = DetectResult;
    type Error = Infallible;

    fn infer(&mut self, input: &u32) -> Result<DetectResult, Infallible> {
      let items = (0..*input)
        .map(|i| DetectItem {
          class_id: i,
          score: 0.5,
          bbox: [0.0, 0.0, 1.0, 1.0],
        })
        .collect();
      Ok(DetectResult::new(items, (10, 10)))
    }
  }

  #[derive(Default, Clone)]
  struct Collect(Rc<RefCell<Vec<u32>>>);

  impl Render<u32, DetectResult> for Collect {
    type Error = Infallible;

    fn render_result(&self, frame: &u32, result: &DetectResult) -> Result<usize, Infallible> {
      self.0.borrow_mut().push(*frame);
      Ok(result.len())
    }
  }

  fn frames(values: Vec<u32>) -> impl Iterator<Item = Result<u32, FrameError>> {
    values.into_iter().map(Ok)
  }

  #[test]
  fn label_task_renders_every_frame() {
    let out = Collect::default();
    let summary = LabelTask::default()
      .run_task(frames(vec![2, 0, 3]), CountingModel, out.clone())
      .unwrap();

    assert_eq!(
      summary,
      LabelSummary {
        images: 3,
        detections: 5,
        labels: 5,
        interrupted: false
      }
    );
    assert_eq!(*out.0.borrow(), vec![2, 0, 3]);
  }

  #[test]
  fn label_task_stops_after_current_frame() {
    let out = Collect::default();
    let stop = Arc::new(AtomicBool::new(true));
    let summary = LabelTask::default()
      .with_stop_flag(stop)
      .run_task(frames(vec![1, 1, 1]), CountingModel, out.clone())
      .unwrap();

    assert_eq!(summary.images, 1);
    assert!(summary.interrupted);
    assert_eq!(out.0.borrow().len(), 1);
  }

  #[test]
  fn label_task_fails_on_bad_frame() {
    let input = vec![Ok::<u32, FrameError>(1), Err(FrameError(7)), Ok(2)].into_iter();
    let err = LabelTask::default()
      .run_task(input, CountingModel, DiscardOutput)
      .unwrap_err();
    assert_eq!(err.to_string(), "bad frame 7");
  }

  #[test]
  fn benchmark_splits_warmup_and_timed() {
    let report = BenchmarkTask::new(2)
      .run_task(frames(vec![0; 5]), CountingModel, DiscardOutput)
      .unwrap();
    assert_eq!(report.images, 5);
    assert_eq!(report.warmup, 2);
    assert_eq!(report.timed, 3);
  }

  #[test]
  fn benchmark_warmup_is_clamped_to_image_count() {
    let report = BenchmarkTask::new(5)
      .run_task(frames(vec![0; 3]), CountingModel, DiscardOutput)
      .unwrap();
    assert_eq!(report.images, 3);
    assert_eq!(report.warmup, 3);
    assert_eq!(report.timed, 0);
  }

  #[test]
  fn report_statistics() {
    let report = BenchmarkReport::from_elapsed(10, 2, Duration::from_millis(400));
    assert_eq!(report.timed, 8);
    assert!((report.total_ms - 400.0).abs() < 1e-9);
    assert!((report.avg_ms - 50.0).abs() < 1e-9);
    assert!((report.fps - 20.0).abs() < 1e-9);
    assert_eq!(
      report.bench_line("yolo.onnx", "cpu"),
      "[BENCH] weights=yolo.onnx device=cpu imgs=10 warmup=2 avg_ms=50.00 fps=20.00"
    );
  }

  #[test]
  fn report_divides_by_at_least_one() {
    let report = BenchmarkReport::from_elapsed(2, 4, Duration::from_millis(30));
    assert_eq!(report.warmup, 2);
    assert!((report.avg_ms - 30.0).abs() < 1e-9);

    let idle = BenchmarkReport::from_elapsed(0, 0, Duration::ZERO);
    assert_eq!(idle.fps, 0.0);
  }

  #[test]
  fn report_serializes_to_json() {
    let report = BenchmarkReport::from_elapsed(4, 1, Duration::from_millis(300));
    let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(value["images"], 4);
    assert_eq!(value["timed"], 3);
    assert!(value["timestamp"].as_str().is_some());
  }

  /// 固定返回 [0, 2, 2, 5] 四个类别的检测
  struct MixedClassModel;

  impl Model for MixedClassModel {
    type Input = ImageFrame;
    type Output = DetectResult;
    type Error = Infallible;

    fn infer(&mut self, input: &ImageFrame) -> Result<DetectResult, Infallible> {
      let items = [0, 2, 2, 5]
        .into_iter()
        .map(|class_id| DetectItem {
          class_id,
          score: 0.9,
          bbox: [1.0, 1.0, 4.0, 4.0],
        })
        .collect();
      Ok(DetectResult::new(items, input.orig_shape()))
    }
  }

  #[test]
  fn person_summary_counts_written_labels() {
    let dir = tempfile::tempdir().unwrap();
    let output = LabelRecordOutput::create(dir.path(), ClassFilter::person()).unwrap();
    let input = vec![Ok::<_, FrameError>(ImageFrame::new("a.jpg", RgbImage::new(8, 8)))];

    let summary = LabelTask::default()
      .run_task(input.into_iter(), MixedClassModel, output)
      .unwrap();

    assert_eq!(summary.detections, 4);
    assert_eq!(summary.labels, 1);
    let text = std::fs::read_to_string(dir.path().join("a.txt")).unwrap();
    assert_eq!(text.lines().count(), 1);
  }

  #[test]
  fn bench_limit_applies_after_empty_check() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.jpg"), b"").unwrap();
    std::fs::write(dir.path().join("b.jpg"), b"").unwrap();
    let src = dir.path().to_str().unwrap();

    assert!(bench_images(src, 0).unwrap().is_empty());
    assert_eq!(bench_images(src, 1).unwrap().len(), 1);

    let empty = tempfile::tempdir().unwrap();
    let err = bench_images(empty.path().to_str().unwrap(), 10).unwrap_err();
    assert!(err.to_string().contains("No images found"));
  }
}
