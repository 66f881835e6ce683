// 该文件是 Qiuyuan （球员检测） 项目的一部分。
// src/task.rs - 推理任务
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
  thread,
  time::{Duration, Instant},
};
use tracing::{info, warn};

use crate::{detector::PlayerDetector, model::Model, output::Render};

const REPEAT_WARMUP: usize = 2;
const FORCE_EXIT_TIMEOUT: Duration = Duration::from_secs(30);

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, detector: PlayerDetector<M>, output: O) -> Result<(), Self::Error>;
}

pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, detector: PlayerDetector<M>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let result = detector.detect(&frame)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    output.render_result(&frame, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 对同一帧重复推理，用于测量平均耗时
pub struct RepeatShotTask {
  times: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { times: 1000 }
  }
}

impl RepeatShotTask {
  pub fn with_times(mut self, times: usize) -> Self {
    self.times = times;
    self
  }
}

/// 去掉预热轮次后的平均耗时
pub fn mean_after_warmup(times: &[Duration]) -> Option<Duration> {
  let measured = if times.len() > REPEAT_WARMUP {
    &times[REPEAT_WARMUP..]
  } else {
    times
  };
  if measured.is_empty() {
    return None;
  }
  Some(measured.iter().sum::<Duration>() / measured.len() as u32)
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, detector: PlayerDetector<M>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let mut times = Vec::with_capacity(self.times);
    for i in 0..self.times {
      let now = Instant::now();
      let result = detector.detect(&frame)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&frame, &result)?;
      info!("({})渲染完成，耗时: {:.2?}", i, now.elapsed());
      times.push(elapsed);
    }

    if let Some(mean) = mean_after_warmup(&times) {
      warn!("平均推理时间: {:.2?}", mean);
    }

    Ok(())
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, detector: PlayerDetector<M>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = std::sync::mpsc::channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(FORCE_EXIT_TIMEOUT);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;

    let mut frame_index = 0usize;
    let mut now = Instant::now();
    for frame in input {
      frame_index = frame_index.wrapping_add(1);
      info!("处理第 {} 帧图像", frame_index);
      let result = detector.detect(&frame)?;
      let elapsed_a = now.elapsed();
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      now = Instant::now();
      info!("推理完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
      if self.frame_number.map(|n| frame_index >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，退出");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::{Cell, RefCell};
  use std::convert::Infallible;

  #[derive(Default)]
  struct Doubler {
    calls: Cell<usize>,
  }

  impl Model for Doubler {
    type Input = u32;
    type Output = u32;
    type Error = Infallible;

    fn infer(&self, input: &u32) -> Result<Vec<u32>, Infallible> {
      self.calls.set(self.calls.get() + 1);
      Ok(vec![input * 2, 0])
    }
  }

  #[derive(Default)]
  struct Collect {
    rendered: RefCell<Vec<(u32, u32)>>,
  }

  impl Render<u32, u32> for &Collect {
    type Error = Infallible;

    fn render_result(&self, frame: &u32, result: &u32) -> Result<(), Infallible> {
      self.rendered.borrow_mut().push((*frame, *result));
      Ok(())
    }
  }

  #[test]
  fn one_shot_renders_first_frame_only() {
    let sink = Collect::default();
    OneShotTask
      .run_task(vec![3, 4].into_iter(), PlayerDetector::with_model(Doubler::default()), &sink)
      .unwrap();
    assert_eq!(*sink.rendered.borrow(), vec![(3, 6)]);
  }

  #[test]
  fn one_shot_without_frames_fails() {
    let sink = Collect::default();
    let err = OneShotTask
      .run_task(
        Vec::<u32>::new().into_iter(),
        PlayerDetector::with_model(Doubler::default()),
        &sink,
      )
      .unwrap_err();
    assert_eq!(err.to_string(), "没有输入帧");
  }

  #[test]
  fn repeat_shot_runs_requested_times() {
    let sink = Collect::default();
    RepeatShotTask::default()
      .with_times(5)
      .run_task(vec![7].into_iter(), PlayerDetector::with_model(Doubler::default()), &sink)
      .unwrap();
    assert_eq!(*sink.rendered.borrow(), vec![(7, 14); 5]);
  }

  #[test]
  fn continuous_stops_at_frame_number() {
    let sink = Collect::default();
    ContinuousTask::default()
      .with_frame_number(Some(2))
      .run_task(1..10, PlayerDetector::with_model(Doubler::default()), &sink)
      .unwrap();
    assert_eq!(*sink.rendered.borrow(), vec![(1, 2), (2, 4)]);
  }

  #[test]
  fn mean_skips_warmup() {
    let ms = Duration::from_millis;
    assert_eq!(mean_after_warmup(&[]), None);
    assert_eq!(mean_after_warmup(&[ms(10)]), Some(ms(10)));
    assert_eq!(
      mean_after_warmup(&[ms(100), ms(50), ms(10), ms(20)]),
      Some(ms(15))
    );
  }
}
