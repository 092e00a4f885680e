// 该文件是 Lingshi （零食识别） 项目的一部分。
// src/admission.rs - 推理准入控制
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

use std::sync::{
  Arc,
  atomic::{AtomicUsize, Ordering},
};

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, warn};

pub const DEFAULT_MAX_INFLIGHT: usize = 2;

/// 令牌桶式的准入控制器
///
/// 桶中恰好有 `capacity` 个令牌。准入时取走一个令牌，令牌随 [`Permit`]
/// 释放回桶中，因此同时在途的推理数永远不会超过 `capacity`。
/// 桶空时 [`Admission::admit`] 会阻塞调用方，对输入源形成背压。
#[derive(Clone)]
pub struct Admission {
  capacity: usize,
  tokens_tx: Sender<()>,
  tokens_rx: Receiver<()>,
  inflight_count: Arc<AtomicUsize>,
}

impl std::fmt::Debug for Admission {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Admission")
      .field("capacity", &self.capacity)
      .field("outstanding", &self.outstanding())
      .finish()
  }
}

impl Default for Admission {
  fn default() -> Self {
    Self::new(DEFAULT_MAX_INFLIGHT)
  }
}

impl Admission {
  pub fn new(capacity: usize) -> Self {
    let capacity = if capacity == 0 {
      warn!("在途容量不能为 0，使用 1");
      1
    } else {
      capacity
    };

    let (tokens_tx, tokens_rx) = bounded(capacity);
    for _ in 0..capacity {
      // 新建的桶容量与令牌数相同，不会失败
      let _ = tokens_tx.try_send(());
    }

    Self {
      capacity,
      tokens_tx,
      tokens_rx,
      inflight_count: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// 当前已准入但尚未释放的槽位数
  pub fn outstanding(&self) -> usize {
    self.capacity - self.tokens_rx.len()
  }

  /// 轮转计数，达到容量后回到 0，仅作记录用途
  pub fn inflight_count(&self) -> usize {
    self.inflight_count.load(Ordering::Acquire)
  }

  /// 阻塞直到获得一个槽位
  pub fn admit(&self) -> Permit {
    if self.tokens_rx.is_empty() {
      debug!("在途推理已满 ({}), 等待槽位释放", self.capacity);
    }
    // 控制器自身持有发送端，接收不会因断开而失败
    let _ = self.tokens_rx.recv();
    self.grant()
  }

  /// 非阻塞准入，桶空时返回 `None`
  pub fn try_admit(&self) -> Option<Permit> {
    self.tokens_rx.try_recv().ok().map(|()| self.grant())
  }

  fn grant(&self) -> Permit {
    let capacity = self.capacity;
    let _ = self
      .inflight_count
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
        let next = count + 1;
        Some(if next >= capacity { 0 } else { next })
      });
    debug!("获得推理槽位, 在途 {}/{}", self.outstanding(), capacity);
    Permit {
      tokens: self.tokens_tx.clone(),
    }
  }
}

/// 一个在途推理槽位，析构时归还令牌
#[must_use = "释放 Permit 会立即归还槽位"]
pub struct Permit {
  tokens: Sender<()>,
}

impl Permit {
  /// 显式归还槽位
  pub fn release(self) {}
}

impl std::fmt::Debug for Permit {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("Permit")
  }
}

impl Drop for Permit {
  fn drop(&mut self) {
    // 令牌总数等于桶容量，归还不会溢出
    if self.tokens.try_send(()).is_err() {
      warn!("归还推理槽位失败");
    }
  }
}
