use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// 摄取统计，在关闭时返回
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// 从事件源读到的报文数
    pub received: u64,
    pub applied: u64,
    /// 未知事件类型
    pub skipped: u64,
    pub malformed: u64,
    /// 重试耗尽或遇到非瞬时错误
    pub failed: u64,
}

#[derive(Debug, Default)]
pub(crate) struct IngestCounters {
    received: AtomicU64,
    applied: AtomicU64,
    skipped: AtomicU64,
    malformed: AtomicU64,
    failed: AtomicU64,
}

impl IngestCounters {
    pub(crate) fn received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("ingest_events_applied_total").increment(1);
    }

    pub(crate) fn skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("ingest_events_malformed_total").increment(1);
    }

    pub(crate) fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("ingest_events_failed_total").increment(1);
    }

    pub(crate) fn snapshot(&self) -> IngestStats {
        IngestStats {
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
