//! 페이지 싱크 — 생산자 측 유한 버퍼 입구
//!
//! [`PageSink`]는 생산자 루틴에 전달되는 핸들입니다. 생산자는 페이지가
//! 만들어질 때마다 [`PageSink::push`]를 호출하고, 페이지 도중에는
//! [`PageSink::progress`]로 진행률을 보고합니다.
//!
//! # 배압
//! 싱크는 최대 `page_buffer_capacity`개의 페이지만 버퍼링합니다.
//! 버퍼가 가득 차면 `push`는 소비자가 자리를 비울 때까지 생산자를
//! 중단시킵니다.
//!
//! # 취소
//! 소비자가 시퀀스를 닫으면 다음 `push`가 [`SinkClosed`]를 반환합니다.
//! 생산자는 이를 관측하면 페이지 생산을 멈추고 정상 반환해야 합니다.
//! 선점 취소가 아니므로 즉시 관측을 요구하지 않습니다.

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use scanpost_core::event::{PageItem, ProgressEvent};
use scanpost_core::metrics as m;

use crate::error::SinkClosed;

/// 생산자에게 전달되는 싱크 핸들
pub struct PageSink {
    tx: mpsc::Sender<PageItem>,
    progress_tx: broadcast::Sender<ProgressEvent>,
    cancel: CancellationToken,
    next_seq: AtomicU32,
}

impl PageSink {
    pub(crate) fn new(
        tx: mpsc::Sender<PageItem>,
        progress_tx: broadcast::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tx,
            progress_tx,
            cancel,
            next_seq: AtomicU32::new(0),
        }
    }

    /// 페이지 한 장을 싱크에 넣습니다.
    ///
    /// 버퍼가 가득 차 있으면 자리가 날 때까지 중단됩니다. 전달에
    /// 성공하면 부여된 시퀀스 번호를 반환하고 페이지 종료 진행률
    /// 이벤트를 발행합니다.
    pub async fn push(&self, data: Bytes) -> Result<u32, SinkClosed> {
        if self.cancel.is_cancelled() {
            return Err(SinkClosed);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let item = PageItem::new(seq, data);

        tokio::select! {
            _ = self.cancel.cancelled() => Err(SinkClosed),
            sent = self.tx.send(item) => match sent {
                Ok(()) => {
                    metrics::counter!(m::PIPELINE_PAGES_PRODUCED_TOTAL).increment(1);
                    let _ = self.progress_tx.send(ProgressEvent::PageEnd);
                    Ok(seq)
                }
                Err(_) => Err(SinkClosed),
            },
        }
    }

    /// 현재 페이지의 진행률을 보고합니다 (0.0 ~ 1.0).
    ///
    /// 구독자가 없으면 조용히 무시됩니다. 중단되지 않습니다.
    pub fn progress(&self, fraction: f64) {
        let _ = self
            .progress_tx
            .send(ProgressEvent::Page(fraction.clamp(0.0, 1.0)));
    }

    /// 취소 요청 여부를 반환합니다.
    ///
    /// 페이지 사이의 긴 작업 중간에 생산자가 직접 확인할 수 있습니다.
    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
