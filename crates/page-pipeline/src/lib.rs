#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`sink`]: 생산자 측 유한 버퍼 입구 (`PageSink`)
//! - [`producer`]: 생산자 실행과 풀 방식 시퀀스 (`run_producer`, `PageStream`)
//! - [`job`]: 표준 `ScanJob` 구현 (`PipelineJob`)
//! - [`config`]: 파이프라인 설정 (core 설정 확장)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! producer --push--> PageSink --mpsc(bounded)--> PageStream --pull--> consumer
//!     |                  |                           |
//!  progress()       ProgressEvent              PipelineJob (상태 기계)
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod producer;
pub mod sink;

// --- 주요 타입 re-export ---

// 잡
pub use job::{PipelineJob, PipelineJobBuilder};

// 생산자/시퀀스
pub use producer::{OutcomeKind, PageProducer, PageStream, run_producer};

// 싱크
pub use sink::PageSink;

// 설정
pub use config::PipelineConfig;

// 에러
pub use error::{PagePipelineError, SinkClosed};
