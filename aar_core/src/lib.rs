pub mod block;
pub mod codec;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod format;
pub mod output;
pub mod pool;
pub mod progress;
pub mod task;

pub use codec::Codec;
pub use decoder::{DecodeReport, Decoder};
pub use encoder::{EncodeReport, Encoder};
pub use error::{AarError, ErrorKind, Result};
pub use format::{EXTENSION, NUM_BLOCKS};
pub use pool::{PoolStats, WorkerPool};
pub use progress::{NoProgress, ProgressSink};
pub use task::{
    BatchHandle, BatchSummary, ErrorPolicy, FileStep, NoObserver, Progress, StepReport,
    TaskObserver, TaskRunner, TaskState, TaskStatus,
};
