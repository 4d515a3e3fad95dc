//! Batch mutation processing, the action runner, bounded history, and the
//! undo engine (spec sections 4.9-4.12).

mod batch;
mod history;
mod runner;
mod undo;

pub use batch::{BatchOptions, BatchProcessor, BatchResult, BatchTask};
pub use history::{ActionHistory, SharedActionHistory};
pub use runner::ActionRunner;
pub use undo::{UndoEngine, UndoResult};
