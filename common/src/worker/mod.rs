// Worker module for job consumption and execution

pub mod consumer;
pub mod processor;

pub use consumer::WorkerJobConsumer;
pub use processor::JobProcessor;
