// Trigger evaluation: decides, from recurring day/time slots, exactly which
// specs fire on a given tick, exactly once per minute bucket.

pub mod engine;
pub mod evaluator;
pub mod watermark;

pub use engine::{TriggerEngine, TriggerEngineConfig, TriggerLoop};
pub use evaluator::{minute_bucket, TriggerEvaluator};
pub use watermark::{InMemoryWatermarkStore, RedisWatermarkStore, WatermarkStore};
