pub mod async_worker;
pub mod read_collector;
pub mod sample_info;
pub mod variant_builder;
pub mod variant_store;
pub mod window;
pub mod window_builder;

pub use async_worker::{AsyncWorker, WorkerResult};
pub use read_collector::{ReadCollector, ReadCollectorParams};
pub use sample_info::SampleInfo;
pub use variant_builder::{StatusCode, VariantBuilder, VariantBuilderParams};
pub use variant_store::VariantStore;
pub use window::{Region, Window};
pub use window_builder::{WindowBuilder, WindowBuilderParams};
