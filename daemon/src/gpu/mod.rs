/// GPU rendering using wgpu
///
/// Architecture:
/// - `context`: wgpu adapter/device/queue plus the shared shader and layouts
/// - `drawable`: one presentable surface per output, with its frame texture
/// - `pipeline_builder`: render pipeline creation helpers
pub mod context;
pub mod drawable;
pub mod pipeline_builder;

pub use context::GpuContext;
pub use drawable::{Drawable, create_wgpu_surface};
