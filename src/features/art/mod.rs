//! 字符画：外部渲染器、ANSI → HTML 转换与 HTTP 网关

pub mod handler;
pub mod renderer;
pub mod transcoder;

pub use handler::create_art_router;
pub use renderer::{ArtRenderer, ProcessRenderer, RenderError};
pub use transcoder::to_markup;
