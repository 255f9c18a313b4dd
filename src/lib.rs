#![allow(clippy::too_many_arguments, clippy::missing_safety_doc)]

pub mod assets;
pub mod renderer;
pub mod vulkan;
