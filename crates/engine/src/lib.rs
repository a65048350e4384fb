//! # terrashade engine
//!
//! Chunked moving-window machinery shared by the shading algorithms.
//!
//! This crate provides:
//! - [`ViewPair`]: matching shifted/center windows for neighbor arithmetic
//! - [`ChunkPlan`]: partitioning of a grid into overlapping chunks
//! - [`DemSource`]: windowed access to an in-memory or on-disk DEM
//! - [`RasterBuffer`]: DEM access plus in-memory or streamed output
//! - [`EngineSettings`], [`Feedback`] and DEM inspection

pub mod buffer;
pub mod dem;
pub mod feedback;
pub mod scratch;
pub mod settings;
pub mod source;
pub mod view;
pub mod window;

pub use buffer::{AccumulateMode, OutputSpec, RasterBuffer};
pub use dem::{deg_to_m, DemInfo, DemWarning};
pub use feedback::{CancelFlag, Feedback, Silent};
pub use settings::EngineSettings;
pub use source::DemSource;
pub use view::{Span, ViewPair, Window};
pub use window::{Chunk, ChunkAxis, ChunkPlan, Chunks};
