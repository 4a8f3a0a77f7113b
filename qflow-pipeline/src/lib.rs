//! Pipeline scheduling for the qflow amplitude dataflow engine
//!
//! Builds and evaluates dataflow graphs whose nodes run kernels over pooled
//! buffers:
//!
//! - [`BufferPool`]: per-shape free lists so repeated runs reuse buffers
//! - [`PoolContext`]: the pool, dispatcher and node-id counter of one
//!   simulation, passed explicitly to every node
//! - [`graph`]: node construction and the dependency-ordered scheduler
//! - [`reduction`]: kernel chains for marginal probabilities and reduced
//!   density matrices
//! - [`decode`]: turning readback data into amplitudes, probabilities and
//!   density matrices
//! - [`StateTimeline`]: stages and display requests over one register
//!
//! # Example
//!
//! ```
//! use qflow_core::{Amplitude, ControlMask};
//! use qflow_kernels::Kernel;
//! use qflow_pipeline::{PipelineConfig, PoolContext, StateTimeline};
//!
//! let ctx = PoolContext::cpu(PipelineConfig::default()).unwrap();
//! let mut timeline = StateTimeline::new(&ctx, 1, 0).unwrap();
//!
//! let h = std::f32::consts::FRAC_1_SQRT_2;
//! let hadamard = Kernel::matrix(
//!     0,
//!     1,
//!     vec![
//!         Amplitude::new(h, 0.0),
//!         Amplitude::new(h, 0.0),
//!         Amplitude::new(h, 0.0),
//!         Amplitude::new(-h, 0.0),
//!     ],
//!     ControlMask::NONE,
//! )
//! .unwrap();
//! let stage = timeline.apply(hadamard).unwrap();
//! let request = timeline.request_probabilities(stage, ControlMask::NONE, 0..1).unwrap();
//!
//! let results = timeline.run().unwrap();
//! let p = results.probabilities(request).unwrap();
//! assert!((p[0] - 0.5).abs() < 1e-6);
//! ```

pub mod config;
pub mod context;
pub mod decode;
pub mod error;
pub mod graph;
pub mod pool;
pub mod reduction;
pub mod timeline;

pub use config::PipelineConfig;
pub use context::{BufferNode, PoolContext};
pub use decode::{decode_amplitudes, decode_density_matrix, decode_probabilities, encode_amplitudes, DensityMatrix};
pub use error::{ErrorSeverity, PipelineError, Result};
pub use graph::{evaluate, GraphBuilder, NodeId, PipelineNode};
pub use pool::BufferPool;
pub use reduction::{attach_steps, build_reduction, run_steps, ReductionKind, ReductionStep};
pub use timeline::{DisplayValue, RequestId, StageId, StateTimeline, TimelineResults};
