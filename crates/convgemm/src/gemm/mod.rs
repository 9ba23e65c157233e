//! Tiled, optionally split-K GEMM problems and the shared operand
//! finalisation every lowering goes through.

pub mod block_map;
pub mod plain;
pub mod problem;
pub mod split_k;
pub mod tile;

pub use block_map::BlockToCTileMap;
pub use plain::{
    make_gemm_problem, make_transposed_gemm_problem, GemmLayout, GemmLayouts, GemmShape,
    StridedBatchOffsets, TransposedGemmShape, TransposedOutput,
};
pub use problem::{GemmProblem, GemmSizes};
pub use split_k::{SplitK, SplitKPlan};
pub use tile::{GemmSpecialization, TileConfig};
