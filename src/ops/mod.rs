pub mod bucketing;
pub mod layer_search;
pub mod optimizer;
pub mod simulate;
pub mod strokes;
