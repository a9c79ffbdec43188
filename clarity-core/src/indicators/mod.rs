//! Indicators computed over store tables.

pub mod fractal;

pub use fractal::{fractal_flags, williams_fractal, FractalError, FractalQuery};
