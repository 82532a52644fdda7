pub mod binarize;
pub mod edges;
pub mod raster;
