pub mod catalog;
pub mod compound;
pub mod discovery;
pub mod export;
pub mod geometry;
pub mod jobs;
pub mod naming;
pub mod raster;
pub mod selection;
pub mod store;
pub mod territory;
pub mod vector;
pub mod zonal;
