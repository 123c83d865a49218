// Domain layer: tables, geometry catalog and ports. No I/O here.

pub mod geometry;
pub mod model;
pub mod ports;
