//! Frame pipeline: camera → normalize → encode → single-slot cell.

pub mod capture;
pub mod cell;
pub mod encode;
pub mod normalize;
