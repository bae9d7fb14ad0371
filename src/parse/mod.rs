pub mod ply;
pub mod ply_mesh;
pub mod ppm;
