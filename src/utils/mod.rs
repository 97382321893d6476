pub mod adt;
pub mod fmgr;
