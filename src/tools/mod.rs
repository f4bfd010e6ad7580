pub mod batch;
pub mod lookup;
