pub mod context;
pub mod items;
pub mod liveness;
pub mod preview;
pub mod readiness;
