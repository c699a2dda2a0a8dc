#![allow(clippy::missing_docs_in_private_items)]

pub mod renderer;
pub mod state;
