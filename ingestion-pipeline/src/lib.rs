#![allow(clippy::missing_docs_in_private_items)]

pub mod detector;
pub mod extraction;
pub mod ocr;
pub mod repository;
