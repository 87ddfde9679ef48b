//! Shared test utilities for fileforge integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring the full stack (database, storage, queue, service,
//!   runner) over temp directories
//! - Builders producing real PDF/PNG/JPEG/DOCX input bytes

pub mod builders;
pub mod harness;

#[allow(unused_imports)]
pub use builders::{docx_bytes, jpeg_bytes, pdf_bytes, png_bytes};
pub use harness::TestHarness;
