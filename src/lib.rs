//! Traffic violation pipeline: plate extraction from OCR text, jurisdiction
//! routing, owner enrichment and persistence with at-least-once queues.

#[macro_use]
extern crate failure;

pub mod config;
pub mod db;
pub mod detector;
pub mod error;
pub mod metadata;
pub mod notifier;
pub mod ocr;
pub mod orchestrator;
pub mod persister;
pub mod queue;
pub mod reader;
pub mod reference;
pub mod router;
pub mod types;
pub mod webhook;
pub mod worker;
