//! SPM Edge - document processing pipeline for sales performance management.
//!
//! Ingests heterogeneous documents (PDF, DOCX, XLSX, PPTX, plain text),
//! extracts and structures their content, cleans and sections them with
//! rule-driven processing, dispatches them through an LLM for structured
//! extraction, and indexes the results for hybrid retrieval.

pub mod cli;
pub mod config;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod rag;
pub mod repository;
