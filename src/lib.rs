//! Converts reference genomes, ChIP-seq peak calls and single-cell RNA/ATAC
//! matrices into gzip-compressed JSON-lines node and edge streams for bulk
//! loading into a property graph.

pub mod adapter;
pub mod adapters;
pub mod annotation;
pub mod app;
pub mod config;
pub mod domain;
pub mod emitter;
pub mod error;
pub mod ident;
pub mod matrix;
pub mod object;
pub mod output;
pub mod record;
pub mod schema;
pub mod service;
pub mod store;
pub mod writer;
