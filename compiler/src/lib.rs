// dflc — Dataflow diagram compiler
//
// Library root. Phases in pipeline order: lexer → parser → registry →
// resolve → expand → check → signature, then dot → render. `pipeline`
// strings them together; `serve` exposes them over HTTP.

pub mod ast;
pub mod check;
pub mod config;
pub mod diag;
pub mod dot;
pub mod expand;
pub mod lexer;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod port_graph;
pub mod primitive;
pub mod registry;
pub mod render;
pub mod resolve;
pub mod serve;
pub mod signature;
