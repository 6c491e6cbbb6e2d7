//! Docguard - client-side admission control for document database calls
//!
//! This crate places a rate limiter in front of a document store. Every read
//! or write is registered with a two-tier sliding-window limiter (global and
//! per-resource) and is rejected, delayed, or logged when over budget before
//! it ever reaches the store.

pub mod config;
pub mod error;
pub mod guard;
pub mod ratelimit;
pub mod store;
