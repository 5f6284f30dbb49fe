//! network address types shared by the session engine.
//!
//! This crate only keeps the `address` module of the wider network crate
//! it was trimmed from: the session engine needs `Authority` parsing (for
//! `Peer` targets and `Host:` header matching) and nothing else from the
//! original's connector/DNS/proxy machinery.

#![cfg_attr(not(test), warn(clippy::print_stdout, clippy::dbg_macro))]

pub mod address;
