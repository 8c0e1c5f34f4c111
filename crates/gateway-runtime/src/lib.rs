// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Adapter and sink lifecycle, backpressure, batching, and retry runtime
//!.

pub mod adapter;
pub mod batch;
pub mod filter;
pub mod message;
pub mod sink;

pub use adapter::{AdapterRuntime, AdapterRuntimeOptions};
pub use batch::BatchBuffer;
pub use message::{decode, DecodeError};
pub use sink::SinkRuntime;
