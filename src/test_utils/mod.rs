//! Test utilities and mock implementations.
//!
//! This module provides reusable mock implementations of domain traits
//! for use in unit and integration tests.

pub mod mocks;

pub use mocks::{
    BuildCall, EVM_NETWORK, EVM_USDC, MOVE_NETWORK, MOVE_USDC, MockChainAdapter, SOLANA_NETWORK,
    SOLANA_USDC, sample_parties, sample_registry,
};
