// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod config;
pub mod inetstack;
pub mod runtime;

pub use self::{
    config::Config,
    inetstack::protocols::tcp::{
        SeqNumber,
        SharedTcpPeer,
        State,
    },
    runtime::{
        fail::Fail,
        network::types::MacAddress,
        QDesc,
    },
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equal, returning an [anyhow::Error] that carries both values otherwise.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr) => ({
        match (&$left, &$right) {
            (left_val, right_val) => {
                ::anyhow::ensure!(
                    *left_val == *right_val,
                    "ensure_eq failed: `(left == right)` left: `{:?}`, right: `{:?}`",
                    left_val,
                    right_val
                );
            }
        }
    });
    ($left:expr, $right:expr, $($arg:tt)+) => ({
        match (&$left, &$right) {
            (left_val, right_val) => {
                ::anyhow::ensure!(
                    *left_val == *right_val,
                    "ensure_eq failed: `(left == right)` left: `{:?}`, right: `{:?}`: {}",
                    left_val,
                    right_val,
                    format_args!($($arg)+)
                );
            }
        }
    });
}

/// Ensures that two expressions are not equal, returning an [anyhow::Error] that carries both values otherwise.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr) => ({
        match (&$left, &$right) {
            (left_val, right_val) => {
                ::anyhow::ensure!(
                    *left_val != *right_val,
                    "ensure_neq failed: `(left != right)` left: `{:?}`, right: `{:?}`",
                    left_val,
                    right_val
                );
            }
        }
    });
    ($left:expr, $right:expr, $($arg:tt)+) => ({
        match (&$left, &$right) {
            (left_val, right_val) => {
                ::anyhow::ensure!(
                    *left_val != *right_val,
                    "ensure_neq failed: `(left != right)` left: `{:?}`, right: `{:?}`: {}",
                    left_val,
                    right_val,
                    format_args!($($arg)+)
                );
            }
        }
    });
}
