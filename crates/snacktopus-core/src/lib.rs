//! Durable workflow runtime and port trait definitions for Operation Snacktopus.
//!
//! This crate defines the "ports" (repository, state store, publisher and
//! secret traits) that the infrastructure layer implements, plus the replay
//! engine that hosts the Snacktopus workflows. It depends only on
//! `snacktopus-types` -- never on `snacktopus-infra` or any database/IO crate.

pub mod event;
pub mod pubsub;
pub mod repository;
pub mod service;
pub mod storage;
pub mod workflow;
