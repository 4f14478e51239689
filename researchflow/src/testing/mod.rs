//! Test doubles for pipeline constructs and collaborators.

pub mod mocks;

pub use mocks::{
    FailingStep, FlakyStep, MockStep, NeverStep, PermissiveValidator, StaticLanguageModel,
    StaticSearchProvider,
};
