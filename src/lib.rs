pub mod access;
pub mod approval;
pub mod collaborators;
pub mod config;
pub mod derivation;
pub mod document;
pub mod editor;
pub mod error;
pub mod events;
pub mod guard;
pub mod issuance;
pub mod lifecycle;
pub mod service;
pub mod store;
pub mod utils;
pub mod validation;
