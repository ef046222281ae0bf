//! EC2 security group client
//!
//! The contract the managed control plane controller uses to talk to EC2,
//! the request/response models it exchanges, and error classification.
//!
//! # Features
//!
//! - **Pagination**: `describe_all_security_groups` follows continuation tokens
//! - **Error classification**: tell "already gone" apart from real failures
//! - **test-util**: an in-memory [`MockEc2Client`] for unit tests

pub mod error;
pub mod filter;
pub mod models;
#[path = "trait.rs"]
pub mod ec2_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use ec2_trait::Ec2ClientTrait;
pub use error::{Ec2Error, codes, ignore_security_group_not_found};
pub use models::*;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{Ec2Call, Ec2Operation, MockEc2Client};
